use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pacing of the batch-ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestPolicy {
    /// Pause before the next batch after a `partial` response.
    #[serde(default = "default_continuation_delay_ms")]
    pub continuation_delay_ms: u64,
    /// Seconds to wait after a `rate_limited` response.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Length of one cooldown countdown step.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

const fn default_continuation_delay_ms() -> u64 {
    1_000
}

const fn default_cooldown_secs() -> u64 {
    70
}

const fn default_tick_ms() -> u64 {
    1_000
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            continuation_delay_ms: default_continuation_delay_ms(),
            cooldown_secs: default_cooldown_secs(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl IngestPolicy {
    pub fn with_continuation_delay_ms(mut self, ms: u64) -> Self {
        self.continuation_delay_ms = ms;
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn continuation_delay(&self) -> Duration {
        Duration::from_millis(self.continuation_delay_ms)
    }

    /// A zero tick would spin, so it is clamped to one millisecond.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_rate_limits() {
        let policy = IngestPolicy::default();
        assert_eq!(policy.continuation_delay(), Duration::from_secs(1));
        assert_eq!(policy.cooldown_secs, 70);
        assert_eq!(policy.tick(), Duration::from_secs(1));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let policy: IngestPolicy = serde_json::from_str(r#"{"cooldown_secs": 5}"#).expect("policy");
        assert_eq!(policy.cooldown_secs, 5);
        assert_eq!(policy.continuation_delay_ms, 1_000);
        assert_eq!(IngestPolicy { tick_ms: 0, ..policy }.tick(), Duration::from_millis(1));
    }

    #[test]
    fn builders_override_single_fields() {
        let policy = IngestPolicy::default()
            .with_continuation_delay_ms(250)
            .with_cooldown_secs(3);
        assert_eq!(policy.continuation_delay(), Duration::from_millis(250));
        assert_eq!(policy.cooldown_secs, 3);
        assert_eq!(policy.tick_ms, 1_000);
    }
}
