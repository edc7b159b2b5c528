use serde::Deserialize;

use crate::errors::IngestFailure;

/// Progress counters reported by the backend.
///
/// After every successful batch `ingested_count + remaining_count ==
/// total_items`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionState {
    pub total_items: u64,
    pub ingested_count: u64,
    pub remaining_count: u64,
}

impl IngestionState {
    pub fn new(ingested_count: u64, remaining_count: u64) -> Self {
        Self {
            total_items: ingested_count.saturating_add(remaining_count),
            ingested_count,
            remaining_count,
        }
    }
}

impl From<&StatsResponse> for IngestionState {
    fn from(stats: &StatsResponse) -> Self {
        Self::new(stats.ingested, stats.remaining)
    }
}

/// Body of the stats endpoint. Missing counters read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StatsResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub ingested: u64,
    #[serde(default)]
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Done,
    Partial,
    RateLimited,
}

/// Validated body of one batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub status: BatchStatus,
    pub remaining: u64,
    pub total_ingested: u64,
    pub processed: Option<u64>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct RawBatchResponse {
    status: String,
    remaining: Option<u64>,
    total_ingested: Option<u64>,
    processed: Option<u64>,
    message: Option<String>,
}

impl BatchResponse {
    /// Parses a batch body. Unknown statuses and missing counters are
    /// protocol failures.
    pub fn from_json(value: serde_json::Value) -> Result<Self, IngestFailure> {
        let raw: RawBatchResponse = serde_json::from_value(value)
            .map_err(|e| IngestFailure::Protocol(format!("malformed batch response: {e}")))?;
        let status = match raw.status.as_str() {
            "done" => BatchStatus::Done,
            "partial" => BatchStatus::Partial,
            "rate_limited" => BatchStatus::RateLimited,
            other => {
                let detail = raw.message.as_deref().unwrap_or("no message");
                return Err(IngestFailure::Protocol(format!(
                    "status {other:?} ({detail})"
                )));
            }
        };
        let (Some(remaining), Some(total_ingested)) = (raw.remaining, raw.total_ingested) else {
            return Err(IngestFailure::Protocol(
                "batch response is missing remaining/total_ingested".into(),
            ));
        };
        Ok(Self {
            status,
            remaining,
            total_ingested,
            processed: raw.processed,
            message: raw.message,
        })
    }
}

/// Where the loop currently is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    /// Never started, or the last start was refused.
    #[default]
    Idle,
    /// A batch call is in flight.
    Running,
    /// Waiting for the continuation delay after a `partial` batch.
    Continuing,
    /// Rate limited; resumes when the countdown reaches zero.
    Cooldown { seconds_left: u64 },
    Done,
    Failed(IngestFailure),
    Cancelled,
}

impl Phase {
    /// True when no batch is in flight or scheduled.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Done | Self::Failed(_) | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestMsg {
    Start,
    BatchFinished(Result<BatchResponse, IngestFailure>),
    ContinuationElapsed,
    CooldownTick,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEffect {
    SendBatch,
    ScheduleContinuation,
    ScheduleTick,
    Progress(IngestionState),
    CooldownTick(u64),
    Done,
    Failed(String),
    Notice(String),
}

/// Pure ingestion state: phase, counters and the cooldown length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestMachine {
    phase: Phase,
    counters: IngestionState,
    cooldown_secs: u64,
}

impl Default for IngestMachine {
    fn default() -> Self {
        Self::new(IngestionState::default(), 70)
    }
}

impl IngestMachine {
    pub fn new(counters: IngestionState, cooldown_secs: u64) -> Self {
        Self {
            phase: Phase::Idle,
            counters,
            cooldown_secs,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn counters(&self) -> IngestionState {
        self.counters
    }
}

pub const NOTHING_TO_INGEST: &str = "nothing left to ingest";

/// Applies one message and returns the effects the driver must perform, in
/// order.
pub fn update(mut machine: IngestMachine, msg: IngestMsg) -> (IngestMachine, Vec<IngestEffect>) {
    let effects = match (msg, machine.phase.clone()) {
        (IngestMsg::Start, phase) if phase.is_idle() => {
            if machine.counters.remaining_count == 0 {
                machine.phase = Phase::Idle;
                vec![IngestEffect::Notice(NOTHING_TO_INGEST.to_string())]
            } else {
                machine.phase = Phase::Running;
                vec![IngestEffect::SendBatch]
            }
        }
        (IngestMsg::BatchFinished(Ok(response)), Phase::Running) => {
            machine.counters = IngestionState::new(response.total_ingested, response.remaining);
            let progress = IngestEffect::Progress(machine.counters);
            match response.status {
                BatchStatus::Done => {
                    machine.phase = Phase::Done;
                    vec![progress, IngestEffect::Done]
                }
                BatchStatus::Partial => {
                    machine.phase = Phase::Continuing;
                    vec![progress, IngestEffect::ScheduleContinuation]
                }
                BatchStatus::RateLimited if machine.cooldown_secs == 0 => {
                    vec![progress, IngestEffect::SendBatch]
                }
                BatchStatus::RateLimited => {
                    machine.phase = Phase::Cooldown {
                        seconds_left: machine.cooldown_secs,
                    };
                    vec![progress, IngestEffect::ScheduleTick]
                }
            }
        }
        (IngestMsg::BatchFinished(Err(failure)), Phase::Running) => {
            let message = failure.to_string();
            machine.phase = Phase::Failed(failure);
            vec![IngestEffect::Failed(message)]
        }
        (IngestMsg::ContinuationElapsed, Phase::Continuing) => {
            machine.phase = Phase::Running;
            vec![IngestEffect::SendBatch]
        }
        (IngestMsg::CooldownTick, Phase::Cooldown { seconds_left }) => {
            let left = seconds_left.saturating_sub(1);
            if left == 0 {
                machine.phase = Phase::Running;
                vec![IngestEffect::CooldownTick(0), IngestEffect::SendBatch]
            } else {
                machine.phase = Phase::Cooldown { seconds_left: left };
                vec![IngestEffect::CooldownTick(left), IngestEffect::ScheduleTick]
            }
        }
        (IngestMsg::Cancel, phase) if !phase.is_idle() => {
            machine.phase = Phase::Cancelled;
            Vec::new()
        }
        // Stale timer or batch results after a transition are dropped.
        _ => Vec::new(),
    };

    (machine, effects)
}
