use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConsoleError;
use crate::ingest::IngestPolicy;

/// Connection settings for `ReqwestTransport`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportConfig {
    /// Backend origin, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// Bearer token attached to every request when set.
    pub api_token: Option<String>,
    /// Overall timeout for buffered requests. Streams are not bounded by it.
    pub request_timeout: Duration,
    /// Connect timeout for every request.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

/// Backend paths used by the console.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_stream_chat")]
    pub stream_chat: String,
    #[serde(default = "default_buffered_chat")]
    pub buffered_chat: String,
    #[serde(default = "default_ingest_batch")]
    pub ingest_batch: String,
    #[serde(default = "default_ingest_stats")]
    pub ingest_stats: String,
}

fn default_stream_chat() -> String {
    "/admin/ai/ask-admin".to_string()
}

fn default_buffered_chat() -> String {
    "/api/chats/ask-ai-admin".to_string()
}

fn default_ingest_batch() -> String {
    "/admin/ai/ingest-auto".to_string()
}

fn default_ingest_stats() -> String {
    "/admin/ai/stats".to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            stream_chat: default_stream_chat(),
            buffered_chat: default_buffered_chat(),
            ingest_batch: default_ingest_batch(),
            ingest_stats: default_ingest_stats(),
        }
    }
}

/// Tuning for one chat stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Delay between two revealed characters.
    #[serde(default = "default_reveal_interval_ms")]
    pub reveal_interval_ms: u64,
    /// Fails the stream when no payload arrived within this window.
    /// `None` waits forever.
    #[serde(default = "default_payload_timeout_secs")]
    pub payload_timeout_secs: Option<u64>,
    /// Report JSON `{"type": ...}` lines as metadata instead of payload.
    #[serde(default)]
    pub metadata_frames: bool,
}

const fn default_reveal_interval_ms() -> u64 {
    10
}

const fn default_payload_timeout_secs() -> Option<u64> {
    Some(300)
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reveal_interval_ms: default_reveal_interval_ms(),
            payload_timeout_secs: default_payload_timeout_secs(),
            metadata_frames: false,
        }
    }
}

impl StreamOptions {
    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms.max(1))
    }

    pub fn payload_timeout(&self) -> Option<Duration> {
        self.payload_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_payload_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.payload_timeout_secs = secs;
        self
    }

    pub fn with_metadata_frames(mut self, enabled: bool) -> Self {
        self.metadata_frames = enabled;
        self
    }
}

/// Everything a `Console` needs.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsoleConfig {
    pub transport: TransportConfig,
    pub endpoints: Endpoints,
    pub stream: StreamOptions,
    pub ingest: IngestPolicy,
}

impl ConsoleConfig {
    /// Creates a config with defaults for everything but the backend origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::new(base_url),
            endpoints: Endpoints::default(),
            stream: StreamOptions::default(),
            ingest: IngestPolicy::default(),
        }
    }

    /// Builds a config from `CONSOLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConsoleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConsoleError> {
        let base_url = lookup("CONSOLE_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ConsoleError::Config("missing CONSOLE_BASE_URL".into()));
        }
        let mut config = Self::new(base_url.trim());

        if let Some(token) = lookup("CONSOLE_API_TOKEN").filter(|t| !t.trim().is_empty()) {
            config.transport.api_token = Some(token.trim().to_string());
        }
        if let Some(secs) = parse_u64(&lookup, "CONSOLE_REQUEST_TIMEOUT_SECS")? {
            config.transport.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "CONSOLE_CONNECT_TIMEOUT_SECS")? {
            config.transport.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&lookup, "CONSOLE_REVEAL_INTERVAL_MS")? {
            config.stream.reveal_interval_ms = ms;
        }
        if let Some(secs) = parse_u64(&lookup, "CONSOLE_PAYLOAD_TIMEOUT_SECS")? {
            config.stream.payload_timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(config)
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.transport = self.transport.api_token(token);
        self
    }

    pub fn stream_options(mut self, options: StreamOptions) -> Self {
        self.stream = options;
        self
    }

    pub fn ingest_policy(mut self, policy: IngestPolicy) -> Self {
        self.ingest = policy;
        self
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConsoleError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConsoleError::Config(format!("{key} must be a whole number, got {raw:?}"))),
    }
}
