use std::time::Duration;

/// Errors returned by a `Transport` before they are turned into terminal
/// stream or ingestion transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection dropped before a
    /// response status arrived.
    #[error("request to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },
    /// The backend answered with a non-success HTTP status.
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// Reading the response body failed mid-way.
    #[error("reading response from {endpoint} failed: {message}")]
    Read { endpoint: String, message: String },
    /// The response body was not the JSON shape the caller expected.
    #[error("invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl TransportError {
    /// Creates a connection-level error.
    pub fn connect(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates a body read error.
    pub fn read(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Read {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a body decode error.
    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Returns the endpoint the failed request targeted.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Connect { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Read { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }

    /// Returns the HTTP status when the backend answered with one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Terminal stream failure carried by `StreamEvent::StreamFailed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFailure {
    /// Opening or reading the stream failed.
    #[error(transparent)]
    Transport(TransportError),
    /// The upstream closed the stream without sending any payload text.
    #[error("stream ended without a response")]
    NoPayload,
    /// No payload text arrived within the configured first-payload window.
    #[error("no response within {}s", waited.as_secs())]
    PayloadTimeout { waited: Duration },
    /// The buffered chat endpoint answered but refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl StreamFailure {
    /// Returns true for failures where the transport worked but the upstream
    /// never produced a usable answer.
    pub fn is_protocol_anomaly(&self) -> bool {
        matches!(self, Self::NoPayload | Self::PayloadTimeout { .. })
    }
}

impl From<TransportError> for StreamFailure {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// Terminal ingestion failure; the loop goes back to idle and waits for an
/// explicit restart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestFailure {
    /// The batch request could not be completed.
    #[error(transparent)]
    Transport(TransportError),
    /// The batch response was malformed or carried an unknown status.
    #[error("unexpected ingestion response: {0}")]
    Protocol(String),
}

impl From<TransportError> for IngestFailure {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// Top-level error type for the public console API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// Invalid console or transport configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (for example a blank prompt).
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport error surfaced outside the stream and ingestion components.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ConsoleError {
    fn from(value: TransportError) -> Self {
        ConsoleError::Transport(value)
    }
}
