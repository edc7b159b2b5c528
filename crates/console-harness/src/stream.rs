use crate::errors::StreamFailure;
use crate::sentinel::Sentinel;

/// Events produced by one chat stream, in the order the bytes were read.
///
/// At most one `StreamEnded` or `StreamFailed` closes the sequence; a
/// cancelled stream emits neither.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A control segment switched the upstream status. The display label is
    /// `sentinel.label()`; heartbeats have none.
    StatusChanged(Sentinel),
    /// A payload segment, verbatim. The first one also cleared loading.
    TextAppended(String),
    /// Metadata line (only when metadata frames are enabled).
    Metadata(serde_json::Value),
    /// Upstream closed normally and every character has been revealed.
    StreamEnded,
    /// Terminal failure; the message now carries the fallback text.
    StreamFailed(StreamFailure),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnded | Self::StreamFailed(_))
    }
}
