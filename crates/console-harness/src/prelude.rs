//! Common imports for typical console usage.
pub use crate::{
    AbortHandle, ChatStream, Console, ConsoleConfig, ConsoleError, Conversation, IngestOutcome,
    IngestionLoop, IngestionState, Message, Presentation, Sentinel, StreamEvent, StreamFailure,
};
