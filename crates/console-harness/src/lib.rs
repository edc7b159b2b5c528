//! Client-side engine of the admin console: a sentinel-aware chat stream
//! consumer with a paced character drain, and a batch-ingestion loop that
//! backs off when the upstream is rate limited.
//!
//! # Streaming a chat answer
//!
//! ```no_run
//! use console_harness::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ConsoleError> {
//! let console = Console::new(ConsoleConfig::from_env()?)?;
//! let mut conversation = Conversation::new();
//!
//! let mut stream = console.stream_chat(&mut conversation, "How many reports are open?")?;
//! while let Some(event) = stream.next_event().await {
//!     if let StreamEvent::StatusChanged(sentinel) = event {
//!         println!("status: {:?}", sentinel.label());
//!     }
//! }
//! if let Some(message) = stream.finish().await {
//!     conversation.commit(message);
//! }
//! # Ok(())
//! # }
//! ```

/// Top-level console facade.
pub mod console;
/// Connection, endpoint and stream configuration.
pub mod config;
/// Stream consumer task and its handle.
pub mod consumer;
/// Paced character reveal.
pub mod drain;
/// Public error types.
pub mod errors;
/// Batch ingestion state machine and its driver.
pub mod ingest;
/// Messages and conversations.
pub mod message;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Display sink trait.
pub mod presentation;
/// Abort handles and single-slot timers.
pub mod scheduler;
/// Status tokens and stream segmentation.
pub mod sentinel;
/// Events emitted by a chat stream.
pub mod stream;
/// HTTP capability used by both subsystems.
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConsoleConfig, Endpoints, StreamOptions, TransportConfig};
pub use console::Console;
pub use consumer::{ChatStream, StreamConsumer};
pub use errors::{ConsoleError, IngestFailure, StreamFailure, TransportError};
pub use ingest::{IngestOutcome, IngestPolicy, IngestionLoop, IngestionState};
pub use message::{Conversation, Message, MessageId, Role};
pub use presentation::{Presentation, SilentPresentation};
pub use scheduler::{AbortHandle, TimerSlot};
pub use sentinel::Sentinel;
pub use stream::StreamEvent;
pub use transport::{ByteStream, ReqwestTransport, Transport};
