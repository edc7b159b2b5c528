use crate::ingest::IngestionState;

/// Display sink fed by the stream consumer and the ingestion loop.
///
/// Callbacks run on the component's own task, in event order. Every method
/// defaults to a no-op so a front end only implements what it shows.
pub trait Presentation: Send + Sync {
    /// A new assistant turn was created and is loading.
    fn on_message_start(&self) {}

    /// The upstream status label changed.
    fn on_status(&self, _label: &str) {}

    /// The drain revealed one more character.
    fn on_append(&self, _ch: char) {}

    /// The stream finished and its message is final.
    fn on_stream_end(&self) {}

    /// The stream failed; `message` is human readable.
    fn on_stream_error(&self, _message: &str) {}

    /// Counters changed after an ingestion step.
    fn on_ingest_progress(&self, _state: IngestionState) {}

    /// The backend reported that nothing remains.
    fn on_ingest_done(&self) {}

    /// Ingestion stopped on an error and waits for an explicit restart.
    fn on_ingest_failed(&self, _message: &str) {}

    /// One second of rate-limit cooldown elapsed.
    fn on_cooldown_tick(&self, _seconds_left: u64) {}

    /// Informational notice (for example a refused start with nothing to do).
    fn on_notice(&self, _message: &str) {}
}

/// Presentation that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPresentation;

impl Presentation for SilentPresentation {}
