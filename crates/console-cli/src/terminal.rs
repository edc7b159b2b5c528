use std::io::Write as _;

use console_harness::{IngestionState, Presentation};

/// Writes revealed text to stdout and everything else to stderr.
#[derive(Debug, Default)]
pub struct TerminalPresentation;

impl Presentation for TerminalPresentation {
    fn on_message_start(&self) {
        eprintln!("... waiting for the assistant");
    }

    fn on_status(&self, label: &str) {
        eprintln!("[{label}]");
    }

    fn on_append(&self, ch: char) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{ch}");
        let _ = out.flush();
    }

    fn on_stream_end(&self) {
        println!();
    }

    fn on_stream_error(&self, message: &str) {
        println!();
        eprintln!("stream failed: {message}");
    }

    fn on_ingest_progress(&self, state: IngestionState) {
        eprintln!(
            "ingested {}/{} ({} remaining)",
            state.ingested_count, state.total_items, state.remaining_count
        );
    }

    fn on_ingest_done(&self) {
        eprintln!("ingestion complete");
    }

    fn on_ingest_failed(&self, message: &str) {
        eprintln!("ingestion stopped: {message}");
    }

    fn on_cooldown_tick(&self, seconds_left: u64) {
        if seconds_left == 0 {
            eprintln!("\rrate limited, resuming now   ");
        } else {
            eprint!("\rrate limited, resuming in {seconds_left:>2}s");
        }
    }

    fn on_notice(&self, message: &str) {
        eprintln!("{message}");
    }
}
