//! Terminal front end for the admin console: chat with the model and drive
//! knowledge-base ingestion.

mod env;
mod terminal;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console_harness::observability::init_observability;
use console_harness::{
    ChatStream, Console, ConsoleConfig, Conversation, IngestOutcome, StreamEvent,
};
use tracing::info;

use crate::terminal::TerminalPresentation;

#[derive(Parser, Debug)]
#[command(name = "console-cli", about = "Admin console chat and ingestion client")]
struct Cli {
    /// Backend origin; overrides CONSOLE_BASE_URL.
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Delay between revealed characters in milliseconds.
    #[arg(long, global = true)]
    reveal_ms: Option<u64>,
    /// Report JSON metadata lines instead of printing them.
    #[arg(long, global = true)]
    metadata_frames: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream an answer from the admin chat endpoint.
    Chat { prompt: Vec<String> },
    /// Ask through the buffered chat endpoint.
    Ask { prompt: Vec<String> },
    /// Print ingestion counters.
    Stats,
    /// Ingest until the backend reports nothing remaining.
    Ingest {
        /// Pause between two partial batches in milliseconds.
        #[arg(long)]
        continuation_ms: Option<u64>,
        /// Seconds to wait after the backend reports a rate limit.
        #[arg(long)]
        cooldown_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env::init();
    init_observability();
    let cli = Cli::parse();

    let mut config = match cli.base_url {
        Some(base_url) => {
            let mut config = ConsoleConfig::new(base_url);
            if let Ok(token) = std::env::var("CONSOLE_API_TOKEN") {
                config = config.api_token(token);
            }
            config
        }
        None => ConsoleConfig::from_env()?,
    };
    let mut stream = config.stream.clone().with_metadata_frames(cli.metadata_frames);
    if let Some(ms) = cli.reveal_ms {
        stream.reveal_interval_ms = ms;
    }
    config = config.stream_options(stream);
    if let Command::Ingest {
        continuation_ms,
        cooldown_secs,
    } = &cli.command
    {
        let mut policy = config.ingest.clone();
        if let Some(ms) = continuation_ms {
            policy = policy.with_continuation_delay_ms(*ms);
        }
        if let Some(secs) = cooldown_secs {
            policy = policy.with_cooldown_secs(*secs);
        }
        config = config.ingest_policy(policy);
    }

    let console = Console::new(config)?.presentation(Arc::new(TerminalPresentation));

    match cli.command {
        Command::Chat { prompt } => {
            let mut conversation = Conversation::new();
            let stream = console.stream_chat(&mut conversation, &prompt.join(" "))?;
            if !follow(stream, &mut conversation).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Ask { prompt } => {
            let mut conversation = Conversation::new();
            let stream = console.ask(&mut conversation, &prompt.join(" "))?;
            if !follow(stream, &mut conversation).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Stats => {
            let state = console.stats().await?;
            println!(
                "total: {}\ningested: {}\nremaining: {}",
                state.total_items, state.ingested_count, state.remaining_count
            );
        }
        Command::Ingest { .. } => {
            let mut ingestion = console.ingestion().await;
            let abort = ingestion.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    abort.abort();
                }
            });
            if !ingest_succeeded(&ingestion.run().await) {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// A failure was already reported through the presentation, so only the
/// exit status is left to decide.
fn ingest_succeeded(outcome: &IngestOutcome) -> bool {
    match outcome {
        IngestOutcome::Failed(_) => false,
        IngestOutcome::Cancelled => {
            eprintln!("\ningestion cancelled");
            true
        }
        IngestOutcome::Done | IngestOutcome::NothingToDo => true,
    }
}

/// Follows one stream to its end, cancelling it on Ctrl-C. Returns false
/// when the stream failed.
async fn follow(mut stream: ChatStream, conversation: &mut Conversation) -> bool {
    let abort = stream.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let mut failed = false;
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Metadata(value) => info!(%value, "stream metadata"),
            StreamEvent::StreamFailed(_) => failed = true,
            _ => {}
        }
    }
    ctrl_c.abort();

    if let Some(message) = stream.finish().await {
        info!(message_id = %message.id(), chars = message.text().chars().count(), "answer stored");
        conversation.commit(message);
    }
    !failed
}
