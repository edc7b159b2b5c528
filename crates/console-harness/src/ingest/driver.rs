use std::collections::VecDeque;
use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info, warn};

use crate::config::Endpoints;
use crate::errors::IngestFailure;
use crate::ingest::machine::{
    BatchResponse, IngestEffect, IngestMachine, IngestMsg, IngestionState, Phase, StatsResponse,
    update,
};
use crate::ingest::policy::IngestPolicy;
use crate::presentation::Presentation;
use crate::scheduler::{AbortHandle, AbortSignal, TimerSlot, abort_pair};
use crate::transport::Transport;

/// How one `IngestionLoop::run` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The backend reported `done`.
    Done,
    /// A batch failed; the loop waits for an explicit restart.
    Failed(IngestFailure),
    /// Aborted during a batch, continuation wait or cooldown.
    Cancelled,
    /// Refused to start because nothing remained.
    NothingToDo,
}

/// Drives batch ingestion until the backend reports nothing remaining.
///
/// Exactly one batch call is in flight at a time: each call is awaited inline
/// and the next one is only scheduled from its response.
pub struct IngestionLoop {
    transport: Arc<dyn Transport>,
    presentation: Arc<dyn Presentation>,
    batch_endpoint: String,
    policy: IngestPolicy,
    machine: IngestMachine,
    abort: AbortHandle,
    signal: AbortSignal,
}

impl IngestionLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        presentation: Arc<dyn Presentation>,
        batch_endpoint: impl Into<String>,
        policy: IngestPolicy,
        counters: IngestionState,
    ) -> Self {
        let (abort, signal) = abort_pair();
        let machine = IngestMachine::new(counters, policy.cooldown_secs);
        Self {
            transport,
            presentation,
            batch_endpoint: batch_endpoint.into(),
            policy,
            machine,
            abort,
            signal,
        }
    }

    /// Creates a loop seeded from the stats endpoint. A failed stats request
    /// starts from zero counters.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        presentation: Arc<dyn Presentation>,
        endpoints: &Endpoints,
        policy: IngestPolicy,
    ) -> Self {
        let counters = match fetch_stats(transport.as_ref(), &endpoints.ingest_stats).await {
            Ok(stats) => {
                if stats.total != stats.ingested.saturating_add(stats.remaining) {
                    debug!(
                        total = stats.total,
                        ingested = stats.ingested,
                        remaining = stats.remaining,
                        "stats total disagrees with counters"
                    );
                }
                IngestionState::from(&stats)
            }
            Err(err) => {
                warn!(endpoint = %endpoints.ingest_stats, error = %err, "stats unavailable, starting from zero");
                IngestionState::default()
            }
        };
        Self::new(
            transport,
            presentation,
            endpoints.ingest_batch.clone(),
            policy,
            counters,
        )
    }

    pub fn state(&self) -> IngestionState {
        self.machine.counters()
    }

    pub fn phase(&self) -> &Phase {
        self.machine.phase()
    }

    /// Returns a handle that cancels the current run, or the next one when
    /// the loop is idle.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Runs batches until done, failed, cancelled or refused.
    ///
    /// Can be called again afterwards; it resumes from the last counters.
    pub async fn run(&mut self) -> IngestOutcome {
        let mut continuation = TimerSlot::new();
        let mut tick = TimerSlot::new();
        let mut inbox = VecDeque::from([IngestMsg::Start]);

        info!(
            remaining = self.machine.counters().remaining_count,
            total = self.machine.counters().total_items,
            "ingestion started"
        );

        loop {
            while let Some(msg) = inbox.pop_front() {
                for effect in self.apply(msg) {
                    match effect {
                        IngestEffect::SendBatch => {
                            let transport = Arc::clone(&self.transport);
                            let result = tokio::select! {
                                biased;
                                _ = self.signal.aborted() => None,
                                result = send_batch(transport.as_ref(), &self.batch_endpoint) => Some(result),
                            };
                            inbox.push_back(match result {
                                Some(result) => IngestMsg::BatchFinished(result),
                                None => IngestMsg::Cancel,
                            });
                        }
                        IngestEffect::ScheduleContinuation => {
                            continuation.arm(self.policy.continuation_delay());
                        }
                        IngestEffect::ScheduleTick => {
                            tick.arm(self.policy.tick());
                        }
                        IngestEffect::Progress(state) => {
                            self.presentation.on_ingest_progress(state);
                        }
                        IngestEffect::CooldownTick(seconds_left) => {
                            self.presentation.on_cooldown_tick(seconds_left);
                        }
                        IngestEffect::Done => self.presentation.on_ingest_done(),
                        IngestEffect::Failed(message) => {
                            self.presentation.on_ingest_failed(&message);
                        }
                        IngestEffect::Notice(message) => self.presentation.on_notice(&message),
                    }
                }
            }

            if self.machine.phase().is_idle() {
                return self.finish();
            }

            let msg = tokio::select! {
                biased;
                _ = self.signal.aborted() => IngestMsg::Cancel,
                _ = continuation.fired() => IngestMsg::ContinuationElapsed,
                _ = tick.fired() => IngestMsg::CooldownTick,
            };
            inbox.push_back(msg);
        }
    }

    fn apply(&mut self, msg: IngestMsg) -> Vec<IngestEffect> {
        let (machine, effects) = update(std::mem::take(&mut self.machine), msg);
        self.machine = machine;
        effects
    }

    fn finish(&mut self) -> IngestOutcome {
        let outcome = match self.machine.phase() {
            Phase::Done => IngestOutcome::Done,
            Phase::Failed(failure) => IngestOutcome::Failed(failure.clone()),
            Phase::Cancelled => IngestOutcome::Cancelled,
            _ => IngestOutcome::NothingToDo,
        };
        if self.signal.is_aborted() {
            self.abort.reset();
        }
        info!(?outcome, remaining = self.machine.counters().remaining_count, "ingestion stopped");
        outcome
    }
}

async fn send_batch(
    transport: &dyn Transport,
    endpoint: &str,
) -> Result<BatchResponse, IngestFailure> {
    let value = transport.send_json(endpoint, Method::POST, None).await?;
    let response = BatchResponse::from_json(value)?;
    debug!(
        endpoint,
        status = ?response.status,
        remaining = response.remaining,
        total_ingested = response.total_ingested,
        processed = ?response.processed,
        message = ?response.message,
        "batch finished"
    );
    Ok(response)
}

async fn fetch_stats(
    transport: &dyn Transport,
    endpoint: &str,
) -> Result<StatsResponse, IngestFailure> {
    let value = transport.send_json(endpoint, Method::GET, None).await?;
    serde_json::from_value(value)
        .map_err(|e| IngestFailure::Protocol(format!("malformed stats response: {e}")))
}
