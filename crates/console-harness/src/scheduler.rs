//! Single-handle timers and abort signalling shared by the stream consumer and
//! the ingestion loop.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Sleep;

/// Handle used to request cancellation of a running stream or ingestion run.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The owner observes it at its next suspension point; nothing it
    /// schedules runs afterwards.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clears a consumed cancellation so the owner can run again.
    pub(crate) fn reset(&self) {
        self.tx.send_replace(false);
    }
}

/// Receiving side of an `AbortHandle`.
#[derive(Debug)]
pub(crate) struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Resolves once cancellation was requested. Never resolves if every
    /// handle is dropped without aborting.
    pub(crate) async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                pending::<()>().await;
            }
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }
}

pub(crate) fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// At most one pending deadline for one resource.
///
/// Arming an armed slot is refused, so a resource can never have two timers
/// outstanding. Dropping the slot drops the deadline with it.
#[derive(Debug, Default)]
pub struct TimerSlot {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the slot to fire after `after`. Returns false, leaving the
    /// existing deadline untouched, when the slot is already armed.
    pub fn arm(&mut self, after: Duration) -> bool {
        if self.sleep.is_some() {
            return false;
        }
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
        true
    }

    pub fn disarm(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Waits for the armed deadline and disarms the slot; pends forever when
    /// nothing is armed.
    ///
    /// Cancel-safe: dropping the future keeps the deadline armed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}
