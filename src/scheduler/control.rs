//! Cooperative pause and cancellation signals for a running job

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Safety-net poll while paused, in case a wakeup is missed
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Scheduler-side handle for signalling one job
#[derive(Debug)]
pub(crate) struct JobControl {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
}

impl JobControl {
    /// Cancelled along with `shutdown`
    pub fn new(shutdown: &CancellationToken) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            cancel: shutdown.child_token(),
            pause_tx,
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause_tx.send_replace(paused);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn gate(&self) -> PauseGate {
        PauseGate {
            paused: self.pause_tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Worker-side view of a job's pause and cancel state
#[derive(Debug, Clone)]
pub struct PauseGate {
    paused: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl PauseGate {
    /// Block while the job is paused
    ///
    /// Returns `false` if the job was cancelled instead.
    pub async fn wait_until_runnable(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*self.paused.borrow_and_update() {
                return true;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        // Job dropped from the table
                        return false;
                    }
                }
                _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
