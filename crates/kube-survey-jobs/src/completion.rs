//! Single-consumer completion signal shared by competing observers.
//!
//! Any number of cloned senders may report an outcome; only the first report
//! is delivered and every later one returns immediately without effect.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// How a watched job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job reported `Complete`.
    Completed,
    /// The job reported `Failed`.
    Failed {
        /// Condition reason.
        reason: String,
        /// Condition message.
        message: String,
    },
    /// A warning event was recorded against the job.
    Warning {
        /// Event reason.
        reason: String,
        /// Event message.
        message: String,
    },
}

/// Reporting side of a completion signal.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    slot: Arc<Mutex<Option<oneshot::Sender<RunOutcome>>>>,
}

impl CompletionSender {
    /// Report an outcome. Returns whether this report was the one delivered.
    pub fn complete(&self, outcome: RunOutcome) -> bool {
        let Some(sender) = self.slot.lock().take() else {
            return false;
        };
        sender.send(outcome).is_ok()
    }

    /// Whether an outcome has already been reported.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Waiting side of a completion signal.
#[derive(Debug)]
pub struct CompletionReceiver {
    inner: oneshot::Receiver<RunOutcome>,
}

impl CompletionReceiver {
    /// Wait for the first outcome; `None` once every sender is gone without
    /// reporting.
    pub async fn wait(self) -> Option<RunOutcome> {
        self.inner.await.ok()
    }
}

/// Create a connected sender and receiver.
#[must_use]
pub fn completion_signal() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        CompletionReceiver { inner: rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_wins() {
        let (tx, rx) = completion_signal();
        let other = tx.clone();

        assert!(tx.complete(RunOutcome::Completed));
        assert!(!other.complete(RunOutcome::Warning {
            reason: "Late".into(),
            message: "ignored".into(),
        }));
        assert!(other.is_completed());

        assert_eq!(rx.wait().await, Some(RunOutcome::Completed));
    }

    #[tokio::test]
    async fn concurrent_reporters_deliver_exactly_once() {
        let (tx, rx) = completion_signal();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tx.complete(RunOutcome::Failed {
                        reason: format!("r{i}"),
                        message: String::new(),
                    })
                })
            })
            .collect();

        let mut delivered = 0;
        for handle in handles {
            if handle.await.unwrap() {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
        assert!(matches!(rx.wait().await, Some(RunOutcome::Failed { .. })));
    }

    #[tokio::test]
    async fn dropped_senders_close_the_signal() {
        let (tx, rx) = completion_signal();
        drop(tx);
        assert_eq!(rx.wait().await, None);
    }

    #[tokio::test]
    async fn reports_after_the_receiver_left_are_harmless() {
        let (tx, rx) = completion_signal();
        drop(rx);
        assert!(!tx.complete(RunOutcome::Completed));
        assert!(!tx.complete(RunOutcome::Completed));
    }
}
