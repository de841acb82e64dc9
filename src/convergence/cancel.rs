//! # Cancellation
//!
//! The poller's inter-poll sleep and the retry executor's backoff sleep are the only
//! suspension points in the engine. Both race against a [`CancellationSignal`] handed
//! down from the caller, so an outer deadline or shutdown can abort a wait promptly.

use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation channel
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self { sender }
    }

    /// Hand out a signal observing this source
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Cancel every wait observing this source. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// How a cancellable sleep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Wake {
    Elapsed,
    Cancelled,
}

/// Observer side, cheap to clone into every wait
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Resolve once cancelled. Pends forever if the source is dropped uncancelled.
    pub async fn cancelled(&self) {
        match &self.receiver {
            Some(receiver) => {
                let mut receiver = receiver.clone();
                if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Wake {
        if self.is_cancelled() {
            return Wake::Cancelled;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Wake::Elapsed,
            _ = self.cancelled() => Wake::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_elapses_without_cancellation() {
        let source = CancellationSource::new();
        let signal = source.signal();

        assert_eq!(signal.sleep(Duration::from_secs(5)).await, Wake::Elapsed);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let source = CancellationSource::new();
        let signal = source.signal();

        let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        source.cancel();

        assert_eq!(sleeper.await.unwrap(), Wake::Cancelled);
        assert!(source.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_returns_immediately() {
        let source = CancellationSource::new();
        source.cancel();

        let start = tokio::time::Instant::now();
        assert_eq!(source.signal().sleep(Duration::from_secs(60)).await, Wake::Cancelled);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_does_not_fire() {
        let signal = CancellationSignal::never();
        assert_eq!(signal.sleep(Duration::from_millis(10)).await, Wake::Elapsed);
    }
}
