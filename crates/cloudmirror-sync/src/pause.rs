//! Pause gate shared by the scheduler and the download managers
//!
//! A paused run finishes the chunks already being fetched, then holds every
//! transfer at its next chunk boundary and admits no new task until resumed.
//! Cancellation always wins over a pause.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared paused/running flag
#[derive(Clone)]
pub struct PauseGate {
    paused: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
        }
    }
}

impl PauseGate {
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Wait while paused; returns `false` if `cancel` fired first
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            let paused = *rx.borrow_and_update();
            if !paused {
                return true;
            }
            tracing::trace!("Waiting for resume");
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                _ = cancel.cancelled() => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_open_gate_passes() {
        let gate = PauseGate::default();
        assert!(!gate.is_paused());
        assert!(gate.wait(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_wait_returns_on_resume() {
        let gate = PauseGate::default();
        gate.pause();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        gate.resume();

        let passed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(passed);
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiter() {
        let gate = PauseGate::default();
        gate.pause();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!gate.wait(&cancel).await);
        assert!(gate.is_paused());
    }
}
