//! Preemption channel
//!
//! The scheduler loop observes a cancellation token that an emergency
//! request raises. Each token is a child of the shutdown token, so shutdown
//! interrupts every wait too. Clearing installs a fresh child and bumps a
//! generation counter the loop waits on.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Raise/clear signal shared by the scheduler loop and emergency requests.
#[derive(Debug)]
pub struct PreemptionChannel {
    shutdown: CancellationToken,
    current: Mutex<CancellationToken>,
    generation: watch::Sender<u64>,
}

impl PreemptionChannel {
    /// Creates a channel whose tokens are children of `shutdown`.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        let current = Mutex::new(shutdown.child_token());
        let (generation, _) = watch::channel(0);
        Self {
            shutdown,
            current,
            generation,
        }
    }

    /// Token the loop should pass through its next cycle.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raises the signal; every wait holding the current token returns.
    pub fn raise(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Returns `true` while the signal is raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_cancelled()
    }

    /// Clears a raised signal and wakes the loop.
    ///
    /// No-op when the signal is not raised or shutdown has begun.
    pub fn clear(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = self.shutdown.child_token();
            drop(current);
            self.generation.send_modify(|g| *g += 1);
        }
    }

    /// Number of times the signal has been cleared.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Waits until the signal is cleared or shutdown begins.
    pub async fn wait_cleared(&self) {
        let mut rx = self.generation.subscribe();
        loop {
            if !self.is_raised() || self.shutdown.is_cancelled() {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                () = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Cancels everything, permanently.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// The root shutdown token.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_raise_and_clear() {
        let ch = PreemptionChannel::new(CancellationToken::new());
        let before = ch.token();
        assert!(!ch.is_raised());

        ch.raise();
        assert!(ch.is_raised());
        assert!(before.is_cancelled());

        ch.clear();
        assert!(!ch.is_raised());
        assert!(!ch.token().is_cancelled());
        assert_eq!(ch.generation(), 1);
    }

    #[test]
    fn test_clear_without_raise_is_noop() {
        let ch = PreemptionChannel::new(CancellationToken::new());
        ch.clear();
        assert_eq!(ch.generation(), 0);
    }

    #[test]
    fn test_shutdown_cancels_current_token() {
        let ch = PreemptionChannel::new(CancellationToken::new());
        let token = ch.token();
        ch.shutdown();
        assert!(token.is_cancelled());
        assert!(ch.is_shutdown());

        ch.clear();
        assert!(ch.is_raised(), "clear must not revive a shut-down channel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cleared_wakes_on_clear() {
        let ch = Arc::new(PreemptionChannel::new(CancellationToken::new()));
        ch.raise();

        let waiter = {
            let ch = Arc::clone(&ch);
            tokio::spawn(async move { ch.wait_cleared().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        ch.clear();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_wait_cleared_is_woken_by_clear() {
        let ch = PreemptionChannel::new(CancellationToken::new());
        ch.raise();

        let mut waiter = tokio_test::task::spawn(ch.wait_cleared());
        tokio_test::assert_pending!(waiter.poll());

        ch.clear();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_wait_cleared_returns_when_not_raised() {
        let ch = PreemptionChannel::new(CancellationToken::new());
        ch.wait_cleared().await;
    }
}
