//! Cooperative cancellation for the sync engine
//!
//! A single [`CancelHandle`] stops every clone of its [`CancelToken`]. The
//! engine checks the token between pages, between backfill chunks and at the
//! top of each poll tick, and races it against every sleep.

use std::time::Duration;
use tokio::sync::watch;

/// Sender side: requests cancellation
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiver side: observed by the engine
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// A token tied to this handle
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the sleep was interrupted by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancelled() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_all_tokens() {
        let (handle, token) = cancel_pair();
        let other = token.clone();
        let late = handle.token();

        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
        assert!(late.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_interrupted() {
        let (handle, token) = cancel_pair();
        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(3600)).await });

        handle.cancel();
        let interrupted = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleep should end promptly")
            .unwrap();
        assert!(interrupted);
    }

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let token = CancelToken::never();
        assert!(!token.sleep(Duration::from_millis(5)).await);
        assert!(!token.is_cancelled());
    }
}
