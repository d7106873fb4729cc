//! Cooperative cancellation on plain tokio primitives.

use tokio::sync::watch;

/// The cancelling half of a cancellation pair.
///
/// Dropping the canceller cancels every outstanding token, so a scope
/// that owns the canceller cannot leak waiters.
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// A cheap, cloneable handle observed by workers between I/O steps.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked canceller/token pair.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation fires (or the canceller is dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// A token that never fires; for one-shot invocations with no
    /// enclosing scope to cancel them.
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the process
        // lifetime; a dropped sender reads as cancelled.
        std::mem::forget(tx);
        CancelToken { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_observes_cancel() {
        let (canceller, token) = cancel_pair();
        assert!(!token.is_cancelled());
        canceller.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn dropping_canceller_releases_waiters() {
        let (canceller, token) = cancel_pair();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        drop(canceller);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn never_token_stays_live() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }
}
