//! Cooperative cancellation, checked between operations and at batch
//! boundaries (spec §5's "cancellation is cooperative" rule).

use tokio::sync::watch;

/// A cancellation flag shared between the caller and an in-flight cycle.
///
/// Modeled on `tokio::sync::watch`, the same primitive
/// [`sync_queue::QueueManager::subscribe`] uses for change notification:
/// cheap to poll, and `cancel()` is visible to every clone immediately.
#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
}

impl CancellationToken {
    /// Builds a fresh, non-cancelled token.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trips the token. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// True once [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
