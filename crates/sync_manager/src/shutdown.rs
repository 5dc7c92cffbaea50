//! Cooperative drain tracking for [`crate::SyncManager::shutdown`].

use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

/// Tracks how many sync cycles are currently in flight, so shutdown can
/// wait for them to finish instead of abandoning them immediately.
///
/// Mirrors the drain half of a broadcast-based shutdown coordinator:
/// each in-flight cycle holds a [`DrainGuard`] that decrements the count
/// on drop, and [`DrainTracker::wait_for_drain`] blocks (up to a
/// timeout) until the count reaches zero.
#[derive(Clone)]
pub struct DrainTracker {
    tx: std::sync::Arc<watch::Sender<u64>>,
    rx: watch::Receiver<u64>,
}

impl DrainTracker {
    /// Builds a tracker with nothing in flight.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Registers one in-flight cycle; returns a guard that un-registers
    /// it on drop (including on panic or early return).
    pub fn enter(&self) -> DrainGuard {
        self.tx.send_modify(|count| *count += 1);
        DrainGuard { tx: self.tx.clone() }
    }

    /// Waits until no cycles are in flight, or `timeout` elapses first.
    pub async fn wait_for_drain(&mut self, timeout: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = *self.rx.borrow();
            if current == 0 {
                return DrainResult::Complete;
            }
            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return DrainResult::Complete,
                Err(_) => {
                    let remaining = *self.rx.borrow();
                    warn!(remaining, "shutdown drain timed out; abandoning in-flight cycles");
                    return DrainResult::TimedOut { remaining };
                }
            }
        }
    }
}

impl Default for DrainTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration for one in-flight cycle.
pub struct DrainGuard {
    tx: std::sync::Arc<watch::Sender<u64>>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Outcome of [`DrainTracker::wait_for_drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    /// Every in-flight cycle finished before the timeout.
    Complete,
    /// The timeout elapsed with cycles still in flight.
    TimedOut {
        /// Cycles still running when the wait gave up.
        remaining: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_completes_immediately_when_empty() {
        let mut tracker = DrainTracker::new();
        assert_eq!(tracker.wait_for_drain(Duration::from_millis(50)).await, DrainResult::Complete);
    }

    #[tokio::test]
    async fn drain_waits_for_guard_drop() {
        let tracker = DrainTracker::new();
        let guard = tracker.enter();
        let mut waiter = tracker.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        let result = waiter.wait_for_drain(Duration::from_secs(1)).await;
        assert_eq!(result, DrainResult::Complete);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn drain_times_out_when_guard_held() {
        let tracker = DrainTracker::new();
        let _guard = tracker.enter();
        let mut waiter = tracker.clone();
        let result = waiter.wait_for_drain(Duration::from_millis(30)).await;
        assert_eq!(result, DrainResult::TimedOut { remaining: 1 });
    }
}
