//! Live sync status, owned by the manager facade.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::operation::SyncOperation;

/// High-level state of a user's sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle running, nothing pending to report.
    Idle,
    /// A cycle is currently executing.
    Syncing,
    /// Auto-sync is paused; manual `sync()` calls still proceed.
    Paused,
    /// The last cycle was cancelled.
    Cancelled,
    /// The last cycle ended with an unrecoverable error.
    Failed,
    /// The last cycle completed successfully.
    Completed,
}

/// Live, read-only view of one user's sync state.
#[derive(Debug, Clone)]
pub struct SyncStatusSnapshot {
    /// Owning user id.
    pub user_id: String,
    /// Current high-level state.
    pub state: SyncState,
    /// Operations still pending in the queue.
    pub pending: u64,
    /// Operations completed across all cycles.
    pub completed: u64,
    /// Operations permanently failed.
    pub failed: u64,
    /// Entities synced in the most recent cycle.
    pub synced_count: u64,
    /// Conflicts resolved in the most recent cycle.
    pub conflicts_resolved: u64,
    /// Fractional completion of the in-flight cycle, `0.0..=1.0`.
    pub progress: f64,
    /// When the most recent cycle started.
    pub last_started: Option<DateTime<Utc>>,
    /// When the most recent cycle completed (successfully or not).
    pub last_completed: Option<DateTime<Utc>>,
    /// Human-readable error messages accumulated in the most recent cycle.
    pub errors: Vec<String>,
}

impl SyncStatusSnapshot {
    /// The initial snapshot for a user that has never synced.
    pub fn idle(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: SyncState::Idle,
            pending: 0,
            completed: 0,
            failed: 0,
            synced_count: 0,
            conflicts_resolved: 0,
            progress: 0.0,
            last_started: None,
            last_completed: None,
            errors: Vec::new(),
        }
    }
}

/// Outcome of one completed (or aborted) sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Number of operations successfully synced.
    pub synced_count: u64,
    /// Number of operations that failed permanently.
    pub failed_count: u64,
    /// Number of conflicts auto-resolved during the cycle.
    pub conflicts_resolved: u64,
    /// Operations still pending after the cycle (unsynced, or retried).
    pub pending: Vec<SyncOperation>,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// An empty, zeroed result, used as a starting accumulator.
    pub fn new() -> Self {
        Self {
            synced_count: 0,
            failed_count: 0,
            conflicts_resolved: 0,
            pending: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

impl Default for SyncCycleResult {
    fn default() -> Self {
        Self::new()
    }
}
