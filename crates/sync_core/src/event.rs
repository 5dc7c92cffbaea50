//! The event stream emitted by the manager facade (spec §6, §9).

use crate::conflict::ConflictContext;
use crate::status::{SyncCycleResult, SyncStatusSnapshot};

/// What kind of mutation a [`SyncEvent::DataChange`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChangeKind {
    /// An entity was created.
    Created,
    /// An entity was updated.
    Updated,
    /// An entity was deleted.
    Deleted,
}

/// Where a [`SyncEvent::DataChange`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChangeSource {
    /// Written by a local `save`/`delete` call.
    Local,
    /// Written through from a remote pull or change-stream event.
    Remote,
    /// Produced by the conflict resolver's `merge` strategy.
    Merged,
}

/// A single event on the manager facade's event stream.
///
/// This is a tagged variant (spec §9's "dynamic event typing" design
/// note): consumers dispatch on the variant rather than subclassing.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A sync cycle began for this user.
    SyncStarted {
        /// Owning user id.
        user_id: String,
        /// Number of operations pending at cycle start.
        pending_count: u64,
    },
    /// Progress update within an in-flight cycle.
    SyncProgress {
        /// Owning user id.
        user_id: String,
        /// Operations completed so far this cycle.
        completed: u64,
        /// Total operations planned for this cycle.
        total: u64,
    },
    /// A sync cycle finished successfully.
    SyncCompleted {
        /// Owning user id.
        user_id: String,
        /// The cycle's outcome.
        result: SyncCycleResult,
    },
    /// A sync cycle ended in error (cycle-fatal, not a per-op failure).
    SyncError {
        /// Owning user id.
        user_id: String,
        /// Human-readable message.
        message: String,
        /// True if a subsequent cycle may succeed without intervention.
        is_recoverable: bool,
    },
    /// An entity was created, updated, or deleted.
    DataChange {
        /// Owning user id.
        user_id: String,
        /// Affected entity id.
        entity_id: String,
        /// What happened to it.
        kind: DataChangeKind,
        /// Where the change came from.
        source: DataChangeSource,
    },
    /// A conflict was detected (and possibly escalated).
    ConflictDetected {
        /// Full diagnostic context.
        context: ConflictContext,
    },
    /// The active user changed.
    UserSwitched {
        /// Previously active user id, if any.
        previous_user_id: Option<String>,
        /// Newly active user id.
        new_user_id: String,
    },
    /// Emitted once, right after a watcher subscribes, carrying the
    /// current status snapshot so the UI has something to render
    /// before the first real event arrives.
    InitialSync {
        /// The snapshot at subscription time.
        snapshot: SyncStatusSnapshot,
    },
}

impl SyncEvent {
    /// The user id this event pertains to, when it has one.
    ///
    /// [`SyncEvent::InitialSync`] carries its user id inside the nested
    /// snapshot rather than as a top-level field.
    pub fn user_id(&self) -> &str {
        match self {
            SyncEvent::SyncStarted { user_id, .. }
            | SyncEvent::SyncProgress { user_id, .. }
            | SyncEvent::SyncCompleted { user_id, .. }
            | SyncEvent::SyncError { user_id, .. }
            | SyncEvent::DataChange { user_id, .. } => user_id,
            SyncEvent::ConflictDetected { context } => &context.user_id,
            SyncEvent::UserSwitched { new_user_id, .. } => new_user_id,
            SyncEvent::InitialSync { snapshot } => &snapshot.user_id,
        }
    }
}
