//! Per-user sync bookkeeping, persisted on both sides of the sync boundary.

use chrono::{DateTime, Utc};

/// Bookkeeping record a sync cycle reads and writes on both the local
/// and remote adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMetadata {
    /// Owning user id.
    pub user_id: String,
    /// Wall-clock time of the last completed sync cycle.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Hash over the sorted, canonicalized set of synced entities.
    pub data_hash: Option<String>,
    /// Number of entities known for this user as of `last_sync_time`.
    pub item_count: u64,
    /// Id of the device that last updated this metadata.
    pub device_id: Option<String>,
}

impl SyncMetadata {
    /// An empty metadata record for a user that has never synced.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_sync_time: None,
            data_hash: None,
            item_count: 0,
            device_id: None,
        }
    }
}
