//! Queued sync operations — the durable intent to push a local change.

use serde::{Deserialize, Serialize};
use serde_json::Map;
use serde_json::Value;
use uuid::Uuid;

/// The kind of mutation a [`SyncOperation`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// A new entity was created locally.
    Create,
    /// An existing entity was modified locally.
    Update,
    /// An entity was (soft) deleted locally.
    Delete,
}

/// Lifecycle state of a queued operation (spec §4.1 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Currently being pushed to the remote.
    InProgress,
    /// Acknowledged by the remote; about to be removed from the queue.
    Completed,
    /// Exhausted its retry budget or hit a non-recoverable error.
    Failed,
}

/// An immutable-by-convention record describing an intent to push a
/// local change to the remote.
///
/// `data` carries the entity's field map for `create`/`update` (required
/// for both); `delete` carries no payload. `retry_count` is bumped by
/// [`crate::error::SyncError::is_retryable`]-driven failure handling in
/// the queue manager and is bounded by `retry_count <= max_retries + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique operation id.
    pub id: String,
    /// Owning user id. Must equal the owning entity's `user_id`.
    pub user_id: String,
    /// Operation kind.
    pub op_type: OperationType,
    /// Id of the entity this operation mutates.
    pub entity_id: String,
    /// Entity field map, required for `create`/`update`.
    pub data: Option<Map<String, Value>>,
    /// Millisecond Unix timestamp of enqueue.
    pub timestamp: i64,
    /// Number of times this operation has been retried.
    pub retry_count: u32,
    /// Current lifecycle state.
    pub status: OperationStatus,
    /// Millisecond Unix timestamp of the most recent failed dispatch
    /// attempt, if any. Used to compute backoff eligibility; `None`
    /// until the first failure.
    pub last_attempt_at: Option<i64>,
}

impl SyncOperation {
    /// Builds a new `pending` operation with a fresh id, timestamped now.
    pub fn new(
        user_id: impl Into<String>,
        op_type: OperationType,
        entity_id: impl Into<String>,
        data: Option<Map<String, Value>>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            op_type,
            entity_id: entity_id.into(),
            data,
            timestamp: timestamp_ms,
            retry_count: 0,
            status: OperationStatus::Pending,
            last_attempt_at: None,
        }
    }

    /// Convenience constructor for a `create` operation.
    pub fn create(
        user_id: impl Into<String>,
        entity_id: impl Into<String>,
        data: Map<String, Value>,
        timestamp_ms: i64,
    ) -> Self {
        Self::new(
            user_id,
            OperationType::Create,
            entity_id,
            Some(data),
            timestamp_ms,
        )
    }

    /// Convenience constructor for an `update` operation.
    pub fn update(
        user_id: impl Into<String>,
        entity_id: impl Into<String>,
        data: Map<String, Value>,
        timestamp_ms: i64,
    ) -> Self {
        Self::new(
            user_id,
            OperationType::Update,
            entity_id,
            Some(data),
            timestamp_ms,
        )
    }

    /// Convenience constructor for a `delete` operation.
    pub fn delete(user_id: impl Into<String>, entity_id: impl Into<String>, timestamp_ms: i64) -> Self {
        Self::new(user_id, OperationType::Delete, entity_id, None, timestamp_ms)
    }

    /// True if this operation can still be retried without hitting the
    /// queue manager's `max_retries` ceiling.
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count <= max_retries
    }
}
