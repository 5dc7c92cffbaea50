//! The queue manager: durable per-user operation log.

use std::collections::HashMap;

use parking_lot::RwLock;
use sync_core::{OperationStatus, SyncError, SyncOperation, SyncResult};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::coalesce::{coalesce, CoalesceOutcome};

/// One user's queue partition: its pending operations in FIFO order,
/// a failure counter for status reporting, and a change notifier so
/// reactive readers can be woken without polling.
struct Partition {
    ops: Vec<SyncOperation>,
    failed_count: u64,
    version: u64,
    version_tx: watch::Sender<u64>,
}

impl Partition {
    fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            ops: Vec::new(),
            failed_count: 0,
            version: 0,
            version_tx,
        }
    }

    fn bump(&mut self) {
        self.version += 1;
        let _ = self.version_tx.send(self.version);
    }
}

/// Durable, per-user operation log.
///
/// `QueueManager` owns no I/O: "durable" here means atomically visible
/// to concurrent readers the instant [`QueueManager::enqueue`] returns.
/// A caller that needs cross-process durability composes this with a
/// [`sync_adapters::LocalAdapter`](../sync_adapters/trait.LocalAdapter.html)-backed
/// store that persists the same operations.
pub struct QueueManager {
    max_retries: u32,
    partitions: RwLock<HashMap<String, Partition>>,
    /// Maps an operation id back to its owning user, so `mark_synced`
    /// and `mark_failed` can be called with just the operation id.
    owners: RwLock<HashMap<String, String>>,
}

impl QueueManager {
    /// Creates a new, empty queue manager.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            partitions: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Appends `op` to `user_id`'s queue, applying the coalescing rules
    /// against any existing pending operation for the same `entity_id`.
    ///
    /// Returns once the operation (or its coalesced result) is durably
    /// visible to [`QueueManager::pending`].
    pub fn enqueue(&self, user_id: &str, op: SyncOperation) -> SyncResult<()> {
        if op.user_id != user_id {
            return Err(SyncError::ValidationError {
                fields: vec!["user_id".into()],
            });
        }

        let mut partitions = self.partitions.write();
        let partition = partitions.entry(user_id.to_string()).or_insert_with(Partition::new);

        let existing_index = partition.ops.iter().position(|o| o.entity_id == op.entity_id);
        let existing = existing_index.map(|i| partition.ops[i].clone());

        match coalesce(existing.as_ref(), op) {
            CoalesceOutcome::Replace(merged) => {
                let mut owners = self.owners.write();
                owners.insert(merged.id.clone(), user_id.to_string());
                match existing_index {
                    Some(i) => partition.ops[i] = merged,
                    None => partition.ops.push(merged),
                }
            }
            CoalesceOutcome::Remove => {
                if let Some(i) = existing_index {
                    let removed = partition.ops.remove(i);
                    self.owners.write().remove(&removed.id);
                }
            }
            CoalesceOutcome::KeepExisting => {
                debug!(user_id, "enqueue dropped: tombstone is not resurrected by this operation");
            }
        }

        partition.bump();
        Ok(())
    }

    /// Returns `user_id`'s pending operations, oldest first.
    pub fn pending(&self, user_id: &str) -> Vec<SyncOperation> {
        self.partitions
            .read()
            .get(user_id)
            .map(|p| p.ops.clone())
            .unwrap_or_default()
    }

    /// Returns up to `limit` pending operations, oldest first.
    pub fn pending_batch(&self, user_id: &str, limit: usize) -> Vec<SyncOperation> {
        self.partitions
            .read()
            .get(user_id)
            .map(|p| p.ops.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// True if `user_id`'s queue already has a live operation referencing
    /// `entity_id`. Used by the pull phase to tell "not pushed yet" apart
    /// from a genuine `local_not_synced` conflict.
    pub fn has_pending_for_entity(&self, user_id: &str, entity_id: &str) -> bool {
        self.partitions
            .read()
            .get(user_id)
            .map(|p| p.ops.iter().any(|o| o.entity_id == entity_id))
            .unwrap_or(false)
    }

    /// Number of operations currently pending for `user_id`.
    pub fn pending_count(&self, user_id: &str) -> u64 {
        self.partitions
            .read()
            .get(user_id)
            .map(|p| p.ops.len() as u64)
            .unwrap_or(0)
    }

    /// Number of operations that have permanently failed for `user_id`.
    pub fn failed_count(&self, user_id: &str) -> u64 {
        self.partitions.read().get(user_id).map(|p| p.failed_count).unwrap_or(0)
    }

    /// Idempotently removes `op_id` from the queue. A missing id is a
    /// no-op, matching the published contract.
    pub fn mark_synced(&self, op_id: &str) {
        let user_id = match self.owners.write().remove(op_id) {
            Some(u) => u,
            None => return,
        };
        let mut partitions = self.partitions.write();
        if let Some(partition) = partitions.get_mut(&user_id) {
            partition.ops.retain(|o| o.id != op_id);
            partition.bump();
        }
    }

    /// Records a failed dispatch attempt for `op_id`. Recoverable
    /// failures increment `retry_count` and leave the operation pending;
    /// exhausting `max_retries` (or a non-recoverable failure) moves it
    /// to `failed` and removes it from the queue.
    ///
    /// Returns the updated operation, or `None` if `op_id` is unknown.
    pub fn mark_failed(&self, op_id: &str, reason: &str, recoverable: bool) -> Option<SyncOperation> {
        let user_id = self.owners.read().get(op_id).cloned()?;
        let mut partitions = self.partitions.write();
        let partition = partitions.get_mut(&user_id)?;
        let index = partition.ops.iter().position(|o| o.id == op_id)?;

        let mut updated = partition.ops[index].clone();
        updated.retry_count += 1;
        updated.last_attempt_at = Some(chrono::Utc::now().timestamp_millis());

        if !recoverable || !updated.can_retry(self.max_retries) {
            updated.status = OperationStatus::Failed;
            partition.ops.remove(index);
            partition.failed_count += 1;
            self.owners.write().remove(op_id);
            warn!(op_id, reason, "operation failed permanently");
        } else {
            partition.ops[index] = updated.clone();
        }

        partition.bump();
        Some(updated)
    }

    /// Removes all operations for `user_id`.
    pub fn clear(&self, user_id: &str) {
        let mut partitions = self.partitions.write();
        if let Some(partition) = partitions.get_mut(user_id) {
            for op in partition.ops.drain(..) {
                self.owners.write().remove(&op.id);
            }
            partition.failed_count = 0;
            partition.bump();
        }
    }

    /// Subscribes to `user_id`'s change notifications: a reactive read
    /// (`watch*` at the manager facade) can `.changed().await` on this
    /// instead of polling [`QueueManager::pending`].
    pub fn subscribe(&self, user_id: &str) -> watch::Receiver<u64> {
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(user_id.to_string()).or_insert_with(Partition::new);
        partition.version_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use sync_core::OperationType;

    fn op(user: &str, entity: &str, op_type: OperationType) -> SyncOperation {
        SyncOperation::new(user, op_type, entity, Some(Map::new()), 1)
    }

    #[test]
    fn pending_is_fifo_for_distinct_entities() {
        let q = QueueManager::new(3);
        q.enqueue("u1", op("u1", "a", OperationType::Create)).unwrap();
        q.enqueue("u1", op("u1", "b", OperationType::Create)).unwrap();
        q.enqueue("u1", op("u1", "c", OperationType::Create)).unwrap();

        let pending = q.pending("u1");
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].entity_id, "a");
        assert_eq!(pending[1].entity_id, "b");
        assert_eq!(pending[2].entity_id, "c");
    }

    #[test]
    fn coalesced_updates_collapse_to_one_pending_op() {
        let q = QueueManager::new(3);
        let mut create = SyncOperation::new("u1", OperationType::Create, "t2", Some(Map::new()), 1);
        create.id = "fixed".into();
        q.enqueue("u1", create).unwrap();
        q.enqueue("u1", op("u1", "t2", OperationType::Update)).unwrap();
        q.enqueue("u1", op("u1", "t2", OperationType::Update)).unwrap();

        let pending = q.pending("u1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op_type, OperationType::Create);
    }

    #[test]
    fn mark_synced_removes_and_is_idempotent() {
        let q = QueueManager::new(3);
        let op = op("u1", "a", OperationType::Create);
        let id = op.id.clone();
        q.enqueue("u1", op).unwrap();

        q.mark_synced(&id);
        assert_eq!(q.pending_count("u1"), 0);

        // removing a missing id is a no-op
        q.mark_synced(&id);
        q.mark_synced("does-not-exist");
    }

    #[test]
    fn mark_failed_retries_then_moves_to_failed() {
        let q = QueueManager::new(1);
        let op = op("u1", "a", OperationType::Create);
        let id = op.id.clone();
        q.enqueue("u1", op).unwrap();

        let updated = q.mark_failed(&id, "timeout", true).unwrap();
        assert_eq!(updated.retry_count, 1);
        assert_eq!(q.pending_count("u1"), 1);

        let updated = q.mark_failed(&id, "timeout again", true).unwrap();
        assert_eq!(updated.retry_count, 2);
        assert_eq!(q.pending_count("u1"), 0);
        assert_eq!(q.failed_count("u1"), 1);
    }

    #[test]
    fn non_recoverable_failure_skips_retry() {
        let q = QueueManager::new(5);
        let op = op("u1", "a", OperationType::Create);
        let id = op.id.clone();
        q.enqueue("u1", op).unwrap();

        q.mark_failed(&id, "validation failed", false).unwrap();
        assert_eq!(q.pending_count("u1"), 0);
        assert_eq!(q.failed_count("u1"), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let q = QueueManager::new(3);
        q.enqueue("u1", op("u1", "a", OperationType::Create)).unwrap();
        q.enqueue("u1", op("u1", "b", OperationType::Create)).unwrap();
        q.clear("u1");
        assert_eq!(q.pending_count("u1"), 0);
    }

    #[test]
    fn partitions_are_isolated_per_user() {
        let q = QueueManager::new(3);
        q.enqueue("u1", op("u1", "a", OperationType::Create)).unwrap();
        q.enqueue("u2", op("u2", "a", OperationType::Create)).unwrap();
        assert_eq!(q.pending_count("u1"), 1);
        assert_eq!(q.pending_count("u2"), 1);
        q.clear("u1");
        assert_eq!(q.pending_count("u2"), 1);
    }

    #[test]
    fn enqueue_rejects_user_id_mismatch() {
        let q = QueueManager::new(3);
        let result = q.enqueue("u1", op("u2", "a", OperationType::Create));
        assert!(result.is_err());
    }

    #[test]
    fn has_pending_for_entity_reflects_queue_contents() {
        let q = QueueManager::new(3);
        q.enqueue("u1", op("u1", "a", OperationType::Create)).unwrap();
        assert!(q.has_pending_for_entity("u1", "a"));
        assert!(!q.has_pending_for_entity("u1", "b"));
        assert!(!q.has_pending_for_entity("u2", "a"));
    }

    #[tokio::test]
    async fn subscribers_are_notified_on_enqueue() {
        let q = QueueManager::new(3);
        let mut rx = q.subscribe("u1");
        q.enqueue("u1", op("u1", "a", OperationType::Create)).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
