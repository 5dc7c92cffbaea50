//! The `LocalAdapter` contract (spec §6) and an in-memory reference
//! implementation used by tests and examples.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sync_core::{SyncEntity, SyncMetadata, SyncOperation, SyncResult};
use tokio::sync::{broadcast, RwLock};

use crate::change::ChangeDetail;

/// Batched write applied atomically by [`LocalAdapter::transaction`].
#[derive(Debug, Clone)]
pub enum TransactionOp<T> {
    /// Upsert an entity.
    Push(T),
    /// Remove an entity by id.
    Delete(String),
}

/// Durable on-device storage for entities, pending operations, and sync
/// metadata, parameterized over the consumer's entity type.
///
/// A `LocalAdapter` never talks to the network; it is the on-device half
/// of the sync boundary the engine reads through and writes through.
#[async_trait]
pub trait LocalAdapter<T: SyncEntity>: Send + Sync {
    /// Opens the underlying storage (e.g. a database connection pool).
    /// Called once before any other method.
    async fn initialize(&self) -> SyncResult<()>;

    /// Releases underlying resources. Called once, at shutdown.
    async fn dispose(&self) -> SyncResult<()>;

    /// All non-deleted entities for `user_id`.
    async fn get_all(&self, user_id: &str) -> SyncResult<Vec<T>>;

    /// A single entity, if present and owned by `user_id`.
    async fn get_by_id(&self, id: &str, user_id: &str) -> SyncResult<Option<T>>;

    /// Entities matching any of `ids`, owned by `user_id`. Missing ids are
    /// silently omitted from the result rather than erroring.
    async fn get_by_ids(&self, ids: &[String], user_id: &str) -> SyncResult<Vec<T>>;

    /// Upserts a full entity.
    async fn push(&self, entity: T) -> SyncResult<()>;

    /// Applies a field-level delta to the entity identified by `id`.
    ///
    /// The default implementation fetches the current entity, applies the
    /// delta via [`SyncEntity::apply_delta`], and pushes the result; an
    /// adapter with native partial-update support should override this.
    async fn patch(&self, id: &str, user_id: &str, delta: &sync_core::EntityDelta) -> SyncResult<()> {
        let Some(current) = self.get_by_id(id, user_id).await? else {
            return Err(sync_core::SyncError::NotFound(id.to_string()));
        };
        self.push(current.apply_delta(delta)).await
    }

    /// Removes an entity. Returns `true` if a row was actually removed.
    async fn delete(&self, id: &str, user_id: &str) -> SyncResult<bool>;

    /// Wipes every entity, pending operation, and metadata record owned by
    /// `user_id`. Used on user switch (`ClearAndFetch`) and logout.
    async fn clear_user_data(&self, user_id: &str) -> SyncResult<()>;

    /// Applies a batch of writes as a single atomic unit, at minimum
    /// scoped to `user_id`. The default implementation applies each op in
    /// sequence and offers no atomicity guarantee beyond that of `push`
    /// and `delete` individually; adapters backed by a real transactional
    /// store should override this.
    async fn transaction(&self, user_id: &str, ops: Vec<TransactionOp<T>>) -> SyncResult<()> {
        for op in ops {
            match op {
                TransactionOp::Push(entity) => self.push(entity).await?,
                TransactionOp::Delete(id) => {
                    self.delete(&id, user_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Pending operations the queue manager has not yet drained, in
    /// enqueue order. Used to rehydrate the in-memory queue at startup.
    async fn get_pending_operations(&self, user_id: &str) -> SyncResult<Vec<SyncOperation>>;

    /// Persists a newly enqueued operation so it survives a restart.
    async fn add_pending_operation(&self, user_id: &str, op: SyncOperation) -> SyncResult<()>;

    /// Marks an operation as durably synced, removing it from persistent
    /// storage. Mirrors [`sync_core::SyncOperation::id`]; does not take a
    /// `user_id`, matching the queue manager's own `mark_synced` contract.
    async fn mark_as_synced(&self, op_id: &str) -> SyncResult<()>;

    /// The last sync metadata recorded for `user_id`, if any.
    async fn get_sync_metadata(&self, user_id: &str) -> SyncResult<Option<SyncMetadata>>;

    /// Persists updated sync metadata for `user_id`.
    async fn update_sync_metadata(&self, metadata: SyncMetadata) -> SyncResult<()>;

    /// A live feed of local writes, for adapters that can push change
    /// notifications without polling (e.g. a reactive database layer).
    /// `None` means the adapter has no such capability; callers fall back
    /// to polling via [`LocalAdapter::get_all`].
    async fn change_stream(&self) -> Option<broadcast::Receiver<ChangeDetail<T>>> {
        None
    }
}

struct UserRecords<T> {
    entities: HashMap<String, T>,
    pending: Vec<SyncOperation>,
    metadata: Option<SyncMetadata>,
}

impl<T> Default for UserRecords<T> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            pending: Vec::new(),
            metadata: None,
        }
    }
}

/// An in-memory [`LocalAdapter`], suitable for tests and for prototyping
/// against the sync engine before a real on-device store is wired up.
pub struct InMemoryLocalAdapter<T: SyncEntity> {
    users: RwLock<HashMap<String, UserRecords<T>>>,
    changes: broadcast::Sender<ChangeDetail<T>>,
}

impl<T: SyncEntity> InMemoryLocalAdapter<T> {
    /// Builds an empty adapter with a change-stream capacity of 256.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            users: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl<T: SyncEntity> Default for InMemoryLocalAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: SyncEntity> LocalAdapter<T> for InMemoryLocalAdapter<T> {
    async fn initialize(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn dispose(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn get_all(&self, user_id: &str) -> SyncResult<Vec<T>> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|records| {
                records
                    .entities
                    .values()
                    .filter(|e| !e.is_deleted())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_by_id(&self, id: &str, user_id: &str) -> SyncResult<Option<T>> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .and_then(|records| records.entities.get(id).cloned()))
    }

    async fn get_by_ids(&self, ids: &[String], user_id: &str) -> SyncResult<Vec<T>> {
        let users = self.users.read().await;
        Ok(match users.get(user_id) {
            Some(records) => ids
                .iter()
                .filter_map(|id| records.entities.get(id).cloned())
                .collect(),
            None => Vec::new(),
        })
    }

    async fn push(&self, entity: T) -> SyncResult<()> {
        let kind = if entity.is_deleted() {
            sync_core::DataChangeKind::Deleted
        } else {
            sync_core::DataChangeKind::Updated
        };
        let mut users = self.users.write().await;
        let records = users.entry(entity.user_id().to_string()).or_default();
        let is_new = !records.entities.contains_key(entity.id());
        let detail = ChangeDetail {
            user_id: entity.user_id().to_string(),
            entity_id: entity.id().to_string(),
            kind: if is_new { sync_core::DataChangeKind::Created } else { kind },
            entity: Some(entity.clone()),
            source_device_id: None,
        };
        records.entities.insert(entity.id().to_string(), entity);
        let _ = self.changes.send(detail);
        Ok(())
    }

    async fn delete(&self, id: &str, user_id: &str) -> SyncResult<bool> {
        let mut users = self.users.write().await;
        let removed = users
            .get_mut(user_id)
            .map(|records| records.entities.remove(id).is_some())
            .unwrap_or(false);
        if removed {
            let _ = self.changes.send(ChangeDetail {
                user_id: user_id.to_string(),
                entity_id: id.to_string(),
                kind: sync_core::DataChangeKind::Deleted,
                entity: None,
                source_device_id: None,
            });
        }
        Ok(removed)
    }

    async fn clear_user_data(&self, user_id: &str) -> SyncResult<()> {
        self.users.write().await.remove(user_id);
        Ok(())
    }

    async fn get_pending_operations(&self, user_id: &str) -> SyncResult<Vec<SyncOperation>> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|records| records.pending.clone())
            .unwrap_or_default())
    }

    async fn add_pending_operation(&self, user_id: &str, op: SyncOperation) -> SyncResult<()> {
        let mut users = self.users.write().await;
        users.entry(user_id.to_string()).or_default().pending.push(op);
        Ok(())
    }

    async fn mark_as_synced(&self, op_id: &str) -> SyncResult<()> {
        let mut users = self.users.write().await;
        for records in users.values_mut() {
            records.pending.retain(|op| op.id != op_id);
        }
        Ok(())
    }

    async fn get_sync_metadata(&self, user_id: &str) -> SyncResult<Option<SyncMetadata>> {
        let users = self.users.read().await;
        Ok(users.get(user_id).and_then(|records| records.metadata.clone()))
    }

    async fn update_sync_metadata(&self, metadata: SyncMetadata) -> SyncResult<()> {
        let mut users = self.users.write().await;
        users.entry(metadata.user_id.clone()).or_default().metadata = Some(metadata);
        Ok(())
    }

    async fn change_stream(&self) -> Option<broadcast::Receiver<ChangeDetail<T>>> {
        Some(self.changes.subscribe())
    }
}

/// Raw key/value snapshot of an adapter's storage, used by the (out of
/// scope) schema migration executor. `sync_adapters` only declares the
/// contract; running a migration plan against it is a consumer concern.
pub type RawSnapshot = Map<String, Value>;

/// Declares adapter-side support for schema-version bookkeeping and raw
/// data access, both consumed only by an external migration executor.
#[async_trait]
pub trait MigratableAdapter: Send + Sync {
    /// The schema version currently persisted on this device, `0` if the
    /// adapter has never recorded one.
    async fn get_stored_schema_version(&self) -> SyncResult<u32> {
        Ok(0)
    }

    /// Persists the schema version after a migration plan completes.
    async fn set_stored_schema_version(&self, _version: u32) -> SyncResult<()> {
        Ok(())
    }

    /// Every stored record as an opaque field map, keyed by entity id, for
    /// a migration executor to transform in bulk.
    async fn get_all_raw_data(&self) -> SyncResult<HashMap<String, RawSnapshot>>;

    /// Replaces all stored records with `data`, keyed by entity id.
    async fn overwrite_all_raw_data(&self, data: HashMap<String, RawSnapshot>) -> SyncResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        user_id: String,
        title: String,
        version: u64,
        deleted: bool,
        created_at: chrono::DateTime<Utc>,
        modified_at: chrono::DateTime<Utc>,
    }

    impl SyncEntity for Note {
        fn id(&self) -> &str {
            &self.id
        }
        fn user_id(&self) -> &str {
            &self.user_id
        }
        fn created_at(&self) -> chrono::DateTime<Utc> {
            self.created_at
        }
        fn modified_at(&self) -> chrono::DateTime<Utc> {
            self.modified_at
        }
        fn version(&self) -> u64 {
            self.version
        }
        fn is_deleted(&self) -> bool {
            self.deleted
        }
        fn to_map(&self) -> Map<String, Value> {
            let mut map = Map::new();
            map.insert("title".into(), Value::String(self.title.clone()));
            map
        }
        fn apply_delta(&self, delta: &sync_core::EntityDelta) -> Self {
            let mut next = self.clone();
            if let Some(Value::String(title)) = delta.0.get("title") {
                next.title = title.clone();
            }
            next
        }
    }

    fn note(id: &str, user: &str) -> Note {
        let now = Utc::now();
        Note {
            id: id.into(),
            user_id: user.into(),
            title: "untitled".into(),
            version: 1,
            deleted: false,
            created_at: now,
            modified_at: now,
        }
    }

    #[tokio::test]
    async fn push_then_get_by_id_round_trips() {
        let adapter = InMemoryLocalAdapter::new();
        adapter.push(note("e1", "u1")).await.unwrap();
        let fetched = adapter.get_by_id("e1", "u1").await.unwrap();
        assert_eq!(fetched.unwrap().id, "e1");
    }

    #[tokio::test]
    async fn get_all_excludes_deleted() {
        let adapter = InMemoryLocalAdapter::new();
        let mut deleted = note("e1", "u1");
        deleted.deleted = true;
        adapter.push(deleted).await.unwrap();
        adapter.push(note("e2", "u1")).await.unwrap();
        let all = adapter.get_all("u1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "e2");
    }

    #[tokio::test]
    async fn clear_user_data_scopes_to_one_user() {
        let adapter = InMemoryLocalAdapter::new();
        adapter.push(note("e1", "u1")).await.unwrap();
        adapter.push(note("e2", "u2")).await.unwrap();
        adapter.clear_user_data("u1").await.unwrap();
        assert!(adapter.get_all("u1").await.unwrap().is_empty());
        assert_eq!(adapter.get_all("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn patch_default_impl_fetches_applies_and_pushes() {
        let adapter = InMemoryLocalAdapter::new();
        adapter.push(note("e1", "u1")).await.unwrap();
        let mut delta = Map::new();
        delta.insert("title".into(), Value::String("renamed".into()));
        adapter
            .patch("e1", "u1", &sync_core::EntityDelta::from_map(delta))
            .await
            .unwrap();
        let fetched = adapter.get_by_id("e1", "u1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "renamed");
    }

    #[tokio::test]
    async fn pending_operations_persist_and_clear_on_mark_synced() {
        let adapter = InMemoryLocalAdapter::<Note>::new();
        let op = SyncOperation::create("u1", "e1", Map::new(), 1000);
        let op_id = op.id.clone();
        adapter.add_pending_operation("u1", op).await.unwrap();
        assert_eq!(adapter.get_pending_operations("u1").await.unwrap().len(), 1);
        adapter.mark_as_synced(&op_id).await.unwrap();
        assert!(adapter.get_pending_operations("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_stream_observes_pushes() {
        let adapter = InMemoryLocalAdapter::new();
        let mut rx = adapter.change_stream().await.unwrap();
        adapter.push(note("e1", "u1")).await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.entity_id, "e1");
        assert_eq!(change.kind, sync_core::DataChangeKind::Created);
    }
}
