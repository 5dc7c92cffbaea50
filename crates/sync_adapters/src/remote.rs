//! The `RemoteAdapter` contract (spec §6) and an in-memory reference
//! implementation used by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sync_core::{SyncEntity, SyncMetadata, SyncResult};
use tokio::sync::{broadcast, RwLock};

use crate::change::ChangeDetail;

/// The server-side half of the sync boundary, parameterized over the
/// consumer's entity type.
///
/// Unlike [`crate::local::LocalAdapter`], a `RemoteAdapter` may be
/// unreachable; [`RemoteAdapter::is_connected`] is consulted before each
/// cycle and every other method may fail with
/// [`sync_core::SyncError::NetworkError`].
#[async_trait]
pub trait RemoteAdapter<T: SyncEntity>: Send + Sync {
    /// Cheap, non-blocking connectivity check consulted before a cycle
    /// starts pushing or pulling. Not a guarantee later calls succeed.
    async fn is_connected(&self) -> bool;

    /// All entities for `user_id` known to the remote as of now.
    async fn fetch_all(&self, user_id: &str) -> SyncResult<Vec<T>>;

    /// A single entity by id, if the remote has one for `user_id`.
    async fn fetch_by_id(&self, id: &str, user_id: &str) -> SyncResult<Option<T>>;

    /// Pushes a full entity, creating or overwriting the remote's copy.
    ///
    /// Returns the entity as the remote now holds it — identical to
    /// `entity` unless the remote assigned or normalized fields
    /// server-side (e.g. a canonical id or a server timestamp).
    async fn push(&self, entity: T) -> SyncResult<T>;

    /// Applies a field-level delta to the remote's copy of `id`.
    ///
    /// The default falls back to a full [`RemoteAdapter::push`] using
    /// `current` patched locally; a remote with native partial-update
    /// support (e.g. a PATCH endpoint) should override this.
    async fn patch(&self, current: &T, delta: &sync_core::EntityDelta) -> SyncResult<T> {
        self.push(current.apply_delta(delta)).await
    }

    /// Deletes (or soft-deletes) the remote's copy of `id`.
    async fn delete_remote(&self, id: &str, user_id: &str) -> SyncResult<()>;

    /// The last sync metadata the remote has recorded for `user_id`.
    async fn get_sync_metadata(&self, user_id: &str) -> SyncResult<Option<SyncMetadata>>;

    /// Persists updated sync metadata on the remote.
    async fn update_sync_metadata(&self, metadata: SyncMetadata) -> SyncResult<()>;

    /// A live feed of server-side changes (e.g. a websocket or long-poll
    /// subscription), for remotes that support push notification. `None`
    /// means the engine must rely on periodic pull cycles instead.
    async fn change_stream(&self, _user_id: &str) -> Option<broadcast::Receiver<ChangeDetail<T>>> {
        None
    }
}

struct UserRecords<T> {
    entities: HashMap<String, T>,
    metadata: Option<SyncMetadata>,
}

impl<T> Default for UserRecords<T> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            metadata: None,
        }
    }
}

/// An in-memory [`RemoteAdapter`] standing in for a sync server, for
/// tests and for prototyping the engine before wiring a real transport.
pub struct InMemoryRemoteAdapter<T: SyncEntity> {
    users: RwLock<HashMap<String, UserRecords<T>>>,
    connected: AtomicBool,
    changes: broadcast::Sender<ChangeDetail<T>>,
}

impl<T: SyncEntity> InMemoryRemoteAdapter<T> {
    /// Builds an empty, connected adapter.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            users: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(true),
            changes,
        }
    }

    /// Flips the adapter's reported connectivity, for exercising
    /// offline/reconnect behavior in tests.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl<T: SyncEntity> Default for InMemoryRemoteAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: SyncEntity> RemoteAdapter<T> for InMemoryRemoteAdapter<T> {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn fetch_all(&self, user_id: &str) -> SyncResult<Vec<T>> {
        if !self.is_connected().await {
            return Err(sync_core::SyncError::NetworkError("remote unreachable".into()));
        }
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|records| records.entities.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_by_id(&self, id: &str, user_id: &str) -> SyncResult<Option<T>> {
        if !self.is_connected().await {
            return Err(sync_core::SyncError::NetworkError("remote unreachable".into()));
        }
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .and_then(|records| records.entities.get(id).cloned()))
    }

    async fn push(&self, entity: T) -> SyncResult<T> {
        if !self.is_connected().await {
            return Err(sync_core::SyncError::NetworkError("remote unreachable".into()));
        }
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
        records.entities.insert(entity.id().to_string(), entity.clone());
        let _ = self.changes.send(detail);
        Ok(entity)
    }

    async fn delete_remote(&self, id: &str, user_id: &str) -> SyncResult<()> {
        if !self.is_connected().await {
            return Err(sync_core::SyncError::NetworkError("remote unreachable".into()));
        }
        let mut users = self.users.write().await;
        if let Some(records) = users.get_mut(user_id) {
            records.entities.remove(id);
        }
        let _ = self.changes.send(ChangeDetail {
            user_id: user_id.to_string(),
            entity_id: id.to_string(),
            kind: sync_core::DataChangeKind::Deleted,
            entity: None,
            source_device_id: None,
        });
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

    async fn change_stream(&self, _user_id: &str) -> Option<broadcast::Receiver<ChangeDetail<T>>> {
        Some(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Map, Value};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        user_id: String,
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
            Map::new()
        }
        fn apply_delta(&self, _delta: &sync_core::EntityDelta) -> Self {
            self.clone()
        }
    }

    fn note(id: &str, user: &str) -> Note {
        let now = Utc::now();
        Note {
            id: id.into(),
            user_id: user.into(),
            version: 1,
            deleted: false,
            created_at: now,
            modified_at: now,
        }
    }

    #[tokio::test]
    async fn push_then_fetch_round_trips() {
        let remote = InMemoryRemoteAdapter::new();
        remote.push(note("e1", "u1")).await.unwrap();
        let fetched = remote.fetch_by_id("e1", "u1").await.unwrap();
        assert_eq!(fetched.unwrap().id, "e1");
    }

    #[tokio::test]
    async fn disconnected_remote_rejects_calls() {
        let remote = InMemoryRemoteAdapter::<Note>::new();
        remote.set_connected(false);
        assert!(!remote.is_connected().await);
        let err = remote.fetch_all("u1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn delete_remote_removes_entity() {
        let remote = InMemoryRemoteAdapter::new();
        remote.push(note("e1", "u1")).await.unwrap();
        remote.delete_remote("e1", "u1").await.unwrap();
        assert!(remote.fetch_by_id("e1", "u1").await.unwrap().is_none());
    }
}
