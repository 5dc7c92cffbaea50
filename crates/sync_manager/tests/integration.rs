//! End-to-end facade scenarios: save/delete/sync/switch_user/shutdown
//! against the in-memory reference adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sync_adapters::{InMemoryLocalAdapter, InMemoryRemoteAdapter};
use sync_core::{EntityDelta, SyncEntity, SyncEvent};
use sync_engine::SyncOptions;
use sync_manager::{SyncManager, SyncManagerConfig, UserSwitchStrategy};
use sync_queue::QueueManager;
use sync_resolver::LastWriteWinsResolver;

#[derive(Debug, Clone, PartialEq)]
struct Task {
    id: String,
    user_id: String,
    title: String,
    version: u64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl SyncEntity for Task {
    fn id(&self) -> &str {
        &self.id
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn is_deleted(&self) -> bool {
        false
    }
    fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("title".into(), Value::String(self.title.clone()));
        map.insert("version".into(), Value::from(self.version));
        map
    }
    fn apply_delta(&self, delta: &EntityDelta) -> Self {
        let mut next = self.clone();
        if let Some(Value::String(title)) = delta.0.get("title") {
            next.title = title.clone();
        }
        if let Some(v) = delta.0.get("version").and_then(Value::as_u64) {
            next.version = v;
        }
        next
    }
}

fn task(id: &str, user: &str, title: &str, version: u64) -> Task {
    let now = Utc::now();
    Task {
        id: id.into(),
        user_id: user.into(),
        title: title.into(),
        version,
        created_at: now,
        modified_at: now,
    }
}

type Manager = SyncManager<Task, InMemoryLocalAdapter<Task>, InMemoryRemoteAdapter<Task>>;

fn build_manager() -> Arc<Manager> {
    let local = Arc::new(InMemoryLocalAdapter::<Task>::new());
    let remote = Arc::new(InMemoryRemoteAdapter::<Task>::new());
    let queue = Arc::new(QueueManager::new(3));
    let config = SyncManagerConfig::new("device-1", Arc::new(LastWriteWinsResolver))
        .with_shutdown_timeout(Duration::from_millis(200));
    Arc::new(SyncManager::new(local, remote, queue, config))
}

#[tokio::test]
async fn save_enqueues_and_sync_pushes_through() {
    let manager = build_manager();
    manager.save(task("t1", "u1", "write the draft", 1)).await.unwrap();

    let result = manager.sync("u1", SyncOptions::default()).await.unwrap();
    assert_eq!(result.synced_count, 1);
    assert_eq!(result.pending.len(), 0);

    let status = manager.status_snapshot("u1");
    assert_eq!(status.synced_count, 1);
    assert_eq!(status.pending, 0);
}

#[tokio::test]
async fn delete_before_sync_coalesces_the_create_away() {
    let manager = build_manager();
    manager.save(task("t1", "u1", "throwaway", 1)).await.unwrap();
    let removed = manager.delete("t1", "u1").await.unwrap();
    assert!(removed);

    let result = manager.sync("u1", SyncOptions::default()).await.unwrap();
    assert_eq!(result.synced_count, 0);
    assert_eq!(result.pending.len(), 0);
}

#[tokio::test]
async fn delete_unknown_id_reports_nothing_removed() {
    let manager = build_manager();
    let removed = manager.delete("missing", "u1").await.unwrap();
    assert!(!removed);
}

#[tokio::test]
async fn switch_user_keep_local_leaves_both_users_data() {
    let manager = build_manager();
    manager.save(task("t1", "u1", "a", 1)).await.unwrap();
    manager.sync("u1", SyncOptions::default()).await.unwrap();

    manager.switch_user("u2", UserSwitchStrategy::KeepLocal).await.unwrap();
    assert_eq!(manager.active_user().as_deref(), Some("u2"));

    manager.save(task("t2", "u2", "b", 1)).await.unwrap();
    manager.sync("u2", SyncOptions::default()).await.unwrap();

    manager.switch_user("u1", UserSwitchStrategy::KeepLocal).await.unwrap();
    let status = manager.status_snapshot("u1");
    assert_eq!(status.user_id, "u1");
}

#[tokio::test]
async fn switch_user_prompt_blocks_on_unsynced_data() {
    let manager = build_manager();
    manager.switch_user("u1", UserSwitchStrategy::KeepLocal).await.unwrap();
    manager.save(task("t1", "u1", "unsynced", 1)).await.unwrap();

    let outcome = manager
        .switch_user("u2", UserSwitchStrategy::PromptIfUnsyncedData)
        .await;
    assert!(outcome.is_err());
    assert_eq!(manager.active_user().as_deref(), Some("u1"));
}

#[tokio::test]
async fn switch_user_sync_then_switch_flushes_outgoing_queue() {
    let manager = build_manager();
    manager.switch_user("u1", UserSwitchStrategy::KeepLocal).await.unwrap();
    manager.save(task("t1", "u1", "flush me", 1)).await.unwrap();

    manager
        .switch_user("u2", UserSwitchStrategy::SyncThenSwitch)
        .await
        .unwrap();

    assert_eq!(manager.active_user().as_deref(), Some("u2"));
    let status = manager.status_snapshot("u1");
    assert_eq!(status.pending, 0);
}

#[tokio::test]
async fn subscribe_sees_data_change_and_user_switch_events() {
    let manager = build_manager();
    let mut events = manager.subscribe();

    manager.save(task("t1", "u1", "a", 1)).await.unwrap();
    let first = events.recv().await.unwrap();
    assert!(matches!(first, SyncEvent::DataChange { .. }));

    manager.switch_user("u2", UserSwitchStrategy::KeepLocal).await.unwrap();
    let switched = events.recv().await.unwrap();
    assert!(matches!(switched, SyncEvent::UserSwitched { .. }));
}

#[tokio::test]
async fn shutdown_drains_an_in_flight_cycle() {
    let manager = build_manager();
    manager.save(task("t1", "u1", "a", 1)).await.unwrap();

    let handle = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let _ = manager.sync("u1", SyncOptions::default()).await;
        })
    };

    manager.shutdown().await;
    handle.await.unwrap();
}

#[tokio::test]
async fn start_honors_auto_start_sync_for_the_initial_user() {
    let local = Arc::new(InMemoryLocalAdapter::<Task>::new());
    let remote = Arc::new(InMemoryRemoteAdapter::<Task>::new());
    let queue = Arc::new(QueueManager::new(3));
    let config = SyncManagerConfig::new("device-1", Arc::new(LastWriteWinsResolver))
        .with_initial_user_id("u1")
        .with_auto_start_sync(true)
        .with_auto_sync_interval(Duration::from_millis(20));
    let manager = Arc::new(SyncManager::new(local, remote, queue, config));

    manager.save(task("t1", "u1", "auto-synced", 1)).await.unwrap();
    manager.start();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.status_snapshot("u1").pending, 0);
}

#[tokio::test]
async fn watch_all_reflects_a_save() {
    let manager = build_manager();
    let mut rx = manager.watch_all("u1").await;
    assert!(rx.borrow().is_empty());

    manager.save(task("t1", "u1", "a", 1)).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().len(), 1);
}
