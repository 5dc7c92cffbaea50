//! The manager facade: `save`/`delete`/`sync`/`watch*`/`switch_user`
//! over the queue, engine, and adapters (spec §2 overview).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sync_adapters::{LocalAdapter, RemoteAdapter};
use sync_core::{
    DataChangeKind, DataChangeSource, SyncEntity, SyncError, SyncEvent, SyncOperation, SyncResult, SyncState,
    SyncStatusSnapshot,
};
use sync_engine::{CancellationToken, SyncDirection, SyncEngine, SyncEngineConfig, SyncOptions};
use sync_queue::QueueManager;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{info, instrument, warn};

use crate::config::{SyncManagerConfig, UserSwitchStrategy};
use crate::shutdown::DrainTracker;
use crate::watch as reactive;

/// Facade coordinating the queue manager, sync engine, and adapters for
/// one consumer application, across however many users are active on
/// this device.
///
/// Construct with [`SyncManager::new`], drive mutations through
/// [`SyncManager::save`]/[`SyncManager::delete`], trigger cycles with
/// [`SyncManager::sync`], and observe everything through
/// [`SyncManager::subscribe`].
pub struct SyncManager<T, L, R>
where
    T: SyncEntity,
    L: LocalAdapter<T> + 'static,
    R: RemoteAdapter<T>,
{
    local: Arc<L>,
    queue: Arc<QueueManager>,
    engine: Arc<SyncEngine<T, L, R>>,
    config: SyncManagerConfig,
    events: broadcast::Sender<SyncEvent>,
    status: Mutex<HashMap<String, SyncStatusSnapshot>>,
    active_user: Mutex<Option<String>>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    entity_locks: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
    drain: DrainTracker,
    auto_sync: Mutex<HashMap<String, tokio::task::AbortHandle>>,
    external_changes: Mutex<HashMap<String, tokio::task::AbortHandle>>,
}

impl<T, L, R> SyncManager<T, L, R>
where
    T: SyncEntity,
    L: LocalAdapter<T> + 'static,
    R: RemoteAdapter<T> + 'static,
{
    /// Builds a manager over the given adapters and queue.
    ///
    /// If `config.enable_logging` is set, installs a process-wide
    /// `tracing-subscriber` (requires the `tracing-install` feature);
    /// otherwise the caller is expected to have installed one itself,
    /// matching how library crates in this workspace avoid taking that
    /// decision away from their embedder.
    pub fn new(local: Arc<L>, remote: Arc<R>, queue: Arc<QueueManager>, config: SyncManagerConfig) -> Self {
        #[cfg(feature = "tracing-install")]
        if config.enable_logging {
            let _ = tracing_subscriber::fmt::try_init();
        }

        let engine_config = SyncEngineConfig::new(config.device_id.clone(), config.default_conflict_resolver.clone())
            .with_batch_size(config.batch_size)
            .with_default_direction(config.default_sync_direction)
            .with_sync_timeout(config.sync_timeout)
            .with_retry(sync_engine::RetryConfig {
                max_retries: config.max_retries,
                base_delay: config.retry_delay,
                ..sync_engine::RetryConfig::default()
            });
        let engine = Arc::new(SyncEngine::new(local.clone(), remote, queue.clone(), engine_config));
        let (events, _) = broadcast::channel(1024);

        let active_user = config.initial_user_id.clone();
        let mut status = HashMap::new();
        if let Some(user_id) = &active_user {
            status.insert(user_id.clone(), SyncStatusSnapshot::idle(user_id.clone()));
        }

        Self {
            local,
            queue,
            engine,
            config,
            events,
            status: Mutex::new(status),
            active_user: Mutex::new(active_user),
            cancel_tokens: Mutex::new(HashMap::new()),
            entity_locks: Mutex::new(HashMap::new()),
            drain: DrainTracker::new(),
            auto_sync: Mutex::new(HashMap::new()),
            external_changes: Mutex::new(HashMap::new()),
        }
    }

    /// Starts this manager's background tasks: external-change ingestion
    /// and, if [`SyncManagerConfig::auto_start_sync`] is set, the
    /// auto-sync timer, both for [`SyncManagerConfig::initial_user_id`].
    ///
    /// [`SyncManager::new`] cannot start these itself — it returns a bare
    /// `Self`, and both background tasks need to hold an `Arc<Self>` to
    /// outlive the constructor's stack frame. Call this once, right after
    /// wrapping the manager in an `Arc`:
    ///
    /// ```ignore
    /// let manager = Arc::new(SyncManager::new(local, remote, queue, config));
    /// manager.start();
    /// ```
    ///
    /// A no-op if no initial user is configured.
    pub fn start(self: &Arc<Self>) {
        let Some(user_id) = self.config.initial_user_id.clone() else {
            return;
        };
        self.start_external_changes(user_id.clone());
        if self.config.auto_start_sync {
            self.start_auto_sync(user_id);
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribes to every event this manager emits, across all users.
    /// Consumers dispatch on [`SyncEvent`]'s variant and filter on
    /// [`SyncEvent::user_id`].
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Subscribes like [`SyncManager::subscribe`], additionally emitting
    /// an [`SyncEvent::InitialSync`] for `user_id` so a newly-attached
    /// watcher has something to render before the next real event.
    pub fn subscribe_user(&self, user_id: &str) -> broadcast::Receiver<SyncEvent> {
        let rx = self.events.subscribe();
        let snapshot = self.status_snapshot(user_id);
        self.emit(SyncEvent::InitialSync { snapshot });
        rx
    }

    /// The live status snapshot for `user_id`, or an idle snapshot if
    /// this user has never synced.
    pub fn status_snapshot(&self, user_id: &str) -> SyncStatusSnapshot {
        self.status
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| SyncStatusSnapshot::idle(user_id))
    }

    async fn entity_lock(&self, user_id: &str, entity_id: &str) -> Arc<AsyncMutex<()>> {
        self.entity_locks
            .lock()
            .entry((user_id.to_string(), entity_id.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Writes `entity` locally and enqueues the matching `create`/
    /// `update` operation, serializing concurrent writes to the same
    /// entity id behind a short-lived per-entity lock (spec §5's "shared
    /// resources" guarantee).
    #[instrument(skip(self, entity), fields(entity_id = entity.id()))]
    pub async fn save(&self, entity: T) -> SyncResult<()> {
        let user_id = entity.user_id().to_string();
        let entity_id = entity.id().to_string();
        let lock = self.entity_lock(&user_id, &entity_id).await;
        let _guard = lock.lock().await;

        let existed = self.local.get_by_id(&entity_id, &user_id).await?.is_some();
        self.local.push(entity.clone()).await?;

        let now = chrono::Utc::now().timestamp_millis();
        let op = if existed {
            SyncOperation::update(&user_id, &entity_id, entity.to_map(), now)
        } else {
            SyncOperation::create(&user_id, &entity_id, entity.to_map(), now)
        };
        self.queue.enqueue(&user_id, op)?;

        self.emit(SyncEvent::DataChange {
            user_id,
            entity_id,
            kind: if existed { DataChangeKind::Updated } else { DataChangeKind::Created },
            source: DataChangeSource::Local,
        });
        Ok(())
    }

    /// Removes `id` locally (soft or hard, at the adapter's discretion)
    /// and enqueues a `delete` operation. A `delete` enqueued before an
    /// unsynced `create` ever reaches the remote coalesces both away, so
    /// an offline create-then-delete leaves no trace on either side.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str, user_id: &str) -> SyncResult<bool> {
        let lock = self.entity_lock(user_id, id).await;
        let _guard = lock.lock().await;

        let removed = self.local.delete(id, user_id).await?;
        if removed {
            let now = chrono::Utc::now().timestamp_millis();
            self.queue.enqueue(user_id, SyncOperation::delete(user_id, id, now))?;
            self.emit(SyncEvent::DataChange {
                user_id: user_id.to_string(),
                entity_id: id.to_string(),
                kind: DataChangeKind::Deleted,
                source: DataChangeSource::Local,
            });
        }
        Ok(removed)
    }

    /// Runs one sync cycle for `user_id`, updating the status snapshot
    /// and emitting every event on [`SyncManager::subscribe`]'s bus.
    #[instrument(skip(self, options))]
    pub async fn sync(&self, user_id: &str, options: SyncOptions) -> SyncResult<sync_core::SyncCycleResult> {
        let cancel = CancellationToken::new();
        self.cancel_tokens.lock().insert(user_id.to_string(), cancel.clone());
        let _drain_guard = self.drain.enter();

        self.update_status(user_id, |snapshot| {
            snapshot.state = SyncState::Syncing;
            snapshot.last_started = Some(chrono::Utc::now());
            snapshot.progress = 0.0;
        });

        let outcome = self.engine.sync(user_id, options, &cancel, Some(&self.events)).await;
        self.cancel_tokens.lock().remove(user_id);

        match &outcome {
            Ok(result) => {
                self.update_status(user_id, |snapshot| {
                    snapshot.state = SyncState::Completed;
                    snapshot.last_completed = Some(chrono::Utc::now());
                    snapshot.progress = 1.0;
                    snapshot.synced_count = result.synced_count;
                    snapshot.conflicts_resolved = result.conflicts_resolved;
                    snapshot.failed += result.failed_count;
                    snapshot.completed += result.synced_count;
                    snapshot.pending = result.pending.len() as u64;
                });
            }
            Err(err) => {
                let state = if matches!(err, SyncError::Cancelled) {
                    SyncState::Cancelled
                } else {
                    SyncState::Failed
                };
                let message = err.message();
                self.update_status(user_id, |snapshot| {
                    snapshot.state = state;
                    snapshot.last_completed = Some(chrono::Utc::now());
                    snapshot.errors.push(message.clone());
                });
                warn!(user_id, error = %err, "sync cycle did not complete");
            }
        }
        outcome
    }

    fn update_status(&self, user_id: &str, f: impl FnOnce(&mut SyncStatusSnapshot)) {
        let mut status = self.status.lock();
        let snapshot = status
            .entry(user_id.to_string())
            .or_insert_with(|| SyncStatusSnapshot::idle(user_id));
        snapshot.pending = self.queue.pending_count(user_id);
        f(snapshot);
    }

    /// Cooperatively cancels `user_id`'s in-flight cycle, if any. A
    /// no-op if no cycle is currently running for this user.
    pub fn cancel(&self, user_id: &str) {
        if let Some(token) = self.cancel_tokens.lock().get(user_id) {
            token.cancel();
        }
    }

    /// Starts a periodic auto-sync timer for `user_id` at
    /// [`SyncManagerConfig::auto_sync_interval`]. Replaces any existing
    /// timer for the same user. Requires the manager to be held behind
    /// an `Arc` so the spawned task can outlive the caller's stack frame.
    pub fn start_auto_sync(self: &Arc<Self>, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let interval = self.config.auto_sync_interval;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                info!(user_id = %user_id, "auto-sync timer fired");
                let _ = this.sync(&user_id, SyncOptions::default()).await;
            }
        });
        let mut auto_sync = self.auto_sync.lock();
        if let Some(previous) = auto_sync.insert(user_id, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Stops `user_id`'s auto-sync timer, if one is running.
    pub fn stop_auto_sync(&self, user_id: &str) {
        if let Some(handle) = self.auto_sync.lock().remove(user_id) {
            handle.abort();
        }
    }

    /// Subscribes to `user_id`'s remote change stream and feeds incoming
    /// changes through the sync engine's conflict pipeline, for as long
    /// as the stream stays open. Replaces any existing subscription for
    /// the same user. Requires the manager to be held behind an `Arc`.
    ///
    /// A no-op (the spawned task returns immediately) if the configured
    /// remote adapter doesn't support [`sync_adapters::RemoteAdapter::change_stream`].
    pub fn start_external_changes(self: &Arc<Self>, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let task_user_id = user_id.clone();
        let this = self.clone();
        let resolver = self.config.default_conflict_resolver.clone();
        let handle = tokio::spawn(async move {
            let _ = this.engine.ingest_external_changes(&task_user_id, resolver, Some(&this.events)).await;
        });
        let mut external_changes = self.external_changes.lock();
        if let Some(previous) = external_changes.insert(user_id, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Stops `user_id`'s external-change subscription, if one is running.
    pub fn stop_external_changes(&self, user_id: &str) {
        if let Some(handle) = self.external_changes.lock().remove(user_id) {
            handle.abort();
        }
    }

    /// Reactive view over `user_id`'s full non-deleted entity set.
    /// Updates on every local mutation when the adapter exposes a
    /// change stream; otherwise polls at
    /// [`SyncManagerConfig::watch_poll_interval`].
    pub async fn watch_all(&self, user_id: &str) -> watch::Receiver<Vec<T>> {
        reactive::watch_all(self.local.clone(), user_id.to_string(), self.config.watch_poll_interval).await
    }

    /// Reactive view over a single entity, `None` while it doesn't
    /// exist (or after it's removed).
    pub async fn watch_by_id(&self, id: &str, user_id: &str) -> watch::Receiver<Option<T>> {
        reactive::watch_by_id(
            self.local.clone(),
            id.to_string(),
            user_id.to_string(),
            self.config.watch_poll_interval,
        )
        .await
    }

    /// Currently active user, if one has been switched to or configured
    /// via [`SyncManagerConfig::initial_user_id`].
    pub fn active_user(&self) -> Option<String> {
        self.active_user.lock().clone()
    }

    /// Activates `new_user_id`, applying `strategy` to the outgoing
    /// user's state first (spec §10's thin user-switch policy layer).
    #[instrument(skip(self))]
    pub async fn switch_user(&self, new_user_id: &str, strategy: UserSwitchStrategy) -> SyncResult<()> {
        let previous = self.active_user.lock().clone();

        if let Some(prev) = &previous {
            if prev == new_user_id {
                return Ok(());
            }
            match strategy {
                UserSwitchStrategy::ClearAndFetch => {
                    self.stop_auto_sync(prev);
                    self.stop_external_changes(prev);
                    self.local.clear_user_data(prev).await?;
                    self.queue.clear(prev);
                }
                UserSwitchStrategy::SyncThenSwitch => {
                    let cancel = CancellationToken::new();
                    self.engine
                        .sync(prev, SyncOptions::default(), &cancel, Some(&self.events))
                        .await?;
                }
                UserSwitchStrategy::PromptIfUnsyncedData => {
                    let pending = self.queue.pending_count(prev);
                    if pending > 0 {
                        return Err(SyncError::UserSwitchBlocked(format!(
                            "user {prev} has {pending} unsynced operations"
                        )));
                    }
                }
                UserSwitchStrategy::KeepLocal => {}
            }
        }

        *self.active_user.lock() = Some(new_user_id.to_string());
        self.status
            .lock()
            .entry(new_user_id.to_string())
            .or_insert_with(|| SyncStatusSnapshot::idle(new_user_id));
        self.emit(SyncEvent::UserSwitched {
            previous_user_id: previous,
            new_user_id: new_user_id.to_string(),
        });

        if matches!(strategy, UserSwitchStrategy::ClearAndFetch) {
            let cancel = CancellationToken::new();
            let options = SyncOptions {
                direction: SyncDirection::PullOnly,
                ..SyncOptions::default()
            };
            self.engine.sync(new_user_id, options, &cancel, Some(&self.events)).await?;
        }
        Ok(())
    }

    /// Activates `new_user_id` using [`SyncManagerConfig::default_user_switch_strategy`].
    pub async fn switch_user_default(&self, new_user_id: &str) -> SyncResult<()> {
        self.switch_user(new_user_id, self.config.default_user_switch_strategy).await
    }

    /// Cancels every in-flight cycle, stops every auto-sync timer and
    /// external-change subscription, and waits up to
    /// [`SyncManagerConfig::shutdown_timeout`] for in-flight cycles to
    /// drain before returning.
    pub async fn shutdown(&self) {
        for handle in self.auto_sync.lock().values() {
            handle.abort();
        }
        for handle in self.external_changes.lock().values() {
            handle.abort();
        }
        for token in self.cancel_tokens.lock().values() {
            token.cancel();
        }
        let mut drain = self.drain.clone();
        drain.wait_for_drain(self.config.shutdown_timeout).await;
    }
}
