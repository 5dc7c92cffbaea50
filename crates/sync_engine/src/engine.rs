//! The push/pull sync cycle orchestrator (spec §4.2).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use sync_adapters::{ChangeDetail, LocalAdapter, RemoteAdapter};
use sync_core::{
    ConflictContext, ConflictKind, DataChangeKind, DataChangeSource, EntityDelta, EntitySnapshot, SyncCycleResult,
    SyncEntity, SyncError, SyncEvent, SyncMetadata, SyncOperation, SyncResult,
};
use sync_queue::QueueManager;
use sync_resolver::{classify, ConflictResolver};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::config::{SyncDirection, SyncEngineConfig, SyncOptions};
use crate::hash::data_hash;

/// Releases a user's entry from the active-cycle set on drop, so an
/// early return (error, cancellation, timeout) can't leak the guard.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    user_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.user_id);
    }
}

/// Orchestrates one user's push/pull sync cycle against a
/// [`LocalAdapter`] and [`RemoteAdapter`] pair, enforcing at most one
/// concurrent cycle per user.
pub struct SyncEngine<T, L, R>
where
    T: SyncEntity,
    L: LocalAdapter<T>,
    R: RemoteAdapter<T>,
{
    local: Arc<L>,
    remote: Arc<R>,
    queue: Arc<QueueManager>,
    config: SyncEngineConfig,
    active: Mutex<HashSet<String>>,
    _entity: std::marker::PhantomData<T>,
}

impl<T, L, R> SyncEngine<T, L, R>
where
    T: SyncEntity,
    L: LocalAdapter<T>,
    R: RemoteAdapter<T>,
{
    /// Builds an engine over the given adapters, queue, and config.
    pub fn new(local: Arc<L>, remote: Arc<R>, queue: Arc<QueueManager>, config: SyncEngineConfig) -> Self {
        Self {
            local,
            remote,
            queue,
            config,
            active: Mutex::new(HashSet::new()),
            _entity: std::marker::PhantomData,
        }
    }

    fn emit(&self, events: Option<&broadcast::Sender<SyncEvent>>, event: SyncEvent) {
        if let Some(sender) = events {
            let _ = sender.send(event);
        }
    }

    /// Runs one full sync cycle for `user_id`.
    ///
    /// Fails fast with [`SyncError::SyncInProgress`] if a cycle for this
    /// user is already running. `events`, when given, receives every
    /// event the cycle emits (`SyncStarted` through `SyncCompleted`).
    #[instrument(skip(self, options, cancel, events))]
    pub async fn sync(
        &self,
        user_id: &str,
        options: SyncOptions,
        cancel: &CancellationToken,
        events: Option<&broadcast::Sender<SyncEvent>>,
    ) -> SyncResult<SyncCycleResult> {
        {
            let mut active = self.active.lock();
            if active.contains(user_id) {
                return Err(SyncError::SyncInProgress(user_id.to_string()));
            }
            active.insert(user_id.to_string());
        }
        let _guard = ActiveGuard {
            active: &self.active,
            user_id: user_id.to_string(),
        };

        let pending_count = self.queue.pending_count(user_id);
        self.emit(
            events,
            SyncEvent::SyncStarted {
                user_id: user_id.to_string(),
                pending_count,
            },
        );
        info!(user_id, pending_count, "sync cycle started");

        let timeout = options.timeout.unwrap_or(self.config.sync_timeout);
        let outcome = tokio::time::timeout(timeout, self.run_cycle(user_id, &options, cancel, events)).await;

        match outcome {
            Ok(Ok(result)) => {
                self.emit(
                    events,
                    SyncEvent::SyncCompleted {
                        user_id: user_id.to_string(),
                        result: result.clone(),
                    },
                );
                Ok(result)
            }
            Ok(Err(err)) => {
                warn!(user_id, error = %err, "sync cycle ended in error");
                self.emit(
                    events,
                    SyncEvent::SyncError {
                        user_id: user_id.to_string(),
                        message: err.message(),
                        is_recoverable: matches!(err, SyncError::Cancelled) || err.is_retryable(),
                    },
                );
                Err(err)
            }
            Err(_elapsed) => {
                warn!(user_id, "sync cycle timed out");
                self.emit(
                    events,
                    SyncEvent::SyncError {
                        user_id: user_id.to_string(),
                        message: "sync timed out".to_string(),
                        is_recoverable: true,
                    },
                );
                Err(SyncError::Timeout)
            }
        }
    }

    async fn run_cycle(
        &self,
        user_id: &str,
        options: &SyncOptions,
        cancel: &CancellationToken,
        events: Option<&broadcast::Sender<SyncEvent>>,
    ) -> SyncResult<SyncCycleResult> {
        let start = std::time::Instant::now();
        let mut result = SyncCycleResult::new();
        let batch_size = options.override_batch_size.unwrap_or(self.config.batch_size);
        let resolver = options.resolver_override.clone().unwrap_or_else(|| self.config.default_resolver.clone());

        match options.direction {
            SyncDirection::PushThenPull => {
                self.push_phase(user_id, batch_size, cancel, events, &mut result).await?;
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                self.pull_phase(user_id, options, resolver.clone(), cancel, events, &mut result).await?;
            }
            SyncDirection::PullThenPush => {
                self.pull_phase(user_id, options, resolver.clone(), cancel, events, &mut result).await?;
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                self.push_phase(user_id, batch_size, cancel, events, &mut result).await?;
            }
            SyncDirection::PushOnly => {
                self.push_phase(user_id, batch_size, cancel, events, &mut result).await?;
            }
            SyncDirection::PullOnly => {
                self.pull_phase(user_id, options, resolver.clone(), cancel, events, &mut result).await?;
            }
        }

        self.update_metadata(user_id).await?;

        result.pending = self.queue.pending(user_id);
        result.duration = start.elapsed();
        Ok(result)
    }

    async fn push_phase(
        &self,
        user_id: &str,
        batch_size: usize,
        cancel: &CancellationToken,
        events: Option<&broadcast::Sender<SyncEvent>>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let ops: Vec<SyncOperation> = self
            .queue
            .pending(user_id)
            .into_iter()
            .filter(|op| self.retry_eligible(op))
            .collect();
        let total = ops.len() as u64;
        let mut completed = 0u64;

        for chunk in ops.chunks(batch_size.max(1)) {
            for op in chunk {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                match self.apply_push_op(op, user_id).await {
                    Ok(()) => {
                        self.queue.mark_synced(&op.id);
                        result.synced_count += 1;
                    }
                    Err(err) => {
                        let recoverable = err.is_retryable();
                        debug!(op_id = %op.id, error = %err, recoverable, "push operation failed");
                        self.queue.mark_failed(&op.id, &err.message(), recoverable);
                        result.failed_count += 1;
                    }
                }
                completed += 1;
                self.emit(
                    events,
                    SyncEvent::SyncProgress {
                        user_id: user_id.to_string(),
                        completed,
                        total,
                    },
                );
            }
        }
        Ok(())
    }

    async fn apply_push_op(&self, op: &SyncOperation, user_id: &str) -> SyncResult<()> {
        use sync_core::OperationType;
        match op.op_type {
            OperationType::Create => {
                let entity = self
                    .local
                    .get_by_id(&op.entity_id, user_id)
                    .await?
                    .ok_or_else(|| SyncError::NotFound(op.entity_id.clone()))?;
                self.remote.push(entity).await?;
            }
            OperationType::Update => {
                let entity = self
                    .local
                    .get_by_id(&op.entity_id, user_id)
                    .await?
                    .ok_or_else(|| SyncError::NotFound(op.entity_id.clone()))?;
                match self.remote.fetch_by_id(&op.entity_id, user_id).await? {
                    Some(remote_current) => {
                        let delta = entity.diff(&remote_current);
                        self.remote.patch(&remote_current, &delta).await?;
                    }
                    None => {
                        self.remote.push(entity).await?;
                    }
                }
            }
            OperationType::Delete => {
                self.remote.delete_remote(&op.entity_id, user_id).await?;
            }
        }
        Ok(())
    }

    /// True if `op` has no recorded failure, or has waited out the
    /// backoff delay its retry count calls for since its last one.
    fn retry_eligible(&self, op: &SyncOperation) -> bool {
        let Some(last_attempt_at) = op.last_attempt_at else {
            return true;
        };
        let delay = self.config.retry.delay_for_attempt(op.retry_count);
        let elapsed = chrono::Utc::now().timestamp_millis().saturating_sub(last_attempt_at);
        elapsed >= 0 && elapsed as u128 >= delay.as_millis()
    }

    /// Subscribes to `user_id`'s remote change stream, if the configured
    /// [`RemoteAdapter`] supports one, and feeds every incoming change
    /// through the same conflict pipeline [`SyncEngine::pull_phase`] uses.
    ///
    /// Runs until the stream ends (the sender side is dropped) or lags
    /// so far behind it's closed. Applies two guards before routing a
    /// change: events whose `source_device_id` equals this engine's own
    /// [`SyncEngineConfig::device_id`] are suppressed as self-originated,
    /// and `(entity_id, version, source_device_id)` triples already seen
    /// this subscription are deduplicated.
    pub async fn ingest_external_changes(
        &self,
        user_id: &str,
        resolver: Arc<dyn ConflictResolver>,
        events: Option<&broadcast::Sender<SyncEvent>>,
    ) -> SyncResult<()> {
        let Some(mut changes) = self.remote.change_stream(user_id).await else {
            return Ok(());
        };

        let mut seen: HashSet<(String, Option<u64>, Option<String>)> = HashSet::new();
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if change.source_device_id.as_deref() == Some(self.config.device_id.as_str()) {
                        continue;
                    }
                    let version = change.entity.as_ref().map(|e| e.version());
                    let key = (change.entity_id.clone(), version, change.source_device_id.clone());
                    if !seen.insert(key) {
                        continue;
                    }
                    let mut result = SyncCycleResult::new();
                    self.apply_external_change(user_id, change, &resolver, events, &mut result).await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(user_id, skipped, "external change stream lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    async fn apply_external_change(
        &self,
        user_id: &str,
        change: ChangeDetail<T>,
        resolver: &Arc<dyn ConflictResolver>,
        events: Option<&broadcast::Sender<SyncEvent>>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let local_entity = self.local.get_by_id(&change.entity_id, user_id).await?;
        let remote_entity = change.entity.clone();

        if let (Some(local), Some(remote)) = (&local_entity, &remote_entity) {
            if local.is_deleted() == remote.is_deleted() && remote.version() <= local.version() {
                return Ok(());
            }
        }

        let local_snapshot = local_entity.as_ref().map(EntitySnapshot::from_entity);
        let remote_snapshot = remote_entity.as_ref().map(EntitySnapshot::from_entity);
        let has_pending = self.queue.has_pending_for_entity(user_id, &change.entity_id);
        let kind = classify(local_snapshot.as_ref(), remote_snapshot.as_ref(), has_pending);

        match kind {
            None => {
                if let Some(remote) = remote_entity {
                    self.local.push(remote).await?;
                    self.emit(
                        events,
                        SyncEvent::DataChange {
                            user_id: user_id.to_string(),
                            entity_id: change.entity_id.clone(),
                            kind: change.kind,
                            source: DataChangeSource::Remote,
                        },
                    );
                }
                Ok(())
            }
            Some(kind) => {
                self.handle_conflict(
                    user_id,
                    &change.entity_id,
                    kind,
                    local_entity,
                    remote_entity,
                    local_snapshot,
                    remote_snapshot,
                    resolver,
                    events,
                    result,
                )
                .await
            }
        }
    }

    async fn pull_phase(
        &self,
        user_id: &str,
        options: &SyncOptions,
        resolver: Arc<dyn ConflictResolver>,
        cancel: &CancellationToken,
        events: Option<&broadcast::Sender<SyncEvent>>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let remote_entities = self.remote.fetch_all(user_id).await?;

        if remote_entities.is_empty() {
            // Open question 1: never clear local on an empty remote pull;
            // local changes surface to the remote on the next push phase.
            return self.detect_local_not_synced(user_id, &[], &resolver, events, result).await;
        }

        let mut seen_ids = std::collections::HashSet::new();
        for remote_entity in &remote_entities {
            seen_ids.insert(remote_entity.id().to_string());
        }

        for remote_entity in remote_entities.iter() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let local_entity = self.local.get_by_id(remote_entity.id(), user_id).await?;

            if let Some(local) = &local_entity {
                if local.is_deleted() == remote_entity.is_deleted() && remote_entity.version() <= local.version() {
                    // A stale or already-applied pull; discard rather than
                    // clobber a value this cycle may have just pushed.
                    continue;
                }
            }

            let local_snapshot = local_entity.as_ref().map(EntitySnapshot::from_entity);
            let remote_snapshot = EntitySnapshot::from_entity(remote_entity);
            let has_pending = self.queue.has_pending_for_entity(user_id, remote_entity.id());
            let kind = classify(local_snapshot.as_ref(), Some(&remote_snapshot), has_pending);

            match kind {
                None => {
                    let change_kind = if local_entity.is_none() {
                        DataChangeKind::Created
                    } else if remote_entity.is_deleted() {
                        DataChangeKind::Deleted
                    } else {
                        DataChangeKind::Updated
                    };
                    self.local.push(remote_entity.clone()).await?;
                    self.emit(
                        events,
                        SyncEvent::DataChange {
                            user_id: user_id.to_string(),
                            entity_id: remote_entity.id().to_string(),
                            kind: change_kind,
                            source: DataChangeSource::Remote,
                        },
                    );
                }
                Some(kind) => {
                    self.handle_conflict(
                        user_id,
                        remote_entity.id(),
                        kind,
                        local_entity.clone(),
                        Some(remote_entity.clone()),
                        local_snapshot,
                        Some(remote_snapshot),
                        &resolver,
                        events,
                        result,
                    )
                    .await?;
                }
            }
        }

        self.detect_local_not_synced(user_id, &seen_ids_vec(&seen_ids), &resolver, events, result)
            .await
    }

    async fn detect_local_not_synced(
        &self,
        user_id: &str,
        remote_ids: &[String],
        resolver: &Arc<dyn ConflictResolver>,
        events: Option<&broadcast::Sender<SyncEvent>>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let local_all = self.local.get_all(user_id).await?;
        for local_entity in local_all {
            if local_entity.is_deleted() || remote_ids.contains(&local_entity.id().to_string()) {
                continue;
            }
            if self.queue.has_pending_for_entity(user_id, local_entity.id()) {
                continue;
            }
            let local_snapshot = EntitySnapshot::from_entity(&local_entity);
            self.handle_conflict(
                user_id,
                local_entity.id(),
                ConflictKind::LocalNotSynced,
                Some(local_entity.clone()),
                None,
                Some(local_snapshot),
                None,
                resolver,
                events,
                result,
            )
            .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_conflict(
        &self,
        user_id: &str,
        entity_id: &str,
        kind: ConflictKind,
        local_entity: Option<T>,
        remote_entity: Option<T>,
        local_snapshot: Option<EntitySnapshot>,
        remote_snapshot: Option<EntitySnapshot>,
        resolver: &Arc<dyn ConflictResolver>,
        events: Option<&broadcast::Sender<SyncEvent>>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let context = ConflictContext::new(
            user_id,
            entity_id,
            kind,
            local_snapshot.clone(),
            remote_snapshot.clone(),
            chrono::Utc::now(),
        );
        self.emit(events, SyncEvent::ConflictDetected { context: context.clone() });

        let resolution = resolver.resolve(local_snapshot.as_ref(), remote_snapshot.as_ref(), &context).await;

        use sync_core::ResolutionStrategy;
        match resolution.strategy {
            ResolutionStrategy::UseLocal => {
                if let Some(local) = local_entity {
                    self.remote.push(local).await?;
                    result.conflicts_resolved += 1;
                }
            }
            ResolutionStrategy::UseRemote => {
                if let Some(remote) = remote_entity {
                    self.local.push(remote.clone()).await?;
                    result.conflicts_resolved += 1;
                    self.emit(
                        events,
                        SyncEvent::DataChange {
                            user_id: user_id.to_string(),
                            entity_id: entity_id.to_string(),
                            kind: if remote.is_deleted() {
                                DataChangeKind::Deleted
                            } else {
                                DataChangeKind::Updated
                            },
                            source: DataChangeSource::Remote,
                        },
                    );
                }
            }
            ResolutionStrategy::Merge => {
                if let Some(data) = &resolution.resolved_data {
                    let base = local_entity.clone().or_else(|| remote_entity.clone());
                    if let Some(base) = base {
                        let delta = EntityDelta::diff(&base.to_map(), data);
                        let merged = base.apply_delta(&delta);
                        self.local.push(merged.clone()).await?;
                        self.remote.push(merged).await?;
                        result.conflicts_resolved += 1;
                        self.emit(
                            events,
                            SyncEvent::DataChange {
                                user_id: user_id.to_string(),
                                entity_id: entity_id.to_string(),
                                kind: DataChangeKind::Updated,
                                source: DataChangeSource::Merged,
                            },
                        );
                    }
                }
            }
            ResolutionStrategy::AskUser => {
                // The per-entity pipeline pauses; ConflictDetected above is
                // the caller's cue to supply an answer and re-sync.
            }
            ResolutionStrategy::Abort => {
                result.failed_count += 1;
                self.emit(
                    events,
                    SyncEvent::SyncError {
                        user_id: user_id.to_string(),
                        message: resolution.message.unwrap_or_else(|| "conflict resolution aborted".to_string()),
                        is_recoverable: false,
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_metadata(&self, user_id: &str) -> SyncResult<()> {
        let local_entities = self.local.get_all(user_id).await?;
        let hash = data_hash(&local_entities);
        let metadata = SyncMetadata {
            user_id: user_id.to_string(),
            last_sync_time: Some(chrono::Utc::now()),
            data_hash: Some(hash),
            item_count: local_entities.len() as u64,
            device_id: Some(self.config.device_id.clone()),
        };
        self.local.update_sync_metadata(metadata.clone()).await?;
        self.remote.update_sync_metadata(metadata).await?;
        Ok(())
    }
}

fn seen_ids_vec(set: &std::collections::HashSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}
