//! Manager-level configuration (spec §6's Configuration list).

use std::sync::Arc;
use std::time::Duration;

use sync_engine::SyncDirection;
use sync_resolver::ConflictResolver;

/// Policy applied to the previously-active user's state when
/// [`crate::SyncManager::switch_user`] activates a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSwitchStrategy {
    /// Wipe the outgoing user's local data, then pull-only sync the
    /// incoming user from scratch.
    ClearAndFetch,
    /// Run a full sync for the outgoing user (flushing pending
    /// operations) before handing control to the incoming one.
    SyncThenSwitch,
    /// Refuse the switch with [`sync_core::SyncError::UserSwitchBlocked`]
    /// if the outgoing user has unsynced pending operations.
    PromptIfUnsyncedData,
    /// Switch immediately; both users' local data coexist untouched.
    KeepLocal,
}

/// A single schema migration step, carried for forward compatibility
/// with the (out of scope, spec §1) migration executor. `sync_manager`
/// stores these and reports `on_migration_error`; it does not run them.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Schema version this migration starts from.
    pub from_version: u32,
    /// Schema version this migration produces.
    pub to_version: u32,
    /// Human-readable description, surfaced in logs and to
    /// `on_migration_error`.
    pub description: String,
}

/// Called if the (external) migration executor reports a failure while
/// bringing the manager online. Returning controls whether the manager
/// still comes up in a degraded (no-sync) state or refuses entirely;
/// `sync_manager` only stores and invokes the handler — it never
/// produces a `MigrationError` itself.
pub type MigrationErrorHandler = Arc<dyn Fn(&sync_core::SyncError) + Send + Sync>;

/// Long-lived configuration for a [`crate::SyncManager`], covering every
/// field in spec §6's Configuration list.
#[derive(Clone)]
pub struct SyncManagerConfig {
    /// Interval between automatic sync cycles, when enabled.
    pub auto_sync_interval: Duration,
    /// Whether the auto-sync timer starts as soon as the manager is
    /// constructed.
    pub auto_start_sync: bool,
    /// Maximum retries for a failed operation before it moves to
    /// `failed` (forwarded to [`sync_engine::RetryConfig::max_retries`]).
    pub max_retries: u32,
    /// Base delay before the first retry (forwarded to
    /// [`sync_engine::RetryConfig::base_delay`]).
    pub retry_delay: Duration,
    /// Operations dispatched per push-phase batch.
    pub batch_size: usize,
    /// Resolver used when a cycle doesn't override one.
    pub default_conflict_resolver: Arc<dyn ConflictResolver>,
    /// Strategy applied on [`crate::SyncManager::switch_user`] when the
    /// caller doesn't specify one.
    pub default_user_switch_strategy: UserSwitchStrategy,
    /// Direction used when a `sync()` call doesn't override it.
    pub default_sync_direction: SyncDirection,
    /// Wall-clock ceiling for one sync cycle.
    pub sync_timeout: Duration,
    /// Installs a `tracing-subscriber` global subscriber on
    /// [`crate::SyncManager::new`] when true. Instrumentation itself is
    /// always present regardless of this flag; this only controls
    /// whether the manager takes ownership of process-wide log output.
    pub enable_logging: bool,
    /// User activated immediately on construction, if any.
    pub initial_user_id: Option<String>,
    /// Schema version this build of the consumer app expects.
    pub schema_version: u32,
    /// Migration steps from older schema versions up to
    /// [`SyncManagerConfig::schema_version`].
    pub migrations: Vec<Migration>,
    /// Invoked if the external migration executor reports a failure.
    pub on_migration_error: Option<MigrationErrorHandler>,
    /// This device's id, forwarded to [`sync_engine::SyncEngineConfig`].
    pub device_id: String,
    /// Poll interval used by `watch_all`/`watch_by_id` when the local
    /// adapter has no `change_stream` capability.
    pub watch_poll_interval: Duration,
    /// How long [`crate::SyncManager::shutdown`] waits for in-flight
    /// cycles to drain before abandoning them.
    pub shutdown_timeout: Duration,
}

impl SyncManagerConfig {
    /// Builds a config with the given device id and default resolver;
    /// every other field takes its documented default.
    pub fn new(device_id: impl Into<String>, default_conflict_resolver: Arc<dyn ConflictResolver>) -> Self {
        Self {
            auto_sync_interval: Duration::from_secs(300),
            auto_start_sync: false,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            batch_size: 50,
            default_conflict_resolver,
            default_user_switch_strategy: UserSwitchStrategy::SyncThenSwitch,
            default_sync_direction: SyncDirection::PushThenPull,
            sync_timeout: Duration::from_secs(60),
            enable_logging: false,
            initial_user_id: None,
            schema_version: 1,
            migrations: Vec::new(),
            on_migration_error: None,
            device_id: device_id.into(),
            watch_poll_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the auto-sync timer interval.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Sets whether the auto-sync timer starts on construction.
    pub fn with_auto_start_sync(mut self, enabled: bool) -> Self {
        self.auto_start_sync = enabled;
        self
    }

    /// Sets the max-retries ceiling and the first-retry delay together.
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the push-batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the default user-switch strategy.
    pub fn with_default_user_switch_strategy(mut self, strategy: UserSwitchStrategy) -> Self {
        self.default_user_switch_strategy = strategy;
        self
    }

    /// Sets the default sync direction.
    pub fn with_default_sync_direction(mut self, direction: SyncDirection) -> Self {
        self.default_sync_direction = direction;
        self
    }

    /// Sets the per-cycle wall-clock timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Enables installing a global `tracing` subscriber on construction.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Sets the user activated immediately on construction.
    pub fn with_initial_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.initial_user_id = Some(user_id.into());
        self
    }

    /// Sets the schema version and migration plan.
    pub fn with_schema(mut self, version: u32, migrations: Vec<Migration>) -> Self {
        self.schema_version = version;
        self.migrations = migrations;
        self
    }

    /// Sets the migration-failure handler.
    pub fn with_on_migration_error(mut self, handler: MigrationErrorHandler) -> Self {
        self.on_migration_error = Some(handler);
        self
    }

    /// Sets the reactive-read poll interval fallback.
    pub fn with_watch_poll_interval(mut self, interval: Duration) -> Self {
        self.watch_poll_interval = interval;
        self
    }

    /// Sets the shutdown drain timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_resolver::LastWriteWinsResolver;

    #[test]
    fn defaults_match_spec() {
        let config = SyncManagerConfig::new("device-1", Arc::new(LastWriteWinsResolver));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.schema_version, 1);
        assert!(!config.auto_start_sync);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_methods_chain() {
        let config = SyncManagerConfig::new("device-1", Arc::new(LastWriteWinsResolver))
            .with_auto_start_sync(true)
            .with_batch_size(10)
            .with_default_user_switch_strategy(UserSwitchStrategy::KeepLocal);
        assert!(config.auto_start_sync);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.default_user_switch_strategy, UserSwitchStrategy::KeepLocal);
    }
}
