//! Engine-level configuration: batching, retries, direction, timeout.

use std::time::Duration;

use sync_resolver::ConflictResolver;

/// Which phases a [`crate::SyncEngine::sync`] call executes, and in what
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Push pending operations, then pull remote changes.
    PushThenPull,
    /// Pull remote changes, then push pending operations.
    PullThenPush,
    /// Push only; never reads from the remote.
    PushOnly,
    /// Pull only; never drains the local queue.
    PullOnly,
}

impl SyncDirection {
    /// Whether this direction includes a push phase.
    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::PushThenPull | SyncDirection::PullThenPush | SyncDirection::PushOnly)
    }

    /// Whether this direction includes a pull phase.
    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::PushThenPull | SyncDirection::PullThenPush | SyncDirection::PullOnly)
    }
}

/// Per-call overrides for a single [`crate::SyncEngine::sync`] invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Which phases to run, and their order.
    pub direction: SyncDirection,
    /// Opaque filter forwarded to the remote adapter's `fetch_all`.
    pub scope: Option<serde_json::Value>,
    /// Skips the `version`-based short circuit and re-evaluates every
    /// remote entity against local, even when metadata suggests nothing
    /// changed.
    pub force_full_sync: bool,
    /// Overrides [`SyncEngineConfig::batch_size`] for this call only.
    pub override_batch_size: Option<usize>,
    /// Overrides [`SyncEngineConfig::sync_timeout`] for this call only.
    pub timeout: Option<Duration>,
    /// Resolver used instead of [`SyncEngineConfig::default_resolver`]
    /// for conflicts detected during this call only.
    pub resolver_override: Option<std::sync::Arc<dyn ConflictResolver>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::PushThenPull,
            scope: None,
            force_full_sync: false,
            override_batch_size: None,
            timeout: None,
            resolver_override: None,
        }
    }
}

/// Backoff schedule for retrying failed operations across cycles.
///
/// `delay_for_attempt` follows `baseDelay × multiplier^(attempt-1)`,
/// capped at `max_delay`, with up to 25% jitter layered on top.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Operations are retried up to this many times before moving to
    /// `failed`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Exponential growth factor applied per subsequent attempt.
    pub multiplier: f64,
    /// Ceiling on the computed delay, before jitter.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// The delay before retrying an operation on its `attempt`'th retry
    /// (1-indexed: `attempt == 1` is the first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25 * pseudo_random_unit();
        Duration::from_secs_f64(capped + jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// A `[0, 1)` pseudo-random value with no external RNG dependency,
/// sufficient for jitter (not for anything security-sensitive).
fn pseudo_random_unit() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Long-lived engine configuration, shared across every user and cycle.
pub struct SyncEngineConfig {
    /// Number of operations dispatched per push-phase batch.
    pub batch_size: usize,
    /// Retry/backoff schedule for failed operations.
    pub retry: RetryConfig,
    /// Direction used when a call doesn't override it.
    pub default_direction: SyncDirection,
    /// Wall-clock ceiling for one `sync()` call.
    pub sync_timeout: Duration,
    /// This device's id, used to suppress self-originated external
    /// change events.
    pub device_id: String,
    /// Resolver used when a conflict doesn't specify one.
    pub default_resolver: std::sync::Arc<dyn ConflictResolver>,
}

impl SyncEngineConfig {
    /// Builds a config with the given device id and resolver; other
    /// fields take their documented defaults.
    pub fn new(device_id: impl Into<String>, default_resolver: std::sync::Arc<dyn ConflictResolver>) -> Self {
        Self {
            batch_size: 50,
            retry: RetryConfig::default(),
            default_direction: SyncDirection::PushThenPull,
            sync_timeout: Duration::from_secs(60),
            device_id: device_id.into(),
            default_resolver,
        }
    }

    /// Sets the push-batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the retry/backoff schedule.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default sync direction.
    pub fn with_default_direction(mut self, direction: SyncDirection) -> Self {
        self.default_direction = direction;
        self
    }

    /// Sets the per-cycle wall-clock timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }
}
