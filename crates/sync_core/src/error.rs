//! Error taxonomy shared by every crate in the sync engine.

use thiserror::Error;

/// Result type used throughout the sync engine.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced at the boundary of the sync engine.
///
/// Errors split into four classes (see spec §7): transient, permanent
/// per-operation, cycle-fatal, and systemic. [`SyncError::is_retryable`]
/// and [`SyncError::is_cycle_fatal`] classify a given variant.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient network failure. Retried up to `maxRetries` with backoff.
    #[error("network error: {0}")]
    NetworkError(String),

    /// An adapter (local or remote) raised an error.
    #[error("adapter error ({name}): {cause}")]
    AdapterError {
        /// Name of the offending adapter, e.g. `"local"` or `"remote"`.
        name: String,
        /// Underlying cause.
        cause: String,
    },

    /// A conflict could not be resolved automatically and was escalated.
    #[error("conflict escalated for entity {entity_id} (user {user_id})")]
    ConflictEscalated {
        /// Owning user id.
        user_id: String,
        /// Entity id.
        entity_id: String,
    },

    /// A user-switch request was refused.
    #[error("user switch blocked: {0}")]
    UserSwitchBlocked(String),

    /// A sync cycle is already running for this user.
    #[error("sync already in progress for user {0}")]
    SyncInProgress(String),

    /// Schema migration failed. Carried for forward compatibility with
    /// the (out of scope) migration executor.
    #[error("migration error: {0}")]
    MigrationError(String),

    /// Input failed validation before being queued or pushed.
    #[error("validation failed: {fields:?}")]
    ValidationError {
        /// Names of the fields that failed validation.
        fields: Vec<String>,
    },

    /// The sync cycle was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// The sync cycle exceeded its configured timeout.
    #[error("sync timed out")]
    Timeout,

    /// Operation referenced an id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl SyncError {
    /// True if the failure is transient and the originating operation may
    /// be retried (network flaps, timeouts, `SyncInProgress`).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkError(_) | SyncError::Timeout | SyncError::SyncInProgress(_)
        )
    }

    /// True if this error ends the whole cycle rather than just the
    /// operation that raised it (timeout, cancellation, adapter init).
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled | SyncError::Timeout | SyncError::MigrationError(_)
        )
    }

    /// Human-readable message suitable for `onError` style callbacks.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
