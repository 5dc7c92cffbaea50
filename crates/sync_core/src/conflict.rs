//! Conflict diagnostics — classification and resolution outcomes.
//!
//! Classification itself (matching local/remote state against
//! [`ConflictKind`]) lives in `sync_resolver`, which depends on this
//! crate; this module only defines the vocabulary both `sync_resolver`
//! and `sync_engine` share.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The kind of conflict detected between a local and remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides are live (`is_deleted == false`) but disagree on
    /// `version` or `modified_at`.
    BothModified,
    /// The local and remote records disagree on `user_id`. Always
    /// escalated, never auto-resolved.
    UserMismatch,
    /// Local has a record with no remote counterpart and no pending
    /// operation accounts for it.
    LocalNotSynced,
    /// Exactly one side has `is_deleted == true`.
    DeletionConflict,
}

/// A point-in-time snapshot of one side of a conflict, for diagnostics
/// and for resolvers that need more than id/version to decide (e.g. a
/// merge function).
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Owning user id as recorded on this side.
    pub user_id: String,
    /// Serialized field map at the time of detection.
    pub data: Map<String, Value>,
    /// Entity version.
    pub version: u64,
    /// Entity's `modified_at`.
    pub modified_at: DateTime<Utc>,
    /// Entity's `is_deleted` flag.
    pub is_deleted: bool,
}

impl EntitySnapshot {
    /// Builds a snapshot from any [`crate::entity::SyncEntity`].
    pub fn from_entity<T: crate::entity::SyncEntity>(entity: &T) -> Self {
        Self {
            user_id: entity.user_id().to_string(),
            data: entity.to_map(),
            version: entity.version(),
            modified_at: entity.modified_at(),
            is_deleted: entity.is_deleted(),
        }
    }
}

/// Diagnostic record describing a detected conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictContext {
    /// Owning user id.
    pub user_id: String,
    /// Id of the conflicting entity.
    pub entity_id: String,
    /// Conflict classification.
    pub kind: ConflictKind,
    /// Local-side snapshot, if a local record exists.
    pub local: Option<EntitySnapshot>,
    /// Remote-side snapshot, if a remote record exists.
    pub remote: Option<EntitySnapshot>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl ConflictContext {
    /// Builds a new conflict context, stamping `detected_at` with `now`.
    pub fn new(
        user_id: impl Into<String>,
        entity_id: impl Into<String>,
        kind: ConflictKind,
        local: Option<EntitySnapshot>,
        remote: Option<EntitySnapshot>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            entity_id: entity_id.into(),
            kind,
            local,
            remote,
            detected_at: now,
        }
    }
}

/// The strategy a resolver chose for a given conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Keep the local entity, overwrite the remote.
    UseLocal,
    /// Keep the remote entity, overwrite local.
    UseRemote,
    /// A merged entity was produced; write it to both sides.
    Merge,
    /// Escalate to an external prompt; the per-entity pipeline pauses.
    AskUser,
    /// Neither side could be chosen; leave state untouched.
    Abort,
}

/// The outcome of resolving a single conflict.
///
/// `resolved_data` carries the winning field map for `use_local`,
/// `use_remote`, and `merge`; it is absent for `ask_user` and `abort`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    /// The chosen strategy.
    pub strategy: ResolutionStrategy,
    /// Winning entity's field map, when the strategy produced one.
    pub resolved_data: Option<Map<String, Value>>,
    /// True when the caller must supply additional input before this
    /// conflict can make progress (`ask_user`).
    pub requires_user_input: bool,
    /// Optional human-readable diagnostic (set on `abort`, or to explain
    /// a merge decision).
    pub message: Option<String>,
}

impl ConflictResolution {
    /// Keep local, overwrite remote.
    pub fn use_local(data: Map<String, Value>) -> Self {
        Self {
            strategy: ResolutionStrategy::UseLocal,
            resolved_data: Some(data),
            requires_user_input: false,
            message: None,
        }
    }

    /// Keep remote, overwrite local.
    pub fn use_remote(data: Map<String, Value>) -> Self {
        Self {
            strategy: ResolutionStrategy::UseRemote,
            resolved_data: Some(data),
            requires_user_input: false,
            message: None,
        }
    }

    /// A merge produced a new winning entity.
    pub fn merge(data: Map<String, Value>) -> Self {
        Self {
            strategy: ResolutionStrategy::Merge,
            resolved_data: Some(data),
            requires_user_input: false,
            message: None,
        }
    }

    /// Escalate to the user; the per-entity pipeline pauses here.
    pub fn ask_user() -> Self {
        Self {
            strategy: ResolutionStrategy::AskUser,
            resolved_data: None,
            requires_user_input: true,
            message: None,
        }
    }

    /// Neither side could be chosen; state is left untouched.
    pub fn abort(message: impl Into<String>) -> Self {
        Self {
            strategy: ResolutionStrategy::Abort,
            resolved_data: None,
            requires_user_input: false,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_carries_message() {
        let res = ConflictResolution::abort("no merge function supplied");
        assert_eq!(res.strategy, ResolutionStrategy::Abort);
        assert!(res.message.is_some());
        assert!(!res.requires_user_input);
    }

    #[test]
    fn ask_user_requires_input() {
        let res = ConflictResolution::ask_user();
        assert!(res.requires_user_input);
        assert!(res.resolved_data.is_none());
    }
}
