//! Conflict classification (spec §4.3).

use sync_core::{ConflictKind, EntitySnapshot};

/// Classifies the relationship between a local and remote snapshot of
/// the same entity id.
///
/// `has_pending_op` is true when the queue already has a live operation
/// referencing this entity id — in that case a missing remote record
/// is explained by "not pushed yet", not a conflict.
///
/// Returns `None` when the two sides already agree (including the case
/// where both are tombstoned).
pub fn classify(
    local: Option<&EntitySnapshot>,
    remote: Option<&EntitySnapshot>,
    has_pending_op: bool,
) -> Option<ConflictKind> {
    match (local, remote) {
        (Some(l), Some(r)) => {
            if l.user_id != r.user_id {
                return Some(ConflictKind::UserMismatch);
            }
            if l.is_deleted != r.is_deleted {
                return Some(ConflictKind::DeletionConflict);
            }
            if !l.is_deleted && !r.is_deleted && (l.version != r.version || l.modified_at != r.modified_at) {
                return Some(ConflictKind::BothModified);
            }
            None
        }
        (Some(_), None) => {
            if has_pending_op {
                None
            } else {
                Some(ConflictKind::LocalNotSynced)
            }
        }
        (None, Some(_)) => None,
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn snapshot(user_id: &str, version: u64, is_deleted: bool) -> EntitySnapshot {
        EntitySnapshot {
            user_id: user_id.into(),
            data: Map::new(),
            version,
            modified_at: Utc::now(),
            is_deleted,
        }
    }

    #[test]
    fn differing_versions_is_both_modified() {
        let local = snapshot("u1", 2, false);
        let remote = snapshot("u1", 3, false);
        assert_eq!(classify(Some(&local), Some(&remote), false), Some(ConflictKind::BothModified));
    }

    #[test]
    fn agreeing_sides_have_no_conflict() {
        let local = snapshot("u1", 3, false);
        let remote = snapshot("u1", 3, false);
        assert_eq!(classify(Some(&local), Some(&remote), false), None);
    }

    #[test]
    fn user_mismatch_always_escalates() {
        let local = snapshot("u1", 3, false);
        let remote = snapshot("u2", 3, false);
        assert_eq!(classify(Some(&local), Some(&remote), false), Some(ConflictKind::UserMismatch));
    }

    #[test]
    fn one_side_deleted_is_deletion_conflict() {
        let local = snapshot("u1", 3, true);
        let remote = snapshot("u1", 4, false);
        assert_eq!(classify(Some(&local), Some(&remote), false), Some(ConflictKind::DeletionConflict));
    }

    #[test]
    fn both_tombstoned_is_no_conflict() {
        let local = snapshot("u1", 3, true);
        let remote = snapshot("u1", 4, true);
        assert_eq!(classify(Some(&local), Some(&remote), false), None);
    }

    #[test]
    fn local_only_without_pending_op_is_not_synced() {
        let local = snapshot("u1", 1, false);
        assert_eq!(classify(Some(&local), None, false), Some(ConflictKind::LocalNotSynced));
    }

    #[test]
    fn local_only_with_pending_op_is_not_a_conflict() {
        let local = snapshot("u1", 1, false);
        assert_eq!(classify(Some(&local), None, true), None);
    }

    #[test]
    fn remote_only_is_not_a_conflict() {
        let remote = snapshot("u1", 1, false);
        assert_eq!(classify(None, Some(&remote), false), None);
    }
}
