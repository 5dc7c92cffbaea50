//! Pure coalescing rules applied at enqueue time (spec §4.1).

use serde_json::{Map, Value};
use sync_core::{OperationStatus, OperationType, SyncOperation};

/// What should happen to the per-entity queue slot when `incoming` is
/// enqueued against `existing` (same `entity_id`).
pub enum CoalesceOutcome {
    /// Replace the slot with this operation (retry count already reset
    /// as required by the matched rule).
    Replace(SyncOperation),
    /// Both operations cancel out; the slot becomes empty
    /// (`create` followed by `delete`: never committed remotely).
    Remove,
    /// The incoming operation is dropped; the existing slot is kept
    /// unchanged (a `delete` followed by anything but a resurrecting
    /// `create`).
    KeepExisting,
}

/// Applies the coalescing rules for a newly enqueued operation against
/// whatever is already pending for the same `entity_id`, if anything.
pub fn coalesce(existing: Option<&SyncOperation>, incoming: SyncOperation) -> CoalesceOutcome {
    let Some(existing) = existing else {
        return CoalesceOutcome::Replace(incoming);
    };

    match (existing.op_type, incoming.op_type) {
        // create + later update -> single create carrying the latest payload.
        (OperationType::Create, OperationType::Update) => {
            CoalesceOutcome::Replace(merged(existing, OperationType::Create, incoming.data))
        }
        // create + later create -> collapse to the latest create.
        (OperationType::Create, OperationType::Create) => {
            CoalesceOutcome::Replace(merged(existing, OperationType::Create, incoming.data))
        }
        // create + later delete -> both removed, never committed remotely.
        (OperationType::Create, OperationType::Delete) => CoalesceOutcome::Remove,

        // update + later update -> single update, retry_count reset.
        (OperationType::Update, OperationType::Update) => {
            CoalesceOutcome::Replace(merged(existing, OperationType::Update, incoming.data))
        }
        // update + later delete -> single delete.
        (OperationType::Update, OperationType::Delete) => {
            CoalesceOutcome::Replace(merged(existing, OperationType::Delete, None))
        }

        // delete + later create -> tombstone resurrection: the create wins.
        (OperationType::Delete, OperationType::Create) => {
            CoalesceOutcome::Replace(merged(existing, OperationType::Create, incoming.data))
        }
        // delete + anything else -> illegal; the delete remains.
        (OperationType::Delete, OperationType::Update)
        | (OperationType::Delete, OperationType::Delete) => CoalesceOutcome::KeepExisting,
    }
}

/// Builds the coalesced operation: keeps the existing slot's id and
/// timestamp (it is still the same logical pending change), takes the
/// new type/data, and resets the retry count and backoff clock (the
/// update+update rule's reset is applied uniformly to every coalesce
/// that keeps a live slot).
fn merged(existing: &SyncOperation, op_type: OperationType, data: Option<Map<String, Value>>) -> SyncOperation {
    SyncOperation {
        id: existing.id.clone(),
        user_id: existing.user_id.clone(),
        op_type,
        entity_id: existing.entity_id.clone(),
        data,
        timestamp: existing.timestamp,
        retry_count: 0,
        status: OperationStatus::Pending,
        last_attempt_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op_type: OperationType, data: Option<Map<String, Value>>) -> SyncOperation {
        SyncOperation {
            id: "op-1".into(),
            user_id: "u1".into(),
            op_type,
            entity_id: "e1".into(),
            data,
            timestamp: 1,
            retry_count: 2,
            status: OperationStatus::Pending,
            last_attempt_at: None,
        }
    }

    fn data(title: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("title".into(), Value::String(title.into()));
        m
    }

    #[test]
    fn create_then_update_collapses_to_create_with_latest_payload() {
        let existing = op(OperationType::Create, Some(data("v1")));
        let incoming = op(OperationType::Update, Some(data("v2")));
        match coalesce(Some(&existing), incoming) {
            CoalesceOutcome::Replace(merged) => {
                assert_eq!(merged.op_type, OperationType::Create);
                assert_eq!(merged.data, Some(data("v2")));
                assert_eq!(merged.retry_count, 0);
            }
            _ => panic!("expected Replace"),
        }
    }

    #[test]
    fn create_then_delete_removes_both() {
        let existing = op(OperationType::Create, Some(data("v1")));
        let incoming = op(OperationType::Delete, None);
        assert!(matches!(coalesce(Some(&existing), incoming), CoalesceOutcome::Remove));
    }

    #[test]
    fn update_then_update_resets_retry_count() {
        let existing = op(OperationType::Update, Some(data("v1")));
        let incoming = op(OperationType::Update, Some(data("v2")));
        match coalesce(Some(&existing), incoming) {
            CoalesceOutcome::Replace(merged) => {
                assert_eq!(merged.data, Some(data("v2")));
                assert_eq!(merged.retry_count, 0);
            }
            _ => panic!("expected Replace"),
        }
    }

    #[test]
    fn update_then_delete_collapses_to_delete() {
        let existing = op(OperationType::Update, Some(data("v1")));
        let incoming = op(OperationType::Delete, None);
        match coalesce(Some(&existing), incoming) {
            CoalesceOutcome::Replace(merged) => {
                assert_eq!(merged.op_type, OperationType::Delete);
                assert!(merged.data.is_none());
            }
            _ => panic!("expected Replace"),
        }
    }

    #[test]
    fn delete_then_create_resurrects() {
        let existing = op(OperationType::Delete, None);
        let incoming = op(OperationType::Create, Some(data("reborn")));
        match coalesce(Some(&existing), incoming) {
            CoalesceOutcome::Replace(merged) => {
                assert_eq!(merged.op_type, OperationType::Create);
                assert_eq!(merged.data, Some(data("reborn")));
            }
            _ => panic!("expected Replace"),
        }
    }

    #[test]
    fn delete_then_update_keeps_delete() {
        let existing = op(OperationType::Delete, None);
        let incoming = op(OperationType::Update, Some(data("ignored")));
        assert!(matches!(
            coalesce(Some(&existing), incoming),
            CoalesceOutcome::KeepExisting
        ));
    }

    #[test]
    fn no_existing_entry_just_inserts() {
        let incoming = op(OperationType::Create, Some(data("v1")));
        match coalesce(None, incoming) {
            CoalesceOutcome::Replace(inserted) => assert_eq!(inserted.op_type, OperationType::Create),
            _ => panic!("expected Replace"),
        }
    }
}
