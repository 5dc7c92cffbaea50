//! Deterministic content hash over a user's synced entity set, for
//! [`sync_core::SyncMetadata::data_hash`].

use sha2::{Digest, Sha256};
use sync_core::SyncEntity;

/// Hashes the canonicalized, `id`-ordered serialization of `entities`.
///
/// Deterministic across processes and adapter implementations: two
/// sides holding the same entities (regardless of insertion order)
/// produce the same hash, which is what lets [`crate::SyncEngine`]
/// detect drift without fetching every field on every cycle.
pub fn data_hash<T: SyncEntity>(entities: &[T]) -> String {
    let mut ids: Vec<&T> = entities.iter().collect();
    ids.sort_by(|a, b| a.id().cmp(b.id()));

    let mut hasher = Sha256::new();
    for entity in ids {
        hasher.update(entity.id().as_bytes());
        hasher.update([0u8]);
        // serde_json::Map iterates in insertion order; sort keys so the
        // hash doesn't depend on field insertion order either.
        let map = entity.to_map();
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(map[key].to_string().as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(entity.version().to_le_bytes());
        hasher.update([entity.is_deleted() as u8]);
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}
