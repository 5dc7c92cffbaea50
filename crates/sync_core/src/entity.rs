//! The consumer-defined entity abstraction.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A field-level delta between two versions of an entity.
///
/// Contains only the fields that changed; applying an empty delta to an
/// entity reproduces that same entity unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDelta(pub Map<String, Value>);

impl EntityDelta {
    /// An empty delta — the two entities being diffed were equal.
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// True if no fields changed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds a delta from an explicit set of changed field/value pairs.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Computes the delta between `prior` and `next`'s serialized maps.
    ///
    /// A field is included when present in `next` and either absent from
    /// `prior` or differs in value.
    pub fn diff(prior: &Map<String, Value>, next: &Map<String, Value>) -> Self {
        let mut changed = Map::new();
        for (key, value) in next {
            if prior.get(key) != Some(value) {
                changed.insert(key.clone(), value.clone());
            }
        }
        Self(changed)
    }

    /// Applies this delta on top of a base map, returning the merged map.
    pub fn apply_to(&self, base: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = base.clone();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// The set of operations every synced entity must support (spec §9's
/// "polymorphic entity" design note).
///
/// Consumers implement this for their own record types; the sync engine
/// never constructs a concrete entity itself, only reads through this
/// trait and writes serialized maps back through [`crate::entity::EntityDelta`]
/// and adapter calls.
pub trait SyncEntity: Clone + Send + Sync + 'static {
    /// Stable identifier, unique within `user_id()`.
    fn id(&self) -> &str;

    /// Owning user id.
    fn user_id(&self) -> &str;

    /// Creation timestamp.
    fn created_at(&self) -> DateTime<Utc>;

    /// Last-modified timestamp.
    fn modified_at(&self) -> DateTime<Utc>;

    /// Monotonically increasing per-entity version.
    fn version(&self) -> u64;

    /// Soft-delete flag.
    fn is_deleted(&self) -> bool;

    /// Serializes this entity to a field map, e.g. for transport or
    /// storage in a schemaless local adapter.
    fn to_map(&self) -> Map<String, Value>;

    /// Produces a field-level delta of `self` against `prior`. Returns an
    /// empty delta when the two serialize identically.
    fn diff(&self, prior: &Self) -> EntityDelta {
        EntityDelta::diff(&prior.to_map(), &self.to_map())
    }

    /// Returns a copy of `self` with `delta`'s fields applied on top.
    /// The inverse of [`SyncEntity::diff`]: `e.apply_delta(&e2.diff(&e))`
    /// reproduces `e2` in its serializable fields.
    fn apply_delta(&self, delta: &EntityDelta) -> Self
    where
        Self: Sized;
}
