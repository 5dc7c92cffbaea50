//! Change notifications emitted by adapters capable of reactive reads.

use sync_core::DataChangeKind;

/// One change observed by a [`crate::local::LocalAdapter::change_stream`]
/// or [`crate::remote::RemoteAdapter::change_stream`].
///
/// `entity` carries the new state for `Created`/`Updated` and is `None`
/// for `Deleted`, mirroring the delete operation's own payload-free shape.
#[derive(Debug, Clone)]
pub struct ChangeDetail<T> {
    /// Owning user id.
    pub user_id: String,
    /// Affected entity id.
    pub entity_id: String,
    /// What happened to it.
    pub kind: DataChangeKind,
    /// The entity after the change, when one exists.
    pub entity: Option<T>,
    /// Id of the device that produced this change, when the adapter can
    /// report one. Used by external-change ingestion to suppress events
    /// that originated from the consuming device itself.
    pub source_device_id: Option<String>,
}
