//! # Sync Core
//!
//! Shared vocabulary for the offline-first sync engine: the
//! [`SyncEntity`] trait consumers implement for their own records, queued
//! [`SyncOperation`]s, conflict diagnostics, sync metadata/status, and the
//! [`SyncEvent`] stream consumers subscribe to.
//!
//! This is a pure data/trait crate — no I/O, no async runtime.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod event;
mod metadata;
mod operation;
mod status;

pub use conflict::{ConflictContext, ConflictKind, ConflictResolution, EntitySnapshot, ResolutionStrategy};
pub use entity::{EntityDelta, SyncEntity};
pub use error::{SyncError, SyncResult};
pub use event::{DataChangeKind, DataChangeSource, SyncEvent};
pub use metadata::SyncMetadata;
pub use operation::{OperationStatus, OperationType, SyncOperation};
pub use status::{SyncCycleResult, SyncState, SyncStatusSnapshot};
