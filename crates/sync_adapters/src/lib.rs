//! # Sync Adapters
//!
//! The adapter contracts the sync engine is built against —
//! [`local::LocalAdapter`] for on-device storage and
//! [`remote::RemoteAdapter`] for the server side — plus in-memory
//! reference implementations of both, used in tests and as a starting
//! point for a real adapter.
//!
//! Concrete production adapters (a SQLite-backed `LocalAdapter`, an
//! HTTP-backed `RemoteAdapter`) are a consumer concern and out of scope
//! here; so is the schema migration executor, for which
//! [`local::MigratableAdapter`] only declares the storage contract it
//! would run against.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod local;
mod remote;

pub use change::ChangeDetail;
pub use local::{InMemoryLocalAdapter, LocalAdapter, MigratableAdapter, RawSnapshot, TransactionOp};
pub use remote::{InMemoryRemoteAdapter, RemoteAdapter};
