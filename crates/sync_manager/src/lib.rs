//! # Sync Manager
//!
//! The facade consumer applications talk to: `save`/`delete` local
//! mutations, `sync` them against a remote, `watch_all`/`watch_by_id`
//! reactive reads, and `switch_user` between accounts sharing one
//! device — composing [`sync_queue`], [`sync_engine`], and
//! [`sync_resolver`] over a pair of [`sync_adapters`] implementations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod manager;
mod shutdown;
mod watch;

pub use config::{Migration, MigrationErrorHandler, SyncManagerConfig, UserSwitchStrategy};
pub use manager::SyncManager;
pub use shutdown::DrainResult;
