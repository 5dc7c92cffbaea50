//! # Sync Engine
//!
//! The push/pull cycle orchestrator: batches queued operations to the
//! remote, pulls remote changes back, classifies and resolves conflicts
//! through a [`sync_resolver::ConflictResolver`], and persists sync
//! metadata on both sides — all under a per-user concurrency guard that
//! enforces at most one cycle running at a time.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod engine;
mod hash;

pub use cancel::CancellationToken;
pub use config::{RetryConfig, SyncDirection, SyncEngineConfig, SyncOptions};
pub use engine::SyncEngine;
pub use hash::data_hash;
