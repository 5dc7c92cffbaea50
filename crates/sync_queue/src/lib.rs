//! # Sync Queue
//!
//! The durable per-user operation log: atomic append and drain,
//! coalescing at enqueue time, and retry accounting with a hard ceiling.
//!
//! A failed operation never blocks the rest of the queue — per-operation
//! resiliency is a first-class invariant here, not an afterthought.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coalesce;
mod manager;

pub use coalesce::{coalesce, CoalesceOutcome};
pub use manager::QueueManager;
