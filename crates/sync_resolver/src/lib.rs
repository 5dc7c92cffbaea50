//! # Sync Resolver
//!
//! Conflict classification (`both_modified`, `user_mismatch`,
//! `local_not_synced`, `deletion_conflict`) and the built-in resolver
//! policies: last-write-wins, local/remote priority, merge, and
//! escalation to an external prompt.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod resolver;

pub use classify::classify;
pub use resolver::{
    last_write_wins, ConflictResolver, LastWriteWinsResolver, LocalPriorityResolver, MergeFn,
    MergeResolver, PromptAnswer, PromptCallback, RemotePriorityResolver, Side, UserPromptResolver,
};
