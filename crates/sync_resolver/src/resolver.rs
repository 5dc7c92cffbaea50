//! Built-in conflict resolvers (spec §4.3).

use async_trait::async_trait;
use sync_core::{ConflictContext, ConflictResolution, EntitySnapshot};

/// Policy object that chooses a winner (or escalation) for a conflict.
///
/// A resolver is a named function: `name()` identifies it in logs and
/// diagnostics, `resolve()` is the `(local?, remote?, context) ->
/// ConflictResolution` mapping from spec §4.3.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// A short, stable name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Decides the outcome for one conflict.
    async fn resolve(
        &self,
        local: Option<&EntitySnapshot>,
        remote: Option<&EntitySnapshot>,
        context: &ConflictContext,
    ) -> ConflictResolution;
}

/// Which side [`last_write_wins`] chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local snapshot wins.
    Local,
    /// The remote snapshot wins.
    Remote,
}

/// Pure decision function behind [`LastWriteWinsResolver`], exposed
/// separately so it can be property-tested for antisymmetry without
/// going through the async trait.
///
/// Higher `version` wins; ties break on later `modified_at`; final ties
/// (equal version and timestamp) favor remote.
pub fn last_write_wins(local: Option<&EntitySnapshot>, remote: Option<&EntitySnapshot>) -> Side {
    match (local, remote) {
        (Some(l), Some(r)) => {
            if l.version != r.version {
                if l.version > r.version {
                    Side::Local
                } else {
                    Side::Remote
                }
            } else if l.modified_at != r.modified_at {
                if l.modified_at > r.modified_at {
                    Side::Local
                } else {
                    Side::Remote
                }
            } else {
                Side::Remote
            }
        }
        (Some(_), None) => Side::Local,
        (None, _) => Side::Remote,
    }
}

fn resolution_for(side: Side, local: Option<&EntitySnapshot>, remote: Option<&EntitySnapshot>) -> ConflictResolution {
    match side {
        Side::Local => match local {
            Some(l) => ConflictResolution::use_local(l.data.clone()),
            None => ConflictResolution::abort("last-write-wins chose local but no local snapshot exists"),
        },
        Side::Remote => match remote {
            Some(r) => ConflictResolution::use_remote(r.data.clone()),
            None => ConflictResolution::abort("last-write-wins chose remote but no remote snapshot exists"),
        },
    }
}

/// Picks whichever side has the higher `version`, falling back to the
/// most recent `modified_at`, favoring remote on a full tie.
#[derive(Debug, Default)]
pub struct LastWriteWinsResolver;

#[async_trait]
impl ConflictResolver for LastWriteWinsResolver {
    fn name(&self) -> &str {
        "last_write_wins"
    }

    async fn resolve(
        &self,
        local: Option<&EntitySnapshot>,
        remote: Option<&EntitySnapshot>,
        _context: &ConflictContext,
    ) -> ConflictResolution {
        resolution_for(last_write_wins(local, remote), local, remote)
    }
}

/// Always keeps local when it exists, regardless of version/timestamp.
#[derive(Debug, Default)]
pub struct LocalPriorityResolver;

#[async_trait]
impl ConflictResolver for LocalPriorityResolver {
    fn name(&self) -> &str {
        "local_priority"
    }

    async fn resolve(
        &self,
        local: Option<&EntitySnapshot>,
        remote: Option<&EntitySnapshot>,
        _context: &ConflictContext,
    ) -> ConflictResolution {
        match local.or(remote) {
            Some(winner) if local.is_some() => ConflictResolution::use_local(winner.data.clone()),
            Some(winner) => ConflictResolution::use_remote(winner.data.clone()),
            None => ConflictResolution::abort("neither side has data"),
        }
    }
}

/// Always keeps remote when it exists, regardless of version/timestamp.
#[derive(Debug, Default)]
pub struct RemotePriorityResolver;

#[async_trait]
impl ConflictResolver for RemotePriorityResolver {
    fn name(&self) -> &str {
        "remote_priority"
    }

    async fn resolve(
        &self,
        local: Option<&EntitySnapshot>,
        remote: Option<&EntitySnapshot>,
        _context: &ConflictContext,
    ) -> ConflictResolution {
        match remote.or(local) {
            Some(winner) if remote.is_some() => ConflictResolution::use_remote(winner.data.clone()),
            Some(winner) => ConflictResolution::use_local(winner.data.clone()),
            None => ConflictResolution::abort("neither side has data"),
        }
    }
}

/// A merge function: produces a new winning entity from both sides, or
/// `None` if no sensible merge exists.
pub trait MergeFn: Send + Sync {
    /// Attempts to merge `local` and `remote` into a single entity.
    fn merge(&self, local: Option<&EntitySnapshot>, remote: Option<&EntitySnapshot>) -> Option<serde_json::Map<String, serde_json::Value>>;
}

impl<F> MergeFn for F
where
    F: Fn(Option<&EntitySnapshot>, Option<&EntitySnapshot>) -> Option<serde_json::Map<String, serde_json::Value>> + Send + Sync,
{
    fn merge(&self, local: Option<&EntitySnapshot>, remote: Option<&EntitySnapshot>) -> Option<serde_json::Map<String, serde_json::Value>> {
        self(local, remote)
    }
}

/// Delegates to a consumer-supplied [`MergeFn`]; aborts with a
/// diagnostic when the merge function declines to produce a winner.
pub struct MergeResolver {
    merge_fn: Box<dyn MergeFn>,
}

impl MergeResolver {
    /// Wraps a merge function as a resolver.
    pub fn new(merge_fn: impl MergeFn + 'static) -> Self {
        Self {
            merge_fn: Box::new(merge_fn),
        }
    }
}

#[async_trait]
impl ConflictResolver for MergeResolver {
    fn name(&self) -> &str {
        "merge"
    }

    async fn resolve(
        &self,
        local: Option<&EntitySnapshot>,
        remote: Option<&EntitySnapshot>,
        _context: &ConflictContext,
    ) -> ConflictResolution {
        match self.merge_fn.merge(local, remote) {
            Some(data) => ConflictResolution::merge(data),
            None => ConflictResolution::abort("merge function could not reconcile the two sides"),
        }
    }
}

/// What an external prompt callback decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    /// Keep local.
    UseLocal,
    /// Keep remote.
    UseRemote,
    /// The caller already computed a merge (handled upstream); treated
    /// as `merge` if data is available, else aborts.
    Merge,
    /// Neither side should win.
    Abort,
}

/// Calls out to an external prompt (e.g. surfaced to a human via the UI)
/// and maps the answer into a [`ConflictResolution`].
#[async_trait]
pub trait PromptCallback: Send + Sync {
    /// Asks the external system to decide a conflict.
    async fn ask(&self, context: &ConflictContext) -> PromptAnswer;
}

/// Escalates every conflict to an external [`PromptCallback`].
pub struct UserPromptResolver {
    callback: Box<dyn PromptCallback>,
}

impl UserPromptResolver {
    /// Builds a resolver around the given callback.
    pub fn new(callback: impl PromptCallback + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl ConflictResolver for UserPromptResolver {
    fn name(&self) -> &str {
        "user_prompt"
    }

    async fn resolve(
        &self,
        local: Option<&EntitySnapshot>,
        remote: Option<&EntitySnapshot>,
        context: &ConflictContext,
    ) -> ConflictResolution {
        match self.callback.ask(context).await {
            PromptAnswer::UseLocal => match local {
                Some(l) => ConflictResolution::use_local(l.data.clone()),
                None => ConflictResolution::abort("user chose local but no local snapshot exists"),
            },
            PromptAnswer::UseRemote => match remote {
                Some(r) => ConflictResolution::use_remote(r.data.clone()),
                None => ConflictResolution::abort("user chose remote but no remote snapshot exists"),
            },
            PromptAnswer::Merge => ConflictResolution::ask_user(),
            PromptAnswer::Abort => ConflictResolution::abort("user aborted conflict resolution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::Map;

    fn snapshot(version: u64, modified_at: chrono::DateTime<Utc>) -> EntitySnapshot {
        EntitySnapshot {
            user_id: "u1".into(),
            data: Map::new(),
            version,
            modified_at,
            is_deleted: false,
        }
    }

    #[test]
    fn last_write_wins_picks_higher_version() {
        let now = Utc::now();
        let local = snapshot(2, now);
        let remote = snapshot(3, now);
        assert_eq!(last_write_wins(Some(&local), Some(&remote)), Side::Remote);
    }

    #[test]
    fn last_write_wins_breaks_ties_on_modified_at() {
        let now = Utc::now();
        let local = snapshot(2, now + Duration::seconds(5));
        let remote = snapshot(2, now);
        assert_eq!(last_write_wins(Some(&local), Some(&remote)), Side::Local);
    }

    #[test]
    fn last_write_wins_final_tie_favors_remote() {
        let now = Utc::now();
        let local = snapshot(2, now);
        let remote = snapshot(2, now);
        assert_eq!(last_write_wins(Some(&local), Some(&remote)), Side::Remote);
    }

    #[test]
    fn last_write_wins_is_antisymmetric_unless_equal() {
        let now = Utc::now();
        let local = snapshot(2, now);
        let remote = snapshot(5, now);
        let forward = last_write_wins(Some(&local), Some(&remote));
        let backward = last_write_wins(Some(&remote), Some(&local));
        assert_ne!(forward, backward);
    }

    #[tokio::test]
    async fn local_priority_prefers_local_even_when_older() {
        let now = Utc::now();
        let local = snapshot(1, now);
        let remote = snapshot(9, now + Duration::seconds(100));
        let ctx = sync_core::ConflictContext::new(
            "u1",
            "e1",
            sync_core::ConflictKind::BothModified,
            None,
            None,
            now,
        );
        let res = LocalPriorityResolver.resolve(Some(&local), Some(&remote), &ctx).await;
        assert_eq!(res.strategy, sync_core::ResolutionStrategy::UseLocal);
    }

    #[tokio::test]
    async fn merge_resolver_aborts_when_merge_fn_declines() {
        let resolver = MergeResolver::new(|_l: Option<&EntitySnapshot>, _r: Option<&EntitySnapshot>| None);
        let ctx = sync_core::ConflictContext::new(
            "u1",
            "e1",
            sync_core::ConflictKind::BothModified,
            None,
            None,
            Utc::now(),
        );
        let res = resolver.resolve(None, None, &ctx).await;
        assert_eq!(res.strategy, sync_core::ResolutionStrategy::Abort);
    }
}
