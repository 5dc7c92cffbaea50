//! Reactive reads (spec §9: "derived, not core") built by combining an
//! initial snapshot with the local adapter's `change_stream`, falling
//! back to polling when the adapter doesn't support one.

use std::sync::Arc;
use std::time::Duration;

use sync_adapters::LocalAdapter;
use sync_core::SyncEntity;
use tokio::sync::watch;

/// Starts a background task publishing `user_id`'s full non-deleted
/// entity set on `local`'s change stream, or on `poll_interval` if the
/// adapter has none. Stops when the returned receiver is dropped.
pub(crate) async fn watch_all<T, L>(local: Arc<L>, user_id: String, poll_interval: Duration) -> watch::Receiver<Vec<T>>
where
    T: SyncEntity,
    L: LocalAdapter<T> + 'static,
{
    let initial = local.get_all(&user_id).await.unwrap_or_default();
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        match local.change_stream().await {
            Some(mut changes) => loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = changes.recv() => match event {
                        Ok(detail) if detail.user_id == user_id => {
                            if let Ok(all) = local.get_all(&user_id).await {
                                if tx.send(all).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            },
            None => {
                let mut ticker = tokio::time::interval(poll_interval);
                loop {
                    tokio::select! {
                        _ = tx.closed() => break,
                        _ = ticker.tick() => {
                            if let Ok(all) = local.get_all(&user_id).await {
                                if tx.send(all).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    rx
}

/// Like [`watch_all`], scoped to a single entity id.
pub(crate) async fn watch_by_id<T, L>(
    local: Arc<L>,
    id: String,
    user_id: String,
    poll_interval: Duration,
) -> watch::Receiver<Option<T>>
where
    T: SyncEntity,
    L: LocalAdapter<T> + 'static,
{
    let initial = local.get_by_id(&id, &user_id).await.unwrap_or(None);
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        match local.change_stream().await {
            Some(mut changes) => loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = changes.recv() => match event {
                        Ok(detail) if detail.user_id == user_id && detail.entity_id == id => {
                            if let Ok(current) = local.get_by_id(&id, &user_id).await {
                                if tx.send(current).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            },
            None => {
                let mut ticker = tokio::time::interval(poll_interval);
                loop {
                    tokio::select! {
                        _ = tx.closed() => break,
                        _ = ticker.tick() => {
                            if let Ok(current) = local.get_by_id(&id, &user_id).await {
                                if tx.send(current).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Map, Value};
    use sync_adapters::InMemoryLocalAdapter;
    use sync_core::EntityDelta;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        user_id: String,
        version: u64,
    }

    impl SyncEntity for Note {
        fn id(&self) -> &str {
            &self.id
        }
        fn user_id(&self) -> &str {
            &self.user_id
        }
        fn created_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
        fn modified_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
        fn version(&self) -> u64 {
            self.version
        }
        fn is_deleted(&self) -> bool {
            false
        }
        fn to_map(&self) -> Map<String, Value> {
            Map::new()
        }
        fn apply_delta(&self, _delta: &EntityDelta) -> Self {
            self.clone()
        }
    }

    #[tokio::test]
    async fn watch_all_observes_subsequent_pushes() {
        let local = Arc::new(InMemoryLocalAdapter::<Note>::new());
        let mut rx = watch_all(local.clone(), "u1".into(), Duration::from_secs(30)).await;
        assert!(rx.borrow().is_empty());

        local
            .push(Note {
                id: "e1".into(),
                user_id: "u1".into(),
                version: 1,
            })
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test]
    async fn watch_by_id_tracks_one_entity() {
        let local = Arc::new(InMemoryLocalAdapter::<Note>::new());
        let mut rx = watch_by_id(local.clone(), "e1".into(), "u1".into(), Duration::from_secs(30)).await;
        assert!(rx.borrow().is_none());

        local
            .push(Note {
                id: "e1".into(),
                user_id: "u1".into(),
                version: 1,
            })
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());
    }
}
