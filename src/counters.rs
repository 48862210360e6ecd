//! View counters and live viewer presence.
//!
//! Presence has no background sweep: every read or write of a slug prunes the
//! entries that fell out of the liveness window before counting.

use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::store::{keys, SharedStore, StoreError};

pub const LIVENESS_WINDOW: Duration = Duration::from_secs(30);
const PRESENCE_TTL: Duration = Duration::from_secs(35);
const VIEWER_SET_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Counters {
    store: SharedStore,
}

impl Counters {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn views(&self, slug: &str) -> Result<i64, StoreError> {
        let key = keys::views(slug);
        match self.store.get(&key).await? {
            Some(raw) => raw.parse().map_err(|_| StoreError::NotAnInteger(key)),
            None => Ok(0),
        }
    }

    pub async fn record_view(&self, slug: &str) -> Result<i64, StoreError> {
        self.store.incr(&keys::views(slug)).await
    }

    pub async fn active_viewers(&self, slug: &str) -> Result<usize, StoreError> {
        self.prune_and_count(slug, Utc::now().timestamp_millis())
            .await
    }

    pub async fn touch_viewer(&self, slug: &str, viewer_id: &str) -> Result<usize, StoreError> {
        self.touch_viewer_at(slug, viewer_id, Utc::now().timestamp_millis())
            .await
    }

    async fn touch_viewer_at(
        &self,
        slug: &str,
        viewer_id: &str,
        now_ms: i64,
    ) -> Result<usize, StoreError> {
        let set_key = keys::viewers(slug);
        self.store
            .set(
                &keys::viewer(slug, viewer_id),
                &now_ms.to_string(),
                Some(PRESENCE_TTL),
            )
            .await?;
        self.store.sadd(&set_key, viewer_id).await?;
        self.store.expire(&set_key, VIEWER_SET_TTL).await?;

        self.prune_and_count(slug, now_ms).await
    }

    async fn prune_and_count(&self, slug: &str, now_ms: i64) -> Result<usize, StoreError> {
        let set_key = keys::viewers(slug);
        let window_ms = LIVENESS_WINDOW.as_millis() as i64;
        let mut active = 0;

        for viewer_id in self.store.smembers(&set_key).await? {
            let record_key = keys::viewer(slug, &viewer_id);
            let last_seen = self
                .store
                .get(&record_key)
                .await?
                .and_then(|raw| raw.parse::<i64>().ok());

            match last_seen {
                Some(seen) if now_ms - seen <= window_ms => active += 1,
                _ => {
                    debug!(slug, viewer_id = %viewer_id, "Evicting stale viewer");
                    self.store.srem(&set_key, &viewer_id).await?;
                    self.store.del(&record_key).await?;
                }
            }
        }

        Ok(active)
    }
}

/// `<unix millis>-<7 random chars>`, used when the client sends no id.
pub fn new_viewer_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &random[..7])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvStore, MemoryStore};
    use std::sync::Arc;

    fn counters() -> (Arc<MemoryStore>, Counters) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Counters::new(store))
    }

    #[tokio::test]
    async fn views_accumulate() {
        let (_, counters) = counters();
        assert_eq!(counters.views("post").await.unwrap(), 0);

        let mut last = 0;
        for _ in 0..7 {
            last = counters.record_view("post").await.unwrap();
        }

        assert_eq!(last, 7);
        assert_eq!(counters.views("post").await.unwrap(), 7);
        assert_eq!(counters.views("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refreshing_the_same_viewer_counts_once() {
        let (_, counters) = counters();
        let now = 1_700_000_000_000;

        assert_eq!(counters.touch_viewer_at("post", "a", now).await.unwrap(), 1);
        assert_eq!(
            counters.touch_viewer_at("post", "a", now + 1_000).await.unwrap(),
            1
        );
        assert_eq!(
            counters.touch_viewer_at("post", "b", now + 2_000).await.unwrap(),
            2
        );
        assert_eq!(counters.prune_and_count("other", now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_viewers_are_evicted_on_read_and_write() {
        let (store, counters) = counters();
        let now = 1_700_000_000_000;
        counters.touch_viewer_at("post", "old", now).await.unwrap();
        counters
            .touch_viewer_at("post", "fresh", now + 20_000)
            .await
            .unwrap();

        // exactly at the edge of the window the old viewer still counts
        assert_eq!(counters.prune_and_count("post", now + 30_000).await.unwrap(), 2);

        assert_eq!(counters.prune_and_count("post", now + 30_001).await.unwrap(), 1);
        assert!(!store.sismember("viewers:post", "old").await.unwrap());
        assert_eq!(store.get("viewer:post:old").await.unwrap(), None);

        assert_eq!(
            counters.touch_viewer_at("post", "new", now + 51_000).await.unwrap(),
            1
        );
        assert_eq!(
            store.smembers("viewers:post").await.unwrap(),
            vec!["new".to_string()]
        );
    }

    #[tokio::test]
    async fn ids_without_a_record_are_dropped() {
        let (store, counters) = counters();
        store.sadd("viewers:post", "ghost").await.unwrap();

        assert_eq!(counters.active_viewers("post").await.unwrap(), 0);
        assert!(store.smembers("viewers:post").await.unwrap().is_empty());
    }

    #[test]
    fn generated_ids_have_timestamp_and_suffix() {
        let id = new_viewer_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 7);
        assert!(crate::validation::validate_viewer_id(&id).is_ok());
    }
}
