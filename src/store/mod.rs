//! Key-value store seam.
//!
//! Every piece of durable state lives behind [`KvStore`]. The trait mirrors the
//! handful of single-key Redis commands the service needs; there are no
//! cross-key transactions, so multi-step updates can interleave with other
//! requests.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

pub type SharedStore = Arc<dyn KvStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("malformed record at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("wrong kind of value at {0}")]
    WrongType(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite `key`. `ttl: None` clears any previous expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomic increment by one; a missing key counts from zero.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Returns whether the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns whether the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(StoreError::Encode)?;
    store.set(key, &raw, ttl).await
}

/// Key layout shared by every component.
pub mod keys {
    pub const EMAIL_SUBSCRIBERS: &str = "subscribers:emails";
    pub const WEBHOOK_SUBSCRIBERS: &str = "subscribers:webhooks";

    pub fn subscriber(email: &str) -> String {
        format!("subscriber:{email}")
    }

    pub fn webhook(url: &str) -> String {
        format!("webhook:{url}")
    }

    pub fn views(slug: &str) -> String {
        format!("views:{slug}")
    }

    pub fn viewer(slug: &str, viewer_id: &str) -> String {
        format!("viewer:{slug}:{viewer_id}")
    }

    pub fn viewers(slug: &str) -> String {
        format!("viewers:{slug}")
    }
}
