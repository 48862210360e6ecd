use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{KvStore, StoreError};

enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store with Redis semantics for the commands in [`KvStore`].
///
/// Used when no `REDIS_URL` is configured and by tests. Nothing survives a
/// restart. Expired keys are dropped when next touched.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn set_of<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a mut BTreeSet<String>>, StoreError> {
    match live(entries, key) {
        Some(Entry {
            value: Value::Set(members),
            ..
        }) => Ok(Some(members)),
        Some(_) => Err(StoreError::WrongType(key.to_string())),
        None => Ok(None),
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let existed = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => {
                let Value::Text(text) = &mut entry.value else {
                    return Err(StoreError::WrongType(key.to_string()));
                };
                let next = text
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger(key.to_string()))?
                    + 1;
                *text = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Text("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = live(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(members) = set_of(&mut entries, key)? {
            return Ok(members.insert(member.to_string()));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Set(BTreeSet::from([member.to_string()])),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(members) = set_of(&mut entries, key)? else {
            return Ok(false);
        };
        let removed = members.remove(member);
        // Redis drops a set once its last member is gone.
        if members.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(set_of(&mut entries, key)?.is_some_and(|members| members.contains(member)))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(set_of(&mut entries, key)?
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}
