//! In-memory key-value store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::kv::KeyValueStore;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory key-value store.
///
/// Backs tests and single-process deployments. Data is lost when the process
/// exits. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a shared store handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Clears all stored entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Returns the number of live entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Checks whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl)
        });
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        let current = entries.get(key).filter(|e| !e.is_expired(now));
        let matches = match (current, expected) {
            (None, None) => true,
            (Some(entry), Some(expected)) => &entry.value == expected,
            _ => false,
        };

        if matches {
            entries.insert(
                key.to_string(),
                Entry {
                    value: new,
                    expires_at: None,
                },
            );
        }
        Ok(matches)
    }
}
