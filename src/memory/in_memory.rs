//! In-process cache and durable backends, used by default CLI runs and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::traits::{CacheBackend, DurableStore, MemoryEntry};

/// An expiring key/value cache backed by a mutex-protected hash map.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Utc::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

/// An append-only durable store backed by a mutex-protected vec.
pub struct InMemoryDurable {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryDurable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryDurable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurable {
    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let entries = self.entries.lock();
        let mut results: Vec<MemoryEntry> = entries
            .iter()
            .rev()
            .filter(|e| e.namespace == namespace && key.map(|k| e.key == k).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
