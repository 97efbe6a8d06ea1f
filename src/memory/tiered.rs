//! The tiered conversation-memory store.
//!
//! Read path checks working, then short-term, then long-term, merging and
//! re-sorting by recency. Write path: working is synchronous and in-process,
//! short-term goes to the expiring cache with a TTL, long-term is enqueued on
//! a bounded queue and applied asynchronously with best-effort delivery;
//! a long-term write failure never fails the user-facing turn.

use anyhow::{bail, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{CacheBackend, DurableStore, MemoryEntry, MemoryTier};
use crate::config::MemoryConfig;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub struct TieredMemory {
    working: Mutex<HashMap<(String, String), MemoryEntry>>,
    /// Keys known to the short-term cache, per namespace. The cache backend
    /// is get/set/delete only, so key enumeration is tracked here.
    short_index: Mutex<HashMap<String, Vec<String>>>,
    cache: Arc<dyn CacheBackend>,
    durable: Arc<dyn DurableStore>,
    long_tx: mpsc::Sender<MemoryEntry>,
    telemetry: Arc<dyn TelemetrySink>,
    working_ttl: Duration,
    short_ttl: Duration,
}

impl TieredMemory {
    /// Build the store and spawn the long-term write consumer.
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        durable: Arc<dyn DurableStore>,
        config: &MemoryConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let (long_tx, long_rx) = mpsc::channel(config.long_term_queue_depth.max(1));
        spawn_long_term_writer(
            long_rx,
            durable.clone(),
            config.long_term_retry_max,
            telemetry.clone(),
        );

        Self {
            working: Mutex::new(HashMap::new()),
            short_index: Mutex::new(HashMap::new()),
            cache,
            durable,
            long_tx,
            telemetry,
            working_ttl: Duration::from_secs(config.working_ttl_secs),
            short_ttl: Duration::from_secs(config.short_term_ttl_secs),
        }
    }

    /// Write an entry. `(namespace, key, tier)` is unique: an existing entry
    /// is replaced. Returns the new entry's id.
    pub async fn store(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        tier: MemoryTier,
        ttl: Option<Duration>,
    ) -> Result<String> {
        let now = Utc::now();
        let effective_ttl = match tier {
            MemoryTier::Working => Some(ttl.unwrap_or(self.working_ttl)),
            MemoryTier::ShortTerm => Some(ttl.unwrap_or(self.short_ttl)),
            MemoryTier::LongTerm => None,
        };
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            tier,
            created_at: now,
            expires_at: effective_ttl.map(|ttl| {
                now + chrono::Duration::from_std(ttl)
                    .unwrap_or_else(|_| chrono::Duration::hours(1))
            }),
        };
        let id = entry.id.clone();

        match tier {
            MemoryTier::Working => {
                self.working
                    .lock()
                    .insert((namespace.to_string(), key.to_string()), entry);
            }
            MemoryTier::ShortTerm => {
                let ttl = effective_ttl.unwrap_or(self.short_ttl);
                let serialized = serde_json::to_string(&entry)?;
                if let Err(e) = self
                    .cache
                    .set(&cache_key(namespace, key), &serialized, ttl)
                    .await
                {
                    warn!(namespace, key, "short-term write failed: {e}");
                } else {
                    let mut index = self.short_index.lock();
                    let keys = index.entry(namespace.to_string()).or_default();
                    if !keys.iter().any(|k| k == key) {
                        keys.push(key.to_string());
                    }
                }
            }
            MemoryTier::LongTerm => {
                // Fire-and-forget: a full queue drops the write with a warning
                // rather than blocking the turn.
                if let Err(e) = self.long_tx.try_send(entry) {
                    warn!(namespace, key, "long-term write queue full, dropping: {e}");
                    self.telemetry.emit(TelemetryEvent::Error {
                        stage: "memory".to_string(),
                        message: format!("long-term write queue full for {namespace}/{key}: {e}"),
                    });
                }
            }
        }

        Ok(id)
    }

    /// Read entries for a namespace, most-recent-first. With no tier given,
    /// working is checked first, then short-term, then long-term fills the
    /// remaining limit. Backend failures degrade to misses.
    pub async fn retrieve(
        &self,
        namespace: &str,
        key: Option<&str>,
        tier: Option<MemoryTier>,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let mut results: Vec<MemoryEntry> = Vec::new();
        let now = Utc::now();

        if matches!(tier, None | Some(MemoryTier::Working)) {
            let mut working = self.working.lock();
            working.retain(|_, e| !e.is_expired(now));
            results.extend(
                working
                    .iter()
                    .filter(|((ns, k), _)| {
                        ns == namespace && key.map(|want| want == k).unwrap_or(true)
                    })
                    .map(|(_, e)| e.clone()),
            );
        }

        if matches!(tier, None | Some(MemoryTier::ShortTerm)) {
            let keys: Vec<String> = match key {
                Some(k) => vec![k.to_string()],
                None => self
                    .short_index
                    .lock()
                    .get(namespace)
                    .cloned()
                    .unwrap_or_default(),
            };
            for k in keys {
                match self.cache.get(&cache_key(namespace, &k)).await {
                    Ok(Some(raw)) => match serde_json::from_str::<MemoryEntry>(&raw) {
                        Ok(entry) if !entry.is_expired(now) => results.push(entry),
                        Ok(_) | Err(_) => self.drop_short_key(namespace, &k),
                    },
                    Ok(None) => self.drop_short_key(namespace, &k),
                    Err(e) => {
                        debug!(namespace, key = %k, "short-term read degraded to miss: {e}");
                    }
                }
            }
        }

        if matches!(tier, None | Some(MemoryTier::LongTerm)) {
            let remaining = limit.saturating_sub(results.len());
            if remaining > 0 {
                match self.durable.query(namespace, key, remaining).await {
                    Ok(entries) => results.extend(entries),
                    Err(e) => warn!(namespace, "long-term read degraded to miss: {e}"),
                }
            }
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(limit);
        results
    }

    /// Move an entry between tiers: re-store under the target tier, remove
    /// from the source. Long-term entries are immutable, so promotion *from*
    /// long-term copies without deleting.
    pub async fn promote(
        &self,
        namespace: &str,
        key: &str,
        from: MemoryTier,
        to: MemoryTier,
    ) -> Result<String> {
        let existing = self.retrieve(namespace, Some(key), Some(from), 1).await;
        let Some(entry) = existing.into_iter().next() else {
            bail!("no {from} entry to promote for {namespace}/{key}");
        };

        let id = self.store(namespace, key, entry.value, to, None).await?;
        if from != MemoryTier::LongTerm {
            self.delete(namespace, key, from).await;
        }
        Ok(id)
    }

    /// Remove an entry from the working or short-term tier. Long-term entries
    /// are append-only and cannot be deleted here.
    pub async fn delete(&self, namespace: &str, key: &str, tier: MemoryTier) {
        match tier {
            MemoryTier::Working => {
                self.working
                    .lock()
                    .remove(&(namespace.to_string(), key.to_string()));
            }
            MemoryTier::ShortTerm => {
                if let Err(e) = self.cache.delete(&cache_key(namespace, key)).await {
                    debug!(namespace, key, "short-term delete failed: {e}");
                }
                self.drop_short_key(namespace, key);
            }
            MemoryTier::LongTerm => {}
        }
    }

    /// Drop all working-tier entries in a namespace whose key starts with the
    /// given prefix. Used to reset topic-scoped state on a topic switch.
    pub fn clear_working_prefix(&self, namespace: &str, prefix: &str) {
        self.working
            .lock()
            .retain(|(ns, key), _| !(ns == namespace && key.starts_with(prefix)));
    }

    fn drop_short_key(&self, namespace: &str, key: &str) {
        if let Some(keys) = self.short_index.lock().get_mut(namespace) {
            keys.retain(|k| k != key);
        }
    }
}

fn cache_key(namespace: &str, key: &str) -> String {
    format!("{namespace}::{key}")
}

/// Background consumer for long-term writes, with bounded retry/backoff.
fn spawn_long_term_writer(
    mut rx: mpsc::Receiver<MemoryEntry>,
    durable: Arc<dyn DurableStore>,
    retry_max: u32,
    telemetry: Arc<dyn TelemetrySink>,
) {
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            let mut attempt = 0u32;
            loop {
                match durable.append(&entry).await {
                    Ok(()) => break,
                    Err(e) if attempt < retry_max => {
                        attempt += 1;
                        let backoff = Duration::from_millis(50 * u64::from(attempt));
                        debug!(
                            namespace = %entry.namespace,
                            key = %entry.key,
                            attempt,
                            "long-term write failed, retrying: {e}"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => {
                        warn!(
                            namespace = %entry.namespace,
                            key = %entry.key,
                            "long-term write dropped after {attempt} retries: {e}"
                        );
                        telemetry.emit(TelemetryEvent::Error {
                            stage: "memory".to_string(),
                            message: format!(
                                "long-term write dropped for {}/{}: {e}",
                                entry.namespace, entry.key
                            ),
                        });
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::in_memory::{InMemoryCache, InMemoryDurable};
    use crate::telemetry::test_support::CollectingSink;
    use crate::telemetry::NullSink;
    use async_trait::async_trait;

    fn memory() -> TieredMemory {
        TieredMemory::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryDurable::new()),
            &MemoryConfig::default(),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn working_round_trip_returns_exact_value() {
        let mem = memory();
        mem.store(
            "s1",
            "topic",
            serde_json::json!("billing dispute"),
            MemoryTier::Working,
            None,
        )
        .await
        .unwrap();

        let entries = mem.retrieve("s1", Some("topic"), None, 10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, serde_json::json!("billing dispute"));
        assert_eq!(entries[0].tier, MemoryTier::Working);
    }

    #[tokio::test]
    async fn writing_same_key_replaces_rather_than_duplicates() {
        let mem = memory();
        for value in ["first", "second"] {
            mem.store(
                "s1",
                "k",
                serde_json::json!(value),
                MemoryTier::Working,
                None,
            )
            .await
            .unwrap();
        }

        let entries = mem.retrieve("s1", Some("k"), Some(MemoryTier::Working), 10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, serde_json::json!("second"));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let mem = memory();
        mem.store("s1", "k", serde_json::json!(1), MemoryTier::Working, None)
            .await
            .unwrap();
        assert!(mem.retrieve("s2", Some("k"), None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn promotion_survives_working_expiry() {
        let mem = memory();
        mem.store(
            "s1",
            "k",
            serde_json::json!("keep me"),
            MemoryTier::Working,
            Some(Duration::from_millis(40)),
        )
        .await
        .unwrap();

        mem.promote("s1", "k", MemoryTier::Working, MemoryTier::ShortTerm)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let entries = mem.retrieve("s1", Some("k"), None, 10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tier, MemoryTier::ShortTerm);
        assert_eq!(entries[0].value, serde_json::json!("keep me"));
    }

    #[tokio::test]
    async fn promote_missing_entry_is_an_error() {
        let mem = memory();
        let result = mem
            .promote("s1", "ghost", MemoryTier::Working, MemoryTier::ShortTerm)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn long_term_writes_become_visible_asynchronously() {
        let mem = memory();
        mem.store(
            "s1",
            "fact",
            serde_json::json!("prefers email"),
            MemoryTier::LongTerm,
            None,
        )
        .await
        .unwrap();

        // Eventual, not immediate, visibility.
        let mut entries = Vec::new();
        for _ in 0..50 {
            entries = mem
                .retrieve("s1", Some("fact"), Some(MemoryTier::LongTerm), 10)
                .await;
            if !entries.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(entries.len(), 1);
        assert!(entries[0].expires_at.is_none());
    }

    #[tokio::test]
    async fn expired_working_entries_are_dropped_on_read() {
        let mem = memory();
        mem.store(
            "s1",
            "k",
            serde_json::json!("ephemeral"),
            MemoryTier::Working,
            Some(Duration::from_millis(0)),
        )
        .await
        .unwrap();
        assert!(mem.retrieve("s1", Some("k"), None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn retrieve_merges_tiers_most_recent_first() {
        let mem = memory();
        mem.store("s1", "a", serde_json::json!(1), MemoryTier::ShortTerm, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        mem.store("s1", "b", serde_json::json!(2), MemoryTier::Working, None)
            .await
            .unwrap();

        let entries = mem.retrieve("s1", None, None, 10).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "b");
        assert_eq!(entries[1].key, "a");
    }

    #[tokio::test]
    async fn clear_working_prefix_only_hits_matching_keys() {
        let mem = memory();
        mem.store("s1", "topic:notes", serde_json::json!(1), MemoryTier::Working, None)
            .await
            .unwrap();
        mem.store("s1", "context", serde_json::json!(2), MemoryTier::Working, None)
            .await
            .unwrap();

        mem.clear_working_prefix("s1", "topic:");
        let entries = mem.retrieve("s1", None, Some(MemoryTier::Working), 10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "context");
    }

    struct FailingCache;

    #[async_trait]
    impl CacheBackend for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            bail!("cache down")
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            bail!("cache down")
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            bail!("cache down")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn short_term_failures_degrade_to_cache_miss() {
        let mem = TieredMemory::new(
            Arc::new(FailingCache),
            Arc::new(InMemoryDurable::new()),
            &MemoryConfig::default(),
            Arc::new(NullSink),
        );

        // Neither the write nor the read raises.
        mem.store("s1", "k", serde_json::json!(1), MemoryTier::ShortTerm, None)
            .await
            .unwrap();
        assert!(mem
            .retrieve("s1", Some("k"), Some(MemoryTier::ShortTerm), 10)
            .await
            .is_empty());
    }

    struct FailingDurable;

    #[async_trait]
    impl DurableStore for FailingDurable {
        async fn append(&self, _entry: &MemoryEntry) -> Result<()> {
            bail!("store down")
        }
        async fn query(
            &self,
            _namespace: &str,
            _key: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<MemoryEntry>> {
            bail!("store down")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn exhausted_long_term_write_emits_error_event() {
        let sink = Arc::new(CollectingSink::default());
        let config = MemoryConfig {
            long_term_retry_max: 1,
            ..MemoryConfig::default()
        };
        let mem = TieredMemory::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(FailingDurable),
            &config,
            sink.clone(),
        );

        mem.store("s1", "fact", serde_json::json!(1), MemoryTier::LongTerm, None)
            .await
            .unwrap();

        // The writer retries once with backoff before giving up.
        for _ in 0..50 {
            if !sink.events.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let events = sink.events.lock();
        assert!(matches!(
            events.as_slice(),
            [TelemetryEvent::Error { stage, .. }] if stage == "memory"
        ));
    }
}
