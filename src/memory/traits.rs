//! Memory types and backend traits for the tiered store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Memory tiers, in read order. They differ in latency and durability:
/// working is an in-process map, short-term an expiring cache, long-term a
/// durable append-only store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryTier {
    Working,
    ShortTerm,
    LongTerm,
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => write!(f, "working"),
            Self::ShortTerm => write!(f, "short-term"),
            Self::LongTerm => write!(f, "long-term"),
        }
    }
}

/// One stored fact. `(namespace, key, tier)` is unique: writing replaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    /// Conversation/session id.
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub tier: MemoryTier,
    pub created_at: DateTime<Utc>,
    /// `None` for long-term entries, which never expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Expiring external cache backend for the short-term tier.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    fn name(&self) -> &str;
}

/// Durable append-only backend for the long-term tier. Entries are immutable
/// and never evicted by this component; retention is an external policy.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn append(&self, entry: &MemoryEntry) -> Result<()>;

    /// Query entries for a namespace, optionally filtered to one key,
    /// most-recent-first.
    async fn query(
        &self,
        namespace: &str,
        key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_term_entries_never_expire() {
        let entry = MemoryEntry {
            id: "e1".into(),
            namespace: "s1".into(),
            key: "k".into(),
            value: serde_json::json!("v"),
            tier: MemoryTier::LongTerm,
            created_at: Utc::now(),
            expires_at: None,
        };
        assert!(!entry.is_expired(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let now = Utc::now();
        let entry = MemoryEntry {
            id: "e1".into(),
            namespace: "s1".into(),
            key: "k".into(),
            value: serde_json::json!("v"),
            tier: MemoryTier::Working,
            created_at: now,
            expires_at: Some(now),
        };
        assert!(entry.is_expired(now));
    }

    #[test]
    fn tier_display_names() {
        assert_eq!(MemoryTier::ShortTerm.to_string(), "short-term");
    }
}
