//! Sqlite-backed durable store for the long-term tier.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

use super::traits::{DurableStore, MemoryEntry, MemoryTier};

/// Append-only sqlite table, one row per long-term entry. Operations are
/// short single-statement transactions behind a mutex; the async write queue
/// in the tiered store keeps this off the turn path.
pub struct SqliteDurable {
    conn: Mutex<Connection>,
}

impl SqliteDurable {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open memory database {}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_entries (
                id         TEXT PRIMARY KEY,
                namespace  TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_namespace
                ON memory_entries(namespace, created_at);",
        )
        .context("failed to initialize memory schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
        let value: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        Ok(MemoryEntry {
            id: row.get(0)?,
            namespace: row.get(1)?,
            key: row.get(2)?,
            value: serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value)),
            tier: MemoryTier::LongTerm,
            created_at: created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            expires_at: None,
        })
    }
}

#[async_trait]
impl DurableStore for SqliteDurable {
    async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO memory_entries (id, namespace, key, value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.namespace,
                entry.key,
                entry.value.to_string(),
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("failed to append memory entry")?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock();
        let mut results = Vec::new();

        match key {
            Some(key) => {
                let mut stmt = conn.prepare(
                    "SELECT id, namespace, key, value, created_at FROM memory_entries
                     WHERE namespace = ?1 AND key = ?2
                     ORDER BY created_at DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![namespace, key, limit], Self::row_to_entry)?;
                for row in rows {
                    results.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, namespace, key, value, created_at FROM memory_entries
                     WHERE namespace = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![namespace, limit], Self::row_to_entry)?;
                for row in rows {
                    results.push(row?);
                }
            }
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(namespace: &str, key: &str, value: serde_json::Value) -> MemoryEntry {
        MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            tier: MemoryTier::LongTerm,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn append_and_query_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteDurable::new(&tmp.path().join("memory.db")).unwrap();

        store
            .append(&entry("s1", "preference", serde_json::json!({"lang": "en"})))
            .await
            .unwrap();

        let results = store.query("s1", Some("preference"), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value["lang"], "en");
        assert_eq!(results[0].tier, MemoryTier::LongTerm);
    }

    #[tokio::test]
    async fn query_scopes_to_namespace() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteDurable::new(&tmp.path().join("memory.db")).unwrap();

        store
            .append(&entry("s1", "k", serde_json::json!(1)))
            .await
            .unwrap();
        store
            .append(&entry("s2", "k", serde_json::json!(2)))
            .await
            .unwrap();

        assert_eq!(store.query("s1", None, 10).await.unwrap().len(), 1);
        assert_eq!(store.query("s3", None, 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn query_respects_limit() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteDurable::new(&tmp.path().join("memory.db")).unwrap();

        for i in 0..5 {
            store
                .append(&entry("s1", "k", serde_json::json!(i)))
                .await
                .unwrap();
        }
        assert_eq!(store.query("s1", None, 3).await.unwrap().len(), 3);
    }
}
