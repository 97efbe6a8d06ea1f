//! Tiered conversation memory: working, short-term, and long-term.

pub mod in_memory;
pub mod sqlite;
pub mod tiered;
pub mod traits;

pub use in_memory::{InMemoryCache, InMemoryDurable};
pub use sqlite::SqliteDurable;
pub use tiered::TieredMemory;
pub use traits::{CacheBackend, DurableStore, MemoryEntry, MemoryTier};

use crate::config::MemoryConfig;
use crate::telemetry::TelemetrySink;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Factory: build the tiered store from config. The durable tier is sqlite
/// when a path is configured, in-process otherwise.
pub fn create_memory(
    config: &MemoryConfig,
    telemetry: Arc<dyn TelemetrySink>,
) -> Result<TieredMemory> {
    let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
    let durable: Arc<dyn DurableStore> = match &config.durable_path {
        Some(path) => Arc::new(SqliteDurable::new(Path::new(path))?),
        None => Arc::new(InMemoryDurable::new()),
    };
    Ok(TieredMemory::new(cache, durable, config, telemetry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NullSink;
    use tempfile::TempDir;

    #[tokio::test]
    async fn factory_defaults_to_in_memory_durable() {
        let mem = create_memory(&MemoryConfig::default(), Arc::new(NullSink)).unwrap();
        mem.store("s1", "k", serde_json::json!(1), MemoryTier::Working, None)
            .await
            .unwrap();
        assert_eq!(mem.retrieve("s1", None, None, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn factory_builds_sqlite_durable_when_path_set() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig {
            durable_path: Some(tmp.path().join("mem.db").to_string_lossy().into_owned()),
            ..MemoryConfig::default()
        };
        assert!(create_memory(&config, Arc::new(NullSink)).is_ok());
    }
}
