//! TOML-file agent source for CLI runs and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::traits::{AgentDefinition, AgentSource};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    agents: Vec<AgentDefinition>,
}

/// Reads agent definitions from a TOML file of `[[agents]]` tables.
pub struct FileAgentSource {
    path: PathBuf,
}

impl FileAgentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AgentSource for FileAgentSource {
    async fn load(&self) -> Result<Vec<AgentDefinition>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read agent catalog {}", self.path.display()))?;
        let catalog: CatalogFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse agent catalog {}", self.path.display()))?;
        Ok(catalog.agents)
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::traits::AgentCategory;
    use std::io::Write;

    #[tokio::test]
    async fn loads_agents_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[agents]]
            id = "billing"
            display_name = "Billing"
            category = "specialized"
            description = "Invoices, charges, refunds"
            example_phrases = ["why was I charged"]

            [[agents.patterns]]
            kind = "regex"
            value = "invoice|refund|charge"
            weight = 0.8

            [[agents]]
            id = "chitchat"
            display_name = "Chitchat"
            category = "general-fallback"
            description = "General conversation"
            "#
        )
        .unwrap();

        let source = FileAgentSource::new(file.path());
        let agents = source.load().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].patterns.len(), 1);
        assert_eq!(agents[1].category, AgentCategory::GeneralFallback);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let source = FileAgentSource::new("/nonexistent/agents.toml");
        assert!(source.load().await.is_err());
    }
}
