//! Agent catalog types and the configuration-source trait.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The closed set of agent categories. Dispatch is by category tag; there is
/// no open-ended per-agent behavior probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentCategory {
    /// Handles one task domain (billing, account recovery, ...).
    Specialized,
    /// Drives a multi-step guided process.
    Workflow,
    /// General conversation and last-resort fallback target.
    GeneralFallback,
    /// Filters and softens degraded or unsafe output.
    Guardrails,
}

/// How a pattern capability is evaluated against normalized input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    /// Substring match on the normalized query.
    Literal,
    /// Regular expression match.
    Regex,
    /// Every keyword in the set must appear in the query.
    KeywordSet,
}

/// A single routing rule stored as data: matcher type, pattern value, and a
/// confidence weight in (0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCapability {
    pub kind: PatternKind,
    pub value: String,
    pub weight: f32,
    #[serde(default)]
    pub description: String,
}

/// A selectable handler specialized for one task domain.
///
/// Owned by external configuration storage; the core only ever sees a
/// read-only snapshot of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub display_name: String,
    pub category: AgentCategory,
    /// Ordered capability rules; declaration order is the priority order.
    #[serde(default)]
    pub patterns: Vec<PatternCapability>,
    /// Free-text description; also the source of the agent's semantic vector.
    pub description: String,
    /// Example phrases folded into the semantic vector alongside the description.
    #[serde(default)]
    pub example_phrases: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AgentDefinition {
    /// The text an agent's semantic vector is derived from. A change to this
    /// text invalidates the cached vector.
    pub fn embedding_text(&self) -> String {
        if self.example_phrases.is_empty() {
            return self.description.clone();
        }
        format!("{}\n{}", self.description, self.example_phrases.join("\n"))
    }
}

/// Pulls the current agent configuration from wherever it is owned
/// (database, file, remote service). The core treats the result as
/// read-only input.
#[async_trait]
pub trait AgentSource: Send + Sync {
    /// Load the full agent list. Called at startup and by the background
    /// snapshot refresh.
    async fn load(&self) -> Result<Vec<AgentDefinition>>;

    /// The name of this source implementation.
    fn name(&self) -> &str;
}
