use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the winning agent (or lack of one) was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMethod {
    /// The flow handler resolved the turn before routing ran.
    FlowSpecialCase,
    /// A stored pattern capability matched above the pattern threshold.
    Pattern,
    /// Embedding similarity cleared the dynamic threshold.
    Semantic,
    /// Conversational heuristic or last-resort fallback.
    Fallback,
}

/// The auditable record of one routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub session_id: String,
    pub query: String,
    /// `None` when no agent could be resolved at all.
    pub agent_id: Option<String>,
    pub confidence: f32,
    pub method: SelectionMethod,
    pub timestamp: DateTime<Utc>,
}

/// Everything a caller gets back from one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub response_text: String,
    pub decision: RoutingDecision,
    /// Advisory per-turn detail (effective threshold, flow hints, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
