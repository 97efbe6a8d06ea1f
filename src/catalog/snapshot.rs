//! Immutable agent snapshot with an atomically-swapped handle.
//!
//! All read paths take one `Arc` copy of the current snapshot at the start of
//! a turn; the background refresh builds a whole new snapshot and swaps the
//! reference, so no turn ever observes a partially-updated agent list.

use anyhow::Result;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{AgentCategory, AgentDefinition, AgentSource, PatternKind};
use crate::inference::GuardedInference;

/// A pattern capability compiled for repeated matching.
pub(crate) enum CompiledPattern {
    Literal { value: String, weight: f32 },
    Regex { re: Regex, weight: f32 },
    Keywords { words: Vec<String>, weight: f32 },
}

impl CompiledPattern {
    pub(crate) fn weight(&self) -> f32 {
        match self {
            Self::Literal { weight, .. }
            | Self::Regex { weight, .. }
            | Self::Keywords { weight, .. } => *weight,
        }
    }

    /// Test against a normalized query.
    pub(crate) fn matches(&self, normalized: &str) -> bool {
        match self {
            Self::Literal { value, .. } => normalized.contains(value.as_str()),
            Self::Regex { re, .. } => re.is_match(normalized),
            Self::Keywords { words, .. } => {
                words.iter().all(|w| {
                    normalized.split_whitespace().any(|token| token == w)
                })
            }
        }
    }
}

/// A read-only, internally consistent view of the agent pool: definitions in
/// priority (declaration) order, compiled patterns, and cached semantic
/// vectors.
pub struct AgentSnapshot {
    agents: Vec<AgentDefinition>,
    compiled: Vec<Vec<CompiledPattern>>,
    vectors: HashMap<String, Vec<f32>>,
}

impl AgentSnapshot {
    /// Build a snapshot from a definition list, compiling patterns once.
    ///
    /// Malformed entries (invalid regex, out-of-range weight) are skipped with
    /// a warning; the owning store is responsible for rejecting them at write
    /// time, so this is a read-path safety net, never a panic.
    pub fn new(agents: Vec<AgentDefinition>) -> Self {
        let compiled = agents
            .iter()
            .map(|agent| {
                agent
                    .patterns
                    .iter()
                    .filter_map(|p| {
                        if !(p.weight > 0.0 && p.weight <= 1.0) {
                            warn!(
                                agent = %agent.id,
                                pattern = %p.value,
                                weight = p.weight,
                                "skipping pattern with out-of-range weight"
                            );
                            return None;
                        }
                        match p.kind {
                            PatternKind::Literal => Some(CompiledPattern::Literal {
                                value: crate::util::normalize(&p.value),
                                weight: p.weight,
                            }),
                            PatternKind::Regex => match Regex::new(&p.value) {
                                Ok(re) => Some(CompiledPattern::Regex {
                                    re,
                                    weight: p.weight,
                                }),
                                Err(e) => {
                                    warn!(
                                        agent = %agent.id,
                                        pattern = %p.value,
                                        "skipping invalid regex pattern: {e}"
                                    );
                                    None
                                }
                            },
                            PatternKind::KeywordSet => Some(CompiledPattern::Keywords {
                                words: crate::util::normalize(&p.value)
                                    .split_whitespace()
                                    .map(ToString::to_string)
                                    .collect(),
                                weight: p.weight,
                            }),
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            agents,
            compiled,
            vectors: HashMap::new(),
        }
    }

    /// Attach precomputed semantic vectors (one per agent id).
    pub fn with_vectors(mut self, vectors: HashMap<String, Vec<f32>>) -> Self {
        self.vectors = vectors;
        self
    }

    /// All agents in priority (declaration) order.
    pub fn agents(&self) -> &[AgentDefinition] {
        &self.agents
    }

    /// Look up an agent by id.
    pub fn agent(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The cached semantic vector for an agent, if one was computed.
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    pub(crate) fn compiled_patterns(&self, index: usize) -> &[CompiledPattern] {
        &self.compiled[index]
    }

    /// First active agent of the given category, in priority order.
    pub fn first_active(&self, category: AgentCategory) -> Option<&AgentDefinition> {
        self.agents
            .iter()
            .find(|a| a.active && a.category == category)
    }
}

/// Build a snapshot, computing semantic vectors through the guarded embedder.
///
/// Vectors are carried over from `previous` when an agent's embedding text is
/// unchanged; embedding failures also keep the previous vector so semantic
/// ranking degrades instead of flapping on a transient outage.
pub async fn build_snapshot(
    agents: Vec<AgentDefinition>,
    embedder: Option<&GuardedInference>,
    previous: Option<&AgentSnapshot>,
) -> AgentSnapshot {
    let snapshot = AgentSnapshot::new(agents);
    let mut vectors = HashMap::new();

    for agent in snapshot.agents() {
        if !agent.active {
            continue;
        }
        let text = agent.embedding_text();
        let carried = previous.and_then(|prev| {
            let unchanged = prev
                .agent(&agent.id)
                .map(|p| p.embedding_text() == text)
                .unwrap_or(false);
            if unchanged {
                prev.vector(&agent.id).map(<[f32]>::to_vec)
            } else {
                None
            }
        });
        if let Some(vector) = carried {
            vectors.insert(agent.id.clone(), vector);
            continue;
        }

        match embedder {
            Some(inference) => match inference.embed(&text).await {
                Ok(vector) => {
                    vectors.insert(agent.id.clone(), vector);
                }
                Err(e) => {
                    debug!(agent = %agent.id, "embedding failed during snapshot build: {e}");
                    if let Some(vector) =
                        previous.and_then(|p| p.vector(&agent.id).map(<[f32]>::to_vec))
                    {
                        vectors.insert(agent.id.clone(), vector);
                    }
                }
            },
            None => {}
        }
    }

    snapshot.with_vectors(vectors)
}

/// Shared handle to the current snapshot. `current()` is a cheap Arc clone;
/// `swap()` replaces the reference atomically.
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<AgentSnapshot>>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: AgentSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub fn current(&self) -> Arc<AgentSnapshot> {
        self.inner.read().clone()
    }

    pub fn swap(&self, snapshot: AgentSnapshot) {
        *self.inner.write() = Arc::new(snapshot);
    }
}

/// Periodically re-load the agent source and swap in a fresh snapshot.
pub fn spawn_refresh(
    handle: SnapshotHandle,
    source: Arc<dyn AgentSource>,
    inference: Arc<GuardedInference>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it, the boot snapshot is fresh.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match source.load().await {
                Ok(agents) => {
                    let previous = handle.current();
                    let next =
                        build_snapshot(agents, Some(inference.as_ref()), Some(&previous)).await;
                    debug!(agents = next.agents().len(), "agent snapshot refreshed");
                    handle.swap(next);
                }
                Err(e) => warn!("agent snapshot refresh failed, keeping previous: {e}"),
            }
        }
    })
}

/// Load the source once and build the initial snapshot.
pub async fn bootstrap(
    source: &dyn AgentSource,
    inference: Option<&GuardedInference>,
) -> Result<AgentSnapshot> {
    let agents = source.load().await?;
    Ok(build_snapshot(agents, inference, None).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::traits::{PatternCapability, PatternKind};

    fn agent(id: &str, patterns: Vec<PatternCapability>) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            display_name: id.to_string(),
            category: AgentCategory::Specialized,
            patterns,
            description: format!("{id} agent"),
            example_phrases: vec![],
            active: true,
        }
    }

    fn pattern(kind: PatternKind, value: &str, weight: f32) -> PatternCapability {
        PatternCapability {
            kind,
            value: value.to_string(),
            weight,
            description: String::new(),
        }
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let snap = AgentSnapshot::new(vec![agent(
            "a",
            vec![
                pattern(PatternKind::Regex, "[unclosed", 0.8),
                pattern(PatternKind::Literal, "password", 0.7),
            ],
        )]);
        assert_eq!(snap.compiled_patterns(0).len(), 1);
    }

    #[test]
    fn out_of_range_weight_is_skipped() {
        let snap = AgentSnapshot::new(vec![agent(
            "a",
            vec![
                pattern(PatternKind::Literal, "refund", 0.0),
                pattern(PatternKind::Literal, "invoice", 1.5),
            ],
        )]);
        assert!(snap.compiled_patterns(0).is_empty());
    }

    #[test]
    fn keyword_set_requires_all_words() {
        let snap = AgentSnapshot::new(vec![agent(
            "a",
            vec![pattern(PatternKind::KeywordSet, "reset password", 0.8)],
        )]);
        let p = &snap.compiled_patterns(0)[0];
        assert!(p.matches("please reset my password now"));
        assert!(!p.matches("reset my account"));
    }

    #[test]
    fn literal_matches_normalized_substring() {
        let snap = AgentSnapshot::new(vec![agent(
            "a",
            vec![pattern(PatternKind::Literal, "Track Order", 0.9)],
        )]);
        assert!(snap.compiled_patterns(0)[0].matches("where can i track order 552"));
    }

    #[test]
    fn handle_swap_is_atomic_for_existing_readers() {
        let handle = SnapshotHandle::new(AgentSnapshot::new(vec![agent("old", vec![])]));
        let before = handle.current();
        handle.swap(AgentSnapshot::new(vec![
            agent("new-1", vec![]),
            agent("new-2", vec![]),
        ]));

        // The reader that copied the reference still sees the old world.
        assert_eq!(before.agents().len(), 1);
        assert_eq!(before.agents()[0].id, "old");
        assert_eq!(handle.current().agents().len(), 2);
    }

    #[tokio::test]
    async fn build_snapshot_carries_unchanged_vectors_forward() {
        let mut vectors = HashMap::new();
        vectors.insert("a".to_string(), vec![0.1, 0.2]);
        let previous = AgentSnapshot::new(vec![agent("a", vec![])]).with_vectors(vectors);

        let next = build_snapshot(vec![agent("a", vec![])], None, Some(&previous)).await;
        assert_eq!(next.vector("a"), Some(&[0.1, 0.2][..]));
    }

    #[tokio::test]
    async fn build_snapshot_drops_vector_when_description_changes() {
        let mut vectors = HashMap::new();
        vectors.insert("a".to_string(), vec![0.1, 0.2]);
        let previous = AgentSnapshot::new(vec![agent("a", vec![])]).with_vectors(vectors);

        let mut changed = agent("a", vec![]);
        changed.description = "completely different domain".to_string();
        let next = build_snapshot(vec![changed], None, Some(&previous)).await;
        assert!(next.vector("a").is_none());
    }

    #[test]
    fn first_active_respects_declaration_order_and_active_flag() {
        let mut inactive = agent("g1", vec![]);
        inactive.category = AgentCategory::GeneralFallback;
        inactive.active = false;
        let mut general = agent("g2", vec![]);
        general.category = AgentCategory::GeneralFallback;

        let snap = AgentSnapshot::new(vec![inactive, general]);
        assert_eq!(
            snap.first_active(AgentCategory::GeneralFallback).unwrap().id,
            "g2"
        );
    }
}
