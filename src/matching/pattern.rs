//! Pattern matching stage: the cheapest, highest-precision routing signal.
//!
//! Synchronous and in-memory: O(agents x patterns) per query with no I/O.

use crate::catalog::AgentSnapshot;

/// One ranked routing candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub agent_id: String,
    pub score: f32,
}

/// Evaluates stored pattern capabilities against normalized input.
pub struct PatternMatcher;

impl PatternMatcher {
    /// Rank agents by pattern confidence, best first.
    ///
    /// Per agent, the first matching pattern wins and contributes its
    /// configured weight; weights are never summed. Ties keep the snapshot's
    /// declaration order (stable sort).
    pub fn rank(normalized_query: &str, snapshot: &AgentSnapshot) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for (index, agent) in snapshot.agents().iter().enumerate() {
            if !agent.active {
                continue;
            }
            let hit = snapshot
                .compiled_patterns(index)
                .iter()
                .find(|p| p.matches(normalized_query));
            if let Some(pattern) = hit {
                candidates.push(Candidate {
                    agent_id: agent.id.clone(),
                    score: pattern.weight(),
                });
            }
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }
}
