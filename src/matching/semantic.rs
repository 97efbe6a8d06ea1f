//! Semantic matching stage: embedding similarity against cached agent vectors.
//!
//! The expensive half of routing. Exactly one embedding call per turn (the
//! query's), because agent vectors are precomputed in the snapshot. Any
//! failure (breaker open, timeout, upstream error) degrades to an empty
//! candidate list; this stage never surfaces an error to the caller.

use std::sync::Arc;
use tracing::debug;

use super::pattern::Candidate;
use crate::catalog::AgentSnapshot;
use crate::inference::GuardedInference;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Ranks agents by cosine similarity between the query embedding and each
/// agent's cached vector.
pub struct SemanticMatcher {
    inference: Arc<GuardedInference>,
    telemetry: Arc<dyn TelemetrySink>,
    /// Candidates scoring below this are discarded regardless of the dynamic
    /// routing threshold.
    floor: f32,
}

impl SemanticMatcher {
    pub fn new(
        inference: Arc<GuardedInference>,
        floor: f32,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            inference,
            telemetry,
            floor,
        }
    }

    /// Rank active agents by similarity, best first. Agents without a cached
    /// vector are skipped. Returns an empty list on embedding failure.
    pub async fn rank(&self, query: &str, snapshot: &AgentSnapshot) -> Vec<Candidate> {
        let query_vector = match self.inference.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                debug!("semantic ranking degraded to empty: {e}");
                self.telemetry.emit(TelemetryEvent::Error {
                    stage: "semantic".to_string(),
                    message: e.to_string(),
                });
                return Vec::new();
            }
        };

        let mut candidates: Vec<Candidate> = snapshot
            .agents()
            .iter()
            .filter(|a| a.active)
            .filter_map(|agent| {
                let vector = snapshot.vector(&agent.id)?;
                let score = cosine(&query_vector, vector);
                (score >= self.floor).then(|| Candidate {
                    agent_id: agent.id.clone(),
                    score,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }
}

/// Cosine similarity, 0.0 for mismatched dimensions or zero-magnitude input.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
