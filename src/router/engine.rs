//! The turn orchestrator.
//!
//! One `handle_turn` call is one conversational turn: acquire the session,
//! load context, run the flow handler, then pattern -> semantic -> fallback
//! selection, execute the winning agent, persist context, emit the decision.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::decision::{RoutingDecision, SelectionMethod, TurnOutcome};
use super::execute::AgentExecutor;
use crate::catalog::{AgentCategory, AgentDefinition, AgentSnapshot, SnapshotHandle};
use crate::config::Config;
use crate::flow::{ConversationContext, FlowHandler};
use crate::inference::GuardedInference;
use crate::matching::{Candidate, PatternMatcher, SemanticMatcher};
use crate::memory::TieredMemory;
use crate::sessions::SessionGate;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::util::{normalize, word_count};

/// Working-memory key prefix for topic-scoped state, cleared on topic switch.
const TOPIC_PREFIX: &str = "topic:";

/// Words kept when summarizing a turn into the current topic.
const TOPIC_SUMMARY_WORDS: usize = 6;

const NO_AGENT_RESPONSE: &str =
    "I'm sorry, I don't have anyone available to help with that right now.";

/// Canned reply when the winning agent's completion call fails; the turn
/// still succeeds with its routing decision intact.
const DEGRADED_RESPONSE: &str =
    "I'm having trouble reaching my knowledge service right now. Please try again in a moment.";

pub struct AgentRouter {
    snapshot: SnapshotHandle,
    inference: Arc<GuardedInference>,
    memory: Arc<TieredMemory>,
    flow: FlowHandler,
    semantic: SemanticMatcher,
    gate: SessionGate,
    telemetry: Arc<dyn TelemetrySink>,
    config: Config,
}

impl AgentRouter {
    pub fn new(
        config: Config,
        snapshot: SnapshotHandle,
        inference: Arc<GuardedInference>,
        memory: Arc<TieredMemory>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            flow: FlowHandler::new(config.flow.clone()),
            semantic: SemanticMatcher::new(
                inference.clone(),
                config.routing.semantic_floor,
                telemetry.clone(),
            ),
            gate: SessionGate::new(&config.session),
            snapshot,
            inference,
            memory,
            telemetry,
            config,
        }
    }

    pub fn memory(&self) -> &Arc<TieredMemory> {
        &self.memory
    }

    pub fn snapshot(&self) -> Arc<AgentSnapshot> {
        self.snapshot.current()
    }

    /// Drop gate slots for sessions idle past the configured timeout.
    pub fn sweep_sessions(&self) {
        self.gate
            .sweep(Duration::from_secs(self.config.session.idle_timeout_secs));
    }

    /// Run one turn. Turns within a session are serialized; a session whose
    /// queue is full surfaces a busy error without touching any state.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        input: &str,
        overrides: &HashMap<String, String>,
    ) -> Result<TurnOutcome> {
        let _guard = self.gate.acquire(session_id).await?;
        let snapshot = self.snapshot.current();

        let mut ctx = ConversationContext::load(&self.memory, session_id).await;
        ctx.apply_overrides(overrides);
        ctx.push_history("user", input);

        if let Some(flow) = self.flow.check(input, &mut ctx) {
            debug!(session_id, case = ?flow.case, "flow special case resolved the turn");
            let decision = RoutingDecision {
                session_id: session_id.to_string(),
                query: input.to_string(),
                agent_id: None,
                confidence: 1.0,
                method: SelectionMethod::FlowSpecialCase,
                timestamp: Utc::now(),
            };
            let metadata =
                HashMap::from([("flow_case".to_string(), format!("{:?}", flow.case))]);
            ctx.current_topic = Some(topic_summary(&normalize(input)));
            return self.finish(ctx, flow.text, decision, metadata).await;
        }

        let threshold = self.flow.dynamic_threshold(&mut ctx, &self.config.routing);
        let normalized = normalize(input);

        let pattern_candidates = PatternMatcher::rank(&normalized, &snapshot);
        let selection = self
            .select(&normalized, input, &pattern_candidates, threshold, &snapshot)
            .await;

        let (agent, confidence, method) = selection;
        let response = match &agent {
            Some(agent) => {
                match AgentExecutor::respond(&self.inference, agent, input, &ctx).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(session_id, agent = %agent.id, "execution degraded: {e}");
                        self.telemetry.emit(TelemetryEvent::Error {
                            stage: "execution".to_string(),
                            message: e.to_string(),
                        });
                        DEGRADED_RESPONSE.to_string()
                    }
                }
            }
            None => NO_AGENT_RESPONSE.to_string(),
        };

        if ctx.topic_switched {
            self.memory.clear_working_prefix(session_id, TOPIC_PREFIX);
            debug!(session_id, "topic switch: cleared topic-scoped working memory");
        }
        ctx.current_topic = Some(topic_summary(&normalized));

        let mut metadata = HashMap::from([(
            "dynamic_threshold".to_string(),
            format!("{threshold:.2}"),
        )]);
        if ctx.greeting_hint {
            metadata.insert("greeting".to_string(), "true".to_string());
        }
        if ctx.topic_switched {
            metadata.insert("topic_switched".to_string(), "true".to_string());
        }

        let decision = RoutingDecision {
            session_id: session_id.to_string(),
            query: input.to_string(),
            agent_id: agent.map(|a| a.id),
            confidence,
            method,
            timestamp: Utc::now(),
        };
        self.finish(ctx, response, decision, metadata).await
    }

    /// Pattern, then semantic, then the conversational / last-resort
    /// fallbacks. Returns the chosen agent (cloned out of the snapshot), the
    /// decision confidence, and the method.
    async fn select(
        &self,
        normalized: &str,
        input: &str,
        pattern_candidates: &[Candidate],
        threshold: f32,
        snapshot: &AgentSnapshot,
    ) -> (Option<AgentDefinition>, f32, SelectionMethod) {
        let routing = &self.config.routing;

        if let Some(best) = pattern_candidates.first() {
            if best.score >= routing.pattern_threshold {
                if let Some(agent) = snapshot.agent(&best.agent_id) {
                    return (Some(agent.clone()), best.score, SelectionMethod::Pattern);
                }
            }
        }

        let semantic_candidates = self.semantic.rank(input, snapshot).await;
        if let Some(best) = semantic_candidates.first() {
            if best.score >= threshold {
                if let Some(agent) = snapshot.agent(&best.agent_id) {
                    return (Some(agent.clone()), best.score, SelectionMethod::Semantic);
                }
            }
        }

        // Short inputs with no pattern signal read as small talk.
        let conversational = pattern_candidates.is_empty()
            && word_count(normalized) <= routing.conversational_max_words;
        if conversational {
            if let Some(agent) =
                designated_agent(snapshot, routing.general_agent_id.as_deref())
            {
                return (
                    Some(agent.clone()),
                    routing.conversational_confidence,
                    SelectionMethod::Fallback,
                );
            }
        }

        if let Some(agent) = designated_agent(snapshot, routing.fallback_agent_id.as_deref()) {
            return (
                Some(agent.clone()),
                routing.fallback_confidence,
                SelectionMethod::Fallback,
            );
        }

        (None, 0.0, SelectionMethod::Fallback)
    }

    async fn finish(
        &self,
        mut ctx: ConversationContext,
        response: String,
        decision: RoutingDecision,
        metadata: HashMap<String, String>,
    ) -> Result<TurnOutcome> {
        ctx.push_history("assistant", &response);
        ctx.flush(&self.memory, self.config.memory.history_limit).await;
        self.telemetry
            .emit(TelemetryEvent::Decision(decision.clone()));
        Ok(TurnOutcome {
            response_text: response,
            decision,
            metadata,
        })
    }
}

/// Resolve a designated agent: the configured id when set and active, else
/// the first active general-fallback agent.
fn designated_agent<'a>(
    snapshot: &'a AgentSnapshot,
    configured_id: Option<&str>,
) -> Option<&'a AgentDefinition> {
    if let Some(id) = configured_id {
        if let Some(agent) = snapshot.agent(id).filter(|a| a.active) {
            return Some(agent);
        }
        debug!(id, "configured agent missing or inactive, using category fallback");
    }
    snapshot.first_active(AgentCategory::GeneralFallback)
}

fn topic_summary(normalized: &str) -> String {
    normalized
        .split_whitespace()
        .take(TOPIC_SUMMARY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}
