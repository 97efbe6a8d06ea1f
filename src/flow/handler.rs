//! Pre-routing detector for conversational special cases.
//!
//! Runs before generic routing on every turn. Detection is deterministic
//! lexical scoring (phrase tables and token overlap), no I/O here, so a
//! degraded inference backend can never break greeting/hold/transfer
//! handling.

use chrono::Utc;
use tracing::debug;

use super::context::ConversationContext;
use crate::config::{FlowConfig, RoutingConfig};
use crate::util::{jaccard, normalize, word_count};

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hi there",
    "hello there",
    "hey there",
    "good morning",
    "good afternoon",
    "good evening",
    "howdy",
];

const END_PHRASES: &[&str] = &[
    "bye",
    "goodbye",
    "bye bye",
    "see you",
    "see you later",
    "that's all",
    "that is all",
    "that's all thanks",
    "no that's all",
    "talk to you later",
    "have a good day",
    "i'm done",
];

const TRANSFER_PHRASES: &[&str] = &[
    "talk to a human",
    "talk to a person",
    "speak to a human",
    "speak to an agent",
    "speak to a representative",
    "human agent",
    "real person",
    "transfer me",
    "connect me to a human",
    "i want a human",
    "let me talk to someone",
];

const HOLD_PHRASES: &[&str] = &[
    "hold on",
    "one moment",
    "just a moment",
    "one second",
    "one sec",
    "just a sec",
    "give me a minute",
    "give me a second",
    "wait a moment",
    "be right back",
    "hold please",
];

/// Canonical hold exemplars for the similarity fallback when no fixed phrase
/// hits.
const HOLD_EXEMPLARS: &[&str] = &[
    "hold on a second please",
    "give me a moment i need to check something",
    "wait a minute i'll be right back",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "not helpful",
    "that's wrong",
    "that is wrong",
    "this is wrong",
    "that's not right",
    "useless",
    "that didn't help",
    "that doesn't help",
    "you don't understand",
    "not what i asked",
    "not what i meant",
    "bad answer",
];

const CLOSING_RESPONSE: &str =
    "Thanks for chatting, goodbye! Feel free to come back any time.";
const TRANSFER_RESPONSE: &str =
    "Of course, I'm connecting you with a human agent now. One moment please.";
const HOLD_RESPONSE: &str = "No problem, take your time. I'll be right here when you're back.";

/// Which special case produced a terminal flow response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCase {
    ConversationEnd,
    HumanTransfer,
    HoldAcknowledged,
}

/// A terminal response that bypasses routing for this turn.
#[derive(Debug, Clone)]
pub struct FlowResponse {
    pub text: String,
    pub case: FlowCase,
}

/// Detects and resolves special-case turns before generic routing runs.
pub struct FlowHandler {
    config: FlowConfig,
}

impl FlowHandler {
    pub fn new(config: FlowConfig) -> Self {
        Self { config }
    }

    /// Check a turn against the special cases, in order. Returns `None` to
    /// continue with normal routing, or a terminal response.
    ///
    /// Side effects on the context: greeting hint, hold/transfer flags, and
    /// the non-short-circuiting negative-feedback and topic-switch flags.
    pub fn check(&self, input: &str, ctx: &mut ConversationContext) -> Option<FlowResponse> {
        let normalized = normalize(input);

        // A held session resumes normal routing on its next turn, whatever
        // the content.
        if ctx.hold_state {
            ctx.hold_state = false;
            ctx.hold_since = None;
            debug!(session_id = %ctx.session_id, "hold released, resuming normal routing");
            return None;
        }

        if negative_feedback_score(&normalized) >= self.config.negative_feedback_threshold {
            ctx.negative_feedback_pending = true;
        }
        if let Some(topic) = &ctx.current_topic {
            if topic_divergence(&normalized, topic) >= self.config.topic_switch_threshold {
                ctx.topic_switched = true;
            }
        }

        if greeting_score(&normalized) >= self.config.greeting_threshold {
            ctx.greeting_hint = true;
            return None;
        }

        if end_score(&normalized) >= self.config.end_threshold {
            return Some(FlowResponse {
                text: CLOSING_RESPONSE.to_string(),
                case: FlowCase::ConversationEnd,
            });
        }

        if transfer_score(&normalized) >= self.config.transfer_threshold {
            ctx.human_transfer_requested = true;
            return Some(FlowResponse {
                text: TRANSFER_RESPONSE.to_string(),
                case: FlowCase::HumanTransfer,
            });
        }

        if hold_score(&normalized) >= self.config.hold_threshold {
            ctx.hold_state = true;
            ctx.hold_since = Some(Utc::now());
            return Some(FlowResponse {
                text: HOLD_RESPONSE.to_string(),
                case: FlowCase::HoldAcknowledged,
            });
        }

        None
    }

    /// Compute the effective semantic threshold for this turn, consuming the
    /// single-use negative-feedback flag from the previous turn.
    pub fn dynamic_threshold(
        &self,
        ctx: &mut ConversationContext,
        routing: &RoutingConfig,
    ) -> f32 {
        let mut threshold = routing.base_semantic_threshold;
        if ctx.negative_feedback_detected {
            threshold -= routing.negative_feedback_penalty;
            ctx.negative_feedback_detected = false;
            debug!(
                session_id = %ctx.session_id,
                threshold,
                "lowered routing threshold after negative feedback"
            );
        }
        threshold.clamp(routing.threshold_min, routing.threshold_max)
    }
}

/// Whole-word phrase containment on normalized text.
fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    if normalized == phrase {
        return true;
    }
    let padded = format!(" {normalized} ");
    padded.contains(&format!(" {phrase} "))
}

fn greeting_score(normalized: &str) -> f32 {
    if GREETINGS.contains(&normalized) {
        return 1.0;
    }
    // "hi, I need help with X" is not a greeting turn; only short inputs that
    // lead with a greeting qualify.
    if word_count(normalized) <= 3
        && GREETINGS
            .iter()
            .any(|g| normalized.starts_with(&format!("{g} ")))
    {
        return 0.96;
    }
    0.0
}

fn end_score(normalized: &str) -> f32 {
    if END_PHRASES.contains(&normalized) {
        return 0.95;
    }
    if word_count(normalized) <= 6 && END_PHRASES.iter().any(|p| contains_phrase(normalized, p)) {
        return 0.92;
    }
    0.0
}

fn transfer_score(normalized: &str) -> f32 {
    if TRANSFER_PHRASES.iter().any(|p| contains_phrase(normalized, p)) {
        return 0.95;
    }
    0.0
}

fn hold_score(normalized: &str) -> f32 {
    if HOLD_PHRASES.iter().any(|p| contains_phrase(normalized, p)) {
        return 0.9;
    }
    HOLD_EXEMPLARS
        .iter()
        .map(|e| jaccard(normalized, e))
        .fold(0.0, f32::max)
}

fn negative_feedback_score(normalized: &str) -> f32 {
    if NEGATIVE_PHRASES.iter().any(|p| contains_phrase(normalized, p)) {
        return 0.8;
    }
    0.0
}

/// Divergence of a turn from the current topic, in [0,1]. Very short turns
/// never count as a switch; they carry too little signal.
fn topic_divergence(normalized: &str, topic: &str) -> f32 {
    if word_count(normalized) < 3 {
        return 0.0;
    }
    1.0 - jaccard(normalized, &normalize(topic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;

    fn handler() -> FlowHandler {
        FlowHandler::new(FlowConfig::default())
    }

    fn ctx() -> ConversationContext {
        ConversationContext::new("s1")
    }

    #[test]
    fn greeting_sets_hint_but_does_not_short_circuit() {
        let h = handler();
        let mut ctx = ctx();
        let result = h.check("hi", &mut ctx);
        assert!(result.is_none());
        assert!(ctx.greeting_hint);
    }

    #[test]
    fn conversation_end_returns_terminal_response() {
        let h = handler();
        let mut ctx = ctx();
        let result = h.check("goodbye", &mut ctx).unwrap();
        assert_eq!(result.case, FlowCase::ConversationEnd);
    }

    #[test]
    fn transfer_request_sets_flag_and_terminates() {
        let h = handler();
        let mut ctx = ctx();
        let result = h.check("I want to talk to a human please", &mut ctx).unwrap();
        assert_eq!(result.case, FlowCase::HumanTransfer);
        assert!(ctx.human_transfer_requested);
    }

    #[test]
    fn hold_request_sets_hold_state_with_timestamp() {
        let h = handler();
        let mut ctx = ctx();
        let result = h.check("hold on a second", &mut ctx).unwrap();
        assert_eq!(result.case, FlowCase::HoldAcknowledged);
        assert!(ctx.hold_state);
        assert!(ctx.hold_since.is_some());
    }

    #[test]
    fn held_session_resumes_normal_routing_next_turn() {
        let h = handler();
        let mut ctx = ctx();
        h.check("hold on a second", &mut ctx).unwrap();

        // Next turn, regardless of content, resumes routing.
        let result = h.check("okay I'm back, about my invoice", &mut ctx);
        assert!(result.is_none());
        assert!(!ctx.hold_state);
        assert!(ctx.hold_since.is_none());
    }

    #[test]
    fn negative_feedback_is_pending_not_immediate() {
        let h = handler();
        let mut ctx = ctx();
        let result = h.check("that's wrong, it did not work", &mut ctx);
        assert!(result.is_none());
        assert!(ctx.negative_feedback_pending);
        assert!(!ctx.negative_feedback_detected);
    }

    #[test]
    fn dynamic_threshold_law_is_single_use() {
        let h = handler();
        let routing = RoutingConfig::default();
        let mut ctx = ctx();

        // Previous turn set the flag.
        ctx.negative_feedback_detected = true;
        let lowered = h.dynamic_threshold(&mut ctx, &routing);
        assert!(
            (lowered
                - (routing.base_semantic_threshold - routing.negative_feedback_penalty))
                .abs()
                < f32::EPSILON
        );

        // The flag is consumed: the turn after reverts to the base.
        let reverted = h.dynamic_threshold(&mut ctx, &routing);
        assert_eq!(reverted, routing.base_semantic_threshold);
    }

    #[test]
    fn dynamic_threshold_clamps_to_minimum() {
        let h = handler();
        let routing = RoutingConfig {
            base_semantic_threshold: 0.35,
            negative_feedback_penalty: 0.15,
            threshold_min: 0.3,
            ..RoutingConfig::default()
        };
        let mut ctx = ctx();
        ctx.negative_feedback_detected = true;
        assert_eq!(h.dynamic_threshold(&mut ctx, &routing), 0.3);
    }

    #[test]
    fn topic_switch_flagged_on_divergent_turn() {
        let h = handler();
        let mut ctx = ctx();
        ctx.current_topic = Some("billing invoice refund".to_string());
        h.check("how do I change my shipping address", &mut ctx);
        assert!(ctx.topic_switched);
    }

    #[test]
    fn short_turns_never_flag_a_topic_switch() {
        let h = handler();
        let mut ctx = ctx();
        ctx.current_topic = Some("billing invoice refund".to_string());
        h.check("yes", &mut ctx);
        assert!(!ctx.topic_switched);
    }

    #[test]
    fn greeting_with_long_tail_is_not_a_greeting_turn() {
        assert_eq!(greeting_score(&normalize("hi I need help with my order")), 0.0);
    }

    #[test]
    fn phrase_containment_respects_word_boundaries() {
        assert!(!contains_phrase("maybe later", "bye"));
        assert!(contains_phrase("ok bye now", "bye"));
    }

    #[test]
    fn domain_question_triggers_no_special_case() {
        let h = handler();
        let mut ctx = ctx();
        assert!(h.check("I forgot my password", &mut ctx).is_none());
        assert!(!ctx.greeting_hint);
        assert!(!ctx.hold_state);
    }
}
