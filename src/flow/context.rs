//! Per-session conversation context.
//!
//! A derived view over working-tier memory: built from reads at the start of
//! a turn, mutated during the turn, flushed back at the end. It owns nothing
//! independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::memory::{MemoryTier, TieredMemory};

/// Working-tier key the serialized context lives under.
pub const CONTEXT_KEY: &str = "context";

/// One entry in the rolling dialogue history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    /// Rolling dialogue history, bounded at flush time.
    #[serde(default)]
    pub history: Vec<DialogueTurn>,
    /// Short summary of what the conversation is currently about.
    #[serde(default)]
    pub current_topic: Option<String>,
    /// Set by the previous turn's negative-feedback detection; consumed
    /// (cleared) by the next turn's dynamic-threshold computation.
    #[serde(default)]
    pub negative_feedback_detected: bool,
    #[serde(default)]
    pub hold_state: bool,
    #[serde(default)]
    pub hold_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub human_transfer_requested: bool,

    /// Advisory greeting hint for the current turn only.
    #[serde(skip)]
    pub greeting_hint: bool,
    /// Topic-switch flag for the current turn only.
    #[serde(skip)]
    pub topic_switched: bool,
    /// Negative feedback detected *this* turn; committed to
    /// `negative_feedback_detected` at flush so the penalty applies to the
    /// next turn, not this one.
    #[serde(skip)]
    pub negative_feedback_pending: bool,
}

impl ConversationContext {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            history: Vec::new(),
            current_topic: None,
            negative_feedback_detected: false,
            hold_state: false,
            hold_since: None,
            human_transfer_requested: false,
            greeting_hint: false,
            topic_switched: false,
            negative_feedback_pending: false,
        }
    }

    /// Build the context from working memory, or start fresh.
    pub async fn load(memory: &TieredMemory, session_id: &str) -> Self {
        let entries = memory
            .retrieve(session_id, Some(CONTEXT_KEY), Some(MemoryTier::Working), 1)
            .await;
        match entries.into_iter().next() {
            Some(entry) => match serde_json::from_value(entry.value) {
                Ok(ctx) => ctx,
                Err(e) => {
                    debug!(session_id, "discarding unreadable context: {e}");
                    Self::new(session_id)
                }
            },
            None => Self::new(session_id),
        }
    }

    /// Write the context back to working memory, committing the pending
    /// negative-feedback flag and trimming history.
    pub async fn flush(&mut self, memory: &TieredMemory, history_limit: usize) {
        self.negative_feedback_detected = self.negative_feedback_pending;
        self.negative_feedback_pending = false;
        if self.history.len() > history_limit {
            let excess = self.history.len() - history_limit;
            self.history.drain(..excess);
        }

        match serde_json::to_value(&self) {
            Ok(value) => {
                if let Err(e) = memory
                    .store(
                        &self.session_id,
                        CONTEXT_KEY,
                        value,
                        MemoryTier::Working,
                        None,
                    )
                    .await
                {
                    debug!(session_id = %self.session_id, "context flush failed: {e}");
                }
            }
            Err(e) => debug!(session_id = %self.session_id, "context serialization failed: {e}"),
        }
    }

    pub fn push_history(&mut self, role: &str, content: &str) {
        self.history.push(DialogueTurn {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Apply caller-supplied overrides before the turn runs.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, String>) {
        for (key, value) in overrides {
            match key.as_str() {
                "current_topic" => self.current_topic = Some(value.clone()),
                "hold_state" => self.hold_state = value == "true",
                "negative_feedback_detected" => {
                    self.negative_feedback_detected = value == "true";
                }
                other => debug!(key = other, "ignoring unknown context override"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::memory::{InMemoryCache, InMemoryDurable};
    use crate::telemetry::NullSink;
    use std::sync::Arc;

    fn memory() -> TieredMemory {
        TieredMemory::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryDurable::new()),
            &MemoryConfig::default(),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn load_returns_fresh_context_for_new_session() {
        let mem = memory();
        let ctx = ConversationContext::load(&mem, "s1").await;
        assert_eq!(ctx.session_id, "s1");
        assert!(ctx.history.is_empty());
        assert!(!ctx.hold_state);
    }

    #[tokio::test]
    async fn flush_then_load_round_trips_persistent_fields() {
        let mem = memory();
        let mut ctx = ConversationContext::new("s1");
        ctx.current_topic = Some("billing".to_string());
        ctx.hold_state = true;
        ctx.greeting_hint = true; // transient, must not survive
        ctx.push_history("user", "hello");
        ctx.flush(&mem, 20).await;

        let loaded = ConversationContext::load(&mem, "s1").await;
        assert_eq!(loaded.current_topic.as_deref(), Some("billing"));
        assert!(loaded.hold_state);
        assert!(!loaded.greeting_hint);
        assert_eq!(loaded.history.len(), 1);
    }

    #[tokio::test]
    async fn flush_commits_pending_negative_feedback() {
        let mem = memory();
        let mut ctx = ConversationContext::new("s1");
        ctx.negative_feedback_pending = true;
        ctx.flush(&mem, 20).await;

        let loaded = ConversationContext::load(&mem, "s1").await;
        assert!(loaded.negative_feedback_detected);
    }

    #[tokio::test]
    async fn flush_bounds_history_length() {
        let mem = memory();
        let mut ctx = ConversationContext::new("s1");
        for i in 0..30 {
            ctx.push_history("user", &format!("turn {i}"));
        }
        ctx.flush(&mem, 10).await;

        let loaded = ConversationContext::load(&mem, "s1").await;
        assert_eq!(loaded.history.len(), 10);
        assert_eq!(loaded.history[0].content, "turn 20");
    }

    #[test]
    fn overrides_set_known_fields_only() {
        let mut ctx = ConversationContext::new("s1");
        let mut overrides = HashMap::new();
        overrides.insert("current_topic".to_string(), "shipping".to_string());
        overrides.insert("unknown".to_string(), "ignored".to_string());
        ctx.apply_overrides(&overrides);
        assert_eq!(ctx.current_topic.as_deref(), Some("shipping"));
    }
}
