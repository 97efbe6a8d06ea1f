use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level Switchboard configuration, loaded from `config.toml`.
///
/// Every routing threshold is configuration rather than a hard-coded
/// constant; the defaults below are starting points, not structural
/// requirements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Routing thresholds and fallback behavior (`[routing]`).
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Conversation-flow special-case thresholds (`[flow]`).
    #[serde(default)]
    pub flow: FlowConfig,

    /// Tiered memory TTLs and write-queue sizing (`[memory]`).
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Circuit breaker tuning for external inference calls (`[breaker]`).
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Inference endpoint configuration (`[inference]`).
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Per-session turn serialization (`[session]`).
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

// ── Routing ──────────────────────────────────────────────────────

/// Routing thresholds and designated agents (`[routing]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Minimum pattern-match confidence for a pattern selection. Default: `0.7`.
    #[serde(default = "default_pattern_threshold")]
    pub pattern_threshold: f32,
    /// Base semantic threshold T0 before dynamic adjustment. Default: `0.6`.
    #[serde(default = "default_base_semantic_threshold")]
    pub base_semantic_threshold: f32,
    /// Minimum similarity for a semantic candidate to be returned at all. Default: `0.5`.
    #[serde(default = "default_semantic_floor")]
    pub semantic_floor: f32,
    /// Lower clamp bound for the dynamic threshold. Default: `0.3`.
    #[serde(default = "default_threshold_min")]
    pub threshold_min: f32,
    /// Upper clamp bound for the dynamic threshold. Default: `0.9`.
    #[serde(default = "default_threshold_max")]
    pub threshold_max: f32,
    /// Threshold penalty applied on the turn after negative feedback. Default: `0.15`.
    #[serde(default = "default_negative_feedback_penalty")]
    pub negative_feedback_penalty: f32,
    /// Confidence assigned when the conversational heuristic selects the
    /// general-conversation agent. Default: `0.95`.
    #[serde(default = "default_conversational_confidence")]
    pub conversational_confidence: f32,
    /// Confidence assigned to a last-resort fallback selection. Default: `0.3`.
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f32,
    /// Maximum word count for an input to qualify as conversational. Default: `4`.
    #[serde(default = "default_conversational_max_words")]
    pub conversational_max_words: usize,
    /// Explicit general-conversation agent id. Falls back to the first active
    /// `general-fallback` agent when unset.
    #[serde(default)]
    pub general_agent_id: Option<String>,
    /// Explicit fallback agent id. Falls back to the first active
    /// `general-fallback` agent when unset.
    #[serde(default)]
    pub fallback_agent_id: Option<String>,
    /// Interval between background agent-snapshot refreshes, in seconds. Default: `300`.
    #[serde(default = "default_snapshot_refresh_secs")]
    pub snapshot_refresh_secs: u64,
}

fn default_pattern_threshold() -> f32 {
    0.7
}
fn default_base_semantic_threshold() -> f32 {
    0.6
}
fn default_semantic_floor() -> f32 {
    0.5
}
fn default_threshold_min() -> f32 {
    0.3
}
fn default_threshold_max() -> f32 {
    0.9
}
fn default_negative_feedback_penalty() -> f32 {
    0.15
}
fn default_conversational_confidence() -> f32 {
    0.95
}
fn default_fallback_confidence() -> f32 {
    0.3
}
fn default_conversational_max_words() -> usize {
    4
}
fn default_snapshot_refresh_secs() -> u64 {
    300
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: default_pattern_threshold(),
            base_semantic_threshold: default_base_semantic_threshold(),
            semantic_floor: default_semantic_floor(),
            threshold_min: default_threshold_min(),
            threshold_max: default_threshold_max(),
            negative_feedback_penalty: default_negative_feedback_penalty(),
            conversational_confidence: default_conversational_confidence(),
            fallback_confidence: default_fallback_confidence(),
            conversational_max_words: default_conversational_max_words(),
            general_agent_id: None,
            fallback_agent_id: None,
            snapshot_refresh_secs: default_snapshot_refresh_secs(),
        }
    }
}

// ── Conversation flow ────────────────────────────────────────────

/// Per-case detection thresholds for the flow handler (`[flow]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Greeting detection threshold. Default: `0.95`.
    #[serde(default = "default_greeting_threshold")]
    pub greeting_threshold: f32,
    /// Conversation-end detection threshold. Default: `0.9`.
    #[serde(default = "default_end_threshold")]
    pub end_threshold: f32,
    /// Human-transfer-request detection threshold. Default: `0.9`.
    #[serde(default = "default_transfer_threshold")]
    pub transfer_threshold: f32,
    /// Hold-request detection threshold. Default: `0.8`.
    #[serde(default = "default_hold_threshold")]
    pub hold_threshold: f32,
    /// Negative-feedback detection threshold. Default: `0.7`.
    #[serde(default = "default_negative_feedback_threshold")]
    pub negative_feedback_threshold: f32,
    /// Topic-switch divergence threshold. Default: `0.7`.
    #[serde(default = "default_topic_switch_threshold")]
    pub topic_switch_threshold: f32,
}

fn default_greeting_threshold() -> f32 {
    0.95
}
fn default_end_threshold() -> f32 {
    0.9
}
fn default_transfer_threshold() -> f32 {
    0.9
}
fn default_hold_threshold() -> f32 {
    0.8
}
fn default_negative_feedback_threshold() -> f32 {
    0.7
}
fn default_topic_switch_threshold() -> f32 {
    0.7
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            greeting_threshold: default_greeting_threshold(),
            end_threshold: default_end_threshold(),
            transfer_threshold: default_transfer_threshold(),
            hold_threshold: default_hold_threshold(),
            negative_feedback_threshold: default_negative_feedback_threshold(),
            topic_switch_threshold: default_topic_switch_threshold(),
        }
    }
}

// ── Memory ───────────────────────────────────────────────────────

/// Tiered memory configuration (`[memory]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Working-tier TTL in seconds. Default: `300`.
    #[serde(default = "default_working_ttl_secs")]
    pub working_ttl_secs: u64,
    /// Short-term-tier TTL in seconds. Default: `3600`.
    #[serde(default = "default_short_term_ttl_secs")]
    pub short_term_ttl_secs: u64,
    /// Maximum dialogue-history entries kept per session context. Default: `20`.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Bounded depth of the asynchronous long-term write queue. Default: `256`.
    #[serde(default = "default_long_term_queue_depth")]
    pub long_term_queue_depth: usize,
    /// Maximum retries for a failed long-term write before dropping it. Default: `3`.
    #[serde(default = "default_long_term_retry_max")]
    pub long_term_retry_max: u32,
    /// Optional sqlite database path for the durable tier. In-memory backend
    /// is used when unset.
    #[serde(default)]
    pub durable_path: Option<String>,
}

fn default_working_ttl_secs() -> u64 {
    300
}
fn default_short_term_ttl_secs() -> u64 {
    3600
}
fn default_history_limit() -> usize {
    20
}
fn default_long_term_queue_depth() -> usize {
    256
}
fn default_long_term_retry_max() -> u32 {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_ttl_secs: default_working_ttl_secs(),
            short_term_ttl_secs: default_short_term_ttl_secs(),
            history_limit: default_history_limit(),
            long_term_queue_depth: default_long_term_queue_depth(),
            long_term_retry_max: default_long_term_retry_max(),
            durable_path: None,
        }
    }
}

// ── Circuit breaker ──────────────────────────────────────────────

/// Circuit breaker configuration (`[breaker]` section).
///
/// One breaker instance is held per external dependency (completion,
/// embedding); this tuning applies to each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens. Default: `5`.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before probing. Default: `60`.
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    /// Trial calls allowed while half-open. Default: `2`.
    #[serde(default = "default_half_open_trials")]
    pub half_open_trials: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_open_duration_secs() -> u64 {
    60
}
fn default_half_open_trials() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration_secs(),
            half_open_trials: default_half_open_trials(),
        }
    }
}

// ── Inference ────────────────────────────────────────────────────

/// External inference endpoint configuration (`[inference]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of an OpenAI-compatible API. Default: `https://api.openai.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key. Overridden by `SWITCHBOARD_API_KEY` or `OPENAI_API_KEY` env vars.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Completion model. Default: `gpt-4o-mini`.
    #[serde(default = "default_model")]
    pub model: String,
    /// Embedding model. Default: `text-embedding-3-small`.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Per-call timeout in seconds; expiry counts as a breaker failure. Default: `30`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            embedding_model: default_embedding_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl InferenceConfig {
    /// Resolve the effective API key: env vars win over the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        for env_var in ["SWITCHBOARD_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(value) = std::env::var(env_var) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string)
    }
}

// ── Sessions ─────────────────────────────────────────────────────

/// Per-session turn-serialization configuration (`[session]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum turns queued behind an in-flight turn for one session. Default: `4`.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Seconds a queued turn waits before giving up with a busy signal. Default: `10`.
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,
    /// Idle seconds after which a session's gate slot is garbage-collected. Default: `1800`.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_queue_depth() -> usize {
    4
}
fn default_queue_timeout_secs() -> u64 {
    10
}
fn default_idle_timeout_secs() -> u64 {
    1800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            queue_timeout_secs: default_queue_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}
