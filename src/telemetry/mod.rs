//! Fire-and-forget decision telemetry.
//!
//! Sinks must never block or fail the turn that emits into them; a sink that
//! wants durable delivery owns its own buffering.

use crate::router::RoutingDecision;
use tracing::{info, warn};

/// One emitted observation.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Decision(RoutingDecision),
    Error { stage: String, message: String },
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Default sink: structured log lines through `tracing`.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Decision(decision) => {
                info!(
                    session_id = %decision.session_id,
                    agent = decision.agent_id.as_deref().unwrap_or("-"),
                    confidence = decision.confidence,
                    method = ?decision.method,
                    "routing decision"
                );
            }
            TelemetryEvent::Error { stage, message } => {
                warn!(stage = %stage, "turn error: {message}");
            }
        }
    }
}

/// Discards everything. For tests and embedded use.
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}
