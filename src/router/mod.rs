//! Routing orchestration: decision records, agent execution, and the
//! per-turn engine.

pub mod decision;
pub mod engine;
pub mod execute;

pub use decision::{RoutingDecision, SelectionMethod, TurnOutcome};
pub use engine::AgentRouter;
pub use execute::AgentExecutor;
