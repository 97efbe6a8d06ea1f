//! Agent catalog: definitions, the read-only snapshot, and its sources.

pub mod file;
pub mod snapshot;
pub mod traits;

pub use file::FileAgentSource;
pub use snapshot::{bootstrap, build_snapshot, spawn_refresh, AgentSnapshot, SnapshotHandle};
pub use traits::{AgentCategory, AgentDefinition, AgentSource, PatternCapability, PatternKind};
