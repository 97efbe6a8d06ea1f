//! Routing matchers: cheap pattern ranking and embedding-based semantic
//! ranking, both producing the same candidate shape.

pub mod pattern;
pub mod semantic;

pub use pattern::{Candidate, PatternMatcher};
pub use semantic::SemanticMatcher;
