//! External inference capability: abstract client, circuit breakers, and the
//! guarded wrapper the rest of the engine calls through.

pub mod breaker;
pub mod guarded;
pub mod openai;
pub mod traits;

pub use breaker::{CircuitBreaker, CircuitState};
pub use guarded::{GuardedInference, COMPLETION_SERVICE, EMBEDDING_SERVICE};
pub use openai::OpenAiClient;
pub use traits::InferenceClient;
