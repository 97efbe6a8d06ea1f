//! The abstract external-inference capability.
//!
//! The core depends on exactly two operations, text completion and text
//! embedding, both of which may fail or time out. Everything else about the
//! provider is an implementation detail behind this trait.

use anyhow::Result;
use async_trait::async_trait;

/// External inference client. Implementations are expected to be wrapped in
/// [`super::GuardedInference`] before the rest of the engine sees them.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Generate a text completion for a prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Embed text into a dense vector. Dimensionality is fixed per deployment.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The name of this client implementation.
    fn name(&self) -> &str;
}
