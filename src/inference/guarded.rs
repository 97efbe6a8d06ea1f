//! Breaker-guarded, timeout-bounded access to the inference client.
//!
//! Every call crossing into the external inference capability goes through
//! here: the relevant breaker is checked first (open circuit fails fast with
//! no network attempt), the call runs under a timeout, and the outcome is
//! reported back to the breaker. Timeouts count as failures.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::breaker::CircuitBreaker;
use super::traits::InferenceClient;
use crate::config::{BreakerConfig, InferenceConfig};

/// Dependency names used for breaker bookkeeping.
pub const COMPLETION_SERVICE: &str = "completion";
pub const EMBEDDING_SERVICE: &str = "embedding";

/// The engine-facing inference surface: `complete` and `embed`, each behind
/// its own circuit breaker.
pub struct GuardedInference {
    client: Arc<dyn InferenceClient>,
    completion_breaker: Arc<CircuitBreaker>,
    embedding_breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl GuardedInference {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        breaker_config: &BreakerConfig,
        inference_config: &InferenceConfig,
    ) -> Self {
        Self {
            client,
            completion_breaker: Arc::new(CircuitBreaker::new(
                COMPLETION_SERVICE,
                breaker_config,
            )),
            embedding_breaker: Arc::new(CircuitBreaker::new(EMBEDDING_SERVICE, breaker_config)),
            timeout: Duration::from_secs(inference_config.request_timeout_secs),
        }
    }

    pub async fn complete(&self, prompt: &str) -> Result<String> {
        Self::guarded(
            &self.completion_breaker,
            self.timeout,
            self.client.complete(prompt),
        )
        .await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Self::guarded(
            &self.embedding_breaker,
            self.timeout,
            self.client.embed(text),
        )
        .await
    }

    pub fn completion_breaker(&self) -> &CircuitBreaker {
        &self.completion_breaker
    }

    pub fn embedding_breaker(&self) -> &CircuitBreaker {
        &self.embedding_breaker
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    async fn guarded<T>(
        breaker: &CircuitBreaker,
        timeout: Duration,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if !breaker.allow_request() {
            return Err(anyhow!("circuit open for {}", breaker.name()));
        }

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => {
                breaker.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                breaker.record_failure();
                Err(anyhow!(
                    "{} call timed out after {:?}",
                    breaker.name(),
                    timeout
                ))
            }
        }
    }
}
