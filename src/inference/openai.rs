//! OpenAI-compatible inference client.
//! Most hosted inference APIs follow the same `/chat/completions` and
//! `/embeddings` formats, so one implementation covers them all.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::traits::InferenceClient;
use crate::config::InferenceConfig;

const MAX_API_ERROR_CHARS: usize = 200;

/// A client that speaks the OpenAI-compatible completion and embedding APIs.
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    embedding_model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(
                    config.request_timeout_secs.max(1),
                ))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .request("/chat/completions")
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error("completion", response).await);
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion response contained no content"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };

        let response = self.request("/embeddings").json(&request).send().await?;
        if !response.status().is_success() {
            return Err(api_error("embedding", response).await);
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("embedding response contained no vectors"))
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

/// Scrub secret-like token prefixes from provider error strings.
fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 2] = ["sk-", "Bearer "];
    const MASK: &str = "[REDACTED]";

    let mut scrubbed = input.to_string();
    for prefix in PREFIXES {
        let mut search_from = 0;
        while let Some(found) = scrubbed[search_from..].find(prefix) {
            let start = search_from + found;
            let content_start = start + prefix.len();
            let end = scrubbed[content_start..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
                .map_or(scrubbed.len(), |i| content_start + i);
            if end == content_start {
                // Bare prefix with no token body; keep scanning past it.
                search_from = content_start;
                continue;
            }
            scrubbed.replace_range(start..end, MASK);
            search_from = start + MASK.len();
        }
    }
    scrubbed
}

/// Sanitize API error text: scrub secrets, cap the length.
fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);
    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }
    let truncated: String = scrubbed.chars().take(MAX_API_ERROR_CHARS).collect();
    format!("{truncated}...")
}

/// Build a sanitized error from a failed HTTP response.
async fn api_error(service: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    anyhow!("{service} API error ({status}): {}", sanitize_api_error(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_scrubs_api_keys() {
        let out = sanitize_api_error("auth failed: sk-1234567890abcdef");
        assert!(!out.contains("sk-1234567890abcdef"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn sanitize_scrubs_tokens_after_a_bare_prefix() {
        let out = sanitize_api_error("header was sk- but key sk-abcdef123456 leaked");
        assert!(!out.contains("sk-abcdef123456"));
        assert!(out.contains("[REDACTED]"));
        assert!(out.contains("leaked"));
    }

    #[test]
    fn sanitize_truncates_long_errors() {
        let out = sanitize_api_error(&"x".repeat(500));
        assert!(out.chars().count() <= MAX_API_ERROR_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn sanitize_leaves_plain_errors_alone() {
        let input = "upstream timeout";
        assert_eq!(sanitize_api_error(input), input);
    }

    #[test]
    fn client_trims_trailing_slash_from_base_url() {
        let config = InferenceConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..InferenceConfig::default()
        };
        let client = OpenAiClient::new(&config);
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
