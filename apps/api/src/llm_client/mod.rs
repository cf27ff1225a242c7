//! Anthropic Messages client.
//!
//! Every generative call in Retailor goes through this module; no other
//! module talks to the API directly. The client retries transport-level
//! failures (connection errors, 429, 5xx) with a short exponential backoff.
//! Malformed-output retries are a separate concern and live in the tailoring
//! orchestrator, which calls [`GenerativeClient::complete`] once per attempt.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
/// Hardcoded on purpose so every environment runs the same model.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
/// Transport attempts per call, counting the first one.
const TRANSPORT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("model returned no text content")]
    EmptyContent,
}

/// Text-completion seam between the tailoring pipeline and the model.
/// Production wires the Anthropic-backed [`LlmClient`]; tests wire a script.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Block>,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");
        Self { http, api_key }
    }

    /// One POST to the Messages endpoint, no retry.
    async fn post_messages(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let body = json!({
            "model": MODEL,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });
        self.http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
    }

    async fn call(&self, prompt: &str, system: &str) -> Result<MessagesResponse, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match self.post_messages(prompt, system).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: MessagesResponse = response.json().await?;
                        debug!(
                            input_tokens = parsed.usage.input_tokens,
                            output_tokens = parsed.usage.output_tokens,
                            "model call complete"
                        );
                        return Ok(parsed);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let err = api_error(status, body);
                    if !retryable(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) => LlmError::Http(e),
            };

            if attempt >= TRANSPORT_ATTEMPTS {
                return Err(err);
            }
            let delay = std::time::Duration::from_millis(1000 << (attempt - 1));
            warn!(
                "model call attempt {attempt} failed ({err}), retrying in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerativeClient for LlmClient {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let response = self.call(prompt, system).await?;
        response
            .content
            .into_iter()
            .find_map(|block| match block.kind.as_str() {
                "text" => block.text,
                _ => None,
            })
            .ok_or(LlmError::EmptyContent)
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Builds an [`LlmError::Api`], preferring the structured message the API
/// puts in its error envelope over the raw body.
fn api_error(status: StatusCode, body: String) -> LlmError {
    let body = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);
    LlmError::Api {
        status: status.as_u16(),
        body,
    }
}

/// Unwraps model output from markdown code fences, if present. The model is
/// told to answer with bare JSON but sometimes fences it anyway.
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest).trim_start();
    match rest.strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => rest,
    }
}
