//! HTTP client for the completion service
//!
//! Transient failures are handled entirely at this boundary: 429s honor
//! `retry-after` or back off exponentially, 5xx responses retry up to a cap,
//! and a circuit breaker rejects calls outright after repeated hard failures.
//! Orchestration code above never special-cases transport errors.

use crate::breaker::CircuitBreaker;
use crate::cancel::CancelToken;
use crate::types::{ApiRequest, ApiResponse, CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use fable_core::{FableError, ModelConfig, Result, TokenUsage};
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 120;

/// Anything that can answer a completion request
///
/// The production implementation is [`CompletionClient`]; tests use scripted
/// backends so no step of the pipeline needs a network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

/// Completion client against an Anthropic-style messages endpoint
pub struct CompletionClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    breaker: CircuitBreaker,
}

impl CompletionClient {
    /// Build a client, reading the API key from the configured env var
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            FableError::Gateway(format!("API key env var {} not set", config.api_key_env))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FableError::Gateway(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: DEFAULT_API_URL.to_string(),
            api_key,
            breaker: CircuitBreaker::default(),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        if !self.breaker.allow() {
            return Err(FableError::CircuitOpen(format!(
                "too many completion failures, retry in {} ms",
                self.breaker.retry_after_ms()
            )));
        }

        let body = ApiRequest {
            model: &request.sampling.model,
            max_tokens: request.sampling.max_tokens,
            temperature: request.sampling.temperature,
            system: request.system.as_deref(),
            messages: &request.messages,
        };

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!(attempt = retries + 1, "Sending completion request");

            let response = self
                .http
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| FableError::Gateway(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RETRIES {
                    let detail = response.text().await.unwrap_or_else(|_| "unknown".to_string());
                    return Err(FableError::RateLimit(format!(
                        "rate limit persisted after {} retries: {}",
                        MAX_RETRIES, detail
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                tracing::warn!(
                    wait_secs,
                    retry = retries,
                    max = MAX_RETRIES,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let detail = response.text().await.unwrap_or_else(|_| "unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    tracing::warn!(
                        %status,
                        wait_secs = backoff_secs,
                        retry = retries,
                        "Server error, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                self.breaker.on_failure();
                tracing::error!(
                    failures = self.breaker.failures(),
                    "Completion endpoint failure recorded"
                );
                return Err(FableError::Gateway(format!(
                    "completion service error {}: {}",
                    status, detail
                )));
            }

            let parsed: ApiResponse = response
                .json()
                .await
                .map_err(|e| FableError::Gateway(format!("Failed to parse response: {}", e)))?;

            let text = parsed
                .content
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("");
            if text.is_empty() {
                self.breaker.on_failure();
                return Err(FableError::Gateway("no content in response".to_string()));
            }

            let usage: TokenUsage = parsed.usage.map(Into::into).unwrap_or_default();
            self.breaker.on_success();

            tracing::debug!(
                chars = text.len(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Completion call succeeded"
            );

            return Ok(CompletionResponse { text, usage });
        }
    }
}

/// Race a completion call against a cancel signal
///
/// A cancelled call returns `FableError::Cancelled`; the in-flight request is
/// dropped, which aborts it.
pub async fn complete_cancellable(
    backend: &dyn CompletionBackend,
    request: &CompletionRequest,
    cancel: &CancelToken,
) -> Result<CompletionResponse> {
    if cancel.is_cancelled() {
        return Err(FableError::Cancelled);
    }
    tokio::select! {
        result = backend.complete(request) => result,
        _ = cancel.cancelled() => Err(FableError::Cancelled),
    }
}
