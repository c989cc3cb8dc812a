//! Generation backend client.
//!
//! [`GenerationBackend`] abstracts the chat-completion service the shield
//! mediates. The HTTP implementation talks to an OpenRouter-compatible API;
//! tests swap in a scripted stub. A single `chat` call is one attempt, and
//! [`chat_with_retry`] layers the bounded retry policy on top.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::retry::{with_retry, AttemptOutcome, RetryConfig, RETRYABLE_STATUS_CODES};
use crate::config::BackendConfig;
use crate::error::{ShieldError, ShieldResult};

/// One message in a chat-completion conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Failure of a single backend attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Backend cannot be reached at all (no credentials, no route).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Transient failure; the call may succeed if repeated.
    #[error("transient backend failure: {message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Permanent failure; repeating the call will not help.
    #[error("backend rejected request: {0}")]
    Fatal(String),
}

/// A chat-completion service the shield can send generation and
/// classification traffic to.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Whether the backend is configured well enough to attempt a call.
    fn available(&self) -> bool;

    /// Perform one chat-completion attempt and return the assistant text.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
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
    content: String,
}

/// HTTP client for an OpenRouter-compatible chat-completion API.
pub struct HttpGenerationBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpGenerationBackend {
    pub fn new(config: &BackendConfig) -> ShieldResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShieldError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn available(&self) -> bool {
        self.config.has_credentials()
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", "https://github.com/prompt-shield")
            .header("X-Title", "Prompt Shield")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                // Connect errors and timeouts are worth another attempt.
                BackendError::Retryable {
                    message: format!("request to {} failed: {e}", self.name()),
                    retry_after: None,
                }
            })?;

        let status = response.status();
        if RETRYABLE_STATUS_CODES.contains(&status.as_u16()) {
            let retry_after = RetryConfig::parse_retry_after(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(BackendError::Retryable {
                message: format!("{} returned {status}", self.name()),
                retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(BackendError::Fatal(format!(
                "{} returned {status}: {snippet}",
                self.name()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("malformed backend response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BackendError::Fatal("backend response had no choices".to_string()))
    }
}

/// Call the backend with the configured retry policy.
///
/// Returns [`ShieldError::BackendUnavailable`] when the backend is not
/// configured or retries are exhausted; the caller resolves that per the
/// policy's failure mode. Outright rejections (bad credentials, malformed
/// replies) surface as [`ShieldError::ExternalService`] instead.
pub async fn chat_with_retry(
    backend: &dyn GenerationBackend,
    retry: &RetryConfig,
    model: &str,
    messages: &[ChatMessage],
    max_tokens: u32,
) -> ShieldResult<String> {
    if !backend.available() {
        return Err(ShieldError::BackendUnavailable(format!(
            "backend '{}' is not configured",
            backend.name()
        )));
    }

    with_retry(retry, |_attempt| async move {
        match backend.chat(model, messages, max_tokens).await {
            Ok(text) => AttemptOutcome::Success(text),
            Err(BackendError::Retryable { message, retry_after }) => {
                AttemptOutcome::Retryable {
                    error: message,
                    retry_after,
                }
            }
            Err(BackendError::Unavailable(message)) => AttemptOutcome::Retryable {
                error: message,
                retry_after: None,
            },
            Err(BackendError::Fatal(message)) => AttemptOutcome::Fatal(message),
        }
    })
    .await
}
