//! Anthropic Messages API backend.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{BackendError, Completion, CompletionRequest, Credential, GenerationBackend, TokenCount};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use tracing::debug;

use crate::wire::{ErrorEnvelope, Message, MessagesRequest, MessagesResponse};

/// Public API host.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Model used when the config names none.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
/// Value of the `anthropic-version` header sent with every request.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const MAX_ERROR_CHARS: usize = 200;

/// Connection settings for [`AnthropicBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicConfig {
    /// Scheme and host, without the `/v1/messages` path.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Upper bound on output tokens per completion.
    pub max_tokens: u32,
    /// Whole-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// [`GenerationBackend`] over the Anthropic Messages API.
pub struct AnthropicBackend {
    client: Client,
    messages_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicBackend {
    /// Builds the HTTP client. Fails only if the TLS backend cannot initialise.
    pub fn new(config: AnthropicConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            messages_url: format!("{base}/v1/messages"),
            model: config.model,
            max_tokens: config.max_tokens,
        })
    }

    /// Model this backend sends requests to.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<Completion, BackendError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &request.system_prompt,
            messages: [Message {
                role: "user",
                content: &request.user_prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                message: scrub(&e.to_string(), credential),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let raw = response.text().await.unwrap_or_default();
            debug!(pass = %request.pass, status = status.as_u16(), ?retry_after, "backend returned error status");
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: error_message(&raw, status.canonical_reason(), credential),
                retry_after,
            });
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse {
                    message: scrub(&e.to_string(), credential),
                })?;

        let text = parsed
            .text()
            .ok_or_else(|| BackendError::MalformedResponse {
                message: "response contained no text content".to_string(),
            })?;
        let tokens_used = TokenCount::new(parsed.tokens_used());

        debug!(
            pass = %request.pass,
            model = %self.model,
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
            tokens_used = tokens_used.as_u64(),
            "completion received"
        );
        Ok(Completion { text, tokens_used })
    }
}

/// Seconds form of `retry-after`. The HTTP-date form is ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Human-readable error from a non-2xx body: the API's own message when the
/// body is the documented error envelope, otherwise the truncated raw body.
fn error_message(raw: &str, reason: Option<&str>, credential: &Credential) -> String {
    let message = match serde_json::from_str::<ErrorEnvelope>(raw) {
        Ok(envelope) if !envelope.error.message.is_empty() => {
            format!("{}: {}", envelope.error.kind, envelope.error.message)
        }
        _ if raw.trim().is_empty() => reason.unwrap_or("no response body").to_string(),
        _ => raw.trim().chars().take(MAX_ERROR_CHARS).collect(),
    };
    scrub(&message, credential)
}

fn scrub(message: &str, credential: &Credential) -> String {
    message.replace(credential.expose(), "[REDACTED]")
}
