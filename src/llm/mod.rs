//! Unified LLM client over multiple providers.
//!
//! A single [`LlmCall`] capability is what the engine sees: system prompt,
//! messages, model id, temperature in — text out. Behind it sits a closed
//! set of provider variants ([`ProviderKind`]) differing only in wire
//! format, with shared retry/backoff handling:
//!
//! - rate limits (429) and provider errors (5xx) retry with exponential
//!   backoff up to a configurable cap
//! - auth failures (401/403) are never retried
//! - explicit quota/billing signals become the distinguished
//!   [`LlmError::Quota`] so the runner can surface an actionable message

pub mod providers;
#[cfg(test)]
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ProviderKeys;
use crate::models::ChatMessage;

pub use providers::ProviderKind;

/// Default number of retries for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed LLM error kinds.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid or missing API key (401/403). Never retried.
    #[error("LLM authentication failed for {provider}: {detail}")]
    Auth { provider: String, detail: String },

    /// Rate limit exceeded (429). Retried with backoff.
    #[error("LLM rate limit exceeded for {provider}")]
    RateLimit { provider: String },

    /// The provider explicitly signaled quota or billing exhaustion.
    #[error("LLM quota exhausted for {provider}")]
    Quota { provider: String },

    /// Provider-side failure (5xx). Retried with backoff.
    #[error("LLM provider error from {provider} ({status}): {detail}")]
    Provider { provider: String, status: u16, detail: String },

    /// Network-level failure or timeout.
    #[error("LLM request failed: {0}")]
    Network(String),

    /// The model string matches no known provider prefix.
    #[error("cannot detect provider for model: {0}")]
    UnknownModel(String),

    /// The provider returned a 2xx with an unusable body.
    #[error("unexpected LLM response shape: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the shared retry loop should try this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimit { .. } | LlmError::Provider { .. } | LlmError::Network(_))
    }

    /// The provider name, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            LlmError::Auth { provider, .. }
            | LlmError::RateLimit { provider }
            | LlmError::Quota { provider }
            | LlmError::Provider { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Normalized response from any provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub provider: &'static str,
    pub usage: TokenUsage,
}

/// Per-call model parameters.
#[derive(Debug, Clone, Default)]
pub struct LlmParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Free-form extras merged into the request body.
    pub extra: serde_json::Map<String, Value>,
}

/// The capability the meeting engine depends on. Implemented by [`LlmClient`]
/// for production and by scripted fakes in tests.
#[async_trait]
pub trait LlmCall: Send + Sync {
    async fn call(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String, LlmError>;
}

/// HTTP-backed client dispatching to the provider matching the model prefix.
pub struct LlmClient {
    http: reqwest::Client,
    keys: ProviderKeys,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmClient {
    pub fn new(keys: ProviderKeys) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            keys,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    fn api_key_for(&self, provider: ProviderKind) -> Result<&str, LlmError> {
        let key = match provider {
            ProviderKind::OpenAi => self.keys.openai.as_deref(),
            ProviderKind::Anthropic => self.keys.anthropic.as_deref(),
            ProviderKind::DeepSeek => self.keys.deepseek.as_deref(),
        };
        key.ok_or_else(|| LlmError::Auth {
            provider: provider.name().to_string(),
            detail: "no API key configured".to_string(),
        })
    }

    /// Send a chat completion with retry on transient failures.
    pub async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        model: &str,
        params: &LlmParams,
    ) -> Result<LlmResponse, LlmError> {
        let provider = ProviderKind::detect(model)?;
        let api_key = self.api_key_for(provider)?;
        let request = provider.build_request(api_key, system_prompt, messages, model, params);

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            match self.send_once(provider, &request, model).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    log::warn!(
                        "LLM call to {} failed (attempt {}/{}), retrying in {:?}: {}",
                        provider.name(),
                        attempt + 1,
                        self.max_retries,
                        delay,
                        e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| LlmError::Network("retries exhausted".to_string())))
    }

    async fn send_once(
        &self,
        provider: ProviderKind,
        request: &providers::WireRequest,
        model: &str,
    ) -> Result<LlmResponse, LlmError> {
        let mut builder = self.http.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) if status == 200 => return Err(LlmError::InvalidResponse(e.to_string())),
            Err(_) => Value::Null,
        };

        match status {
            200 => provider.parse_response(&body, model),
            401 | 403 => Err(LlmError::Auth {
                provider: provider.name().to_string(),
                detail: error_detail(&body),
            }),
            429 => {
                if signals_quota(&body) {
                    Err(LlmError::Quota { provider: provider.name().to_string() })
                } else {
                    Err(LlmError::RateLimit { provider: provider.name().to_string() })
                }
            }
            s if s >= 500 => Err(LlmError::Provider {
                provider: provider.name().to_string(),
                status: s,
                detail: error_detail(&body),
            }),
            s => {
                if signals_quota(&body) {
                    Err(LlmError::Quota { provider: provider.name().to_string() })
                } else {
                    Err(LlmError::InvalidResponse(format!(
                        "request failed ({s}): {}",
                        error_detail(&body)
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl LlmCall for LlmClient {
    async fn call(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        let params = LlmParams { temperature: Some(temperature), ..Default::default() };
        let response = self.chat(system_prompt, messages, model, &params).await?;
        Ok(response.content)
    }
}

fn error_detail(body: &Value) -> String {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// True when the error body explicitly names quota or billing, which the
/// taxonomy distinguishes from ordinary rate limiting.
fn signals_quota(body: &Value) -> bool {
    let text = body.to_string().to_lowercase();
    text.contains("insufficient_quota")
        || text.contains("quota")
        || text.contains("billing")
        || text.contains("credit balance")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LlmError::RateLimit { provider: "openai".into() }.is_retryable());
        assert!(LlmError::Provider { provider: "openai".into(), status: 502, detail: String::new() }
            .is_retryable());
        assert!(LlmError::Network("reset".into()).is_retryable());

        assert!(!LlmError::Auth { provider: "openai".into(), detail: String::new() }.is_retryable());
        assert!(!LlmError::Quota { provider: "openai".into() }.is_retryable());
        assert!(!LlmError::UnknownModel("m".into()).is_retryable());
    }

    #[test]
    fn quota_signal_detection() {
        let body: Value =
            serde_json::json!({"error": {"type": "insufficient_quota", "message": "out"}});
        assert!(signals_quota(&body));

        let body: Value = serde_json::json!({"error": {"message": "Your credit balance is too low"}});
        assert!(signals_quota(&body));

        let body: Value = serde_json::json!({"error": {"message": "slow down"}});
        assert!(!signals_quota(&body));
    }

    #[test]
    fn missing_key_is_auth_error() {
        let client = LlmClient::new(ProviderKeys::default());
        let err = client.api_key_for(ProviderKind::OpenAi).unwrap_err();
        assert!(matches!(err, LlmError::Auth { .. }));
    }
}
