//! # Provider adapters
//!
//! ## Responsibility
//! Define the [`Provider`] trait every LLM backend implements, the shared
//! request/response shapes, and the [`ProviderError`] taxonomy the retry
//! harness classifies on.
//!
//! ## Guarantees
//! - Object-safe: providers are used as `Arc<dyn Provider>`
//! - Classified: every failure maps to exactly one [`ProviderError`] variant,
//!   and only [`ProviderError::is_retryable`] variants are ever retried
//!
//! ## NOT Responsible For
//! - Retries, timeouts, rate limiting, cost accounting (see: [`harness`])
//! - Prompt construction (see: `agent`)

pub mod cost;
pub mod harness;
pub mod http;
pub mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use cost::CostLedger;
pub use harness::{ProviderHarness, ProviderPool};
pub use http::{AnthropicProvider, OpenAiProvider};
pub use stub::{ScriptedProvider, SimulatedProvider};

/// Errors returned by a [`Provider`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Network failure or 5xx; safe to retry.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider message.
        message: String,
        /// Reset hint from the provider, if one was sent.
        retry_after: Option<Duration>,
    },

    /// The call exceeded its deadline.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Bad credentials, unknown model, malformed request. Never retried.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    /// The provider refused the content. Never retried.
    #[error("content policy rejection: {0}")]
    ContentPolicyRejected(String),
}

impl ProviderError {
    /// Returns `true` for errors the harness may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// Short, stable label used for metrics and failure markers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Fatal(_) => "fatal",
            Self::ContentPolicyRejected(_) => "content_policy",
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// System instructions.
    pub system_prompt: String,
    /// User turn.
    pub user_prompt: String,
    /// Completion budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Model override; `None` uses the provider's configured model.
    pub model_id: Option<String>,
}

impl ProviderRequest {
    /// Build a request with default sampling settings.
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: 2048,
            temperature: 0.4,
            model_id: None,
        }
    }

    /// Set the completion budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the model for this call.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// Token counts reported (or estimated) for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Rough estimate for providers that do not report usage (4 chars/token).
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        Self {
            input_tokens: (prompt.len() as u64).div_ceil(4),
            output_tokens: (completion.len() as u64).div_ceil(4),
        }
    }
}

/// Raw completion from a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Token usage.
    pub usage: TokenUsage,
}

impl Completion {
    /// Completion with estimated usage, for providers that report none.
    pub fn from_text(prompt: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            usage: TokenUsage::estimate(prompt, &text),
            text,
        }
    }
}

/// Completion returned by the harness, annotated with call metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Provider that served the call.
    pub provider_id: String,
    /// Model that served the call.
    pub model_id: String,
    /// Generated text.
    pub text: String,
    /// Token usage of the successful attempt.
    pub usage: TokenUsage,
    /// Wall-clock time across all attempts.
    pub latency: Duration,
    /// Attempts made (1 when the first try succeeded).
    pub attempts: u32,
}

/// An LLM backend.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id (matches the config key).
    fn id(&self) -> &str;

    /// Model served by this provider.
    fn model(&self) -> &str;

    /// Perform one completion call. No retries.
    async fn generate(&self, request: &ProviderRequest) -> Result<Completion, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_classes_are_retryable() {
        assert!(ProviderError::Transient("503".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited {
            message: "slow down".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(!ProviderError::Fatal("bad key".into()).is_retryable());
        assert!(!ProviderError::ContentPolicyRejected("no".into()).is_retryable());
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(ProviderError::Fatal(String::new()).kind(), "fatal");
        assert_eq!(
            ProviderError::ContentPolicyRejected(String::new()).kind(),
            "content_policy"
        );
        assert_eq!(
            ProviderError::RateLimited {
                message: String::new(),
                retry_after: None
            }
            .kind(),
            "rate_limited"
        );
    }

    #[test]
    fn test_usage_estimate_rounds_up() {
        let usage = TokenUsage::estimate("abcde", "ab");
        assert_eq!(usage.input_tokens, 2);
        assert_eq!(usage.output_tokens, 1);
    }

    #[test]
    fn test_request_builder() {
        let req = ProviderRequest::new("sys", "user")
            .with_max_tokens(128)
            .with_temperature(0.0);
        assert_eq!(req.max_tokens, 128);
        assert_eq!(req.temperature, 0.0);
    }
}
