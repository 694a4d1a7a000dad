//! HTTP provider adapters.
//!
//! - [`OpenAiProvider`]: OpenAI-compatible `/chat/completions`
//! - [`AnthropicProvider`]: Anthropic `/v1/messages`
//!
//! Both classify HTTP outcomes the same way:
//!
//! | Response | Error |
//! |----------|-------|
//! | 429 | [`ProviderError::RateLimited`] with the `retry-after` hint |
//! | 408, 409, 5xx, 529 | [`ProviderError::Transient`] |
//! | 400 mentioning a content policy | [`ProviderError::ContentPolicyRejected`] |
//! | other 4xx (401, 403, 404, ...) | [`ProviderError::Fatal`] |
//! | client timeout | [`ProviderError::Timeout`] |
//! | connection failure | [`ProviderError::Transient`] |

use super::{Completion, Provider, ProviderError, ProviderRequest, TokenUsage};
use crate::config::ProviderConfig;
use crate::OrchestratorError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Ceiling applied to `retry-after` hints before they reach the retry loop.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

const POLICY_MARKERS: [&str; 5] = [
    "content_policy",
    "content_filter",
    "content policy",
    "safety",
    "policy_violation",
];

fn read_key(env_var: &str) -> Result<String, OrchestratorError> {
    std::env::var(env_var)
        .map_err(|_| OrchestratorError::ConfigError(format!("{env_var} environment variable not set")))
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| !secs.is_nan() && *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).map_or(MAX_RETRY_AFTER, |d| d.min(MAX_RETRY_AFTER)))
}

/// Map a non-success HTTP response to a [`ProviderError`].
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        408 | 409 | 529 => ProviderError::Transient(message),
        s if s >= 500 => ProviderError::Transient(message),
        400 | 403 | 422 if is_policy_rejection(body) => ProviderError::ContentPolicyRejected(message),
        _ => ProviderError::Fatal(message),
    }
}

fn is_policy_rejection(body: &str) -> bool {
    let lower = body.to_lowercase();
    POLICY_MARKERS.iter().any(|m| lower.contains(m))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Transient(format!("request failed: {e}"))
    }
}

async fn send_json<B: Serialize + Sync>(
    request: reqwest::RequestBuilder,
    body: &B,
    timeout: Duration,
) -> Result<String, ProviderError> {
    let response = request
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(e, timeout))?;

    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(e, timeout))?;

    if !status.is_success() {
        return Err(classify_status(status, retry_after, &text));
    }
    Ok(text)
}

// ============================================================================
// OpenAI
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// OpenAI-compatible chat completions provider.
///
/// ## Example
///
/// ```no_run
/// use editorial_orchestrator::provider::OpenAiProvider;
///
/// let provider = OpenAiProvider::new("openai", "gpt-4o-mini", "sk-...")
///     .with_base_url("http://localhost:8080/v1");
/// ```
pub struct OpenAiProvider {
    id: String,
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Create a provider with an explicit key.
    pub fn new(id: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Create a provider from configuration, reading the key from the
    /// configured environment variable (default `OPENAI_API_KEY`).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the variable is unset.
    pub fn from_config(id: &str, config: &ProviderConfig) -> Result<Self, OrchestratorError> {
        let key = read_key(config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY"))?;
        let mut provider = Self::new(id, config.model.clone(), key).with_timeout(config.timeout());
        if let Some(url) = &config.base_url {
            provider = provider.with_base_url(url.clone());
        }
        Ok(provider)
    }

    /// Override the API base URL (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP client timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let body = ChatRequest {
            model: request.model_id.as_deref().unwrap_or(&self.model),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        let text = send_json(builder, &body, self.timeout).await?;

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Transient(format!("malformed response body: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Transient("no choices in response".into()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::ContentPolicyRejected(
                "completion stopped by content filter".into(),
            ));
        }

        let content = choice.message.content.unwrap_or_default();
        let usage = parsed.usage.map_or_else(
            || TokenUsage::estimate(&request.user_prompt, &content),
            |u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            },
        );
        Ok(Completion {
            text: content,
            usage,
        })
    }
}

// ============================================================================
// Anthropic
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Anthropic Messages API provider.
///
/// ## Example
///
/// ```no_run
/// use editorial_orchestrator::provider::AnthropicProvider;
///
/// let provider = AnthropicProvider::new("claude", "claude-3-5-sonnet-latest", "sk-ant-...");
/// ```
pub struct AnthropicProvider {
    id: String,
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    /// Create a provider with an explicit key.
    pub fn new(id: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Create a provider from configuration, reading the key from the
    /// configured environment variable (default `ANTHROPIC_API_KEY`).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the variable is unset.
    pub fn from_config(id: &str, config: &ProviderConfig) -> Result<Self, OrchestratorError> {
        let key = read_key(config.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY"))?;
        let mut provider = Self::new(id, config.model.clone(), key).with_timeout(config.timeout());
        if let Some(url) = &config.base_url {
            provider = provider.with_base_url(url.clone());
        }
        Ok(provider)
    }

    /// Override the API base URL (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP client timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let body = MessagesRequest {
            model: request.model_id.as_deref().unwrap_or(&self.model),
            system: &request.system_prompt,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.user_prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let text = send_json(builder, &body, self.timeout).await?;

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Transient(format!("malformed response body: {e}")))?;

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(ProviderError::ContentPolicyRejected("model refused the request".into()));
        }

        let content: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(ProviderError::Transient("empty completion".into()));
        }

        let usage = parsed.usage.map_or_else(
            || TokenUsage::estimate(&request.user_prompt, &content),
            |u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            },
        );
        Ok(Completion {
            text: content,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_429_carries_hint() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(2)),
            "slow down",
        );
        assert_eq!(
            err,
            ProviderError::RateLimited {
                message: "HTTP 429: slow down".into(),
                retry_after: Some(Duration::from_secs(2)),
            }
        );
    }

    fn retry_after(value: &str) -> Option<Duration> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            value.parse().expect("test: header value"),
        );
        parse_retry_after(&headers)
    }

    #[test]
    fn test_retry_after_is_parsed_and_capped() {
        assert_eq!(retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(retry_after("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(retry_after("1e20"), Some(MAX_RETRY_AFTER));
        assert_eq!(retry_after("inf"), Some(MAX_RETRY_AFTER));
        assert_eq!(retry_after("-3"), None);
        assert_eq!(retry_after("NaN"), None);
        assert_eq!(retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_classify_server_errors_as_transient() {
        for code in [500u16, 502, 503, 529, 408] {
            let status = StatusCode::from_u16(code).expect("test: valid status");
            assert_eq!(classify_status(status, None, "").kind(), "transient", "{code}");
        }
    }

    #[test]
    fn test_classify_auth_errors_as_fatal() {
        for code in [401u16, 403, 404] {
            let status = StatusCode::from_u16(code).expect("test: valid status");
            assert_eq!(classify_status(status, None, "bad key").kind(), "fatal", "{code}");
        }
    }

    #[test]
    fn test_classify_policy_rejection() {
        let err = classify_status(
            StatusCode::BAD_REQUEST,
            None,
            r#"{"error":{"code":"content_policy_violation"}}"#,
        );
        assert_eq!(err.kind(), "content_policy");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn test_with_base_url_trims_trailing_slash() {
        let p = OpenAiProvider::new("o", "m", "k").with_base_url("http://x/v1/");
        assert_eq!(p.base_url, "http://x/v1");
    }

    #[test]
    fn test_from_config_without_key_is_config_error() {
        let mut config = ProviderConfig::simulated();
        config.api_key_env = Some("EDITORIAL_TEST_KEY_THAT_IS_NEVER_SET".into());
        let result = AnthropicProvider::from_config("c", &config);
        assert!(matches!(result, Err(OrchestratorError::ConfigError(_))));
    }
}
