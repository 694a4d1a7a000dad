//! HTTP provider behaviour against a real mock server.
//!
//! Each test starts a Wiremock server that imitates the OpenAI or Anthropic
//! API and drives the provider through a [`ProviderHarness`], so status
//! classification, retry counts and the cost ledger are checked end to end.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use editorial_orchestrator::config::{ProviderConfig, ProviderKind};
use editorial_orchestrator::provider::{AnthropicProvider, OpenAiProvider};
use editorial_orchestrator::resilience::RetryPolicy;
use editorial_orchestrator::{OrchestratorError, ProviderError, ProviderHarness};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn openai_at(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new("openai", "gpt-test", "sk-test").with_base_url(format!("{}/v1", server.uri()))
}

fn harness(provider: impl editorial_orchestrator::Provider + 'static) -> ProviderHarness {
    ProviderHarness::new(Arc::new(provider), RetryPolicy::fixed(3, Duration::from_millis(5)))
}

fn chat_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 7}
    })
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_success_records_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(openai_at(&server));
    let response = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect("test: call succeeds");
    assert_eq!(response.text, "hello");
    assert_eq!(response.attempts, 1);
    assert_eq!(response.usage.input_tokens, 12);
    assert_eq!(response.usage.output_tokens, 7);

    let snapshot = h.ledger().snapshot();
    assert_eq!(snapshot.providers.get("openai").map(|p| p.requests), Some(1));
}

#[tokio::test]
async fn rate_limit_with_retry_after_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("after wait")))
        .mount(&server)
        .await;

    let h = harness(openai_at(&server));
    let response = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect("test: second attempt succeeds");
    assert_eq!(response.text, "after wait");
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn server_errors_exhaust_retries_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(openai_at(&server));
    let failure = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect_err("test: all attempts fail");
    assert_eq!(failure.attempts, 3);
    assert!(matches!(failure.error, ProviderError::Transient(_)));
}

#[tokio::test]
async fn unauthorized_is_fatal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(openai_at(&server));
    let failure = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect_err("test: auth failure");
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.error.kind(), "fatal");
}

#[tokio::test]
async fn content_policy_400_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error":{"code":"content_policy_violation","message":"flagged"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(openai_at(&server));
    let failure = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect_err("test: rejected");
    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.error, ProviderError::ContentPolicyRejected(_)));
}

#[tokio::test]
async fn content_filter_finish_reason_is_policy_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": null}, "finish_reason": "content_filter"}]
        })))
        .mount(&server)
        .await;

    let h = harness(openai_at(&server));
    let failure = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect_err("test: filtered");
    assert_eq!(failure.error.kind(), "content_policy");
}

#[tokio::test]
async fn slow_response_times_out_and_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_body("late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let provider = openai_at(&server).with_timeout(Duration::from_millis(100));
    let h = ProviderHarness::new(Arc::new(provider), RetryPolicy::fixed(2, Duration::from_millis(5)))
        .with_timeout(Duration::from_millis(150));
    let failure = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect_err("test: timed out");
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.error.kind(), "timeout");
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_joins_text_blocks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [
                {"type": "text", "text": "{\"body\": "},
                {"type": "text", "text": "\"hi\"}"}
            ],
            "usage": {"input_tokens": 20, "output_tokens": 4},
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("claude", "claude-test", "sk-ant-test").with_base_url(server.uri());
    let h = harness(provider);
    let response = h
        .call(&h.request("role: section_writer", "Target length: 10 words"))
        .await
        .expect("test: call succeeds");
    assert_eq!(response.text, r#"{"body": "hi"}"#);
    assert_eq!(response.usage.input_tokens, 20);
}

#[tokio::test]
async fn anthropic_overloaded_529_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new("claude", "claude-test", "sk-ant-test").with_base_url(server.uri());
    let h = harness(provider);
    let failure = h
        .call(&h.request("role: generator", "Topic: queues"))
        .await
        .expect_err("test: exhausted");
    assert_eq!(failure.error.kind(), "transient");
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn missing_api_key_is_a_config_error() {
    let config = ProviderConfig {
        kind: ProviderKind::OpenAi,
        model: "gpt-test".into(),
        api_key_env: Some("EDITORIAL_TEST_KEY_THAT_IS_NEVER_SET".into()),
        ..ProviderConfig::simulated()
    };
    match OpenAiProvider::from_config("openai", &config) {
        Err(OrchestratorError::ConfigError(msg)) => {
            assert!(msg.contains("EDITORIAL_TEST_KEY_THAT_IS_NEVER_SET"));
        }
        Err(other) => panic!("expected ConfigError, got {other}"),
        Ok(_) => panic!("expected ConfigError, got a provider"),
    }
}
