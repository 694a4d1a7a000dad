//! Shared fixtures for unit tests.

use crate::agent::AgentInvoker;
use crate::config::EditorialConfig;
use crate::content::{ContentId, ContentItem};
use crate::context::EngineContext;
use crate::provider::stub::role_tag;
use crate::provider::{
    Completion, Provider, ProviderError, ProviderHarness, ProviderPool, ProviderRequest,
    SimulatedProvider,
};
use crate::resilience::RetryPolicy;
use crate::store::InMemoryStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type RoleHandler = dyn Fn(&str, &ProviderRequest) -> Result<String, ProviderError> + Send + Sync;

/// Provider answering by role tag, with optional per-role delays.
pub(crate) struct RoleProvider {
    handler: Arc<RoleHandler>,
    delays: HashMap<String, Duration>,
}

impl RoleProvider {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &ProviderRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            delays: HashMap::new(),
        }
    }

    pub(crate) fn slow(mut self, tag: &str, delay: Duration) -> Self {
        self.delays.insert(tag.to_string(), delay);
        self
    }
}

#[async_trait]
impl Provider for RoleProvider {
    fn id(&self) -> &str {
        "role-stub"
    }

    fn model(&self) -> &str {
        "role-stub-1"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let tag = role_tag(request).unwrap_or("").to_string();
        if let Some(delay) = self.delays.get(&tag) {
            tokio::time::sleep(*delay).await;
        }
        let text = (self.handler)(&tag, request)?;
        Ok(Completion::from_text(&request.user_prompt, text))
    }
}

pub(crate) fn review_json(score: f64) -> String {
    serde_json::json!({
        "score": score,
        "rationale": format!("scored {score}"),
        "issues": if score < 8.0 { vec!["needs depth".to_string()] } else { vec![] },
        "missing_elements": if score < 8.0 { vec!["worked example".to_string()] } else { vec![] },
        "recommendations": ["add a diagram"],
    })
    .to_string()
}

/// Configuration with fast retries and short deadlines.
pub(crate) fn fast_config() -> EditorialConfig {
    let mut config = EditorialConfig::default();
    config.resilience.retry_attempts = 2;
    config.resilience.retry_base_ms = 1;
    config.resilience.retry_max_ms = 2;
    config.resilience.agent_timeout_ms = 2_000;
    config.resilience.run_timeout_s = 10;
    config
}

pub(crate) fn context_with(
    provider: Arc<dyn Provider>,
    config: EditorialConfig,
) -> (EngineContext, Arc<InMemoryStore>) {
    let harness = ProviderHarness::new(
        provider,
        RetryPolicy::fixed(config.resilience.retry_attempts, Duration::from_millis(1)),
    );
    let invoker = AgentInvoker::new(ProviderPool::single(harness))
        .with_agent_timeout(config.resilience.agent_timeout())
        .with_words_per_token(config.generation.words_per_token);
    let store = Arc::new(InMemoryStore::new());
    let ctx = EngineContext::new(config, invoker, store.clone());
    (ctx, store)
}

pub(crate) fn simulated_context() -> (EngineContext, Arc<InMemoryStore>) {
    context_with(Arc::new(SimulatedProvider::new("sim", "sim-1")), fast_config())
}

pub(crate) fn sample_item(id: &str) -> ContentItem {
    let mut item = ContentItem::new_draft(ContentId::new(id), "Retry Strategies", "guide");
    item.body = "Retries need backoff and jitter. Idempotent consumers make replays safe.".into();
    item.metadata.summary = "How to retry safely.".into();
    item.metadata.tags = vec!["queues".into()];
    item.metadata.seo.meta_title = "Retry Strategies".into();
    item.metadata.seo.meta_description = "Retry safely.".into();
    item.metadata.seo.keywords = vec!["retry".into()];
    item
}
