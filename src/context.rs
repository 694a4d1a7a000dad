//! Explicit engine context.
//!
//! Every engine is built from an [`EngineContext`] instead of reading global
//! state, so concurrent runs with different configurations never interfere.

use crate::agent::AgentInvoker;
use crate::config::EditorialConfig;
use crate::content::registry::ContentRegistry;
use crate::content::ContentId;
use crate::notify::{LogNotifier, Notifier};
use crate::search::SearchIndex;
use crate::store::{save_with_retry, ContentStore};
use crate::OrchestratorError;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Shared collaborators of the orchestrator, audit, and improvement engines.
#[derive(Clone)]
pub struct EngineContext {
    /// Validated configuration.
    pub config: Arc<EditorialConfig>,
    /// Role invoker over the provider pool.
    pub invoker: AgentInvoker,
    /// Durable content and audit storage.
    pub store: Arc<dyn ContentStore>,
    /// Content-type accessors.
    pub registry: Arc<ContentRegistry>,
    /// Optional retrieval index.
    pub search: Option<Arc<dyn SearchIndex>>,
    /// Terminal-event sink.
    pub notifier: Arc<dyn Notifier>,
}

impl EngineContext {
    /// Context with the default registry, no search index, and log notifications.
    pub fn new(config: EditorialConfig, invoker: AgentInvoker, store: Arc<dyn ContentStore>) -> Self {
        Self {
            config: Arc::new(config),
            invoker,
            store,
            registry: Arc::new(ContentRegistry::with_defaults()),
            search: None,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Build the invoker from `config` and wrap everything in a context.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] when a provider cannot be built.
    pub fn from_config(config: EditorialConfig, store: Arc<dyn ContentStore>) -> Result<Self, OrchestratorError> {
        let invoker = AgentInvoker::from_config(&config)?;
        Ok(Self::new(config, invoker, store))
    }

    /// Attach a retrieval index.
    pub fn with_search(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(search);
        self
    }

    /// Replace the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the content registry.
    pub fn with_registry(mut self, registry: ContentRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Persist a content-policy flag on `id` after `operation` was refused.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::StoreWrite`] when the flag cannot be saved.
    pub async fn flag_for_review(
        &self,
        id: &ContentId,
        operation: &str,
        cause: &OrchestratorError,
    ) -> Result<(), OrchestratorError> {
        let mut item = self.store.get_content_item(id).await?;
        item.flag_for_review(operation, cause.to_string());
        item.updated_at = Utc::now();
        save_with_retry(self.store.as_ref(), &item, self.config.resilience.store_retry_attempts)
            .await
            .map_err(|(source, attempts)| OrchestratorError::StoreWrite {
                content_id: id.clone(),
                attempts,
                source,
            })?;
        warn!(content_id = %id, operation, "content flagged for human review");
        Ok(())
    }
}
