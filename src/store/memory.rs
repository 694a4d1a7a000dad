//! In-memory [`ContentStore`].
//!
//! Items live in a [`DashMap`]; each item's audit history sits behind its own
//! async mutex so the version check and the append happen atomically.

use super::{ContentFilter, ContentStore, StoreError};
use crate::content::{AuditRecord, ContentId, ContentItem};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Process-local store, used by tests and by the CLI's `--memory` mode.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    items: Arc<DashMap<ContentId, ContentItem>>,
    audits: Arc<DashMap<ContentId, Arc<Mutex<Vec<AuditRecord>>>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no items are stored.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn history(&self, id: &ContentId) -> Arc<Mutex<Vec<AuditRecord>>> {
        self.audits
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn get_content_item(&self, id: &ContentId) -> Result<ContentItem, StoreError> {
        self.items
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn save_content_item(&self, item: &ContentItem) -> Result<(), StoreError> {
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn append_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let history = self.history(&record.content_id);
        let mut guard = history.lock().await;
        let expected = guard.last().map_or(1, |r| r.audit_version + 1);
        if record.audit_version != expected {
            return Err(StoreError::VersionConflict {
                content_id: record.content_id.clone(),
                expected,
                attempted: record.audit_version,
            });
        }
        guard.push(record.clone());
        Ok(())
    }

    async fn get_latest_audit_record(
        &self,
        content_id: &ContentId,
    ) -> Result<Option<AuditRecord>, StoreError> {
        let history = self.history(content_id);
        let guard = history.lock().await;
        Ok(guard.last().cloned())
    }

    async fn list_audit_records(
        &self,
        content_id: &ContentId,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let history = self.history(content_id);
        let guard = history.lock().await;
        Ok(guard.clone())
    }

    async fn list_content_items(
        &self,
        filter: &ContentFilter,
    ) -> Result<Vec<ContentItem>, StoreError> {
        let mut items: Vec<ContentItem> = self
            .items
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}
