//! # Content store
//!
//! ## Responsibility
//! Define the [`ContentStore`] contract the engines persist through, plus
//! two implementations: [`memory::InMemoryStore`] and [`file::FileStore`].
//!
//! ## Guarantees
//! - Audit records are append-only: a record is accepted only when its
//!   `audit_version` is exactly one past the current maximum for the item,
//!   checked and written under a per-item lock
//! - Audit appends are all-or-nothing
//! - Item writes are whole-document replacements (last writer wins)
//!
//! ## NOT Responsible For
//! - Deciding which fields change (see: `improve`)
//! - Computing audit versions (see: `audit`)

pub mod file;
pub mod memory;

use crate::content::{AuditRecord, ContentId, ContentItem, ContentStatus};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Errors raised by a [`ContentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No item with this id.
    #[error("content item not found: {0}")]
    NotFound(ContentId),

    /// The appended record does not continue the version sequence.
    #[error("audit version conflict for {content_id}: expected {expected}, got {attempted}")]
    VersionConflict {
        /// Item whose history was appended to.
        content_id: ContentId,
        /// Next free version according to the store.
        expected: u32,
        /// Version carried by the rejected record.
        attempted: u32,
    },

    /// The id cannot be used as a storage key.
    #[error("invalid content id '{0}'")]
    InvalidId(String),

    /// Filesystem failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns `true` for failures worth retrying (I/O and availability).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

/// Status/category filter for [`ContentStore::list_content_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFilter {
    /// Only items with this status.
    pub status: Option<ContentStatus>,
    /// Only items with this category tag.
    pub category: Option<String>,
}

impl ContentFilter {
    /// Returns `true` if `item` passes the filter.
    pub fn matches(&self, item: &ContentItem) -> bool {
        self.status.map_or(true, |s| item.status == s)
            && self
                .category
                .as_deref()
                .map_or(true, |c| item.category.eq_ignore_ascii_case(c))
    }
}

/// Document-oriented persistence for items and their audit history.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch one item by id.
    async fn get_content_item(&self, id: &ContentId) -> Result<ContentItem, StoreError>;

    /// Insert or replace an item.
    async fn save_content_item(&self, item: &ContentItem) -> Result<(), StoreError>;

    /// Append an audit record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] unless
    /// `record.audit_version == max_version(record.content_id) + 1`.
    async fn append_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Most recent audit record for an item, if any.
    async fn get_latest_audit_record(
        &self,
        content_id: &ContentId,
    ) -> Result<Option<AuditRecord>, StoreError>;

    /// Every audit record for an item in version order.
    async fn list_audit_records(&self, content_id: &ContentId)
        -> Result<Vec<AuditRecord>, StoreError>;

    /// Items matching a simple status/category filter, ordered by id.
    async fn list_content_items(&self, filter: &ContentFilter)
        -> Result<Vec<ContentItem>, StoreError>;
}

/// Save an item, retrying transient store failures with linear backoff.
///
/// Returns the number of attempts made alongside the final error so callers
/// can report it.
pub async fn save_with_retry(
    store: &dyn ContentStore,
    item: &ContentItem,
    attempts: u32,
) -> Result<(), (StoreError, u32)> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.save_content_item(item).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    content_id = %item.id,
                    attempt,
                    max = attempts,
                    error = %e,
                    "store write failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            Err(e) => {
                tracing::error!(content_id = %item.id, attempts = attempt, error = %e, "store write failed");
                return Err((e, attempt));
            }
        }
    }
}
