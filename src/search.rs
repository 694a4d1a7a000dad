//! Read-only retrieval index.
//!
//! The generator asks the index for reference snippets before drafting.
//! Retrieval is optional context: [`search_or_empty`] turns every index
//! failure into an empty result with a warning.

use crate::content::{ContentId, ContentItem};
use crate::store::{ContentFilter, ContentStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

/// Search failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// The index could not be reached.
    #[error("search index unavailable: {0}")]
    Unavailable(String),
    /// The query was rejected.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// One ranked snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Source document id.
    pub id: String,
    /// Source title.
    pub title: String,
    /// Excerpt handed to the generator.
    pub snippet: String,
    /// Relevance; higher is better.
    pub score: f64,
}

/// Optional narrowing of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    /// Only documents of this category.
    pub category: Option<String>,
    /// Never return this document (the item being generated).
    pub exclude: Option<ContentId>,
}

/// Keyword (and optionally vector) retrieval.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Up to `top_k` hits for `query`, best first.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Query `index`, degrading any failure to "no extra context".
pub async fn search_or_empty(
    index: &dyn SearchIndex,
    query: &str,
    filters: &SearchFilters,
    top_k: usize,
) -> Vec<SearchHit> {
    if top_k == 0 {
        return Vec::new();
    }
    match index.search(query, filters, top_k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(error = %e, "search failed, continuing without retrieval context");
            Vec::new()
        }
    }
}

#[derive(Debug, Clone)]
struct Document {
    title: String,
    category: String,
    text: String,
}

const SNIPPET_WORDS: usize = 60;

/// In-memory term-overlap index.
///
/// Title matches count double. Ties break on document id so results are
/// deterministic.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    docs: DashMap<String, Document>,
}

impl KeywordIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document.
    pub fn add(
        &self,
        id: impl Into<String>,
        title: impl Into<String>,
        category: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.docs.insert(
            id.into(),
            Document {
                title: title.into(),
                category: category.into(),
                text: text.into(),
            },
        );
    }

    /// Index one content item.
    pub fn add_item(&self, item: &ContentItem) {
        self.add(
            item.id.as_str(),
            item.title.clone(),
            item.category.clone(),
            item.full_text(),
        );
    }

    /// Index every item in `store` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the store error if listing fails.
    pub async fn from_store(store: &dyn ContentStore, filter: &ContentFilter) -> Result<Self, StoreError> {
        let index = Self::new();
        for item in store.list_content_items(filter).await? {
            index.add_item(&item);
        }
        Ok(index)
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns `true` if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn snippet(text: &str) -> String {
    text.split_whitespace()
        .take(SNIPPET_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SearchIndex for KeywordIndex {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Err(SearchError::InvalidQuery("no searchable terms".into()));
        }

        let mut hits: Vec<SearchHit> = self
            .docs
            .iter()
            .filter(|entry| {
                filters.exclude.as_ref().map_or(true, |x| x.as_str() != entry.key())
                    && filters
                        .category
                        .as_ref()
                        .map_or(true, |c| c.eq_ignore_ascii_case(&entry.value().category))
            })
            .filter_map(|entry| {
                let doc = entry.value();
                let title_terms = terms(&doc.title);
                let body_terms = terms(&doc.text);
                let score = query_terms
                    .iter()
                    .map(|t| {
                        let mut s = 0.0;
                        if title_terms.contains(t) {
                            s += 2.0;
                        }
                        if body_terms.contains(t) {
                            s += 1.0;
                        }
                        s
                    })
                    .sum::<f64>()
                    / query_terms.len() as f64;
                (score > 0.0).then(|| SearchHit {
                    id: entry.key().clone(),
                    title: doc.title.clone(),
                    snippet: snippet(&doc.text),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }
}
