//! Content-type registry.
//!
//! Maps a category tag (`guide`, `case-study`, ...) to a [`ContentAccessor`]
//! so that engines never switch over content types themselves. New content
//! types are added by registering another accessor.

use super::{ContentField, ContentItem, ReviewCategory};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-type behaviour shared by the orchestrator, audit, and improvement engines.
pub trait ContentAccessor: Send + Sync {
    /// Category tag this accessor serves.
    fn type_tag(&self) -> &str;

    /// Word count used when a request does not specify one.
    fn default_target_words(&self) -> usize;

    /// One-paragraph brief handed to the generator for this type.
    fn generation_brief(&self) -> &str;

    /// Text shown to reviewers.
    fn review_text(&self, item: &ContentItem) -> String {
        let mut out = format!("# {}\n\n", item.title);
        if !item.metadata.summary.is_empty() {
            out.push_str(&format!("Summary: {}\n\n", item.metadata.summary));
        }
        out.push_str(&item.full_text());
        out.push_str(&format!(
            "\n\n---\nTags: {}\nSEO title: {}\nSEO description: {}\nSEO keywords: {}\n",
            item.metadata.tags.join(", "),
            item.metadata.seo.meta_title,
            item.metadata.seo.meta_description,
            item.metadata.seo.keywords.join(", ")
        ));
        out
    }

    /// Fields to regenerate when `category` scores low.
    fn fields_for_category(&self, category: ReviewCategory, item: &ContentItem) -> Vec<ContentField> {
        match category {
            ReviewCategory::Seo => vec![
                ContentField::SeoTitle,
                ContentField::SeoDescription,
                ContentField::SeoKeywords,
            ],
            ReviewCategory::Accessibility => vec![ContentField::Summary],
            _ => body_fields(item),
        }
    }

    /// Fields to regenerate for a reviewer-reported missing element.
    fn fields_for_missing(&self, element: &str, item: &ContentItem) -> Vec<ContentField> {
        let lower = element.to_lowercase();
        if lower.contains("meta description") || lower.contains("seo description") {
            vec![ContentField::SeoDescription]
        } else if lower.contains("meta title") || lower.contains("seo title") {
            vec![ContentField::SeoTitle]
        } else if lower.contains("keyword") {
            vec![ContentField::SeoKeywords]
        } else if lower.contains("tag") {
            vec![ContentField::Tags]
        } else if lower.contains("summary") || lower.contains("tl;dr") || lower.contains("abstract")
        {
            vec![ContentField::Summary]
        } else if lower.contains("title") || lower.contains("headline") {
            vec![ContentField::Title]
        } else {
            section_for_element(&lower, item)
                .map(|f| vec![f])
                .unwrap_or_else(|| body_fields(item))
        }
    }
}

/// The body field(s) of an item: `Body` for short-form, the unfrozen
/// sections otherwise.
pub fn body_fields(item: &ContentItem) -> Vec<ContentField> {
    if item.sections.is_empty() {
        return vec![ContentField::Body];
    }
    let mut sections: Vec<_> = item.sections.iter().filter(|s| !s.frozen).collect();
    sections.sort_by_key(|s| s.order);
    sections
        .into_iter()
        .map(|s| ContentField::Section(s.id.clone()))
        .collect()
}

/// Section whose title or keywords mention a word of `element`, if any.
fn section_for_element(element: &str, item: &ContentItem) -> Option<ContentField> {
    let words: Vec<&str> = element.split_whitespace().filter(|w| w.len() > 3).collect();
    item.sections
        .iter()
        .filter(|s| !s.frozen)
        .find(|s| {
            let haystack = format!("{} {}", s.title, s.keywords.join(" ")).to_lowercase();
            words.iter().any(|w| haystack.contains(w))
        })
        .map(|s| ContentField::Section(s.id.clone()))
}

/// Accessor for article-shaped content (guides, tutorials, references).
#[derive(Debug, Clone)]
pub struct ArticleAccessor {
    tag: String,
    default_words: usize,
    brief: String,
}

impl ArticleAccessor {
    /// Create an accessor for `tag`.
    pub fn new(tag: impl Into<String>, default_words: usize, brief: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            default_words,
            brief: brief.into(),
        }
    }
}

impl ContentAccessor for ArticleAccessor {
    fn type_tag(&self) -> &str {
        &self.tag
    }

    fn default_target_words(&self) -> usize {
        self.default_words
    }

    fn generation_brief(&self) -> &str {
        &self.brief
    }
}

/// Accessor for case studies: weak case-study scores target the body only,
/// and engineering feedback also refreshes the summary.
#[derive(Debug, Clone, Default)]
pub struct CaseStudyAccessor;

impl ContentAccessor for CaseStudyAccessor {
    fn type_tag(&self) -> &str {
        "case-study"
    }

    fn default_target_words(&self) -> usize {
        1800
    }

    fn generation_brief(&self) -> &str {
        "A customer case study: context, the problem in numbers, the approach, \
         measurable results, and lessons other teams can reuse."
    }

    fn fields_for_category(&self, category: ReviewCategory, item: &ContentItem) -> Vec<ContentField> {
        match category {
            ReviewCategory::Seo => vec![ContentField::SeoTitle, ContentField::SeoDescription],
            ReviewCategory::EngineeringUsefulness => {
                let mut fields = body_fields(item);
                fields.push(ContentField::Summary);
                fields
            }
            _ => body_fields(item),
        }
    }
}

/// Lookup table from category tag to accessor.
#[derive(Clone)]
pub struct ContentRegistry {
    accessors: HashMap<String, Arc<dyn ContentAccessor>>,
    fallback: Arc<dyn ContentAccessor>,
}

impl ContentRegistry {
    /// Empty registry that resolves every tag to `fallback`.
    pub fn new(fallback: Arc<dyn ContentAccessor>) -> Self {
        Self {
            accessors: HashMap::new(),
            fallback,
        }
    }

    /// Registry with the built-in content types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(Arc::new(ArticleAccessor::new(
            "article",
            1200,
            "A practical technical article.",
        )));
        registry.register(Arc::new(ArticleAccessor::new(
            "guide",
            1200,
            "A practical engineering guide: problem framing, step-by-step approach, \
             code or configuration examples, pitfalls, and a checklist.",
        )));
        registry.register(Arc::new(ArticleAccessor::new(
            "tutorial",
            1500,
            "A hands-on tutorial with prerequisites, numbered steps, runnable examples, \
             and a verification step at the end.",
        )));
        registry.register(Arc::new(ArticleAccessor::new(
            "reference",
            2500,
            "A reference page: precise definitions, parameters, defaults, and limits.",
        )));
        registry.register(Arc::new(CaseStudyAccessor));
        registry
    }

    /// Register (or replace) the accessor for its tag.
    pub fn register(&mut self, accessor: Arc<dyn ContentAccessor>) {
        self.accessors
            .insert(accessor.type_tag().to_ascii_lowercase(), accessor);
    }

    /// Accessor for `tag`, or the fallback for unknown tags.
    pub fn resolve(&self, tag: &str) -> Arc<dyn ContentAccessor> {
        self.accessors
            .get(&tag.trim().to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Returns `true` if `tag` has a dedicated accessor.
    pub fn is_registered(&self, tag: &str) -> bool {
        self.accessors.contains_key(&tag.trim().to_ascii_lowercase())
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
