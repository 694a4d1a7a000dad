//! # Content data model
//!
//! ## Responsibility
//! Define the persisted record shapes: [`ContentItem`], [`Section`],
//! [`AuditRecord`], and the generation checkpoint stored on each item.
//! These shapes are the only compatibility-sensitive contract of the crate:
//! audit history must stay readable across repeated improvement runs.
//!
//! ## Guarantees
//! - Serializable: every record round-trips through serde JSON field-for-field
//! - Addressable: any improvable field can be read and written through
//!   [`ContentField`] without touching unrelated fields
//! - Deterministic: category ordering is fixed, so maps keyed by
//!   [`ReviewCategory`] iterate identically on every run
//!
//! ## NOT Responsible For
//! - Persistence (see: `store`)
//! - Per-type behaviour (see: [`registry`])

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Unique identifier of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(
    /// The raw identifier, usually a slug or UUID.
    pub String,
);

impl ContentId {
    /// Create a new [`ContentId`] from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reviewer category scored on a 0–10 scale.
///
/// Declaration order is the canonical aggregation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewCategory {
    /// Does the piece help an engineer actually do the thing?
    EngineeringUsefulness,
    /// Quality and credibility of worked examples and case studies.
    CaseStudyQuality,
    /// Coverage of the topic; no obvious gaps.
    Completeness,
    /// Search metadata, headings, keyword use.
    Seo,
    /// Operability at scale: governance, support, integration concerns.
    EnterpriseReadiness,
    /// Security and compliance guidance.
    SecurityCompliance,
    /// Readability and accessible structure.
    Accessibility,
    /// Performance guidance and cost awareness.
    Performance,
}

impl ReviewCategory {
    /// Every category in canonical order.
    pub const ALL: [ReviewCategory; 8] = [
        Self::EngineeringUsefulness,
        Self::CaseStudyQuality,
        Self::Completeness,
        Self::Seo,
        Self::EnterpriseReadiness,
        Self::SecurityCompliance,
        Self::Accessibility,
        Self::Performance,
    ];

    /// Stable kebab-case tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngineeringUsefulness => "engineering-usefulness",
            Self::CaseStudyQuality => "case-study-quality",
            Self::Completeness => "completeness",
            Self::Seo => "seo",
            Self::EnterpriseReadiness => "enterprise-readiness",
            Self::SecurityCompliance => "security-compliance",
            Self::Accessibility => "accessibility",
            Self::Performance => "performance",
        }
    }

    /// Human-readable label used in prompts and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EngineeringUsefulness => "engineering usefulness",
            Self::CaseStudyQuality => "case study quality",
            Self::Completeness => "completeness",
            Self::Seo => "SEO",
            Self::EnterpriseReadiness => "enterprise readiness",
            Self::SecurityCompliance => "security and compliance",
            Self::Accessibility => "accessibility",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for ReviewCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown review category '{s}'"))
    }
}

/// Publication status of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Work in progress; may be regenerated or revised.
    Draft,
    /// Live. Sections are frozen.
    Published,
    /// Retired by an administrative action.
    Archived,
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Published => write!(f, "published"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// Search-engine metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoFields {
    /// `<title>` override.
    pub meta_title: String,
    /// Meta description snippet.
    pub meta_description: String,
    /// Target keywords.
    pub keywords: Vec<String>,
}

/// Descriptive metadata attached to an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Short abstract shown in listings.
    pub summary: String,
    /// Search metadata.
    pub seo: SeoFields,
}

/// A bounded sub-unit of long-form content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Stable identifier, also used as the link anchor.
    pub id: String,
    /// Zero-based position in the item.
    pub order: usize,
    /// Section heading.
    pub title: String,
    /// Word count the generator aimed for.
    pub target_words: usize,
    /// Generated text.
    pub body: String,
    /// Keyword targets for this section.
    pub keywords: Vec<String>,
    /// Entities referenced by this section (used for cross-linking).
    pub related_entities: Vec<String>,
    /// Set when the item is published; frozen sections are never rewritten.
    #[serde(default)]
    pub frozen: bool,
}

impl Section {
    /// Number of whitespace-separated words in the body.
    pub fn word_count(&self) -> usize {
        word_count(&self.body)
    }
}

/// Pipeline stage of the generation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Produce (or regenerate) the draft.
    Generate,
    /// Run the independent reviewer agents concurrently.
    Review,
    /// Combine reviewer scores into the overall score.
    Aggregate,
    /// Compare the overall score against the configured thresholds.
    PublishGate,
    /// Rewrite the draft using aggregated reviewer feedback.
    Revise,
}

impl PipelineStage {
    /// Stable lowercase name used in spans, metrics, and failure markers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Review => "review",
            Self::Aggregate => "aggregate",
            Self::PublishGate => "publish_gate",
            Self::Revise => "revise",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stages are still executing (or the process died mid-run).
    Running,
    /// Passed the publish gate.
    Ready,
    /// Below the ready threshold but at or above the minor threshold.
    NeedsRevisionMinor,
    /// Below the minor threshold.
    NeedsRevisionMajor,
    /// A stage failed; the partial draft is persisted and resumable.
    Failed,
    /// A provider refused the content; a human must look at it.
    FlaggedForReview,
}

impl RunStatus {
    /// Returns `true` once the run reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns `true` for either needs-revision state.
    pub fn needs_revision(&self) -> bool {
        matches!(self, Self::NeedsRevisionMinor | Self::NeedsRevisionMajor)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Ready => "ready",
            Self::NeedsRevisionMinor => "needs_revision_minor",
            Self::NeedsRevisionMajor => "needs_revision_major",
            Self::Failed => "failed",
            Self::FlaggedForReview => "flagged_for_review",
        };
        f.write_str(s)
    }
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMarker {
    /// Stage that failed.
    pub stage: PipelineStage,
    /// Error-kind label (`transient`, `fatal`, `timeout`, ...).
    pub error_kind: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Human-readable description.
    pub message: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// Set when a provider refused to process an item; a human must clear it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFlag {
    /// Operation that hit the rejection (`generate`, `audit`, `improve`).
    pub operation: String,
    /// Provider message.
    pub reason: String,
    /// When the flag was raised.
    pub flagged_at: DateTime<Utc>,
}

/// One reviewer's contribution during a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    /// Category reviewed.
    pub category: ReviewCategory,
    /// Score, or `None` when the reviewer was unavailable.
    pub score: Option<f64>,
    /// Reviewer rationale.
    pub rationale: String,
    /// Problems the reviewer raised.
    pub issues: Vec<String>,
    /// Concrete suggestions.
    pub recommendations: Vec<String>,
}

/// Checkpoint of a generation run, persisted on the item after every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationState {
    /// Identifier of the run that produced this checkpoint.
    pub run_id: String,
    /// Requested topic.
    pub topic: String,
    /// Requested length.
    pub target_words: usize,
    /// Last stage that completed successfully.
    pub last_completed: Option<PipelineStage>,
    /// Revision round (0 for the initial draft).
    pub round: u32,
    /// Reviewer feedback carried into the next revise stage.
    pub feedback: Vec<String>,
    /// Reviewer results of the latest review stage.
    pub reviews: Vec<ReviewSnapshot>,
    /// Overall score from the latest aggregate stage.
    pub overall_score: Option<f64>,
    /// Current run status.
    pub status: RunStatus,
    /// Set when the run stopped on an error.
    pub failure: Option<FailureMarker>,
}

impl GenerationState {
    /// Fresh checkpoint for a new run.
    pub fn new(topic: impl Into<String>, target_words: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            target_words,
            last_completed: None,
            round: 0,
            feedback: Vec::new(),
            reviews: Vec::new(),
            overall_score: None,
            status: RunStatus::Running,
            failure: None,
        }
    }
}

/// A generated piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Unique identifier.
    pub id: ContentId,
    /// Headline.
    pub title: String,
    /// Content-type tag (`guide`, `tutorial`, `case-study`, ...).
    pub category: String,
    /// Short-form body. Empty for long-form items, which use `sections`.
    pub body: String,
    /// Ordered sections; empty for short-form items.
    pub sections: Vec<Section>,
    /// Tags and search metadata.
    pub metadata: ContentMetadata,
    /// Publication status.
    pub status: ContentStatus,
    /// Incremented on every scoped update.
    pub current_revision: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Generation checkpoint; `None` for imported items.
    #[serde(default)]
    pub generation: Option<GenerationState>,
    /// Content-policy flag awaiting human review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_flag: Option<ReviewFlag>,
}

impl ContentItem {
    /// Create an empty draft.
    pub fn new_draft(id: ContentId, title: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            category: category.into(),
            body: String::new(),
            sections: Vec::new(),
            metadata: ContentMetadata::default(),
            status: ContentStatus::Draft,
            current_revision: 0,
            created_at: now,
            updated_at: now,
            generation: None,
            review_flag: None,
        }
    }

    /// Flag the item for human review after a content-policy rejection.
    pub fn flag_for_review(&mut self, operation: &str, reason: impl Into<String>) {
        self.review_flag = Some(ReviewFlag {
            operation: operation.to_string(),
            reason: reason.into(),
            flagged_at: Utc::now(),
        });
    }

    /// Returns `true` while a content-policy flag is outstanding.
    pub fn is_flagged(&self) -> bool {
        self.review_flag.is_some()
    }

    /// Returns `true` when the item is stored as ordered sections.
    pub fn is_long_form(&self) -> bool {
        !self.sections.is_empty()
    }

    /// The body text: the short-form body, or every section joined with headings.
    pub fn full_text(&self) -> String {
        if self.sections.is_empty() {
            return self.body.clone();
        }
        let mut sorted: Vec<&Section> = self.sections.iter().collect();
        sorted.sort_by_key(|s| s.order);
        sorted
            .iter()
            .map(|s| format!("## {}\n\n{}", s.title, s.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Word count of [`Self::full_text`].
    pub fn word_count(&self) -> usize {
        if self.sections.is_empty() {
            word_count(&self.body)
        } else {
            self.sections.iter().map(Section::word_count).sum()
        }
    }

    /// Read the current value of a field.
    ///
    /// Returns `None` when the field addresses a section that does not exist.
    pub fn field_value(&self, field: &ContentField) -> Option<FieldValue> {
        match field {
            ContentField::Title => Some(FieldValue::Text(self.title.clone())),
            ContentField::Summary => Some(FieldValue::Text(self.metadata.summary.clone())),
            ContentField::Body => Some(FieldValue::Text(self.body.clone())),
            ContentField::Tags => Some(FieldValue::List(self.metadata.tags.clone())),
            ContentField::SeoTitle => Some(FieldValue::Text(self.metadata.seo.meta_title.clone())),
            ContentField::SeoDescription => Some(FieldValue::Text(
                self.metadata.seo.meta_description.clone(),
            )),
            ContentField::SeoKeywords => Some(FieldValue::List(self.metadata.seo.keywords.clone())),
            ContentField::Section(id) => self
                .sections
                .iter()
                .find(|s| &s.id == id)
                .map(|s| FieldValue::Text(s.body.clone())),
        }
    }

    /// Overwrite one field, leaving every other field untouched.
    ///
    /// Returns `false` when the field cannot be written (unknown or frozen
    /// section, or a value of the wrong shape).
    pub fn set_field(&mut self, field: &ContentField, value: FieldValue) -> bool {
        match (field, value) {
            (ContentField::Title, FieldValue::Text(v)) => self.title = v,
            (ContentField::Summary, FieldValue::Text(v)) => self.metadata.summary = v,
            (ContentField::Body, FieldValue::Text(v)) => self.body = v,
            (ContentField::Tags, FieldValue::List(v)) => self.metadata.tags = v,
            (ContentField::SeoTitle, FieldValue::Text(v)) => self.metadata.seo.meta_title = v,
            (ContentField::SeoDescription, FieldValue::Text(v)) => {
                self.metadata.seo.meta_description = v
            }
            (ContentField::SeoKeywords, FieldValue::List(v)) => self.metadata.seo.keywords = v,
            (ContentField::Section(id), FieldValue::Text(v)) => {
                match self.sections.iter_mut().find(|s| &s.id == id) {
                    Some(section) if !section.frozen => section.body = v,
                    _ => return false,
                }
            }
            _ => return false,
        }
        true
    }
}

/// Address of a single improvable field on a [`ContentItem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "section_id")]
pub enum ContentField {
    /// Headline.
    Title,
    /// Listing abstract.
    Summary,
    /// Short-form body.
    Body,
    /// Tags.
    Tags,
    /// SEO title.
    SeoTitle,
    /// SEO description.
    SeoDescription,
    /// SEO keywords.
    SeoKeywords,
    /// Body of the section with the given id.
    Section(String),
}

impl ContentField {
    /// Returns `true` when the field holds a list rather than free text.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::Tags | Self::SeoKeywords)
    }
}

impl fmt::Display for ContentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title => write!(f, "title"),
            Self::Summary => write!(f, "summary"),
            Self::Body => write!(f, "body"),
            Self::Tags => write!(f, "tags"),
            Self::SeoTitle => write!(f, "seo.meta_title"),
            Self::SeoDescription => write!(f, "seo.meta_description"),
            Self::SeoKeywords => write!(f, "seo.keywords"),
            Self::Section(id) => write!(f, "sections[{id}]"),
        }
    }
}

/// Value of a [`ContentField`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Free text.
    Text(String),
    /// List of short strings.
    List(Vec<String>),
}

impl FieldValue {
    /// Returns `true` for empty text or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(t) => t.trim().is_empty(),
            Self::List(l) => l.is_empty(),
        }
    }

    /// Render the value for inclusion in a prompt.
    pub fn render(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::List(l) => l.join(", "),
        }
    }
}

/// Immutable, versioned scoring snapshot of a content item.
///
/// `audit_version` strictly increases per `content_id`; stores reject any
/// append that does not continue the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Audited item.
    pub content_id: ContentId,
    /// Monotonic per-item version, starting at 1.
    pub audit_version: u32,
    /// When the panel finished.
    pub audited_at: DateTime<Utc>,
    /// Panel mode (`full` or `quick`).
    pub mode: String,
    /// Item revision the audit scored.
    pub content_revision: u32,
    /// Weighted overall score, 0–10.
    pub overall_score: f64,
    /// Per-category scores, 0–10.
    pub category_scores: BTreeMap<ReviewCategory, f64>,
    /// Per-agent rationale text keyed by role tag.
    pub rationales: BTreeMap<String, String>,
    /// Problems raised by the panel.
    pub issues: Vec<String>,
    /// Elements the panel found missing.
    pub missing_elements: Vec<String>,
    /// Suggested improvements.
    pub recommendations: Vec<String>,
    /// Categories whose agent was unavailable (quick mode only).
    #[serde(default)]
    pub unavailable: Vec<ReviewCategory>,
    /// Overall score below threshold or any category below its floor.
    pub needs_fix: bool,
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> ContentItem {
        let mut item = ContentItem::new_draft(ContentId::new("c-1"), "Queues", "guide");
        item.body = "one two three".into();
        item.metadata.tags = vec!["queues".into()];
        item
    }

    #[test]
    fn test_review_category_round_trips_through_str() {
        for cat in ReviewCategory::ALL {
            let parsed: ReviewCategory = cat.as_str().parse().expect("test: parse");
            assert_eq!(parsed, cat);
        }
    }

    #[test]
    fn test_review_category_parses_loose_spellings() {
        let parsed: ReviewCategory = "Security_Compliance".parse().expect("test: parse");
        assert_eq!(parsed, ReviewCategory::SecurityCompliance);
        assert!("nonsense".parse::<ReviewCategory>().is_err());
    }

    #[test]
    fn test_review_category_serializes_kebab_case() {
        let json = serde_json::to_string(&ReviewCategory::CaseStudyQuality).expect("test: ser");
        assert_eq!(json, "\"case-study-quality\"");
    }

    #[test]
    fn test_set_field_leaves_other_fields_untouched() {
        let mut item = sample_item();
        let before = item.clone();
        assert!(item.set_field(
            &ContentField::SeoDescription,
            FieldValue::Text("A guide to queues".into())
        ));
        assert_eq!(item.metadata.seo.meta_description, "A guide to queues");
        assert_eq!(item.body, before.body);
        assert_eq!(item.title, before.title);
        assert_eq!(item.metadata.tags, before.metadata.tags);
    }

    #[test]
    fn test_set_field_rejects_mismatched_shape() {
        let mut item = sample_item();
        assert!(!item.set_field(&ContentField::Tags, FieldValue::Text("x".into())));
    }

    #[test]
    fn test_set_field_refuses_frozen_section() {
        let mut item = sample_item();
        item.sections.push(Section {
            id: "s1".into(),
            order: 0,
            title: "Intro".into(),
            target_words: 100,
            body: "old".into(),
            keywords: vec![],
            related_entities: vec![],
            frozen: true,
        });
        assert!(!item.set_field(
            &ContentField::Section("s1".into()),
            FieldValue::Text("new".into())
        ));
        assert_eq!(item.sections[0].body, "old");
    }

    #[test]
    fn test_full_text_orders_sections() {
        let mut item = sample_item();
        for (order, title) in [(1, "Second"), (0, "First")] {
            item.sections.push(Section {
                id: format!("s{order}"),
                order,
                title: title.into(),
                target_words: 10,
                body: format!("{title} body"),
                keywords: vec![],
                related_entities: vec![],
                frozen: false,
            });
        }
        let text = item.full_text();
        let first = text.find("First").expect("test: first present");
        let second = text.find("Second").expect("test: second present");
        assert!(first < second);
        assert_eq!(item.word_count(), 4);
    }

    #[test]
    fn test_content_item_json_round_trip_is_field_for_field_equal() {
        let mut item = sample_item();
        item.generation = Some(GenerationState::new("queues", 1200));
        let json = serde_json::to_string(&item).expect("test: ser");
        let back: ContentItem = serde_json::from_str(&json).expect("test: de");
        assert_eq!(item, back);
    }

    #[test]
    fn test_content_field_serialization_is_tagged() {
        let json = serde_json::to_string(&ContentField::Section("s-2".into())).expect("test: ser");
        assert!(json.contains("section"));
        assert!(json.contains("s-2"));
        let back: ContentField = serde_json::from_str(&json).expect("test: de");
        assert_eq!(back, ContentField::Section("s-2".into()));
    }
}
