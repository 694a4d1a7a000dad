//! # Declarative engine configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that configures providers, role routing,
//! resilience, scoring policy, audit panels, and generation behaviour.
//! ```text
//! editorial-orchestrator --config editorial.toml audit guide-42
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `EditorialConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Complete defaults: an empty file yields a runnable offline configuration
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building providers or engines from config (see: `context`)
//! - Reading API keys (provider configs name the env var; `provider::http` reads it)

pub mod loader;
pub mod validation;

use crate::content::ReviewCategory;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.4
}

fn default_provider_timeout_ms() -> u64 {
    60_000
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_context_window_tokens() -> usize {
    128_000
}

fn default_provider_id() -> String {
    "simulated".to_string()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration.
///
/// # Example
///
/// ```toml
/// [providers.claude]
/// kind = "anthropic"
/// model = "claude-3-5-sonnet-latest"
/// api_key_env = "ANTHROPIC_API_KEY"
///
/// [roles]
/// default_provider = "claude"
///
/// [scoring]
/// ready_threshold = 8.0
/// minor_threshold = 7.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EditorialConfig {
    /// Provider definitions keyed by provider id.
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Which provider serves which agent role.
    pub roles: RoleRouting,
    /// Retries, timeouts, and store write attempts.
    pub resilience: ResilienceConfig,
    /// Weights and thresholds for aggregation and the publish gate.
    pub scoring: ScoringConfig,
    /// Audit panel settings.
    pub audit: AuditConfig,
    /// Generation pipeline settings.
    pub generation: GenerationConfig,
    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Default for EditorialConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(default_provider_id(), ProviderConfig::simulated());
        Self {
            providers,
            roles: RoleRouting::default(),
            resilience: ResilienceConfig::default(),
            scoring: ScoringConfig::default(),
            audit: AuditConfig::default(),
            generation: GenerationConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// Supported provider backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions API.
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Deterministic offline provider; needs no credentials.
    Simulated,
}

/// One provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProviderConfig {
    /// Backend type.
    pub kind: ProviderKind,
    /// Model identifier sent with every request.
    pub model: String,
    /// Override of the API base URL (proxies, tests).
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Default completion budget per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Default sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call timeout enforced by the harness.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    /// Calls per minute shared by every caller of this provider.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// USD per 1K prompt tokens.
    #[serde(default)]
    pub cost_per_1k_input: f64,
    /// USD per 1K completion tokens.
    #[serde(default)]
    pub cost_per_1k_output: f64,
    /// Total context window of the model.
    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: usize,
}

impl ProviderConfig {
    /// Offline provider used when nothing else is configured.
    pub fn simulated() -> Self {
        Self {
            kind: ProviderKind::Simulated,
            model: "simulated-1".to_string(),
            base_url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_ms: 5_000,
            requests_per_minute: 6_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
            context_window_tokens: 32_000,
        }
    }

    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Role → provider routing.
///
/// Lookup order: exact role tag (`reviewer:seo`), role family (`reviewer`),
/// then `default_provider`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RoleRouting {
    /// Provider used by roles without an override.
    pub default_provider: String,
    /// Overrides keyed by role tag or role family.
    pub overrides: BTreeMap<String, String>,
}

impl Default for RoleRouting {
    fn default() -> Self {
        Self {
            default_provider: default_provider_id(),
            overrides: BTreeMap::new(),
        }
    }
}

impl RoleRouting {
    /// Provider id serving `role_tag`.
    pub fn provider_for(&self, role_tag: &str) -> &str {
        if let Some(p) = self.overrides.get(role_tag) {
            return p;
        }
        let family = role_tag.split(':').next().unwrap_or(role_tag);
        self.overrides
            .get(family)
            .map(String::as_str)
            .unwrap_or(&self.default_provider)
    }
}

// ── Resilience ───────────────────────────────────────────────────────────

/// Retry, timeout, and store-write settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Maximum provider attempts per call (first try included).
    pub retry_attempts: u32,
    /// Base delay (ms) for exponential backoff. Must be ≤ `retry_max_ms`.
    pub retry_base_ms: u64,
    /// Maximum delay (ms) cap for exponential backoff.
    pub retry_max_ms: u64,
    /// Deadline for one agent invocation including retries.
    pub agent_timeout_ms: u64,
    /// Deadline for a whole generation or audit run.
    pub run_timeout_s: u64,
    /// Attempts for each store write.
    pub store_retry_attempts: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_base_ms: 500,
            retry_max_ms: 8_000,
            agent_timeout_ms: 120_000,
            run_timeout_s: 1_800,
            store_retry_attempts: 3,
        }
    }
}

impl ResilienceConfig {
    /// Agent deadline as a [`Duration`].
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    /// Run deadline as a [`Duration`].
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_s)
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────

/// Category weights. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of engineering usefulness.
    pub engineering_usefulness: f64,
    /// Weight of case study quality.
    pub case_study_quality: f64,
    /// Weight of completeness.
    pub completeness: f64,
    /// Weight of SEO.
    pub seo: f64,
    /// Weight of enterprise readiness.
    pub enterprise_readiness: f64,
    /// Weight of security and compliance.
    pub security_compliance: f64,
    /// Weight of accessibility.
    pub accessibility: f64,
    /// Weight of performance.
    pub performance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            engineering_usefulness: 0.25,
            case_study_quality: 0.15,
            completeness: 0.15,
            seo: 0.10,
            enterprise_readiness: 0.15,
            security_compliance: 0.10,
            accessibility: 0.05,
            performance: 0.05,
        }
    }
}

impl ScoreWeights {
    /// Weight of one category.
    pub fn weight(&self, category: ReviewCategory) -> f64 {
        match category {
            ReviewCategory::EngineeringUsefulness => self.engineering_usefulness,
            ReviewCategory::CaseStudyQuality => self.case_study_quality,
            ReviewCategory::Completeness => self.completeness,
            ReviewCategory::Seo => self.seo,
            ReviewCategory::EnterpriseReadiness => self.enterprise_readiness,
            ReviewCategory::SecurityCompliance => self.security_compliance,
            ReviewCategory::Accessibility => self.accessibility,
            ReviewCategory::Performance => self.performance,
        }
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        ReviewCategory::ALL.iter().map(|c| self.weight(*c)).sum()
    }
}

/// Scoring policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Category weights.
    pub weights: ScoreWeights,
    /// Overall score at or above which content is Ready.
    pub ready_threshold: f64,
    /// Overall score at or above which a revision is minor.
    pub minor_threshold: f64,
    /// Audits below this overall score set `needs_fix`.
    pub needs_fix_threshold: f64,
    /// Floor applied to every category without an explicit floor.
    pub default_category_floor: f64,
    /// Per-category floors keyed by category tag (`seo`, `accessibility`, ...).
    pub category_floors: BTreeMap<String, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            ready_threshold: 8.0,
            minor_threshold: 7.0,
            needs_fix_threshold: 8.0,
            default_category_floor: 6.0,
            category_floors: BTreeMap::new(),
        }
    }
}

// ── Audit ────────────────────────────────────────────────────────────────

/// Audit engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Reduced panel used by quick audits.
    pub quick_panel: Vec<ReviewCategory>,
    /// Re-reads of the version counter allowed after a concurrent append.
    pub max_version_retries: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            quick_panel: vec![
                ReviewCategory::EngineeringUsefulness,
                ReviewCategory::Completeness,
                ReviewCategory::Seo,
                ReviewCategory::SecurityCompliance,
            ],
            max_version_retries: 8,
        }
    }
}

// ── Generation ───────────────────────────────────────────────────────────

/// What the orchestrator does when a reviewer fails during generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewFailurePolicy {
    /// Mark the reviewer unavailable and aggregate the rest.
    Degrade,
    /// Fail the run.
    Abort,
}

/// Generation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Reviewers run concurrently after each draft.
    pub review_panel: Vec<ReviewCategory>,
    /// Reaction to a failed reviewer.
    pub review_failure: ReviewFailurePolicy,
    /// Revise → review cycles allowed after the first gate.
    pub max_revision_rounds: u32,
    /// Targets above this length use the section-chunked generator.
    pub single_pass_max_words: usize,
    /// Upper bound for one section when the section count is derived.
    pub max_section_words: usize,
    /// Previous sections given to each section writer as context.
    pub trailing_window: usize,
    /// Words of each trailing section included in that context.
    pub trailing_excerpt_words: usize,
    /// Words per token used to size completion budgets.
    pub words_per_token: f64,
    /// Run the coherence pass after sectioned generation.
    pub coherence_pass: bool,
    /// Run the cross-reference link pass after sectioned generation.
    pub link_injection: bool,
    /// Retrieval snippets requested for the generate stage (0 disables search).
    pub search_top_k: usize,
    /// Publish (and freeze sections of) items that pass the gate.
    pub auto_publish: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            review_panel: vec![
                ReviewCategory::EngineeringUsefulness,
                ReviewCategory::Completeness,
                ReviewCategory::Seo,
                ReviewCategory::Accessibility,
            ],
            review_failure: ReviewFailurePolicy::Degrade,
            max_revision_rounds: 1,
            single_pass_max_words: 3_000,
            max_section_words: 1_500,
            trailing_window: 2,
            trailing_excerpt_words: 150,
            words_per_token: 0.75,
            coherence_pass: true,
            link_injection: true,
            search_top_k: 5,
            auto_publish: false,
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format.
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Name accepted by [`crate::init_tracing_with`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// Export the JSON Schema for [`EditorialConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(EditorialConfig);
    serde_json::to_string_pretty(&schema)
}
