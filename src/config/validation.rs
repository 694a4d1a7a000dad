//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`EditorialConfig`] that cannot
//! be expressed through the type system alone (range checks, weight sums,
//! cross-references between role routing and provider definitions).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - Checking that API key environment variables are set (provider construction)

use super::{EditorialConfig, ProviderKind};
use crate::content::ReviewCategory;

/// Tolerance allowed when checking that weights sum to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "resilience.retry_base_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on an [`EditorialConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &EditorialConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Providers ────────────────────────────────────────────────────
    if config.providers.is_empty() {
        errors.push(invalid("providers", "{}", "at least one provider is required"));
    }
    for (id, p) in &config.providers {
        if p.model.trim().is_empty() {
            errors.push(invalid(
                format!("providers.{id}.model"),
                "",
                "model name must not be empty",
            ));
        }
        if !(0.0..=2.0).contains(&p.temperature) {
            errors.push(invalid(
                format!("providers.{id}.temperature"),
                p.temperature,
                "must be between 0.0 and 2.0",
            ));
        }
        if p.max_tokens == 0 {
            errors.push(invalid(format!("providers.{id}.max_tokens"), 0, "must be at least 1"));
        }
        if p.timeout_ms == 0 {
            errors.push(invalid(
                format!("providers.{id}.timeout_ms"),
                0,
                "must be at least 1ms",
            ));
        }
        if p.requests_per_minute == 0 {
            errors.push(invalid(
                format!("providers.{id}.requests_per_minute"),
                0,
                "must be at least 1",
            ));
        }
        if p.cost_per_1k_input < 0.0 || p.cost_per_1k_output < 0.0 {
            errors.push(invalid(
                format!("providers.{id}.cost_per_1k_*"),
                format!("{}/{}", p.cost_per_1k_input, p.cost_per_1k_output),
                "costs must not be negative",
            ));
        }
        if p.context_window_tokens <= p.max_tokens as usize {
            errors.push(invalid(
                format!("providers.{id}.context_window_tokens"),
                p.context_window_tokens,
                "must exceed max_tokens",
            ));
        }
        if p.kind != ProviderKind::Simulated && p.api_key_env.is_none() {
            errors.push(invalid(
                format!("providers.{id}.api_key_env"),
                "none",
                "HTTP providers must name the environment variable holding the key",
            ));
        }
    }

    // ── Role routing ─────────────────────────────────────────────────
    if !config.providers.contains_key(&config.roles.default_provider) {
        errors.push(invalid(
            "roles.default_provider",
            &config.roles.default_provider,
            "does not name a configured provider",
        ));
    }
    for (role, provider) in &config.roles.overrides {
        if !config.providers.contains_key(provider) {
            errors.push(invalid(
                format!("roles.overrides.{role}"),
                provider,
                "does not name a configured provider",
            ));
        }
    }

    // ── Resilience ───────────────────────────────────────────────────
    let r = &config.resilience;
    if r.retry_base_ms > r.retry_max_ms {
        errors.push(invalid(
            "resilience.retry_base_ms",
            r.retry_base_ms,
            "must be \u{2264} retry_max_ms",
        ));
    }
    if r.retry_attempts == 0 {
        errors.push(invalid("resilience.retry_attempts", 0, "must be at least 1"));
    }
    if r.agent_timeout_ms == 0 {
        errors.push(invalid("resilience.agent_timeout_ms", 0, "must be at least 1ms"));
    }
    if r.run_timeout_s == 0 {
        errors.push(invalid("resilience.run_timeout_s", 0, "must be at least 1 second"));
    }
    if r.store_retry_attempts == 0 {
        errors.push(invalid("resilience.store_retry_attempts", 0, "must be at least 1"));
    }

    // ── Scoring ──────────────────────────────────────────────────────
    let s = &config.scoring;
    for category in ReviewCategory::ALL {
        let w = s.weights.weight(category);
        if w < 0.0 {
            errors.push(invalid(
                format!("scoring.weights.{}", category.as_str().replace('-', "_")),
                w,
                "weights must not be negative",
            ));
        }
    }
    let total = s.weights.total();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        errors.push(invalid("scoring.weights", format!("{total:.4}"), "weights must sum to 1.0"));
    }
    for (name, value) in [
        ("scoring.ready_threshold", s.ready_threshold),
        ("scoring.minor_threshold", s.minor_threshold),
        ("scoring.needs_fix_threshold", s.needs_fix_threshold),
        ("scoring.default_category_floor", s.default_category_floor),
    ] {
        if !(0.0..=10.0).contains(&value) {
            errors.push(invalid(name, value, "must be between 0.0 and 10.0"));
        }
    }
    if s.minor_threshold >= s.ready_threshold {
        errors.push(invalid(
            "scoring.minor_threshold",
            s.minor_threshold,
            "must be below ready_threshold",
        ));
    }
    for (tag, floor) in &s.category_floors {
        if tag.parse::<ReviewCategory>().is_err() {
            errors.push(invalid(
                format!("scoring.category_floors.{tag}"),
                tag,
                "unknown review category",
            ));
        }
        if !(0.0..=10.0).contains(floor) {
            errors.push(invalid(
                format!("scoring.category_floors.{tag}"),
                floor,
                "must be between 0.0 and 10.0",
            ));
        }
    }

    // ── Audit ────────────────────────────────────────────────────────
    if config.audit.quick_panel.is_empty() {
        errors.push(invalid("audit.quick_panel", "[]", "quick panel must not be empty"));
    }
    if config.audit.max_version_retries == 0 {
        errors.push(invalid("audit.max_version_retries", 0, "must be at least 1"));
    }

    // ── Generation ───────────────────────────────────────────────────
    let g = &config.generation;
    if g.review_panel.is_empty() {
        errors.push(invalid("generation.review_panel", "[]", "review panel must not be empty"));
    }
    if g.single_pass_max_words == 0 {
        errors.push(invalid("generation.single_pass_max_words", 0, "must be at least 1"));
    }
    if g.max_section_words == 0 {
        errors.push(invalid("generation.max_section_words", 0, "must be at least 1"));
    }
    if !(g.words_per_token > 0.0 && g.words_per_token <= 4.0) {
        errors.push(invalid(
            "generation.words_per_token",
            g.words_per_token,
            "must be in (0.0, 4.0]",
        ));
    }
    if g.trailing_window == 0 {
        errors.push(invalid(
            "generation.trailing_window",
            0,
            "section writers need at least one previous section as context",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
