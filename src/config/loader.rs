//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`EditorialConfig`], and run
//! validation before returning. This is the primary entry point for loading
//! engine configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::EditorialConfig;

/// Load an [`EditorialConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(EditorialConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use editorial_orchestrator::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("editorial.toml"))?;
/// println!("default provider: {}", config.roles.default_provider);
/// ```
pub fn load_from_file(path: &Path) -> Result<EditorialConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`EditorialConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<EditorialConfig, ConfigError> {
    let config: EditorialConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderKind, ReviewFailurePolicy};
    use crate::content::ReviewCategory;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[providers.claude]
kind = "anthropic"
model = "claude-3-5-sonnet-latest"
api_key_env = "ANTHROPIC_API_KEY"
requests_per_minute = 50
cost_per_1k_input = 0.003
cost_per_1k_output = 0.015

[providers.offline]
kind = "simulated"
model = "sim"

[roles]
default_provider = "claude"

[roles.overrides]
reviewer = "offline"

[resilience]
retry_attempts = 4
retry_base_ms = 100
retry_max_ms = 5000

[scoring]
ready_threshold = 8.0
minor_threshold = 7.0

[scoring.category_floors]
security-compliance = 7.5

[audit]
quick_panel = ["seo", "completeness"]

[generation]
review_failure = "abort"
max_revision_rounds = 2

[observability]
log_format = "json"
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.roles.default_provider, "claude");
        assert_eq!(config.providers["claude"].kind, ProviderKind::Anthropic);
        assert_eq!(config.roles.provider_for("reviewer:seo"), "offline");
        assert_eq!(
            config.audit.quick_panel,
            vec![ReviewCategory::Seo, ReviewCategory::Completeness]
        );
        assert_eq!(config.generation.review_failure, ReviewFailurePolicy::Abort);
        assert_eq!(config.resilience.retry_attempts, 4);
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = load_from_str("", "empty.toml").expect("test: defaults");
        assert_eq!(config, EditorialConfig::default());
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_str_validation_failure_returns_validation_error() {
        let toml_str = r#"
[scoring.weights]
engineering_usefulness = 0.9
"#;
        let result = load_from_str(toml_str, "weights.toml");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("test.toml");
        let mut f = std::fs::File::create(&path).expect("test: create file");
        f.write_all(VALID_TOML.as_bytes()).expect("test: write");
        drop(f);

        let config = load_from_file(&path).expect("test: load from file");
        assert_eq!(config.roles.default_provider, "claude");
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let result = load_from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_from_str_source_name_appears_in_error() {
        let err = load_from_str("invalid [[[", "my-source.toml").expect_err("test: parse error");
        assert!(err.to_string().contains("my-source.toml"));
    }

    #[test]
    fn test_unknown_provider_kind_fails_to_parse() {
        let toml_str = r#"
[providers.x]
kind = "carrier_pigeon"
model = "m"
"#;
        let result = load_from_str(toml_str, "kind.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_review_category_in_panel_fails_to_parse() {
        let toml_str = r#"
[audit]
quick_panel = ["vibes"]
"#;
        let result = load_from_str(toml_str, "panel.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
