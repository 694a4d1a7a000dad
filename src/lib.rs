//! # editorial-orchestrator
//!
//! Multi-agent LLM pipeline that generates, scores, and iteratively improves
//! long-form content over Tokio.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator / SectionGenerator ─┐
//! AuditEngine ─────────────────────┼─► AgentInvoker ─► ProviderHarness ─► Provider
//! ImprovementEngine ───────────────┘        (roles)      (retry, timeout,
//!                                                          rate limit, cost)
//!        │                                   ▲
//!        └──────────── ContentStore ◄────────┘ (items, append-only audit log)
//! ```
//!
//! Every engine is built from an explicit [`context::EngineContext`]; there is
//! no global provider configuration.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod agent;
pub mod audit;
pub mod cancel;
pub mod config;
pub mod content;
pub mod context;
pub mod improve;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod provider;
pub mod report;
pub mod resilience;
pub mod scoring;
pub mod search;
pub mod sections;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use agent::{AgentError, AgentInvoker, AgentResult, AgentRole};
pub use audit::{AuditEngine, AuditMode, AuditOutcome};
pub use cancel::{CancelHandle, CancelSignal};
pub use content::{
    AuditRecord, ContentField, ContentId, ContentItem, ContentStatus, ReviewCategory, Section,
};
pub use context::EngineContext;
pub use improve::{ImprovementEngine, ImprovementReport, ImprovementTask};
pub use pipeline::{GenerationRequest, Orchestrator, RunStatus};
pub use provider::{Provider, ProviderError, ProviderHarness, ProviderRequest, ProviderResponse};
pub use scoring::Verdict;
pub use store::{ContentStore, StoreError};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    init_tracing_with(&format)
}

/// Initialise the global tracing subscriber with an explicit format name.
///
/// `"json"` selects structured output; every other value selects pretty output.
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if a global subscriber is already set.
pub fn init_tracing_with(format: &str) -> Result<(), OrchestratorError> {
    let result = match format {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Layer errors ([`ProviderError`], [`AgentError`], [`StoreError`]) convert
/// into this type with `?`. Run-level variants carry enough context
/// (content id, stage, attempt count) to resume the work later.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A provider call failed and was not recovered by the retry harness.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// An agent invocation failed (provider failure or unusable output).
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// A content store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A configuration value is missing or invalid (e.g., missing env var).
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first provider call.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A pipeline stage failed after its retries were exhausted.
    #[error("content {content_id}: stage '{stage}' failed after {attempts} attempt(s): {message}")]
    StageFailed {
        /// Item the stage was working on.
        content_id: ContentId,
        /// Stage name.
        stage: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Short error-kind label of the underlying failure.
        kind: &'static str,
        /// Human-readable description.
        message: String,
    },

    /// A full-mode audit could not score every category and wrote nothing.
    #[error("audit of {content_id} aborted: {reason}")]
    AuditAborted {
        /// Item under audit.
        content_id: ContentId,
        /// Why the audit was abandoned.
        reason: String,
    },

    /// A store write kept failing after bounded retries.
    #[error("store write for {content_id} failed after {attempts} attempt(s): {source}")]
    StoreWrite {
        /// Item being written.
        content_id: ContentId,
        /// Attempts made.
        attempts: u32,
        /// Last store error.
        #[source]
        source: StoreError,
    },

    /// A run-level or agent-level deadline elapsed.
    #[error("{scope} timed out after {elapsed_ms}ms")]
    Timeout {
        /// What timed out (`"audit run"`, `"pipeline run"`, an agent role).
        scope: String,
        /// Configured deadline in milliseconds.
        elapsed_ms: u64,
    },

    /// The run was cancelled by its caller.
    #[error("run cancelled")]
    Cancelled,

    /// No audit record exists for the item and auditing was not requested.
    #[error("no audit record for {0}")]
    NoAudit(ContentId),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// Short, stable label used for metrics and the `error_kind` span field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Agent(e) => e.kind(),
            Self::Store(_) | Self::StoreWrite { .. } => "store_write",
            Self::ConfigError(_) => "config",
            Self::StageFailed { kind, .. } => *kind,
            Self::AuditAborted { .. } => "audit_aborted",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::NoAudit(_) => "no_audit",
            Self::Other(_) => "other",
        }
    }

    /// Returns `true` for errors that should abort the whole run rather than
    /// degrade a single stage (unreachable store, fatal provider credentials,
    /// configuration problems).
    pub fn is_run_level(&self) -> bool {
        match self {
            Self::Provider(e) => matches!(e, ProviderError::Fatal(_)),
            Self::Agent(AgentError::Provider { source, .. }) => {
                matches!(source, ProviderError::Fatal(_))
            }
            Self::StageFailed { kind, .. } => *kind == "fatal",
            Self::Store(_) | Self::StoreWrite { .. } | Self::ConfigError(_) => true,
            _ => false,
        }
    }

    /// Returns `true` when the underlying cause is a content-policy rejection.
    pub fn is_content_policy(&self) -> bool {
        match self {
            Self::Provider(ProviderError::ContentPolicyRejected(_)) => true,
            Self::Agent(AgentError::Provider { source, .. }) => {
                matches!(source, ProviderError::ContentPolicyRejected(_))
            }
            Self::StageFailed { kind, .. } => *kind == "content_policy",
            _ => false,
        }
    }
}
