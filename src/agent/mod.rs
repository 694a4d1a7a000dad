//! # Agent invoker
//!
//! ## Responsibility
//! Bind each [`AgentRole`] to a fixed prompt template and an expected output
//! shape, call the routed provider through its harness, and validate the
//! response before anyone else sees it.
//!
//! ## Guarantees
//! - Stateless: an invocation depends only on its [`AgentContext`]
//! - At most one corrective follow-up per invocation when the response does
//!   not match the role's shape; a second bad response surfaces as
//!   [`AgentError::SchemaValidation`] carrying the raw text
//! - Bounded: the whole invocation (retries and follow-up included) runs
//!   under the configured agent timeout
//! - Prompt text and completions are never logged
//!
//! ## NOT Responsible For
//! - Retrying provider failures (see: `provider::harness`)
//! - Deciding what to do with a failed agent (see: `pipeline`, `audit`)

pub mod parse;
pub mod prompts;

use crate::config::EditorialConfig;
use crate::content::{ContentId, ReviewCategory};
use crate::provider::{ProviderError, ProviderPool, ProviderRequest, TokenUsage};
use crate::OrchestratorError;
use parse::AgentOutput;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{warn, Instrument, Span};

/// A named LLM-backed role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Writes the first draft of short-form content.
    Generator,
    /// Rewrites a draft from reviewer feedback.
    Reviser,
    /// Scores one review category.
    Reviewer(ReviewCategory),
    /// Plans long-form content as ordered sections.
    Outliner,
    /// Writes one section of long-form content.
    SectionWriter,
    /// Proposes find/replace edits over a finished long-form draft.
    CoherenceEditor,
    /// Rewrites a scoped set of fields.
    FieldRewriter,
}

impl AgentRole {
    /// Role family without the category suffix.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Reviser => "reviser",
            Self::Reviewer(_) => "reviewer",
            Self::Outliner => "outliner",
            Self::SectionWriter => "section_writer",
            Self::CoherenceEditor => "coherence_editor",
            Self::FieldRewriter => "field_rewriter",
        }
    }

    /// Routing tag (`generator`, `reviewer:seo`, ...).
    pub fn tag(&self) -> String {
        match self {
            Self::Reviewer(category) => format!("reviewer:{category}"),
            other => other.family().to_string(),
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl FromStr for AgentRole {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        match tag.split_once(':') {
            Some(("reviewer", category)) => category
                .parse::<ReviewCategory>()
                .map(Self::Reviewer)
                .map_err(|_| AgentError::UnknownRole(tag.to_string())),
            Some(_) => Err(AgentError::UnknownRole(tag.to_string())),
            None => match tag {
                "generator" => Ok(Self::Generator),
                "reviser" => Ok(Self::Reviser),
                "outliner" => Ok(Self::Outliner),
                "section_writer" => Ok(Self::SectionWriter),
                "coherence_editor" => Ok(Self::CoherenceEditor),
                "field_rewriter" => Ok(Self::FieldRewriter),
                _ => Err(AgentError::UnknownRole(tag.to_string())),
            },
        }
    }
}

/// Agent-layer errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    /// The provider call failed after the harness gave up.
    #[error("agent {role}: {source}")]
    Provider {
        /// Role tag.
        role: String,
        /// Provider attempts made.
        attempts: u32,
        /// Classified provider failure.
        #[source]
        source: ProviderError,
    },

    /// The response did not match the role's shape even after a corrective
    /// follow-up.
    #[error("agent {role}: unusable output: {reason}")]
    SchemaValidation {
        /// Role tag.
        role: String,
        /// Last completion text.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A role tag that maps to no role.
    #[error("unknown agent role '{0}'")]
    UnknownRole(String),
}

impl AgentError {
    /// Short, stable label used for metrics and failure markers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider { source, .. } => source.kind(),
            Self::SchemaValidation { .. } => "schema_validation",
            Self::UnknownRole(_) => "unknown_role",
        }
    }

    /// Provider attempts behind this error (1 for non-provider failures).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Provider { attempts, .. } => *attempts,
            Self::SchemaValidation { .. } => 2,
            Self::UnknownRole(_) => 0,
        }
    }

    /// Returns `true` when the provider timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                source: ProviderError::Timeout(_),
                ..
            }
        )
    }
}

/// Everything an agent may see. Built per invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentContext {
    /// Item the call is about, for log correlation only.
    pub content_id: Option<ContentId>,
    /// Subject of the content.
    pub topic: String,
    /// Content-type brief.
    pub brief: String,
    /// Desired length of the produced text.
    pub target_words: Option<usize>,
    /// Requested number of sections (outliner only).
    pub section_count: Option<usize>,
    /// Revision round; 0 for the first pass.
    pub round: u32,
    /// Field names to rewrite (field rewriter only).
    pub fields: Vec<String>,
    /// Labelled free-form blocks (outline, previous sections, findings ...).
    pub blocks: Vec<(String, String)>,
    /// Feedback items from earlier stages.
    pub feedback: Vec<String>,
    /// Retrieved reference snippets.
    pub retrieval: Vec<String>,
    /// Current text under review or revision.
    pub draft: Option<String>,
}

impl AgentContext {
    /// Context for `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Attach the item id used in log fields.
    pub fn for_content(mut self, id: &ContentId) -> Self {
        self.content_id = Some(id.clone());
        self
    }

    /// Set the content-type brief.
    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = brief.into();
        self
    }

    /// Set the word target.
    pub fn with_target_words(mut self, words: usize) -> Self {
        self.target_words = Some(words);
        self
    }

    /// Set the requested section count.
    pub fn with_section_count(mut self, count: usize) -> Self {
        self.section_count = Some(count);
        self
    }

    /// Set the revision round.
    pub fn with_round(mut self, round: u32) -> Self {
        self.round = round;
        self
    }

    /// Set the fields to rewrite.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Add a labelled block.
    pub fn with_block(mut self, label: impl Into<String>, text: impl Into<String>) -> Self {
        self.blocks.push((label.into(), text.into()));
        self
    }

    /// Set the feedback items.
    pub fn with_feedback(mut self, feedback: Vec<String>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Set the retrieval snippets.
    pub fn with_retrieval(mut self, snippets: Vec<String>) -> Self {
        self.retrieval = snippets;
        self
    }

    /// Set the text under review.
    pub fn with_draft(mut self, draft: impl Into<String>) -> Self {
        self.draft = Some(draft.into());
        self
    }
}

/// Record of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInvocation {
    /// Role tag.
    pub role: String,
    /// Provider that served the final call.
    pub provider_id: String,
    /// Model that served the final call.
    pub model_id: String,
    /// Final request sent.
    pub request: ProviderRequest,
    /// Final completion text.
    pub response: String,
    /// Wall-clock time including the follow-up, if any.
    pub latency: Duration,
    /// Provider attempts across both calls, minus one per successful call.
    pub retry_count: u32,
    /// Whether a corrective follow-up was needed.
    pub corrected: bool,
    /// Token usage summed over both calls.
    pub usage: TokenUsage,
}

/// Validated agent output.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    /// Role that produced it.
    pub role: AgentRole,
    /// Score, for reviewers.
    pub score: Option<f64>,
    /// Rationale text (empty for roles without one).
    pub rationale: String,
    /// Validated JSON fields.
    pub fields: Map<String, Value>,
    /// Call metadata.
    pub invocation: AgentInvocation,
}

impl AgentResult {
    /// String field, if present.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// List of strings; missing or malformed lists read as empty.
    pub fn list(&self, key: &str) -> Vec<String> {
        string_list(self.fields.get(key))
    }
}

/// Strings of a JSON array, skipping blanks and non-strings.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Invokes roles against the provider pool.
#[derive(Clone)]
pub struct AgentInvoker {
    pool: Arc<ProviderPool>,
    agent_timeout: Duration,
    words_per_token: f64,
}

impl AgentInvoker {
    /// Invoker over `pool` with default limits.
    pub fn new(pool: ProviderPool) -> Self {
        Self {
            pool: Arc::new(pool),
            agent_timeout: Duration::from_secs(120),
            words_per_token: 0.75,
        }
    }

    /// Build the provider pool and invoker from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] when a provider cannot be
    /// constructed (missing API key).
    pub fn from_config(config: &EditorialConfig) -> Result<Self, OrchestratorError> {
        Ok(Self::new(ProviderPool::from_config(config)?)
            .with_agent_timeout(config.resilience.agent_timeout())
            .with_words_per_token(config.generation.words_per_token))
    }

    /// Deadline for one invocation, retries and follow-up included.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Words per token used to size completion budgets.
    pub fn with_words_per_token(mut self, words_per_token: f64) -> Self {
        self.words_per_token = words_per_token;
        self
    }

    /// Provider pool (for cost snapshots).
    pub fn pool(&self) -> &ProviderPool {
        &self.pool
    }

    /// Invoke `role` with `ctx`.
    ///
    /// # Errors
    ///
    /// - [`AgentError::Provider`] when the harness gave up, when the agent
    ///   timeout elapsed (`source` is [`ProviderError::Timeout`]), or when no
    ///   provider serves the role
    /// - [`AgentError::SchemaValidation`] when the corrective follow-up also
    ///   produced unusable output
    pub async fn invoke(&self, role: AgentRole, ctx: &AgentContext) -> Result<AgentResult, AgentError> {
        let tag = role.tag();
        let span = tracing::info_span!(
            "agent.invoke",
            role = %tag,
            content_id = ctx.content_id.as_ref().map(|c| c.as_str()).unwrap_or(""),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error_kind = tracing::field::Empty,
        );
        let started = Instant::now();

        let result = async {
            match tokio::time::timeout(self.agent_timeout, self.invoke_inner(role, &tag, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Provider {
                    role: tag.clone(),
                    attempts: 0,
                    source: ProviderError::Timeout(self.agent_timeout),
                }),
            }
        }
        .instrument(span.clone())
        .await;

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        match &result {
            Ok(r) => {
                let outcome = if r.invocation.corrected { "corrected" } else { "ok" };
                span.record("outcome", outcome);
                crate::metrics::inc_agent_call(role.family(), outcome);
            }
            Err(e) => {
                span.record("outcome", "err");
                span.record("error_kind", e.kind());
                crate::metrics::inc_agent_call(role.family(), e.kind());
                span.in_scope(|| {
                    warn!(role = %tag, error_kind = e.kind(), error = %e, "agent invocation failed")
                });
            }
        }
        result
    }

    async fn invoke_inner(
        &self,
        role: AgentRole,
        tag: &str,
        ctx: &AgentContext,
    ) -> Result<AgentResult, AgentError> {
        let harness = self.pool.for_role(tag).map_err(|source| AgentError::Provider {
            role: tag.to_string(),
            attempts: 0,
            source,
        })?;
        let started = Instant::now();
        let system = prompts::system_prompt(&role);
        let user = prompts::user_prompt(ctx);
        let mut request = harness.request(&system, &user);
        if let Some(words) = ctx.target_words {
            request.max_tokens = request
                .max_tokens
                .max(self.completion_budget(words, harness.context_window_tokens()));
        }

        let provider_error = |failure: crate::resilience::RetryFailure<ProviderError>| {
            AgentError::Provider {
                role: tag.to_string(),
                attempts: failure.attempts,
                source: failure.error,
            }
        };

        let first = harness.call(&request).await.map_err(provider_error)?;
        let mut usage = first.usage;
        let mut retry_count = first.attempts.saturating_sub(1);

        let (final_request, response, fields, corrected) = match parse::parse_output(&role, &first.text) {
            AgentOutput::Parsed(fields) => (request, first, fields, false),
            AgentOutput::ParseError { reason, .. } => {
                Span::current().record("error_kind", "schema_validation");
                let mut follow_up = request.clone();
                follow_up.user_prompt = prompts::corrective_prompt(&user, &reason);
                let second = harness.call(&follow_up).await.map_err(provider_error)?;
                usage.input_tokens += second.usage.input_tokens;
                usage.output_tokens += second.usage.output_tokens;
                retry_count += second.attempts.saturating_sub(1);
                match parse::parse_output(&role, &second.text) {
                    AgentOutput::Parsed(fields) => (follow_up, second, fields, true),
                    AgentOutput::ParseError { raw, reason } => {
                        return Err(AgentError::SchemaValidation {
                            role: tag.to_string(),
                            raw,
                            reason,
                        });
                    }
                }
            }
        };

        Ok(AgentResult {
            role,
            score: fields.get("score").and_then(Value::as_f64),
            rationale: fields
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            invocation: AgentInvocation {
                role: tag.to_string(),
                provider_id: response.provider_id,
                model_id: response.model_id,
                request: final_request,
                response: response.text,
                latency: started.elapsed(),
                retry_count,
                corrected,
                usage,
            },
            fields,
        })
    }

    /// Completion budget for `words` of output, capped at half the window.
    fn completion_budget(&self, words: usize, context_window: usize) -> u32 {
        let tokens = (words as f64 / self.words_per_token * 1.25).ceil() as usize + 256;
        tokens.min(context_window / 2).min(u32::MAX as usize) as u32
    }
}
