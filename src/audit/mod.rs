//! # Audit engine
//!
//! ## Responsibility
//! Score an existing content item with a panel of category reviewers, fold
//! the scores into an overall score, and append the result as a new
//! versioned [`AuditRecord`].
//!
//! ## Guarantees
//! - Reviewers run concurrently; aggregation is order-independent
//! - Full mode: any reviewer failure aborts the audit and nothing is written
//! - A content-policy rejection in either mode writes no record and flags
//!   the item for human review
//! - Quick mode: failed reviewers are recorded as unavailable and the rest
//!   are aggregated
//! - `audit_version` is `max + 1` at the moment of the append; a concurrent
//!   writer makes the store reject the append and the engine retries with the
//!   next free version without re-running the panel
//! - Cancellation or the run deadline drops every in-flight reviewer call
//!   and writes nothing
//!
//! ## NOT Responsible For
//! - Changing content (see: `improve`)

use crate::agent::{AgentContext, AgentError, AgentResult, AgentRole, AgentInvoker};
use crate::cancel::CancelSignal;
use crate::content::{AuditRecord, ContentId, ContentItem, ReviewCategory};
use crate::context::EngineContext;
use crate::provider::ProviderError;
use crate::scoring::{self, Verdict};
use crate::store::StoreError;
use crate::OrchestratorError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};

/// Which reviewers an audit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    /// Every category; any failure aborts.
    Full,
    /// The configured reduced panel; failures degrade to unavailable.
    Quick,
}

impl AuditMode {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Quick => "quick",
        }
    }
}

impl fmt::Display for AuditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "quick" => Ok(Self::Quick),
            other => Err(format!("unknown audit mode '{other}'")),
        }
    }
}

/// Result of a successful audit.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutcome {
    /// The record that was appended.
    pub record: AuditRecord,
    /// Gate verdict for the overall score.
    pub verdict: Verdict,
    /// Version conflicts resolved before the append succeeded.
    pub version_retries: u32,
}

/// Per-category reviewer results of one panel run.
pub type PanelResults = BTreeMap<ReviewCategory, Result<AgentResult, AgentError>>;

/// Run one reviewer per category concurrently and collect every result.
///
/// Dropping the returned future aborts all reviewer calls still in flight.
pub async fn run_panel(
    invoker: &AgentInvoker,
    categories: &[ReviewCategory],
    base: &AgentContext,
) -> PanelResults {
    let mut set = JoinSet::new();
    for category in categories {
        let invoker = invoker.clone();
        let ctx = base.clone();
        let category = *category;
        set.spawn(async move {
            let result = invoker.invoke(AgentRole::Reviewer(category), &ctx).await;
            (category, result)
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((category, result)) => {
                results.insert(category, result);
            }
            Err(e) => warn!(error = %e, "reviewer task failed to complete"),
        }
    }
    // A panicked task never reported back; treat it as a failed reviewer.
    for category in categories {
        results.entry(*category).or_insert_with(|| {
            Err(AgentError::Provider {
                role: AgentRole::Reviewer(*category).tag(),
                attempts: 0,
                source: ProviderError::Transient("reviewer task aborted".into()),
            })
        });
    }
    results
}

/// Reviewer findings merged in canonical category order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelSummary {
    /// Scores of reviewers that answered.
    pub scores: BTreeMap<ReviewCategory, f64>,
    /// Rationale per role tag.
    pub rationales: BTreeMap<String, String>,
    /// Issues, de-duplicated.
    pub issues: Vec<String>,
    /// Missing elements, de-duplicated.
    pub missing_elements: Vec<String>,
    /// Recommendations, de-duplicated.
    pub recommendations: Vec<String>,
    /// Categories whose reviewer failed.
    pub unavailable: Vec<ReviewCategory>,
}

impl PanelSummary {
    /// Merge the successful results of `results`.
    pub fn from_results(results: &PanelResults) -> Self {
        let mut summary = Self::default();
        for (category, result) in results {
            match result {
                Ok(r) => {
                    if let Some(score) = r.score {
                        summary.scores.insert(*category, score);
                    }
                    summary.rationales.insert(r.role.tag(), r.rationale.clone());
                    push_unique(&mut summary.issues, r.list("issues"));
                    push_unique(&mut summary.missing_elements, r.list("missing_elements"));
                    push_unique(&mut summary.recommendations, r.list("recommendations"));
                }
                Err(_) => summary.unavailable.push(*category),
            }
        }
        summary
    }
}

fn push_unique(into: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !into.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            into.push(item);
        }
    }
}

/// Runs audits against an [`EngineContext`].
#[derive(Clone)]
pub struct AuditEngine {
    ctx: EngineContext,
}

impl AuditEngine {
    /// Create an engine.
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Categories reviewed in `mode`.
    pub fn panel(&self, mode: AuditMode) -> Vec<ReviewCategory> {
        match mode {
            AuditMode::Full => ReviewCategory::ALL.to_vec(),
            AuditMode::Quick => self.ctx.config.audit.quick_panel.clone(),
        }
    }

    /// Audit one item.
    ///
    /// # Errors
    ///
    /// See [`Self::audit_with_cancel`].
    pub async fn audit(&self, id: &ContentId, mode: AuditMode) -> Result<AuditOutcome, OrchestratorError> {
        self.audit_with_cancel(id, mode, &CancelSignal::never()).await
    }

    /// Audit one item, stopping early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Store`] when the item cannot be read or the
    ///   version sequence stayed contended past `max_version_retries`
    /// - [`OrchestratorError::AuditAborted`] when a full-mode reviewer failed
    ///   or no quick-mode reviewer answered
    /// - [`OrchestratorError::Agent`] for fatal provider failures
    /// - [`OrchestratorError::Timeout`] when the run deadline elapsed
    /// - [`OrchestratorError::Cancelled`] when `cancel` fired
    pub async fn audit_with_cancel(
        &self,
        id: &ContentId,
        mode: AuditMode,
        cancel: &CancelSignal,
    ) -> Result<AuditOutcome, OrchestratorError> {
        let span = tracing::info_span!(
            "audit.run",
            content_id = %id,
            mode = mode.as_str(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error_kind = tracing::field::Empty,
        );
        let started = Instant::now();
        let result = self.run(id, mode, cancel).instrument(span.clone()).await;

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        match &result {
            Ok(outcome) => {
                span.record("outcome", "ok");
                crate::metrics::inc_audit(mode.as_str(), "ok");
                span.in_scope(|| {
                    info!(
                        content_id = %id,
                        audit_version = outcome.record.audit_version,
                        overall_score = outcome.record.overall_score,
                        needs_fix = outcome.record.needs_fix,
                        "audit recorded"
                    )
                });
            }
            Err(e) => {
                span.record("outcome", "err");
                span.record("error_kind", e.kind());
                crate::metrics::inc_audit(mode.as_str(), e.kind());
                span.in_scope(|| warn!(content_id = %id, error = %e, "audit failed"));
            }
        }
        result
    }

    /// Audit several items one after another, collecting every outcome.
    ///
    /// Items not yet started when `cancel` fires report
    /// [`OrchestratorError::Cancelled`].
    pub async fn audit_many(
        &self,
        ids: &[ContentId],
        mode: AuditMode,
        cancel: &CancelSignal,
    ) -> Vec<(ContentId, Result<AuditOutcome, OrchestratorError>)> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push((id.clone(), self.audit_with_cancel(id, mode, cancel).await));
        }
        out
    }

    async fn run(
        &self,
        id: &ContentId,
        mode: AuditMode,
        cancel: &CancelSignal,
    ) -> Result<AuditOutcome, OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let item = self.ctx.store.get_content_item(id).await?;
        let panel = self.panel(mode);
        let run_timeout = self.ctx.config.resilience.run_timeout();
        let base = self.review_context(&item);

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            r = tokio::time::timeout(run_timeout, run_panel(&self.ctx.invoker, &panel, &base)) => {
                r.map_err(|_| OrchestratorError::Timeout {
                    scope: "audit run".into(),
                    elapsed_ms: run_timeout.as_millis() as u64,
                })?
            }
        };

        let summary = match self.evaluate(id, mode, &results) {
            Ok(summary) => summary,
            Err(e) if e.is_content_policy() => {
                self.ctx.flag_for_review(id, "audit", &e).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let overall = scoring::aggregate(&summary.scores, &self.ctx.config.scoring.weights);
        let needs_fix = scoring::needs_fix(overall, &summary.scores, &self.ctx.config.scoring);

        let record = AuditRecord {
            content_id: id.clone(),
            audit_version: 0,
            audited_at: Utc::now(),
            mode: mode.as_str().to_string(),
            content_revision: item.current_revision,
            overall_score: overall,
            category_scores: summary.scores,
            rationales: summary.rationales,
            issues: summary.issues,
            missing_elements: summary.missing_elements,
            recommendations: summary.recommendations,
            unavailable: summary.unavailable,
            needs_fix,
        };

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let (record, version_retries) = self.append(record).await?;
        Ok(AuditOutcome {
            verdict: Verdict::from_score(record.overall_score, &self.ctx.config.scoring),
            record,
            version_retries,
        })
    }

    fn review_context(&self, item: &ContentItem) -> AgentContext {
        let accessor = self.ctx.registry.resolve(&item.category);
        AgentContext::new(item.title.clone())
            .for_content(&item.id)
            .with_brief(accessor.generation_brief())
            .with_draft(accessor.review_text(item))
    }

    fn evaluate(
        &self,
        id: &ContentId,
        mode: AuditMode,
        results: &PanelResults,
    ) -> Result<PanelSummary, OrchestratorError> {
        for result in results.values() {
            if let Err(e @ AgentError::Provider { source: ProviderError::Fatal(_), .. }) = result {
                return Err(OrchestratorError::Agent(e.clone()));
            }
        }
        let rejected = results.values().find_map(|r| match r {
            Err(e @ AgentError::Provider { source: ProviderError::ContentPolicyRejected(_), .. }) => {
                Some(e.clone())
            }
            _ => None,
        });
        if let Some(e) = rejected {
            return Err(OrchestratorError::Agent(e));
        }

        let failures: Vec<String> = results
            .iter()
            .filter_map(|(category, r)| r.as_ref().err().map(|e| format!("{category}: {}", e.kind())))
            .collect();

        match mode {
            AuditMode::Full if !failures.is_empty() => Err(OrchestratorError::AuditAborted {
                content_id: id.clone(),
                reason: format!("reviewer(s) failed: {}", failures.join(", ")),
            }),
            _ => {
                let summary = PanelSummary::from_results(results);
                if summary.scores.is_empty() {
                    return Err(OrchestratorError::AuditAborted {
                        content_id: id.clone(),
                        reason: "no reviewer produced a score".into(),
                    });
                }
                if !summary.unavailable.is_empty() {
                    warn!(
                        content_id = %id,
                        unavailable = ?summary.unavailable,
                        "quick audit degraded, some reviewers unavailable"
                    );
                }
                Ok(summary)
            }
        }
    }

    /// Append with `max + 1`, re-reading the next free version on conflict.
    async fn append(&self, mut record: AuditRecord) -> Result<(AuditRecord, u32), OrchestratorError> {
        let store = &self.ctx.store;
        let max_conflicts = self.ctx.config.audit.max_version_retries;
        let max_io = self.ctx.config.resilience.store_retry_attempts.max(1);
        let mut conflicts = 0;
        let mut io_attempts = 0;

        let latest = store.get_latest_audit_record(&record.content_id).await?;
        record.audit_version = latest.map_or(1, |r| r.audit_version + 1);

        loop {
            match store.append_audit_record(&record).await {
                Ok(()) => return Ok((record, conflicts)),
                Err(StoreError::VersionConflict { expected, .. }) if conflicts < max_conflicts => {
                    conflicts += 1;
                    warn!(
                        content_id = %record.content_id,
                        attempted = record.audit_version,
                        next = expected,
                        "audit version taken by a concurrent audit, retrying"
                    );
                    record.audit_version = expected;
                }
                Err(e) if e.is_transient() && io_attempts + 1 < max_io => {
                    io_attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(io_attempts))).await;
                }
                Err(e @ StoreError::VersionConflict { .. }) => return Err(e.into()),
                Err(source) => {
                    return Err(OrchestratorError::StoreWrite {
                        content_id: record.content_id.clone(),
                        attempts: io_attempts + 1,
                        source,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::store::ContentStore;
    use crate::test_support::{context_with, fast_config, review_json, sample_item, RoleProvider};
    use std::sync::Arc;

    fn scores_by_category(tag: &str) -> f64 {
        match tag {
            "reviewer:seo" => 5.5,
            "reviewer:accessibility" => 9.0,
            _ => 8.5,
        }
    }

    fn steady_provider() -> RoleProvider {
        RoleProvider::new(|tag, _| Ok(review_json(scores_by_category(tag))))
    }

    async fn engine_with(provider: RoleProvider) -> (AuditEngine, Arc<crate::store::InMemoryStore>) {
        let (ctx, store) = context_with(Arc::new(provider), fast_config());
        store
            .save_content_item(&sample_item("guide-1"))
            .await
            .expect("test: seed");
        (AuditEngine::new(ctx), store)
    }

    #[tokio::test]
    async fn test_full_audit_appends_version_one() {
        let (engine, store) = engine_with(steady_provider()).await;
        let outcome = engine
            .audit(&ContentId::new("guide-1"), AuditMode::Full)
            .await
            .expect("test: audit");
        assert_eq!(outcome.record.audit_version, 1);
        assert_eq!(outcome.record.category_scores.len(), 8);
        assert!(outcome.record.unavailable.is_empty());
        assert!(outcome.record.overall_score >= 8.0, "{}", outcome.record.overall_score);
        assert!(outcome.record.needs_fix, "seo is below its floor");
        let history = store
            .list_audit_records(&ContentId::new("guide-1"))
            .await
            .expect("test: history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_audit_new_version_same_scores() {
        let (engine, _store) = engine_with(steady_provider()).await;
        let id = ContentId::new("guide-1");
        let first = engine.audit(&id, AuditMode::Full).await.expect("test: first");
        let second = engine.audit(&id, AuditMode::Full).await.expect("test: second");
        assert_eq!(second.record.audit_version, 2);
        assert_eq!(first.record.category_scores, second.record.category_scores);
        assert_eq!(first.record.overall_score, second.record.overall_score);
    }

    #[tokio::test]
    async fn test_quick_audit_uses_reduced_panel() {
        let (engine, _store) = engine_with(steady_provider()).await;
        let outcome = engine
            .audit(&ContentId::new("guide-1"), AuditMode::Quick)
            .await
            .expect("test: audit");
        let expected: Vec<_> = engine.panel(AuditMode::Quick);
        assert_eq!(
            outcome.record.category_scores.keys().copied().collect::<Vec<_>>(),
            {
                let mut e = expected.clone();
                e.sort();
                e
            }
        );
        assert_eq!(outcome.record.mode, "quick");
    }

    #[tokio::test]
    async fn test_full_audit_aborts_on_reviewer_timeout_and_writes_nothing() {
        let mut config = fast_config();
        config.resilience.agent_timeout_ms = 50;
        let provider = steady_provider().slow("reviewer:seo", Duration::from_millis(500));
        let (ctx, store) = context_with(Arc::new(provider), config);
        store.save_content_item(&sample_item("guide-1")).await.expect("test: seed");
        let engine = AuditEngine::new(ctx);

        let err = engine
            .audit(&ContentId::new("guide-1"), AuditMode::Full)
            .await
            .expect_err("test: must abort");
        assert!(matches!(err, OrchestratorError::AuditAborted { .. }), "{err:?}");
        let latest = store
            .get_latest_audit_record(&ContentId::new("guide-1"))
            .await
            .expect("test: read");
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_quick_audit_marks_timed_out_reviewer_unavailable() {
        let mut config = fast_config();
        config.resilience.agent_timeout_ms = 50;
        let provider = steady_provider().slow("reviewer:seo", Duration::from_millis(500));
        let (ctx, store) = context_with(Arc::new(provider), config);
        store.save_content_item(&sample_item("guide-1")).await.expect("test: seed");
        let engine = AuditEngine::new(ctx);

        let outcome = engine
            .audit(&ContentId::new("guide-1"), AuditMode::Quick)
            .await
            .expect("test: degraded audit");
        assert_eq!(outcome.record.unavailable, vec![ReviewCategory::Seo]);
        assert!(!outcome.record.category_scores.contains_key(&ReviewCategory::Seo));
        assert_eq!(outcome.record.category_scores.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_audits_get_distinct_versions() {
        let mut config = fast_config();
        config.audit.max_version_retries = 32;
        let (ctx, store) = context_with(Arc::new(steady_provider()), config);
        store.save_content_item(&sample_item("guide-1")).await.expect("test: seed");
        let engine = AuditEngine::new(ctx);

        let mut set = JoinSet::new();
        for _ in 0..8 {
            let engine = engine.clone();
            set.spawn(async move { engine.audit(&ContentId::new("guide-1"), AuditMode::Quick).await });
        }
        let mut versions = Vec::new();
        while let Some(joined) = set.join_next().await {
            versions.push(joined.expect("test: join").expect("test: audit").record.audit_version);
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_cancelled_audit_writes_nothing() {
        let provider = steady_provider().slow("reviewer:seo", Duration::from_millis(300));
        let (ctx, store) = context_with(Arc::new(provider), fast_config());
        store.save_content_item(&sample_item("guide-1")).await.expect("test: seed");
        let engine = AuditEngine::new(ctx);
        let handle = CancelHandle::new();
        let signal = handle.signal();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let err = engine
            .audit_with_cancel(&ContentId::new("guide-1"), AuditMode::Full, &signal)
            .await
            .expect_err("test: cancelled");
        canceller.await.expect("test: join");
        assert!(matches!(err, OrchestratorError::Cancelled));
        assert!(store
            .list_audit_records(&ContentId::new("guide-1"))
            .await
            .expect("test: read")
            .is_empty());
    }

    #[tokio::test]
    async fn test_content_policy_rejection_flags_item_and_writes_nothing() {
        let provider = RoleProvider::new(|tag, _| match tag {
            "reviewer:seo" => Err(ProviderError::ContentPolicyRejected("refused".into())),
            other => Ok(review_json(scores_by_category(other))),
        });
        let (engine, store) = engine_with(provider).await;
        let id = ContentId::new("guide-1");
        let err = engine
            .audit(&id, AuditMode::Quick)
            .await
            .expect_err("test: rejected");
        assert!(err.is_content_policy(), "{err:?}");
        assert!(store.list_audit_records(&id).await.expect("test: read").is_empty());
        let flagged = store.get_content_item(&id).await.expect("test: item");
        assert_eq!(flagged.review_flag.map(|f| f.operation), Some("audit".to_string()));
    }

    #[tokio::test]
    async fn test_audit_many_collects_every_outcome() {
        let (engine, _store) = engine_with(steady_provider()).await;
        let ids = vec![ContentId::new("guide-1"), ContentId::new("missing")];
        let results = engine.audit_many(&ids, AuditMode::Quick, &CancelSignal::never()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].1.as_ref().expect("test: audited").record.audit_version,
            1
        );
        assert!(matches!(results[1].1, Err(OrchestratorError::Store(StoreError::NotFound(_)))));

        let handle = CancelHandle::new();
        handle.cancel();
        let cancelled = engine.audit_many(&ids, AuditMode::Quick, &handle.signal()).await;
        assert!(cancelled
            .iter()
            .all(|(_, r)| matches!(r, Err(OrchestratorError::Cancelled))));
    }

    #[tokio::test]
    async fn test_fatal_provider_error_propagates() {
        let provider = RoleProvider::new(|_, _| Err(ProviderError::Fatal("bad key".into())));
        let (engine, _store) = engine_with(provider).await;
        let err = engine
            .audit(&ContentId::new("guide-1"), AuditMode::Quick)
            .await
            .expect_err("test: fatal");
        assert!(err.is_run_level());
    }

    #[tokio::test]
    async fn test_missing_item_is_store_error() {
        let (engine, _store) = engine_with(steady_provider()).await;
        let err = engine
            .audit(&ContentId::new("nope"), AuditMode::Quick)
            .await
            .expect_err("test: missing");
        assert!(matches!(err, OrchestratorError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn test_panel_summary_dedupes_findings() {
        let mut a = Vec::new();
        push_unique(&mut a, vec!["Add examples".into(), "add examples".into(), "x".into()]);
        assert_eq!(a, vec!["Add examples".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Quick".parse::<AuditMode>(), Ok(AuditMode::Quick));
        assert!("partial".parse::<AuditMode>().is_err());
    }
}
