//! # Improvement engine
//!
//! ## Responsibility
//! Read the latest audit of an item, derive scoped regeneration tasks for
//! its weak categories and missing elements, and either report them (dry
//! run) or apply them as a partial update that bumps `current_revision`.
//!
//! ## Guarantees
//! - Planning is a pure function of the item and its audit record, so two
//!   dry runs without an intervening audit propose identical tasks
//! - Dry runs make no provider calls and no writes
//! - Apply writes only the targeted fields; everything else is re-read from
//!   the store right before the write (field-level last writer wins)
//! - Audit history is never modified; only a fresh audit confirms an
//!   improvement
//! - A content-policy rejection stops the pass, writes no field, and flags
//!   the item for human review
//! - The whole pass is bounded by the run deadline and aborts on
//!   cancellation
//!
//! ## NOT Responsible For
//! - Scoring (see: `audit`)

use crate::agent::{AgentContext, AgentRole};
use crate::audit::{AuditEngine, AuditMode};
use crate::cancel::CancelSignal;
use crate::config::ScoringConfig;
use crate::content::{AuditRecord, ContentField, ContentId, ContentItem, FieldValue, ReviewCategory};
use crate::context::EngineContext;
use crate::scoring;
use crate::store::save_with_retry;
use crate::OrchestratorError;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn, Instrument};

/// Where a task stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    /// Planned only (dry run).
    Proposed,
    /// New values were written.
    Applied,
    /// The rewriter returned the current values.
    Unchanged,
    /// The rewrite failed; other tasks were still attempted.
    Failed {
        /// Error kind label.
        kind: String,
        /// Error text.
        message: String,
    },
}

/// One scoped regeneration request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImprovementTask {
    /// Fields to regenerate.
    pub fields: Vec<ContentField>,
    /// Audit findings motivating the task.
    pub reasons: Vec<String>,
    /// Proposed or applied state.
    pub state: TaskState,
}

/// Outcome of one improvement pass over one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImprovementReport {
    /// Improved item.
    pub content_id: ContentId,
    /// Audit the plan was derived from.
    pub audit_version: u32,
    /// The audit scored an older revision than the current one.
    pub stale_audit: bool,
    /// No writes were made.
    pub dry_run: bool,
    /// Categories below their target in the audit.
    pub weak_categories: Vec<ReviewCategory>,
    /// Tasks in plan order. After a content-policy rejection, tasks after
    /// the refused one stay `Proposed`.
    pub tasks: Vec<ImprovementTask>,
    /// Fields whose value actually changed.
    pub changed_fields: Vec<ContentField>,
    /// Revision before the pass.
    pub revision_before: u32,
    /// Revision after the pass (`None` when nothing was written).
    pub revision_after: Option<u32>,
    /// A provider refused a rewrite; the item was flagged and left unchanged.
    pub flagged_for_review: bool,
}

impl ImprovementReport {
    /// Returns `true` if any task failed.
    pub fn has_failures(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.state, TaskState::Failed { .. }))
    }
}

/// Options for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImproveOptions {
    /// Report the plan without calling providers or writing.
    pub dry_run: bool,
    /// Audit first (in this mode) when the item has no audit record.
    pub audit_if_missing: Option<AuditMode>,
}

/// Derive tasks from `record`.
///
/// A category is weak when it scored below the needs-fix threshold or below
/// its floor. Fields are resolved through the item's content-type accessor;
/// fields sharing the same findings are grouped into one task.
pub fn plan(
    item: &ContentItem,
    record: &AuditRecord,
    ctx: &EngineContext,
) -> Vec<ImprovementTask> {
    let accessor = ctx.registry.resolve(&item.category);
    let scoring_cfg = &ctx.config.scoring;
    let mut by_field: BTreeMap<ContentField, Vec<String>> = BTreeMap::new();

    for category in weak_categories(record, ctx) {
        let score = record.category_scores.get(&category).copied().unwrap_or_default();
        let threshold = category_target(category, scoring_cfg);
        let reason = format!("{} scored {score:.1} (target {threshold:.1})", category.label());
        for field in accessor.fields_for_category(category, item) {
            add_reason(&mut by_field, field, &reason);
        }
    }
    for element in &record.missing_elements {
        let reason = format!("missing: {element}");
        for field in accessor.fields_for_missing(element, item) {
            add_reason(&mut by_field, field, &reason);
        }
    }

    let mut grouped: BTreeMap<Vec<String>, Vec<ContentField>> = BTreeMap::new();
    for (field, reasons) in by_field {
        if item.field_value(&field).is_some() {
            grouped.entry(reasons).or_default().push(field);
        }
    }
    let mut tasks: Vec<ImprovementTask> = grouped
        .into_iter()
        .map(|(reasons, fields)| ImprovementTask {
            fields,
            reasons,
            state: TaskState::Proposed,
        })
        .collect();
    tasks.sort_by(|a, b| a.fields.cmp(&b.fields));
    tasks
}

fn add_reason(map: &mut BTreeMap<ContentField, Vec<String>>, field: ContentField, reason: &str) {
    let reasons = map.entry(field).or_default();
    if !reasons.iter().any(|r| r == reason) {
        reasons.push(reason.to_string());
    }
}

/// Convert rewriter output into a value of the right shape for `field`.
fn field_value(field: &ContentField, value: &Value) -> Option<FieldValue> {
    match (field.is_list(), value) {
        (false, Value::String(s)) if !s.trim().is_empty() => Some(FieldValue::Text(s.trim().to_string())),
        (true, Value::Array(_)) => {
            let list = crate::agent::string_list(Some(value));
            (!list.is_empty()).then_some(FieldValue::List(list))
        }
        (true, Value::String(s)) => {
            let list: Vec<String> = s
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            (!list.is_empty()).then_some(FieldValue::List(list))
        }
        _ => None,
    }
}

/// Runs improvement passes against an [`EngineContext`].
#[derive(Clone)]
pub struct ImprovementEngine {
    ctx: EngineContext,
}

impl ImprovementEngine {
    /// Create an engine.
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Improve one item.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NoAudit`] when the item has no audit and
    ///   `audit_if_missing` is `None`
    /// - [`OrchestratorError::Store`] / [`OrchestratorError::StoreWrite`] for
    ///   store failures
    /// - [`OrchestratorError::Agent`] for run-level provider failures (fatal
    ///   credentials); other rewrite failures are reported per task
    /// - [`OrchestratorError::Timeout`] when the run deadline elapses
    pub async fn improve(
        &self,
        id: &ContentId,
        options: ImproveOptions,
    ) -> Result<ImprovementReport, OrchestratorError> {
        self.improve_with_cancel(id, options, &CancelSignal::never()).await
    }

    /// Improve one item, stopping when `cancel` fires.
    ///
    /// Cancellation and the run deadline drop every in-flight rewrite; the
    /// item is only written once all tasks have finished.
    ///
    /// # Errors
    ///
    /// As [`Self::improve`], plus [`OrchestratorError::Cancelled`].
    pub async fn improve_with_cancel(
        &self,
        id: &ContentId,
        options: ImproveOptions,
        cancel: &CancelSignal,
    ) -> Result<ImprovementReport, OrchestratorError> {
        let span = tracing::info_span!(
            "improve.run",
            content_id = %id,
            dry_run = options.dry_run,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error_kind = tracing::field::Empty,
        );
        let started = Instant::now();
        let result = self.run_bounded(id, options, cancel).instrument(span.clone()).await;
        span.record("duration_ms", started.elapsed().as_millis() as u64);
        match &result {
            Ok(report) => {
                let outcome = if report.flagged_for_review {
                    "flagged"
                } else if report.has_failures() {
                    "partial"
                } else {
                    "ok"
                };
                span.record("outcome", outcome);
            }
            Err(e) => {
                span.record("outcome", "err");
                span.record("error_kind", e.kind());
                span.in_scope(|| warn!(content_id = %id, error = %e, "improvement failed"));
            }
        }
        result
    }

    /// Improve several items one after another, collecting every outcome.
    ///
    /// Items not yet started when `cancel` fires report
    /// [`OrchestratorError::Cancelled`].
    pub async fn improve_many(
        &self,
        ids: &[ContentId],
        options: ImproveOptions,
        cancel: &CancelSignal,
    ) -> Vec<(ContentId, Result<ImprovementReport, OrchestratorError>)> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push((id.clone(), self.improve_with_cancel(id, options, cancel).await));
        }
        out
    }

    async fn run_bounded(
        &self,
        id: &ContentId,
        options: ImproveOptions,
        cancel: &CancelSignal,
    ) -> Result<ImprovementReport, OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let run_timeout = self.ctx.config.resilience.run_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            r = tokio::time::timeout(run_timeout, self.run(id, options, cancel)) => match r {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::Timeout {
                    scope: "improvement run".into(),
                    elapsed_ms: run_timeout.as_millis() as u64,
                }),
            },
        }
    }

    async fn run(
        &self,
        id: &ContentId,
        options: ImproveOptions,
        cancel: &CancelSignal,
    ) -> Result<ImprovementReport, OrchestratorError> {
        let store = &self.ctx.store;
        let item = store.get_content_item(id).await?;
        let record = match store.get_latest_audit_record(id).await? {
            Some(record) => record,
            None => match options.audit_if_missing {
                Some(mode) => {
                    AuditEngine::new(self.ctx.clone())
                        .audit_with_cancel(id, mode, cancel)
                        .await?
                        .record
                }
                None => return Err(OrchestratorError::NoAudit(id.clone())),
            },
        };

        let stale_audit = record.content_revision < item.current_revision;
        if stale_audit {
            warn!(
                content_id = %id,
                audit_revision = record.content_revision,
                current_revision = item.current_revision,
                "latest audit predates the current revision"
            );
        }

        let mut tasks = plan(&item, &record, &self.ctx);
        let mut report = ImprovementReport {
            content_id: id.clone(),
            audit_version: record.audit_version,
            stale_audit,
            dry_run: options.dry_run,
            weak_categories: weak_categories(&record, &self.ctx),
            tasks: Vec::new(),
            changed_fields: Vec::new(),
            revision_before: item.current_revision,
            revision_after: None,
            flagged_for_review: false,
        };
        if options.dry_run || tasks.is_empty() {
            report.tasks = tasks;
            return Ok(report);
        }

        let mut updates: BTreeMap<ContentField, FieldValue> = BTreeMap::new();
        let mut rejection = None;
        for task in &mut tasks {
            match self.rewrite(&item, &record, task).await {
                Ok(values) => {
                    let mut changed = false;
                    for (field, value) in values {
                        if item.field_value(&field).as_ref() != Some(&value) {
                            changed = true;
                            updates.insert(field, value);
                        }
                    }
                    task.state = if changed { TaskState::Applied } else { TaskState::Unchanged };
                }
                Err(e) if e.is_run_level() => return Err(e),
                Err(e) => {
                    warn!(content_id = %id, fields = ?task.fields, error = %e, "field rewrite failed");
                    task.state = TaskState::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    };
                    if e.is_content_policy() {
                        rejection = Some(e);
                        break;
                    }
                }
            }
        }
        report.tasks = tasks;

        // A refused item gets no automated edits until a human clears it.
        if let Some(e) = rejection {
            self.ctx.flag_for_review(id, "improve", &e).await?;
            report.flagged_for_review = true;
            return Ok(report);
        }
        if updates.is_empty() {
            return Ok(report);
        }

        // Re-read so fields written by others since planning survive.
        let mut latest = store.get_content_item(id).await?;
        for (field, value) in &updates {
            if latest.set_field(field, value.clone()) {
                report.changed_fields.push(field.clone());
            } else {
                warn!(content_id = %id, field = %field, "field no longer writable, skipped");
            }
        }
        if report.changed_fields.is_empty() {
            return Ok(report);
        }
        latest.current_revision += 1;
        latest.updated_at = Utc::now();
        save_with_retry(store.as_ref(), &latest, self.ctx.config.resilience.store_retry_attempts)
            .await
            .map_err(|(source, attempts)| OrchestratorError::StoreWrite {
                content_id: id.clone(),
                attempts,
                source,
            })?;

        report.revision_after = Some(latest.current_revision);
        info!(
            content_id = %id,
            revision = latest.current_revision,
            fields = report.changed_fields.len(),
            "improvement applied"
        );
        Ok(report)
    }

    async fn rewrite(
        &self,
        item: &ContentItem,
        record: &AuditRecord,
        task: &ImprovementTask,
    ) -> Result<Vec<(ContentField, FieldValue)>, OrchestratorError> {
        let accessor = self.ctx.registry.resolve(&item.category);
        let names: Vec<String> = task.fields.iter().map(ToString::to_string).collect();
        let current = task
            .fields
            .iter()
            .map(|f| {
                let value = item.field_value(f).map(|v| v.render()).unwrap_or_default();
                format!("### {f}\n{value}")
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let ctx = AgentContext::new(item.title.clone())
            .for_content(&item.id)
            .with_brief(accessor.generation_brief())
            .with_fields(names)
            .with_block("Findings", task.reasons.join("\n"))
            .with_block("Current values", current)
            .with_feedback(record.recommendations.clone());
        let result = self.ctx.invoker.invoke(AgentRole::FieldRewriter, &ctx).await?;

        let Some(fields) = result.fields.get("fields").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        let mut values = Vec::new();
        for field in &task.fields {
            match fields.get(&field.to_string()).and_then(|v| field_value(field, v)) {
                Some(value) => values.push((field.clone(), value)),
                None => warn!(content_id = %item.id, field = %field, "rewriter omitted field"),
            }
        }
        Ok(values)
    }
}

/// Categories of `record` scoring below their target, in canonical order.
pub fn weak_categories(record: &AuditRecord, ctx: &EngineContext) -> Vec<ReviewCategory> {
    let cfg = &ctx.config.scoring;
    record
        .category_scores
        .iter()
        .filter(|(c, s)| **s < category_target(**c, cfg))
        .map(|(c, _)| *c)
        .collect()
}

/// Score a category must reach to need no work.
fn category_target(category: ReviewCategory, cfg: &ScoringConfig) -> f64 {
    cfg.needs_fix_threshold.max(scoring::category_floor(category, cfg))
}
