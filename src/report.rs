//! Per-item status reports and batch summaries.
//!
//! Every entry point (generate, audit, improve, resume) reduces its result to
//! an [`ItemReport`]; a [`BatchReport`] collects them and maps the batch to a
//! process exit code. Partial success is never collapsed into success.

use crate::audit::AuditOutcome;
use crate::content::ContentId;
use crate::improve::{ImprovementReport, TaskState};
use crate::pipeline::{RunReport, RunStatus};
use crate::provider::cost::CostSnapshot;
use crate::OrchestratorError;
use serde::Serialize;

/// Every item succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one item failed or degraded; see the report.
pub const EXIT_PARTIAL: i32 = 1;
/// Configuration could not be loaded; nothing ran.
pub const EXIT_FATAL_CONFIG: i32 = 2;

/// How one item fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Completed with every contributor available.
    Success,
    /// Completed, but some contributor was unavailable or some task failed.
    Partial,
    /// Did not complete.
    Failed,
}

/// Status line for one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    /// Item id.
    pub content_id: ContentId,
    /// `generate`, `resume`, `audit` or `improve`.
    pub operation: &'static str,
    /// Success classification.
    pub outcome: ItemOutcome,
    /// Operation-specific status (`ready`, `needs_revision_minor`, `applied`, ...).
    pub status: String,
    /// Overall score, when one was computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Outstanding issues.
    pub issues: Vec<String>,
    /// Error kind label for failed items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error text for failed items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemReport {
    /// Report for a generation or resume run.
    pub fn from_run(operation: &'static str, run: &RunReport) -> Self {
        let outcome = match run.status {
            RunStatus::Failed | RunStatus::FlaggedForReview | RunStatus::Running => ItemOutcome::Failed,
            _ if !run.unavailable.is_empty() => ItemOutcome::Partial,
            _ => ItemOutcome::Success,
        };
        Self {
            content_id: run.content_id.clone(),
            operation,
            outcome,
            status: run.status.to_string(),
            score: run.overall_score,
            issues: run.issues.clone(),
            error_kind: run.failure.as_ref().map(|f| f.error_kind.clone()),
            error: run.failure.as_ref().map(|f| f.message.clone()),
        }
    }

    /// Report for a recorded audit.
    pub fn from_audit(audit: &AuditOutcome) -> Self {
        let record = &audit.record;
        Self {
            content_id: record.content_id.clone(),
            operation: "audit",
            outcome: if record.unavailable.is_empty() {
                ItemOutcome::Success
            } else {
                ItemOutcome::Partial
            },
            status: audit.verdict.to_string(),
            score: Some(record.overall_score),
            issues: record.issues.clone(),
            error_kind: None,
            error: None,
        }
    }

    /// Report for an improvement pass.
    pub fn from_improvement(report: &ImprovementReport) -> Self {
        let failures: Vec<String> = report
            .tasks
            .iter()
            .filter_map(|t| match &t.state {
                TaskState::Failed { kind, message } => Some(format!("{kind}: {message}")),
                _ => None,
            })
            .collect();
        let status = if report.flagged_for_review {
            "flagged_for_review"
        } else if report.dry_run {
            "dry_run"
        } else if report.revision_after.is_some() {
            "applied"
        } else {
            "unchanged"
        };
        let outcome = if report.flagged_for_review {
            ItemOutcome::Failed
        } else if failures.is_empty() {
            ItemOutcome::Success
        } else {
            ItemOutcome::Partial
        };
        Self {
            content_id: report.content_id.clone(),
            operation: "improve",
            outcome,
            status: status.to_string(),
            score: None,
            issues: report.tasks.iter().flat_map(|t| t.reasons.clone()).collect(),
            error_kind: report.flagged_for_review.then(|| "content_policy".to_string()),
            error: (!failures.is_empty()).then(|| failures.join("; ")),
        }
    }

    /// Report for an operation that returned an error.
    pub fn from_error(operation: &'static str, content_id: ContentId, err: &OrchestratorError) -> Self {
        Self {
            content_id,
            operation,
            outcome: ItemOutcome::Failed,
            status: "error".to_string(),
            score: None,
            issues: Vec::new(),
            error_kind: Some(err.kind().to_string()),
            error: Some(err.to_string()),
        }
    }
}

/// All item reports of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Items in request order.
    pub items: Vec<ItemReport>,
    /// Items that fully succeeded.
    pub succeeded: usize,
    /// Items that completed with degradation.
    pub partial: usize,
    /// Items that did not complete.
    pub failed: usize,
    /// Provider spend during the invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostSnapshot>,
}

impl BatchReport {
    /// Summarise `items`.
    pub fn new(items: Vec<ItemReport>) -> Self {
        let count = |o: ItemOutcome| items.iter().filter(|i| i.outcome == o).count();
        let (succeeded, partial, failed) = (
            count(ItemOutcome::Success),
            count(ItemOutcome::Partial),
            count(ItemOutcome::Failed),
        );
        Self {
            items,
            succeeded,
            partial,
            failed,
            cost: None,
        }
    }

    /// Attach a cost snapshot.
    pub fn with_cost(mut self, cost: CostSnapshot) -> Self {
        self.cost = Some(cost);
        self
    }

    /// [`EXIT_SUCCESS`] when every item succeeded, [`EXIT_PARTIAL`] otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.partial == 0 && self.failed == 0 {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL
        }
    }
}
