//! # Pipeline orchestrator
//!
//! ## Responsibility
//! Drive one content item through the generation state machine:
//!
//! ```text
//! Generate ─► Review (reviewers run concurrently) ─► Aggregate ─► PublishGate
//!                ▲                                                   │
//!                └──────────────── Revise ◄── needs revision ────────┘
//!                                   (at most max_revision_rounds)
//! ```
//!
//! ## Guarantees
//! - The item is checkpointed after every stage; [`Orchestrator::resume`]
//!   restarts from the stage after the last completed one
//! - A stage failure keeps the partial draft and records a failure marker
//!   (stage, error kind, attempts); nothing is discarded
//! - Content-policy rejections end in `FlaggedForReview`, never retried
//! - The run deadline and cancellation both end in `Failed`; dropping the
//!   run future aborts every in-flight provider call
//! - A finished report lists issues exactly when the item needs revision
//! - One terminal event is emitted per finished run
//!
//! ## NOT Responsible For
//! - Versioned audits of existing items (see: `audit`)
//! - Running two pipelines on the same item; callers serialise per item

use crate::agent::{AgentContext, AgentError, AgentRole};
use crate::audit::{run_panel, PanelSummary};
use crate::cancel::CancelSignal;
use crate::config::ReviewFailurePolicy;
use crate::content::{
    ContentId, ContentItem, ContentStatus, FailureMarker, GenerationState, PipelineStage,
    ReviewCategory, ReviewSnapshot,
};
use crate::context::EngineContext;
use crate::notify::TerminalEvent;
use crate::provider::ProviderError;
use crate::scoring::{self, Verdict};
use crate::search::{search_or_empty, SearchFilters};
use crate::sections::{apply_article_metadata, SectionGenerator};
use crate::store::{save_with_retry, StoreError};
use crate::OrchestratorError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::field::{display, Empty};
use tracing::{error, info, warn, Instrument};

pub use crate::content::RunStatus;

/// What to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Subject of the item.
    pub topic: String,
    /// Content-type tag (`guide`, `tutorial`, ...).
    pub category: String,
    /// Requested length; the content type's default when `None`.
    #[serde(default)]
    pub target_words: Option<usize>,
    /// Id to create; a fresh one when `None`.
    #[serde(default)]
    pub content_id: Option<ContentId>,
}

impl GenerationRequest {
    /// Request for `topic` in `category` with default length and a new id.
    pub fn new(topic: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            category: category.into(),
            target_words: None,
            content_id: None,
        }
    }

    /// Set the target length.
    pub fn with_target_words(mut self, words: usize) -> Self {
        self.target_words = Some(words);
        self
    }

    /// Use a caller-chosen id.
    pub fn with_content_id(mut self, id: ContentId) -> Self {
        self.content_id = Some(id);
        self
    }
}

/// Outcome of one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Item the run produced.
    pub content_id: ContentId,
    /// Final status.
    pub status: RunStatus,
    /// Weighted overall score, once aggregated.
    pub overall_score: Option<f64>,
    /// Scores of the reviewers that answered in the last review.
    pub category_scores: BTreeMap<ReviewCategory, f64>,
    /// Reviewers that failed in the last review.
    pub unavailable: Vec<ReviewCategory>,
    /// Outstanding issues; empty unless the item needs revision.
    pub issues: Vec<String>,
    /// Revision rounds performed.
    pub rounds: u32,
    /// Words in the final draft.
    pub word_count: usize,
    /// Why the run stopped, for failed and flagged runs.
    pub failure: Option<FailureMarker>,
}

impl RunReport {
    /// Report for the checkpoint stored in `item`.
    pub fn from_item(item: &ContentItem) -> Self {
        let state = item
            .generation
            .clone()
            .unwrap_or_else(|| GenerationState::new(item.title.clone(), 0));
        let category_scores = state
            .reviews
            .iter()
            .filter_map(|r| r.score.map(|s| (r.category, s)))
            .collect();
        let unavailable = state
            .reviews
            .iter()
            .filter(|r| r.score.is_none())
            .map(|r| r.category)
            .collect();
        Self {
            content_id: item.id.clone(),
            status: state.status,
            overall_score: state.overall_score,
            category_scores,
            unavailable,
            issues: if state.status.needs_revision() { state.feedback } else { Vec::new() },
            rounds: state.round,
            word_count: item.word_count(),
            failure: state.failure,
        }
    }

    /// Returns `true` for Ready and needs-revision outcomes.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Ready || self.status.needs_revision()
    }
}

/// Why the stage loop stopped early.
enum Halt {
    /// A stage returned an error.
    Stage(PipelineStage, OrchestratorError),
    /// The run as a whole was interrupted (deadline, cancellation).
    Run(OrchestratorError),
}

fn attempts_of(error: &OrchestratorError) -> u32 {
    match error {
        OrchestratorError::Agent(e) => e.attempts(),
        OrchestratorError::StageFailed { attempts, .. } | OrchestratorError::StoreWrite { attempts, .. } => {
            *attempts
        }
        _ => 1,
    }
}

fn missing_state(id: &ContentId) -> OrchestratorError {
    OrchestratorError::Other(format!("content {id} has no generation checkpoint"))
}

/// Generates content items end to end.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: EngineContext,
    sections: SectionGenerator,
}

impl Orchestrator {
    /// Create an orchestrator over `ctx`.
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            sections: SectionGenerator::new(ctx.clone()),
            ctx,
        }
    }

    /// Generate a new item.
    ///
    /// # Errors
    ///
    /// See [`Self::generate_with_cancel`].
    pub async fn generate(&self, request: GenerationRequest) -> Result<RunReport, OrchestratorError> {
        self.generate_with_cancel(request, &CancelSignal::never()).await
    }

    /// Generate a new item, stopping early when `cancel` fires.
    ///
    /// Stage failures, timeouts and cancellation are reported through the
    /// returned [`RunReport`] (status `Failed` or `FlaggedForReview`).
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Other`] for an empty topic or an id that exists
    /// - [`OrchestratorError::Store`] / [`OrchestratorError::StoreWrite`] when
    ///   the item or its failure marker cannot be persisted
    pub async fn generate_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: &CancelSignal,
    ) -> Result<RunReport, OrchestratorError> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(OrchestratorError::Other("topic must not be empty".into()));
        }
        let id = request.content_id.clone().unwrap_or_else(ContentId::generate);
        match self.ctx.store.get_content_item(&id).await {
            Ok(_) => {
                return Err(OrchestratorError::Other(format!(
                    "content {id} already exists; resume it instead"
                )))
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let accessor = self.ctx.registry.resolve(&request.category);
        let target = request
            .target_words
            .filter(|w| *w > 0)
            .unwrap_or_else(|| accessor.default_target_words());
        let mut item = ContentItem::new_draft(id, topic, request.category.trim());
        item.generation = Some(GenerationState::new(topic, target));
        self.checkpoint(&mut item).await?;
        info!(content_id = %item.id, target_words = target, category = %item.category, "generation started");
        self.drive(item, cancel).await
    }

    /// Continue a failed or interrupted run from its last checkpoint.
    ///
    /// # Errors
    ///
    /// See [`Self::resume_with_cancel`].
    pub async fn resume(&self, id: &ContentId) -> Result<RunReport, OrchestratorError> {
        self.resume_with_cancel(id, &CancelSignal::never()).await
    }

    /// Continue a failed or interrupted run, stopping early when `cancel` fires.
    ///
    /// A run that already finished (including one flagged for human review)
    /// is reported as-is without any provider call.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Store`] when the item cannot be read
    /// - [`OrchestratorError::Other`] when the item has no generation checkpoint
    pub async fn resume_with_cancel(
        &self,
        id: &ContentId,
        cancel: &CancelSignal,
    ) -> Result<RunReport, OrchestratorError> {
        let mut item = self.ctx.store.get_content_item(id).await?;
        let state = item.generation.as_mut().ok_or_else(|| missing_state(id))?;
        match state.status {
            RunStatus::Running | RunStatus::Failed => {
                info!(
                    content_id = %id,
                    last_completed = ?state.last_completed,
                    round = state.round,
                    "resuming run"
                );
                state.status = RunStatus::Running;
                state.failure = None;
            }
            status => {
                info!(content_id = %id, %status, "run already finished, nothing to resume");
                return Ok(RunReport::from_item(&item));
            }
        }
        self.drive(item, cancel).await
    }

    async fn drive(&self, mut item: ContentItem, cancel: &CancelSignal) -> Result<RunReport, OrchestratorError> {
        let span = tracing::info_span!(
            "pipeline.run",
            content_id = %item.id,
            duration_ms = Empty,
            outcome = Empty,
            error_kind = Empty,
        );
        let started = Instant::now();
        let run_timeout = self.ctx.config.resilience.run_timeout();

        let outcome = {
            let stages = self.run_stages(&mut item).instrument(span.clone());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Halt::Run(OrchestratorError::Cancelled)),
                r = tokio::time::timeout(run_timeout, stages) => match r {
                    Ok(r) => r,
                    Err(_) => Err(Halt::Run(OrchestratorError::Timeout {
                        scope: "pipeline run".into(),
                        elapsed_ms: run_timeout.as_millis() as u64,
                    })),
                },
            }
        };

        let result = match outcome {
            Ok(()) => self.finish(&mut item).instrument(span.clone()).await,
            Err(halt) => self.fail(&mut item, halt).instrument(span.clone()).await,
        };

        span.record("duration_ms", started.elapsed().as_millis() as u64);
        match &result {
            Ok(report) => {
                span.record("outcome", display(report.status));
                if let Some(failure) = &report.failure {
                    span.record("error_kind", failure.error_kind.as_str());
                }
            }
            Err(e) => {
                span.record("outcome", "err");
                span.record("error_kind", e.kind());
            }
        }
        result
    }

    async fn run_stages(&self, item: &mut ContentItem) -> Result<(), Halt> {
        while let Some(stage) = self.next_stage(item) {
            let span = tracing::info_span!(
                "pipeline.stage",
                content_id = %item.id,
                stage = stage.as_str(),
                duration_ms = Empty,
                outcome = Empty,
            );
            let started = Instant::now();
            let result = self.run_stage(stage, item).instrument(span.clone()).await;
            let elapsed = started.elapsed();
            span.record("duration_ms", elapsed.as_millis() as u64);
            crate::metrics::record_stage_latency(stage.as_str(), elapsed);
            if let Err(e) = result {
                span.record("outcome", "err");
                return Err(Halt::Stage(stage, e));
            }
            span.record("outcome", "ok");

            if let Some(state) = item.generation.as_mut() {
                state.last_completed = Some(stage);
            }
            self.checkpoint(item).await.map_err(|e| Halt::Stage(stage, e))?;
        }
        Ok(())
    }

    /// Stage after the last completed one, while the run is still going.
    fn next_stage(&self, item: &ContentItem) -> Option<PipelineStage> {
        let state = item.generation.as_ref()?;
        if state.status != RunStatus::Running {
            return None;
        }
        Some(match state.last_completed {
            None => PipelineStage::Generate,
            Some(PipelineStage::Generate) | Some(PipelineStage::Revise) => PipelineStage::Review,
            Some(PipelineStage::Review) => PipelineStage::Aggregate,
            Some(PipelineStage::Aggregate) => PipelineStage::PublishGate,
            // The gate only leaves the run going when a revision is due.
            Some(PipelineStage::PublishGate) => PipelineStage::Revise,
        })
    }

    async fn run_stage(&self, stage: PipelineStage, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        match stage {
            PipelineStage::Generate => self.generate_draft(item).await,
            PipelineStage::Review => self.review(item).await,
            PipelineStage::Aggregate => self.aggregate(item),
            PipelineStage::PublishGate => self.gate(item),
            PipelineStage::Revise => self.revise(item).await,
        }
    }

    async fn generate_draft(&self, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        let (topic, target) = item
            .generation
            .as_ref()
            .map(|s| (s.topic.clone(), s.target_words))
            .ok_or_else(|| missing_state(&item.id))?;
        let retrieval = self.retrieve(item, &topic).await;

        if self.sections.needs_sections(target) {
            self.sections.generate(item, &topic, target, &retrieval).await?;
            return Ok(());
        }

        let accessor = self.ctx.registry.resolve(&item.category);
        let ctx = AgentContext::new(topic)
            .for_content(&item.id)
            .with_brief(accessor.generation_brief())
            .with_target_words(target)
            .with_retrieval(retrieval);
        let result = self.ctx.invoker.invoke(AgentRole::Generator, &ctx).await?;
        apply_article_metadata(item, &result);
        item.body = result.text("body").unwrap_or_default().trim().to_string();
        Ok(())
    }

    async fn retrieve(&self, item: &ContentItem, topic: &str) -> Vec<String> {
        let Some(index) = &self.ctx.search else {
            return Vec::new();
        };
        let filters = SearchFilters {
            category: None,
            exclude: Some(item.id.clone()),
        };
        search_or_empty(index.as_ref(), topic, &filters, self.ctx.config.generation.search_top_k)
            .await
            .into_iter()
            .map(|hit| format!("{}: {}", hit.title, hit.snippet))
            .collect()
    }

    async fn review(&self, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        let round = item
            .generation
            .as_ref()
            .map(|s| s.round)
            .ok_or_else(|| missing_state(&item.id))?;
        let accessor = self.ctx.registry.resolve(&item.category);
        let base = AgentContext::new(item.title.clone())
            .for_content(&item.id)
            .with_brief(accessor.generation_brief())
            .with_round(round)
            .with_draft(accessor.review_text(item));
        let panel = &self.ctx.config.generation.review_panel;
        let results = run_panel(&self.ctx.invoker, panel, &base).await;

        for (category, result) in &results {
            let Err(e) = result else { continue };
            let unrecoverable = matches!(
                e,
                AgentError::Provider {
                    source: ProviderError::Fatal(_) | ProviderError::ContentPolicyRejected(_),
                    ..
                }
            );
            if unrecoverable || self.ctx.config.generation.review_failure == ReviewFailurePolicy::Abort {
                return Err(OrchestratorError::Agent(e.clone()));
            }
            warn!(
                content_id = %item.id,
                %category,
                error_kind = e.kind(),
                "reviewer unavailable, continuing without it"
            );
        }

        let summary = PanelSummary::from_results(&results);
        if summary.scores.is_empty() {
            return Err(OrchestratorError::StageFailed {
                content_id: item.id.clone(),
                stage: PipelineStage::Review.as_str().to_string(),
                attempts: 1,
                kind: "unavailable",
                message: "no reviewer produced a score".into(),
            });
        }

        let reviews = panel
            .iter()
            .map(|category| match results.get(category) {
                Some(Ok(r)) => ReviewSnapshot {
                    category: *category,
                    score: r.score,
                    rationale: r.rationale.clone(),
                    issues: r.list("issues"),
                    recommendations: r.list("recommendations"),
                },
                _ => ReviewSnapshot {
                    category: *category,
                    score: None,
                    rationale: String::new(),
                    issues: Vec::new(),
                    recommendations: Vec::new(),
                },
            })
            .collect();
        let mut feedback = summary.issues;
        feedback.extend(summary.missing_elements.into_iter().map(|m| format!("Missing: {m}")));

        let state = item.generation.as_mut().ok_or_else(|| missing_state(&item.id))?;
        state.reviews = reviews;
        state.feedback = feedback;
        Ok(())
    }

    fn aggregate(&self, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        let id = item.id.clone();
        let state = item.generation.as_mut().ok_or_else(|| missing_state(&id))?;
        let scores: BTreeMap<ReviewCategory, f64> = state
            .reviews
            .iter()
            .filter_map(|r| r.score.map(|s| (r.category, s)))
            .collect();
        let overall = scoring::aggregate(&scores, &self.ctx.config.scoring.weights);
        state.overall_score = Some(overall);
        info!(content_id = %id, overall_score = overall, round = state.round, "scores aggregated");
        Ok(())
    }

    fn gate(&self, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        let id = item.id.clone();
        let state = item.generation.as_mut().ok_or_else(|| missing_state(&id))?;
        let overall = state.overall_score.unwrap_or(0.0);
        let status = Verdict::from_score(overall, &self.ctx.config.scoring).run_status();

        if status.needs_revision() && state.round < self.ctx.config.generation.max_revision_rounds {
            info!(content_id = %id, overall_score = overall, %status, round = state.round, "revision due");
            return Ok(());
        }
        if status.needs_revision() && state.feedback.is_empty() {
            state
                .feedback
                .push(format!("overall score {overall:.2} is below the ready threshold"));
        }
        state.status = status;
        Ok(())
    }

    async fn revise(&self, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        let state = item.generation.clone().ok_or_else(|| missing_state(&item.id))?;
        let mut feedback = state.feedback.clone();
        for review in &state.reviews {
            for rec in &review.recommendations {
                if !feedback.contains(rec) {
                    feedback.push(rec.clone());
                }
            }
        }
        let round = state.round + 1;

        if item.is_long_form() {
            for index in 0..item.sections.len() {
                let section = &item.sections[index];
                if section.frozen {
                    continue;
                }
                let ctx = AgentContext::new(state.topic.clone())
                    .for_content(&item.id)
                    .with_target_words(section.target_words)
                    .with_round(round)
                    .with_feedback(feedback.clone())
                    .with_block("This section", section.title.clone())
                    .with_draft(section.body.clone());
                let result = self.ctx.invoker.invoke(AgentRole::SectionWriter, &ctx).await?;
                if let Some(body) = result.text("body").map(str::trim).filter(|b| !b.is_empty()) {
                    item.sections[index].body = body.to_string();
                }
            }
        } else {
            let accessor = self.ctx.registry.resolve(&item.category);
            let ctx = AgentContext::new(state.topic.clone())
                .for_content(&item.id)
                .with_brief(accessor.generation_brief())
                .with_target_words(state.target_words)
                .with_round(round)
                .with_feedback(feedback)
                .with_draft(item.body.clone());
            let result = self.ctx.invoker.invoke(AgentRole::Reviser, &ctx).await?;
            apply_article_metadata(item, &result);
            if let Some(body) = result.text("body").map(str::trim).filter(|b| !b.is_empty()) {
                item.body = body.to_string();
            }
        }

        if let Some(state) = item.generation.as_mut() {
            state.round = round;
        }
        Ok(())
    }

    async fn finish(&self, item: &mut ContentItem) -> Result<RunReport, OrchestratorError> {
        let ready = item.generation.as_ref().map(|s| s.status) == Some(RunStatus::Ready);
        if ready && self.ctx.config.generation.auto_publish {
            item.status = ContentStatus::Published;
            for section in &mut item.sections {
                section.frozen = true;
            }
            self.checkpoint(item).await?;
            info!(content_id = %item.id, "published");
        }
        Ok(self.conclude(item))
    }

    async fn fail(&self, item: &mut ContentItem, halt: Halt) -> Result<RunReport, OrchestratorError> {
        let (stage, err) = match halt {
            Halt::Stage(stage, err) => (stage, err),
            Halt::Run(err) => (self.next_stage(item).unwrap_or(PipelineStage::Generate), err),
        };
        let status = if err.is_content_policy() {
            RunStatus::FlaggedForReview
        } else {
            RunStatus::Failed
        };
        let marker = FailureMarker {
            stage,
            error_kind: err.kind().to_string(),
            attempts: attempts_of(&err),
            message: err.to_string(),
            failed_at: Utc::now(),
        };
        error!(
            content_id = %item.id,
            %stage,
            error_kind = err.kind(),
            attempts = marker.attempts,
            %status,
            "run stopped, partial draft kept"
        );
        let state = item.generation.as_mut().ok_or_else(|| missing_state(&item.id))?;
        state.status = status;
        state.failure = Some(marker);
        if status == RunStatus::FlaggedForReview {
            item.flag_for_review("generate", err.to_string());
        }
        self.checkpoint(item).await?;
        Ok(self.conclude(item))
    }

    fn conclude(&self, item: &ContentItem) -> RunReport {
        let report = RunReport::from_item(item);
        crate::metrics::inc_pipeline_run(&report.status.to_string());
        self.ctx.notifier.notify(TerminalEvent {
            content_id: report.content_id.clone(),
            status: report.status,
            score: report.overall_score,
        });
        report
    }

    async fn checkpoint(&self, item: &mut ContentItem) -> Result<(), OrchestratorError> {
        item.updated_at = Utc::now();
        save_with_retry(
            self.ctx.store.as_ref(),
            item,
            self.ctx.config.resilience.store_retry_attempts,
        )
        .await
        .map_err(|(source, attempts)| OrchestratorError::StoreWrite {
            content_id: item.id.clone(),
            attempts,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::prompts::{marker_value, ROUND_MARKER};
    use crate::cancel::CancelHandle;
    use crate::notify::ChannelNotifier;
    use crate::provider::ProviderError;
    use crate::store::ContentStore;
    use crate::test_support::{context_with, fast_config, review_json, simulated_context, RoleProvider};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn article(words: usize) -> String {
        serde_json::json!({
            "title": "Retry Strategies",
            "summary": "How to retry.",
            "body": vec!["retry"; words].join(" "),
            "tags": ["queues"],
            "seo": {"meta_title": "Retry", "meta_description": "Retry safely", "keywords": ["retry"]},
        })
        .to_string()
    }

    fn round_of(req: &crate::provider::ProviderRequest) -> u32 {
        marker_value(&req.user_prompt, ROUND_MARKER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn fixed_scores(score: f64) -> RoleProvider {
        RoleProvider::new(move |tag, _| match tag {
            "generator" | "reviser" => Ok(article(300)),
            t if t.starts_with("reviewer:") => Ok(review_json(score)),
            other => Err(ProviderError::Fatal(format!("unexpected role {other}"))),
        })
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("Retry Strategies for Distributed Queues", "guide").with_target_words(1200)
    }

    #[tokio::test]
    async fn test_guide_scenario_reaches_terminal_gate_state() {
        let (ctx, store) = simulated_context();
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert!(report.is_success(), "status {:?}", report.status);
        let score = report.overall_score.expect("test: score");
        assert!((0.0..=10.0).contains(&score));
        assert_eq!(report.issues.is_empty(), report.status == RunStatus::Ready);

        let stored = store.get_content_item(&report.content_id).await.expect("test: stored");
        assert_eq!(stored.generation.as_ref().map(|g| g.status), Some(report.status));
        assert!(stored.word_count() > 0);
    }

    #[tokio::test]
    async fn test_revision_round_lifts_score_to_ready() {
        let revisions = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&revisions);
        let provider = RoleProvider::new(move |tag, req| match tag {
            "generator" => Ok(article(300)),
            "reviser" => {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(article(320))
            }
            t if t.starts_with("reviewer:") => Ok(review_json(if round_of(req) == 0 { 7.2 } else { 9.0 })),
            other => Err(ProviderError::Fatal(format!("unexpected role {other}"))),
        });
        let (ctx, _) = context_with(Arc::new(provider), fast_config());
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::Ready);
        assert_eq!(report.rounds, 1);
        assert_eq!(revisions.load(Ordering::SeqCst), 1);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_rounds_report_issues() {
        let (ctx, _) = context_with(Arc::new(fixed_scores(6.0)), fast_config());
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::NeedsRevisionMajor);
        assert_eq!(report.rounds, 1);
        assert!(!report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_minor_verdict_without_reviewer_issues_still_lists_one() {
        let provider = RoleProvider::new(|tag, _| match tag {
            "generator" | "reviser" => Ok(article(300)),
            _ => Ok(serde_json::json!({"score": 7.5, "rationale": "ok"}).to_string()),
        });
        let mut config = fast_config();
        config.generation.max_revision_rounds = 0;
        let (ctx, _) = context_with(Arc::new(provider), config);
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::NeedsRevisionMinor);
        assert_eq!(report.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_reviewer_timeout_completes_with_unavailable() {
        let mut config = fast_config();
        config.resilience.agent_timeout_ms = 200;
        let provider = fixed_scores(9.0).slow("reviewer:seo", Duration::from_secs(5));
        let (ctx, store) = context_with(Arc::new(provider), config);
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::Ready);
        assert_eq!(report.unavailable, vec![ReviewCategory::Seo]);
        assert!(!report.category_scores.contains_key(&ReviewCategory::Seo));
        let audits = store.list_audit_records(&report.content_id).await.expect("test: list");
        assert!(audits.is_empty());
    }

    #[tokio::test]
    async fn test_abort_policy_fails_run_and_keeps_draft() {
        let mut config = fast_config();
        config.resilience.agent_timeout_ms = 200;
        config.generation.review_failure = ReviewFailurePolicy::Abort;
        let provider = fixed_scores(9.0).slow("reviewer:seo", Duration::from_secs(5));
        let (ctx, store) = context_with(Arc::new(provider), config);
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::Failed);
        let failure = report.failure.expect("test: marker");
        assert_eq!(failure.stage, PipelineStage::Review);
        assert_eq!(failure.error_kind, "timeout");

        let stored = store.get_content_item(&report.content_id).await.expect("test: stored");
        assert!(!stored.body.is_empty());
        let state = stored.generation.expect("test: state");
        assert_eq!(state.last_completed, Some(PipelineStage::Generate));
        assert!(store.list_audit_records(&report.content_id).await.expect("test: list").is_empty());
    }

    #[tokio::test]
    async fn test_resume_restarts_after_last_completed_stage() {
        let healthy = Arc::new(AtomicBool::new(false));
        let generated = Arc::new(AtomicU32::new(0));
        let (h, g) = (Arc::clone(&healthy), Arc::clone(&generated));
        let provider = RoleProvider::new(move |tag, _| match tag {
            "generator" => {
                g.fetch_add(1, Ordering::SeqCst);
                Ok(article(300))
            }
            t if t.starts_with("reviewer:") && !h.load(Ordering::SeqCst) => {
                Err(ProviderError::Transient("503".into()))
            }
            t if t.starts_with("reviewer:") => Ok(review_json(9.0)),
            _ => Ok(article(300)),
        });
        let mut config = fast_config();
        config.generation.review_failure = ReviewFailurePolicy::Abort;
        let (ctx, _) = context_with(Arc::new(provider), config);
        let orchestrator = Orchestrator::new(ctx);

        let first = orchestrator.generate(request()).await.expect("test: run");
        assert_eq!(first.status, RunStatus::Failed);
        let failure = first.failure.expect("test: marker");
        assert_eq!(failure.error_kind, "transient");
        assert_eq!(failure.attempts, 2);

        healthy.store(true, Ordering::SeqCst);
        let second = orchestrator.resume(&first.content_id).await.expect("test: resume");
        assert_eq!(second.status, RunStatus::Ready);
        assert!(second.failure.is_none());
        assert_eq!(generated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_of_finished_run_is_a_no_op() {
        let (ctx, _) = context_with(Arc::new(fixed_scores(9.0)), fast_config());
        let orchestrator = Orchestrator::new(ctx);
        let first = orchestrator.generate(request()).await.expect("test: run");
        let again = orchestrator.resume(&first.content_id).await.expect("test: resume");
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_content_policy_flags_for_review() {
        let provider = RoleProvider::new(|_, _| Err(ProviderError::ContentPolicyRejected("flagged".into())));
        let (ctx, store) = context_with(Arc::new(provider), fast_config());
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::FlaggedForReview);
        let failure = report.failure.expect("test: marker");
        assert_eq!(failure.error_kind, "content_policy");
        assert_eq!(failure.attempts, 1);
        let stored = store.get_content_item(&report.content_id).await.expect("test: stored");
        assert_eq!(stored.review_flag.map(|f| f.operation), Some("generate".to_string()));
    }

    #[tokio::test]
    async fn test_fatal_provider_error_fails_run_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let provider = RoleProvider::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Fatal("401".into()))
        });
        let (ctx, _) = context_with(Arc::new(provider), fast_config());
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failure.map(|f| (f.stage, f.error_kind)), Some((PipelineStage::Generate, "fatal".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_deadline_yields_failed() {
        let mut config = fast_config();
        config.resilience.run_timeout_s = 1;
        config.resilience.agent_timeout_ms = 10_000;
        let provider = fixed_scores(9.0).slow("generator", Duration::from_secs(5));
        let (ctx, _) = context_with(Arc::new(provider), config);
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        assert_eq!(report.status, RunStatus::Failed);
        let failure = report.failure.expect("test: marker");
        assert_eq!(failure.error_kind, "timeout");
        assert_eq!(failure.stage, PipelineStage::Generate);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_failed_without_provider_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let provider = RoleProvider::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(article(10))
        });
        let (ctx, _) = context_with(Arc::new(provider), fast_config());
        let handle = CancelHandle::new();
        handle.cancel();
        let report = Orchestrator::new(ctx)
            .generate_with_cancel(request(), &handle.signal())
            .await
            .expect("test: run");
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failure.map(|f| f.error_kind), Some("cancelled".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_event_emitted_once() {
        let (notifier, mut rx) = ChannelNotifier::new(4);
        let (ctx, _) = context_with(Arc::new(fixed_scores(9.0)), fast_config());
        let ctx = ctx.with_notifier(Arc::new(notifier));
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        let event = rx.recv().await.expect("test: event");
        assert_eq!(event.content_id, report.content_id);
        assert_eq!(event.status, RunStatus::Ready);
        assert_eq!(event.score, report.overall_score);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_long_target_is_generated_in_sections() {
        let (ctx, _) = simulated_context();
        let report = Orchestrator::new(ctx)
            .generate(GenerationRequest::new("Distributed Queues", "reference").with_target_words(8000))
            .await
            .expect("test: run");
        assert!(report.is_success(), "status {:?}", report.status);
        let words = report.word_count as f64;
        assert!((words - 8000.0).abs() <= 8000.0 * 0.15, "got {words} words");
    }

    #[tokio::test]
    async fn test_existing_id_is_rejected() {
        let (ctx, _) = context_with(Arc::new(fixed_scores(9.0)), fast_config());
        let orchestrator = Orchestrator::new(ctx);
        let req = request().with_content_id(ContentId::new("fixed"));
        orchestrator.generate(req.clone()).await.expect("test: first");
        let err = orchestrator.generate(req).await.expect_err("test: duplicate");
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_auto_publish_marks_ready_item_published() {
        let mut config = fast_config();
        config.generation.auto_publish = true;
        let (ctx, store) = context_with(Arc::new(fixed_scores(9.0)), config);
        let report = Orchestrator::new(ctx).generate(request()).await.expect("test: run");
        let stored = store.get_content_item(&report.content_id).await.expect("test: stored");
        assert_eq!(stored.status, ContentStatus::Published);
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let (ctx, _) = simulated_context();
        let err = Orchestrator::new(ctx)
            .generate(GenerationRequest::new("  ", "guide"))
            .await
            .expect_err("test: empty topic");
        assert_eq!(err.kind(), "other");
    }
}
