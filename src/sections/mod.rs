//! # Section-chunked generator
//!
//! ## Responsibility
//! Generate content too long for one provider call: outline first, then
//! write each section in order with only a bounded trailing window of
//! earlier sections as context, then run a coherence pass and a
//! cross-reference link pass over the whole draft.
//!
//! ## Guarantees
//! - Outline targets are rescaled to sum exactly to the requested length
//! - Adjacent sections never share a keyword target
//! - Each section writer sees at most `trailing_window` earlier sections,
//!   each cut to `trailing_excerpt_words`
//! - A section under 85% of its target gets one continuation request
//! - The item is checkpointed after the outline and after every section;
//!   sections that already have a body are skipped on resume
//! - Frozen sections are never edited
//!
//! ## NOT Responsible For
//! - Reviewing or gating the result (see: `pipeline`)

use crate::agent::{string_list, AgentContext, AgentResult, AgentRole};
use crate::content::{word_count, ContentItem, Section};
use crate::context::EngineContext;
use crate::store::save_with_retry;
use crate::OrchestratorError;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Continuation is requested below this share of the target.
pub const CONTINUATION_RATIO: f64 = 0.85;

/// Fewest words any section is planned with.
pub const MIN_SECTION_WORDS: usize = 50;

/// Outline entry before normalisation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionStub {
    /// Heading.
    pub title: String,
    /// Requested length; 0 when the outliner gave none.
    pub target_words: usize,
    /// Keyword targets.
    pub keywords: Vec<String>,
    /// Entities this section discusses.
    pub related_entities: Vec<String>,
}

/// Summary of one sectioned generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionReport {
    /// Sections written in this call (resumed sections excluded).
    pub sections_written: usize,
    /// Continuation requests issued.
    pub continuations: usize,
    /// Coherence edits applied.
    pub coherence_edits: usize,
    /// Cross-reference lines added.
    pub links_injected: usize,
    /// Final word count.
    pub total_words: usize,
}

/// Number of sections for `target_words`: at least two, at most
/// `max_section_words` per section.
pub fn section_count(target_words: usize, max_section_words: usize) -> usize {
    target_words.div_ceil(max_section_words.max(1)).max(2)
}

/// Rescale stub targets to sum to `total`, dedupe adjacent keywords, and
/// assign ids and order.
pub fn normalise_outline(stubs: Vec<SectionStub>, total: usize) -> Vec<Section> {
    let n = stubs.len();
    if n == 0 {
        return Vec::new();
    }
    let floor = MIN_SECTION_WORDS.min(total / n);
    let requested: Vec<f64> = stubs
        .iter()
        .map(|s| if s.target_words == 0 { 1.0 } else { s.target_words as f64 })
        .collect();
    let sum: f64 = requested.iter().sum();
    let spare = total.saturating_sub(floor * n);

    // Largest-remainder apportionment of the words above the floor.
    let shares: Vec<f64> = requested.iter().map(|r| r / sum * spare as f64).collect();
    let mut targets: Vec<usize> = shares.iter().map(|s| floor + s.floor() as usize).collect();
    let mut leftover = total.saturating_sub(targets.iter().sum());
    let mut by_remainder: Vec<usize> = (0..n).collect();
    by_remainder.sort_by(|a, b| {
        let ra = shares[*a] - shares[*a].floor();
        let rb = shares[*b] - shares[*b].floor();
        rb.total_cmp(&ra).then(a.cmp(b))
    });
    for i in by_remainder.into_iter().cycle().take(n * 2) {
        if leftover == 0 {
            break;
        }
        targets[i] += 1;
        leftover -= 1;
    }

    let mut previous: HashSet<String> = HashSet::new();
    stubs
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(i, (stub, target))| {
            let mut seen = HashSet::new();
            let keywords: Vec<String> = stub
                .keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .filter(|k| !previous.contains(&k.to_lowercase()))
                .filter(|k| seen.insert(k.to_lowercase()))
                .collect();
            previous = seen;
            Section {
                id: format!("s{}", i + 1),
                order: i,
                title: stub.title.trim().to_string(),
                target_words: target,
                body: String::new(),
                keywords,
                related_entities: stub.related_entities,
                frozen: false,
            }
        })
        .collect()
}

/// Trailing context for the section at `index`: up to `window` previous
/// sections with a body, each cut to its last `excerpt_words` words.
pub fn trailing_context(sections: &[Section], index: usize, window: usize, excerpt_words: usize) -> String {
    let start = index.saturating_sub(window);
    sections[start..index.min(sections.len())]
        .iter()
        .filter(|s| !s.body.is_empty())
        .map(|s| {
            let words: Vec<&str> = s.body.split_whitespace().collect();
            let tail = &words[words.len().saturating_sub(excerpt_words)..];
            format!("### {}\n{}", s.title, tail.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn slug(title: &str) -> String {
    let mut out = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Append a "Related" line to later sections that share an entity with an
/// earlier one. Returns the number of lines added. Running it twice adds
/// nothing the second time.
pub fn inject_links(sections: &mut [Section]) -> usize {
    let mut first_seen: BTreeMap<String, (usize, String, String)> = BTreeMap::new();
    let mut order: Vec<usize> = (0..sections.len()).collect();
    order.sort_by_key(|i| sections[*i].order);

    let mut added = 0;
    for i in order {
        let section = &sections[i];
        let mut links = Vec::new();
        for entity in &section.related_entities {
            let key = entity.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            match first_seen.get(&key) {
                Some((owner, title, anchor)) if *owner != i => {
                    links.push(format!("[{} in {}](#{})", entity.trim(), title, anchor));
                }
                Some(_) => {}
                None => {
                    first_seen.insert(key, (i, section.title.clone(), slug(&section.title)));
                }
            }
        }
        let section = &mut sections[i];
        if links.is_empty() || section.frozen {
            continue;
        }
        let line = format!("Related: {}", links.join(", "));
        if !section.body.contains(&line) {
            section.body = format!("{}\n\n{line}", section.body.trim_end());
            added += 1;
        }
    }
    added
}

/// Apply coherence edits in order; returns how many applied.
///
/// An edit applies when its section exists, is not frozen, and contains
/// `find`; only the first occurrence is replaced.
pub fn apply_coherence_edits(sections: &mut [Section], edits: &[Value]) -> usize {
    let mut applied = 0;
    for edit in edits {
        let (Some(id), Some(find), Some(replace)) = (
            edit.get("section_id").and_then(Value::as_str),
            edit.get("find").and_then(Value::as_str),
            edit.get("replace").and_then(Value::as_str),
        ) else {
            continue;
        };
        if find.is_empty() {
            continue;
        }
        match sections.iter_mut().find(|s| s.id == id) {
            Some(section) if !section.frozen && section.body.contains(find) => {
                section.body = section.body.replacen(find, replace, 1);
                applied += 1;
            }
            _ => debug!(section_id = id, "coherence edit did not apply"),
        }
    }
    applied
}

fn stubs_from(result: &AgentResult) -> Vec<SectionStub> {
    result
        .fields
        .get("sections")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|s| SectionStub {
                    title: s.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                    target_words: s.get("target_words").and_then(Value::as_u64).unwrap_or(0) as usize,
                    keywords: string_list(s.get("keywords")),
                    related_entities: string_list(s.get("related_entities")),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Copy title, summary, tags and SEO fields from generator-shaped output,
/// keeping existing values where the output has none.
pub fn apply_article_metadata(item: &mut ContentItem, result: &AgentResult) {
    if let Some(title) = result.text("title").filter(|t| !t.trim().is_empty()) {
        item.title = title.trim().to_string();
    }
    if let Some(summary) = result.text("summary").filter(|t| !t.trim().is_empty()) {
        item.metadata.summary = summary.trim().to_string();
    }
    let tags = result.list("tags");
    if !tags.is_empty() {
        item.metadata.tags = tags;
    }
    if let Some(seo) = result.fields.get("seo") {
        if let Some(t) = seo.get("meta_title").and_then(Value::as_str) {
            item.metadata.seo.meta_title = t.to_string();
        }
        if let Some(d) = seo.get("meta_description").and_then(Value::as_str) {
            item.metadata.seo.meta_description = d.to_string();
        }
        let keywords = string_list(seo.get("keywords"));
        if !keywords.is_empty() {
            item.metadata.seo.keywords = keywords;
        }
    }
}

/// Generates long-form items section by section.
#[derive(Clone)]
pub struct SectionGenerator {
    ctx: EngineContext,
}

impl SectionGenerator {
    /// Create a generator.
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Returns `true` when `target_words` should not be produced in one call:
    /// above the configured single-pass limit, or larger than half the
    /// generator's context window.
    pub fn needs_sections(&self, target_words: usize) -> bool {
        let generation = &self.ctx.config.generation;
        if target_words > generation.single_pass_max_words {
            return true;
        }
        let tokens = (target_words as f64 / generation.words_per_token).ceil() as usize;
        self.ctx
            .invoker
            .pool()
            .for_role(&AgentRole::Generator.tag())
            .map(|h| tokens > h.context_window_tokens() / 2)
            .unwrap_or(false)
    }

    /// Produce (or finish) a sectioned draft in `item`.
    ///
    /// # Errors
    ///
    /// Returns the failing agent's error (outline or a section) after
    /// checkpointing every completed section, or a store error when a
    /// checkpoint cannot be written.
    pub async fn generate(
        &self,
        item: &mut ContentItem,
        topic: &str,
        target_words: usize,
        retrieval: &[String],
    ) -> Result<SectionReport, OrchestratorError> {
        let generation = &self.ctx.config.generation;
        let accessor = self.ctx.registry.resolve(&item.category);
        let mut report = SectionReport::default();

        if item.sections.is_empty() {
            let count = section_count(target_words, generation.max_section_words);
            let ctx = AgentContext::new(topic)
                .for_content(&item.id)
                .with_brief(accessor.generation_brief())
                .with_target_words(target_words)
                .with_section_count(count)
                .with_retrieval(retrieval.to_vec());
            let outline = self.ctx.invoker.invoke(AgentRole::Outliner, &ctx).await?;
            apply_article_metadata(item, &outline);
            item.sections = normalise_outline(stubs_from(&outline), target_words);
            item.body.clear();
            info!(content_id = %item.id, sections = item.sections.len(), "outline ready");
            self.checkpoint(item).await?;
        }

        let outline_text = item
            .sections
            .iter()
            .map(|s| format!("{}. {} ({} words)", s.order + 1, s.title, s.target_words))
            .collect::<Vec<_>>()
            .join("\n");

        for index in 0..item.sections.len() {
            if !item.sections[index].body.trim().is_empty() {
                continue;
            }
            let (body, continued) = self
                .write_section(item, index, topic, &outline_text, retrieval)
                .await?;
            item.sections[index].body = body;
            report.sections_written += 1;
            report.continuations += usize::from(continued);
            self.checkpoint(item).await?;
        }

        if generation.coherence_pass {
            report.coherence_edits = self.coherence_pass(item, topic).await;
        }
        if generation.link_injection {
            report.links_injected = inject_links(&mut item.sections);
        }
        report.total_words = item.word_count();
        info!(
            content_id = %item.id,
            words = report.total_words,
            target = target_words,
            continuations = report.continuations,
            "sectioned draft complete"
        );
        Ok(report)
    }

    async fn write_section(
        &self,
        item: &ContentItem,
        index: usize,
        topic: &str,
        outline: &str,
        retrieval: &[String],
    ) -> Result<(String, bool), OrchestratorError> {
        let generation = &self.ctx.config.generation;
        let section = &item.sections[index];
        let trailing = trailing_context(
            &item.sections,
            index,
            generation.trailing_window,
            generation.trailing_excerpt_words,
        );
        let mut ctx = AgentContext::new(topic)
            .for_content(&item.id)
            .with_target_words(section.target_words)
            .with_block("Outline", outline)
            .with_block(
                "This section",
                format!(
                    "{}\nKeywords: {}\nRelated entities: {}",
                    section.title,
                    section.keywords.join(", "),
                    section.related_entities.join(", ")
                ),
            )
            .with_retrieval(retrieval.to_vec());
        if !trailing.is_empty() {
            ctx = ctx.with_block("Preceding sections", trailing);
        }

        let first = self.ctx.invoker.invoke(AgentRole::SectionWriter, &ctx).await?;
        let mut body = first.text("body").unwrap_or_default().trim().to_string();
        let words = word_count(&body);
        let wanted = (section.target_words as f64 * CONTINUATION_RATIO).ceil() as usize;
        if words >= wanted {
            return Ok((body, false));
        }

        debug!(
            content_id = %item.id,
            section = %section.id,
            words,
            target = section.target_words,
            "section short, requesting continuation"
        );
        let tail: Vec<&str> = body.split_whitespace().collect();
        let excerpt = tail[tail.len().saturating_sub(generation.trailing_excerpt_words)..].join(" ");
        let continuation = ctx
            .with_target_words(section.target_words.saturating_sub(words))
            .with_block("Continue from", excerpt);
        match self.ctx.invoker.invoke(AgentRole::SectionWriter, &continuation).await {
            Ok(more) => {
                if let Some(extra) = more.text("body").map(str::trim).filter(|t| !t.is_empty()) {
                    body = format!("{body}\n\n{extra}");
                }
            }
            Err(e) => warn!(
                content_id = %item.id,
                section = %section.id,
                error = %e,
                "continuation failed, keeping short section"
            ),
        }
        Ok((body, true))
    }

    /// One coherence pass. Failures only skip the pass.
    async fn coherence_pass(&self, item: &mut ContentItem, topic: &str) -> usize {
        let draft = item
            .sections
            .iter()
            .map(|s| format!("[{}] ## {}\n{}", s.id, s.title, s.body))
            .collect::<Vec<_>>()
            .join("\n\n");
        let ctx = AgentContext::new(topic).for_content(&item.id).with_draft(draft);
        match self.ctx.invoker.invoke(AgentRole::CoherenceEditor, &ctx).await {
            Ok(result) => {
                let edits = result
                    .fields
                    .get("edits")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                apply_coherence_edits(&mut item.sections, &edits)
            }
            Err(e) => {
                warn!(content_id = %item.id, error = %e, "coherence pass failed, skipping");
                0
            }
        }
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
