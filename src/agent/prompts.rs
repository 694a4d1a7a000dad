//! Prompt templates.
//!
//! Every system prompt starts with a `role: <tag>` line and ends with the
//! exact JSON shape the role must return. User prompts carry plain-text
//! markers (`Topic:`, `Target length:` ...) followed by labelled blocks.

use super::{AgentContext, AgentRole};

/// First line of every system prompt.
pub const ROLE_MARKER: &str = "role: ";
/// Topic line of a user prompt.
pub const TOPIC_MARKER: &str = "Topic: ";
/// Word target line of a user prompt (`Target length: 1200 words`).
pub const TARGET_MARKER: &str = "Target length: ";
/// Revision round line; present only for rounds after the first.
pub const ROUND_MARKER: &str = "Revision round: ";
/// Requested section count for outlines.
pub const SECTIONS_MARKER: &str = "Sections: ";
/// Comma-separated field names for the field rewriter.
pub const FIELDS_MARKER: &str = "Fields: ";

/// Value of the first line starting with `marker`, trimmed.
pub fn marker_value<'a>(prompt: &'a str, marker: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix(marker))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

const ARTICLE_SHAPE: &str = r#"{"title": string, "summary": string, "body": string (markdown), "tags": [string], "seo": {"meta_title": string, "meta_description": string, "keywords": [string]}}"#;

const REVIEW_SHAPE: &str = r#"{"score": number 0-10, "rationale": string, "issues": [string], "missing_elements": [string], "recommendations": [string]}"#;

const OUTLINE_SHAPE: &str = r#"{"title": string, "summary": string, "tags": [string], "seo": {"meta_title": string, "meta_description": string, "keywords": [string]}, "sections": [{"title": string, "target_words": integer, "keywords": [string], "related_entities": [string]}]}"#;

const SECTION_SHAPE: &str = r#"{"body": string (markdown, no heading)}"#;

const COHERENCE_SHAPE: &str = r#"{"edits": [{"section_id": string, "find": string, "replace": string}]}"#;

const FIELDS_SHAPE: &str = r#"{"fields": {"<field name>": string or [string]}}"#;

fn instructions(role: &AgentRole) -> String {
    match role {
        AgentRole::Generator => "You write accurate, practical technical content for software \
             engineers. Follow the brief, stay close to the target length, and use concrete \
             examples."
            .to_string(),
        AgentRole::Reviser => "You revise a draft using reviewer feedback. Address every point \
             raised, keep what already works, and stay close to the target length."
            .to_string(),
        AgentRole::Reviewer(category) => format!(
            "You are a strict reviewer scoring content for {}. Score from 0 to 10 where 8 means \
             ready to publish. List concrete issues, elements that are missing, and \
             recommendations. Judge only {}.",
            category.label(),
            category.label()
        ),
        AgentRole::Outliner => "You plan long-form content. Produce an ordered outline whose \
             section word targets add up to the target length. Adjacent sections must not \
             target the same keywords."
            .to_string(),
        AgentRole::SectionWriter => "You write one section of a long-form piece. Continue \
             naturally from the preceding sections, cover only this section's scope, and hit \
             its word target."
            .to_string(),
        AgentRole::CoherenceEditor => "You edit a complete long-form draft for coherence. \
             Propose minimal find/replace edits that fix contradictions, repeated material, and \
             broken transitions. Return no edits when none are needed."
            .to_string(),
        AgentRole::FieldRewriter => "You rewrite only the listed fields of a content item so \
             that the listed findings are resolved. Return every listed field and nothing else."
            .to_string(),
    }
}

fn shape(role: &AgentRole) -> &'static str {
    match role {
        AgentRole::Generator | AgentRole::Reviser => ARTICLE_SHAPE,
        AgentRole::Reviewer(_) => REVIEW_SHAPE,
        AgentRole::Outliner => OUTLINE_SHAPE,
        AgentRole::SectionWriter => SECTION_SHAPE,
        AgentRole::CoherenceEditor => COHERENCE_SHAPE,
        AgentRole::FieldRewriter => FIELDS_SHAPE,
    }
}

/// Fixed system prompt for `role`.
pub fn system_prompt(role: &AgentRole) -> String {
    format!(
        "{ROLE_MARKER}{}\n{}\n\nRespond with a single JSON object and nothing else:\n{}",
        role.tag(),
        instructions(role),
        shape(role)
    )
}

/// User prompt rendering `ctx`.
pub fn user_prompt(ctx: &AgentContext) -> String {
    let mut out = String::new();
    out.push_str(&format!("{TOPIC_MARKER}{}\n", ctx.topic));
    if let Some(words) = ctx.target_words {
        out.push_str(&format!("{TARGET_MARKER}{words} words\n"));
    }
    if let Some(n) = ctx.section_count {
        out.push_str(&format!("{SECTIONS_MARKER}{n}\n"));
    }
    if ctx.round > 0 {
        out.push_str(&format!("{ROUND_MARKER}{}\n", ctx.round));
    }
    if !ctx.fields.is_empty() {
        out.push_str(&format!("{FIELDS_MARKER}{}\n", ctx.fields.join(", ")));
    }
    if !ctx.brief.is_empty() {
        out.push_str(&format!("\n## Brief\n{}\n", ctx.brief));
    }
    for (label, text) in &ctx.blocks {
        out.push_str(&format!("\n## {label}\n{text}\n"));
    }
    push_list(&mut out, "Reviewer feedback", &ctx.feedback);
    push_list(&mut out, "Reference material", &ctx.retrieval);
    if let Some(draft) = &ctx.draft {
        out.push_str(&format!("\n## Content\n{draft}\n"));
    }
    out
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {label}\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

/// Follow-up sent once when a response does not match the expected shape.
pub fn corrective_prompt(original: &str, reason: &str) -> String {
    format!(
        "{original}\n\n## Correction\nYour previous response could not be used: {reason}.\n\
         Reply again with only the JSON object described in the instructions."
    )
}
