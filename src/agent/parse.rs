//! Output-shape validation.
//!
//! Completion text is never trusted at use-sites: it is converted here into
//! an [`AgentOutput`], either a validated JSON object or the raw text with
//! the reason it was rejected.

use super::AgentRole;
use serde_json::{Map, Value};

/// Validated (or rejected) agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// A JSON object matching the role's shape.
    Parsed(Map<String, Value>),
    /// Text that could not be used.
    ParseError {
        /// Completion text as received.
        raw: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl AgentOutput {
    /// Returns `true` for [`AgentOutput::Parsed`].
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Pull a JSON object out of text that may carry markdown fences or preamble.
pub fn extract_json_from_text(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
        _ => None,
    }
}

/// Parse `raw` and check it against the shape expected from `role`.
pub fn parse_output(role: &AgentRole, raw: &str) -> AgentOutput {
    let reject = |reason: String| AgentOutput::ParseError {
        raw: raw.to_string(),
        reason,
    };

    let Some(json) = extract_json_from_text(raw) else {
        return reject("no JSON object found".to_string());
    };
    let mut object = match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return reject("top-level value is not an object".to_string()),
        Err(e) => return reject(format!("invalid JSON: {e}")),
    };

    match validate(role, &mut object) {
        Ok(()) => AgentOutput::Parsed(object),
        Err(reason) => reject(reason),
    }
}

fn validate(role: &AgentRole, obj: &mut Map<String, Value>) -> Result<(), String> {
    match role {
        AgentRole::Generator | AgentRole::Reviser => {
            require_text(obj, "title")?;
            require_text(obj, "body")?;
            optional_list(obj, "tags")?;
            optional_object(obj, "seo")
        }
        AgentRole::Reviewer(_) => {
            let score = normalise_score(obj.get("score"))?;
            obj.insert("score".to_string(), Value::from(score));
            require_string(obj, "rationale")?;
            for key in ["issues", "missing_elements", "recommendations"] {
                optional_list(obj, key)?;
            }
            Ok(())
        }
        AgentRole::Outliner => {
            let sections = obj
                .get("sections")
                .and_then(Value::as_array)
                .ok_or_else(|| "'sections' must be an array".to_string())?;
            if sections.is_empty() {
                return Err("'sections' is empty".to_string());
            }
            for (i, s) in sections.iter().enumerate() {
                let title = s.get("title").and_then(Value::as_str).unwrap_or("");
                if title.trim().is_empty() {
                    return Err(format!("section {i} has no title"));
                }
                if s.get("target_words").and_then(Value::as_u64).is_none() {
                    return Err(format!("section {i} has no integer 'target_words'"));
                }
            }
            Ok(())
        }
        AgentRole::SectionWriter => require_text(obj, "body"),
        AgentRole::CoherenceEditor => {
            let edits = obj
                .get("edits")
                .and_then(Value::as_array)
                .ok_or_else(|| "'edits' must be an array".to_string())?;
            for (i, e) in edits.iter().enumerate() {
                for key in ["section_id", "find", "replace"] {
                    if e.get(key).and_then(Value::as_str).is_none() {
                        return Err(format!("edit {i} is missing string '{key}'"));
                    }
                }
            }
            Ok(())
        }
        AgentRole::FieldRewriter => match obj.get("fields").and_then(Value::as_object) {
            Some(fields) if !fields.is_empty() => Ok(()),
            _ => Err("'fields' must be a non-empty object".to_string()),
        },
    }
}

/// Reviewers sometimes send `"8.5"` or `"8.5/10"`; accept both, clamp nothing.
fn normalise_score(value: Option<&Value>) -> Result<f64, String> {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .split('/')
            .next()
            .and_then(|v| v.trim().parse::<f64>().ok()),
        _ => None,
    }
    .ok_or_else(|| "'score' must be a number".to_string())?;

    if !score.is_finite() || !(0.0..=10.0).contains(&score) {
        return Err(format!("'score' {score} is outside 0-10"));
    }
    Ok(score)
}

fn require_string(obj: &Map<String, Value>, key: &str) -> Result<(), String> {
    match obj.get(key) {
        Some(Value::String(_)) => Ok(()),
        _ => Err(format!("'{key}' must be a string")),
    }
}

fn require_text(obj: &Map<String, Value>, key: &str) -> Result<(), String> {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(format!("'{key}' must be a non-empty string")),
    }
}

fn optional_list(obj: &Map<String, Value>, key: &str) -> Result<(), String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(_) => Err(format!("'{key}' must be an array of strings")),
    }
}

fn optional_object(obj: &Map<String, Value>, key: &str) -> Result<(), String> {
    match obj.get(key) {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(format!("'{key}' must be an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ReviewCategory;

    fn reviewer() -> AgentRole {
        AgentRole::Reviewer(ReviewCategory::Completeness)
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json_from_text(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_from_preamble() {
        let text = "Sure! {\"a\": {\"b\": 2}} hope that helps";
        assert_eq!(extract_json_from_text(text), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_extract_json_none_without_braces() {
        assert_eq!(extract_json_from_text("no json here"), None);
    }

    #[test]
    fn test_review_with_string_score_is_normalised() {
        let out = parse_output(&reviewer(), r#"{"score": "7.5/10", "rationale": "ok"}"#);
        match out {
            AgentOutput::Parsed(map) => assert_eq!(map["score"].as_f64(), Some(7.5)),
            other => panic!("expected parsed, got {other:?}"),
        }
    }

    #[test]
    fn test_review_out_of_range_score_rejected() {
        let out = parse_output(&reviewer(), r#"{"score": 14, "rationale": "ok"}"#);
        assert!(matches!(out, AgentOutput::ParseError { ref reason, .. } if reason.contains("0-10")));
    }

    #[test]
    fn test_review_missing_rationale_rejected() {
        let out = parse_output(&reviewer(), r#"{"score": 8}"#);
        assert!(!out.is_parsed());
    }

    #[test]
    fn test_prose_answer_keeps_raw_text() {
        let out = parse_output(&AgentRole::Generator, "I cannot produce JSON today.");
        match out {
            AgentOutput::ParseError { raw, .. } => assert_eq!(raw, "I cannot produce JSON today."),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_generator_requires_body() {
        let out = parse_output(&AgentRole::Generator, r#"{"title": "t", "body": "  "}"#);
        assert!(!out.is_parsed());
        let ok = parse_output(&AgentRole::Generator, r#"{"title": "t", "body": "text"}"#);
        assert!(ok.is_parsed());
    }

    #[test]
    fn test_outline_sections_need_targets() {
        let bad = r#"{"sections": [{"title": "Intro"}]}"#;
        assert!(!parse_output(&AgentRole::Outliner, bad).is_parsed());
        let good = r#"{"sections": [{"title": "Intro", "target_words": 300}]}"#;
        assert!(parse_output(&AgentRole::Outliner, good).is_parsed());
    }

    #[test]
    fn test_coherence_edits_may_be_empty() {
        assert!(parse_output(&AgentRole::CoherenceEditor, r#"{"edits": []}"#).is_parsed());
        let bad = r#"{"edits": [{"section_id": "s1", "find": "a"}]}"#;
        assert!(!parse_output(&AgentRole::CoherenceEditor, bad).is_parsed());
    }

    #[test]
    fn test_field_rewriter_needs_fields() {
        assert!(!parse_output(&AgentRole::FieldRewriter, r#"{"fields": {}}"#).is_parsed());
        assert!(parse_output(&AgentRole::FieldRewriter, r#"{"fields": {"title": "x"}}"#).is_parsed());
    }
}
