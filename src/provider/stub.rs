//! Deterministic providers for tests and offline runs.
//!
//! - [`ScriptedProvider`]: answers with a caller-supplied closure
//! - [`SimulatedProvider`]: answers every agent role with well-formed JSON
//!   derived from a hash of the prompt, so identical input always yields
//!   identical output

use super::{Completion, Provider, ProviderError, ProviderRequest};
use crate::agent::prompts::{
    marker_value, FIELDS_MARKER, ROLE_MARKER, ROUND_MARKER, SECTIONS_MARKER, TARGET_MARKER,
    TOPIC_MARKER,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

type Handler = dyn Fn(&ProviderRequest) -> Result<Completion, ProviderError> + Send + Sync;

/// Role tag written into the system prompt by the agent layer.
pub fn role_tag(request: &ProviderRequest) -> Option<&str> {
    request
        .system_prompt
        .lines()
        .find_map(|l| l.strip_prefix(ROLE_MARKER))
        .map(str::trim)
}

/// Provider driven by a closure.
///
/// ```rust,ignore
/// let provider = ScriptedProvider::new("stub", |req| {
///     Ok(Completion::from_text(&req.user_prompt, r#"{"score": 8.0, "rationale": "ok"}"#))
/// });
/// ```
#[derive(Clone)]
pub struct ScriptedProvider {
    id: String,
    model: String,
    handler: Arc<Handler>,
    delay: Duration,
}

impl ScriptedProvider {
    /// Create a provider answering with `handler`.
    pub fn new<F>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ProviderRequest) -> Result<Completion, ProviderError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            model: "scripted".to_string(),
            handler: Arc::new(handler),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(request)
    }
}

/// Offline provider that understands every agent role.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    id: String,
    model: String,
}

const VOCABULARY: [&str; 24] = [
    "queue", "consumer", "retry", "backoff", "latency", "throughput", "idempotent", "broker",
    "partition", "offset", "jitter", "budget", "failure", "timeout", "ordering", "delivery",
    "producer", "checkpoint", "replay", "poison", "message", "acknowledge", "window", "capacity",
];

impl SimulatedProvider {
    /// Create a simulated provider.
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
        }
    }

    fn seed(role: &str, prompt: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        role.hash(&mut hasher);
        prompt.hash(&mut hasher);
        hasher.finish()
    }

    fn prose(seed: u64, topic: &str, words: usize) -> String {
        let topic_words: Vec<&str> = topic.split_whitespace().collect();
        let mut out = Vec::with_capacity(words);
        let mut state = seed;
        for i in 0..words {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let word = if !topic_words.is_empty() && i % 9 == 0 {
                topic_words[(state >> 33) as usize % topic_words.len()].to_lowercase()
            } else {
                VOCABULARY[(state >> 33) as usize % VOCABULARY.len()].to_string()
            };
            if i % 12 == 11 || i + 1 == words {
                out.push(format!("{word}."));
            } else {
                out.push(word);
            }
        }
        out.join(" ")
    }

    fn article(seed: u64, topic: &str, words: usize) -> Value {
        json!({
            "title": topic,
            "summary": format!("A practical look at {topic}."),
            "body": Self::prose(seed, topic, words),
            "tags": topic.split_whitespace().take(3).map(str::to_lowercase).collect::<Vec<_>>(),
            "seo": {
                "meta_title": topic,
                "meta_description": format!("Learn {topic} with worked examples."),
                "keywords": [topic.to_lowercase()],
            }
        })
    }

    fn review(seed: u64, category: &str, round: u32) -> Value {
        let base = 6.5 + (seed % 300) as f64 / 100.0;
        let score = (base + 0.5 * f64::from(round)).min(10.0);
        let score = (score * 10.0).round() / 10.0;
        let mut issues = Vec::new();
        let mut missing = Vec::new();
        if score < 8.0 {
            issues.push(format!("{category} coverage is thin in places"));
            missing.push(format!("worked example for {category}"));
        }
        json!({
            "score": score,
            "rationale": format!("Simulated {category} review."),
            "issues": issues,
            "missing_elements": missing,
            "recommendations": [format!("Strengthen {category} with a concrete example.")],
        })
    }

    fn outline(topic: &str, total: usize, count: usize) -> Value {
        let count = count.max(1);
        let per = total / count;
        let sections: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "title": format!("{topic}: part {}", i + 1),
                    "target_words": per,
                    "keywords": [format!("{}-{}", topic.to_lowercase().replace(' ', "-"), i + 1)],
                    "related_entities": [format!("Entity{}", i % 3)],
                })
            })
            .collect();
        json!({
            "title": topic,
            "summary": format!("A long-form guide to {topic}."),
            "tags": [topic.to_lowercase()],
            "seo": {
                "meta_title": topic,
                "meta_description": format!("Everything about {topic}."),
                "keywords": [topic.to_lowercase()],
            },
            "sections": sections,
        })
    }

    fn rewrite(seed: u64, topic: &str, fields: &str) -> Value {
        let mut out = serde_json::Map::new();
        for name in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let value = if name == "tags" || name == "seo.keywords" {
                json!([topic.to_lowercase(), "engineering"])
            } else if name == "body" || name.starts_with("sections[") {
                Value::String(Self::prose(seed ^ name.len() as u64, topic, 220))
            } else {
                Value::String(format!("Improved {name} for {topic}"))
            };
            out.insert(name.to_string(), value);
        }
        json!({ "fields": out })
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let role = role_tag(request)
            .ok_or_else(|| ProviderError::Fatal("simulated provider needs a role marker".into()))?;
        let prompt = &request.user_prompt;
        let seed = Self::seed(role, prompt);
        let topic = marker_value(prompt, TOPIC_MARKER).unwrap_or("the topic");
        let target = marker_value(prompt, TARGET_MARKER)
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(600);
        let round = marker_value(prompt, ROUND_MARKER)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        let value = match role.split(':').next().unwrap_or(role) {
            "generator" | "reviser" => Self::article(seed, topic, target),
            "reviewer" => Self::review(seed, role.split(':').nth(1).unwrap_or("general"), round),
            "outliner" => {
                let count = marker_value(prompt, SECTIONS_MARKER)
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(4);
                Self::outline(topic, target, count)
            }
            "section_writer" => json!({ "body": Self::prose(seed, topic, target) }),
            "coherence_editor" => json!({ "edits": [] }),
            "field_rewriter" => {
                Self::rewrite(seed, topic, marker_value(prompt, FIELDS_MARKER).unwrap_or(""))
            }
            other => {
                return Err(ProviderError::Fatal(format!("unknown role '{other}'")));
            }
        };
        Ok(Completion::from_text(prompt, value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(role: &str, prompt: &str) -> ProviderRequest {
        ProviderRequest::new(format!("{ROLE_MARKER}{role}\nYou are a reviewer."), prompt)
    }

    #[test]
    fn test_role_tag_reads_marker() {
        let req = request("reviewer:seo", "x");
        assert_eq!(role_tag(&req), Some("reviewer:seo"));
        assert_eq!(role_tag(&ProviderRequest::new("plain", "x")), None);
    }

    #[tokio::test]
    async fn test_simulated_review_is_deterministic() {
        let p = SimulatedProvider::new("sim", "sim-1");
        let req = request("reviewer:seo", "Topic: queues\nbody text");
        let a = p.generate(&req).await.expect("test: first");
        let b = p.generate(&req).await.expect("test: second");
        assert_eq!(a.text, b.text);
        let v: Value = serde_json::from_str(&a.text).expect("test: json");
        let score = v["score"].as_f64().expect("test: score");
        assert!((0.0..=10.0).contains(&score));
    }

    #[tokio::test]
    async fn test_simulated_generator_hits_target_length() {
        let p = SimulatedProvider::new("sim", "sim-1");
        let req = request("generator", "Topic: Retry Strategies\nTarget length: 500 words");
        let c = p.generate(&req).await.expect("test: ok");
        let v: Value = serde_json::from_str(&c.text).expect("test: json");
        let body = v["body"].as_str().expect("test: body");
        assert_eq!(body.split_whitespace().count(), 500);
    }

    #[tokio::test]
    async fn test_simulated_outline_has_requested_sections() {
        let p = SimulatedProvider::new("sim", "sim-1");
        let req = request("outliner", "Topic: Queues\nTarget length: 6000 words\nSections: 6");
        let c = p.generate(&req).await.expect("test: ok");
        let v: Value = serde_json::from_str(&c.text).expect("test: json");
        assert_eq!(v["sections"].as_array().map(Vec::len), Some(6));
    }

    #[tokio::test]
    async fn test_missing_role_is_fatal() {
        let p = SimulatedProvider::new("sim", "sim-1");
        let err = p
            .generate(&ProviderRequest::new("no marker", "x"))
            .await
            .expect_err("test: fatal");
        assert_eq!(err.kind(), "fatal");
    }

    #[tokio::test]
    async fn test_scripted_provider_uses_handler() {
        let p = ScriptedProvider::new("s", |req| Ok(Completion::from_text(&req.user_prompt, "hi")));
        let c = p.generate(&ProviderRequest::new("s", "u")).await.expect("test: ok");
        assert_eq!(c.text, "hi");
        assert_eq!(p.id(), "s");
    }
}
