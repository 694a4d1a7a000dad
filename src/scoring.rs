//! # Scoring
//!
//! ## Responsibility
//! Turn per-category reviewer scores into an overall score, a publish-gate
//! [`Verdict`], and the `needs_fix` flag of an audit.
//!
//! ## Guarantees
//! - Order-independent: scores are keyed by category in a `BTreeMap`, so the
//!   summation order is canonical no matter when each reviewer answered
//! - Missing categories do not drag the score down: weights are renormalised
//!   over the categories that were actually scored
//! - Overall scores are reported to two decimals and always lie in 0–10
//!
//! ## NOT Responsible For
//! - Running reviewers (see: `pipeline`, `audit`)

use crate::config::{ScoreWeights, ScoringConfig};
use crate::content::{ReviewCategory, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Publish-gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// At or above the ready threshold.
    Ready,
    /// Below ready, at or above the minor threshold.
    NeedsRevisionMinor,
    /// Below the minor threshold.
    NeedsRevisionMajor,
}

impl Verdict {
    /// Classify `score` against the configured thresholds.
    ///
    /// With the default policy: `8.0` is Ready, `7.99` is a minor revision,
    /// `6.99` is a major revision.
    pub fn from_score(score: f64, config: &ScoringConfig) -> Self {
        if score >= config.ready_threshold {
            Self::Ready
        } else if score >= config.minor_threshold {
            Self::NeedsRevisionMinor
        } else {
            Self::NeedsRevisionMajor
        }
    }

    /// Matching terminal run status.
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Ready => RunStatus::Ready,
            Self::NeedsRevisionMinor => RunStatus::NeedsRevisionMinor,
            Self::NeedsRevisionMajor => RunStatus::NeedsRevisionMajor,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.run_status(), f)
    }
}

/// Weighted overall score of `scores`, renormalised over the categories
/// present.
///
/// Falls back to the plain mean when every present category has weight zero
/// and returns `0.0` for an empty map.
pub fn aggregate(scores: &BTreeMap<ReviewCategory, f64>, weights: &ScoreWeights) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let (weighted, total) = scores
        .iter()
        .fold((0.0_f64, 0.0_f64), |(sum, total), (category, score)| {
            let w = weights.weight(*category).max(0.0);
            (sum + w * score, total + w)
        });
    let raw = if total > 0.0 {
        weighted / total
    } else {
        scores.values().sum::<f64>() / scores.len() as f64
    };
    round2(raw.clamp(0.0, 10.0))
}

/// Floor for `category`: its explicit floor, or the default floor.
pub fn category_floor(category: ReviewCategory, config: &ScoringConfig) -> f64 {
    config
        .category_floors
        .get(category.as_str())
        .copied()
        .unwrap_or(config.default_category_floor)
}

/// Categories scoring below their floor, in canonical order.
pub fn below_floor(scores: &BTreeMap<ReviewCategory, f64>, config: &ScoringConfig) -> Vec<ReviewCategory> {
    scores
        .iter()
        .filter(|(category, score)| **score < category_floor(**category, config))
        .map(|(category, _)| *category)
        .collect()
}

/// `true` when `overall` is below the fix threshold or any category is below
/// its floor.
pub fn needs_fix(overall: f64, scores: &BTreeMap<ReviewCategory, f64>, config: &ScoringConfig) -> bool {
    overall < config.needs_fix_threshold || !below_floor(scores, config).is_empty()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn all(score: f64) -> BTreeMap<ReviewCategory, f64> {
        ReviewCategory::ALL.iter().map(|c| (*c, score)).collect()
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(Verdict::from_score(8.0, &cfg()), Verdict::Ready);
        assert_eq!(Verdict::from_score(7.99, &cfg()), Verdict::NeedsRevisionMinor);
        assert_eq!(Verdict::from_score(7.0, &cfg()), Verdict::NeedsRevisionMinor);
        assert_eq!(Verdict::from_score(6.99, &cfg()), Verdict::NeedsRevisionMajor);
        assert_eq!(Verdict::from_score(10.0, &cfg()), Verdict::Ready);
        assert_eq!(Verdict::from_score(0.0, &cfg()), Verdict::NeedsRevisionMajor);
    }

    #[test]
    fn test_thresholds_come_from_config() {
        let strict = ScoringConfig {
            ready_threshold: 9.0,
            minor_threshold: 8.0,
            ..cfg()
        };
        assert_eq!(Verdict::from_score(8.5, &strict), Verdict::NeedsRevisionMinor);
    }

    #[test]
    fn test_uniform_scores_aggregate_to_that_score() {
        assert_eq!(aggregate(&all(7.5), &ScoreWeights::default()), 7.5);
    }

    #[test]
    fn test_default_weights_applied() {
        let mut scores = all(5.0);
        scores.insert(ReviewCategory::EngineeringUsefulness, 9.0);
        // 0.25 * 9 + 0.75 * 5 = 6.0
        assert_eq!(aggregate(&scores, &ScoreWeights::default()), 6.0);
    }

    #[test]
    fn test_missing_categories_renormalised() {
        let scores: BTreeMap<_, _> = [
            (ReviewCategory::Seo, 6.0),
            (ReviewCategory::Accessibility, 9.0),
        ]
        .into_iter()
        .collect();
        // (0.10 * 6 + 0.05 * 9) / 0.15 = 7.0
        assert_eq!(aggregate(&scores, &ScoreWeights::default()), 7.0);
    }

    #[test]
    fn test_insertion_order_does_not_change_score() {
        let pairs = [
            (ReviewCategory::Seo, 6.3),
            (ReviewCategory::Completeness, 8.1),
            (ReviewCategory::EngineeringUsefulness, 7.7),
            (ReviewCategory::Accessibility, 9.4),
        ];
        let forward: BTreeMap<_, _> = pairs.iter().copied().collect();
        let backward: BTreeMap<_, _> = pairs.iter().rev().copied().collect();
        let w = ScoreWeights::default();
        assert_eq!(aggregate(&forward, &w).to_bits(), aggregate(&backward, &w).to_bits());
    }

    #[test]
    fn test_empty_scores_are_zero() {
        assert_eq!(aggregate(&BTreeMap::new(), &ScoreWeights::default()), 0.0);
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        let w = ScoreWeights {
            seo: 0.0,
            accessibility: 0.0,
            ..ScoreWeights::default()
        };
        let scores: BTreeMap<_, _> = [
            (ReviewCategory::Seo, 4.0),
            (ReviewCategory::Accessibility, 8.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(aggregate(&scores, &w), 6.0);
    }

    #[test]
    fn test_needs_fix_on_low_overall() {
        assert!(needs_fix(7.9, &all(7.9), &cfg()));
        assert!(!needs_fix(8.2, &all(8.2), &cfg()));
    }

    #[test]
    fn test_needs_fix_on_single_category_below_floor() {
        let mut scores = all(9.0);
        scores.insert(ReviewCategory::Seo, 5.5);
        let overall = aggregate(&scores, &ScoreWeights::default());
        assert!(overall >= 8.0);
        assert_eq!(below_floor(&scores, &cfg()), vec![ReviewCategory::Seo]);
        assert!(needs_fix(overall, &scores, &cfg()));
    }

    #[test]
    fn test_explicit_floor_overrides_default() {
        let mut config = cfg();
        config.category_floors.insert("seo".into(), 8.5);
        assert_eq!(category_floor(ReviewCategory::Seo, &config), 8.5);
        assert_eq!(category_floor(ReviewCategory::Performance, &config), 6.0);
    }

    #[test]
    fn test_verdict_display_matches_run_status() {
        assert_eq!(Verdict::NeedsRevisionMinor.to_string(), "needs_revision_minor");
    }
}
