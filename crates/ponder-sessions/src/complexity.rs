//! Thought-count heuristic.
//!
//! Sizes a new session's plan from the query: longer, more structured and
//! more analytical questions get more thoughts, always within the level's
//! bounds.

use std::sync::LazyLock;

use ponder_core::text::sentence_count;
use regex::Regex;
use tracing::debug;

use crate::errors::{CacheError, Result};
use crate::levels::{ReasoningLevel, ThoughtBounds};

/// Query length (bytes, trimmed) at which the length component saturates.
const LENGTH_SATURATION_BYTES: f64 = 400.0;
/// Cap on the structure component.
const MAX_DENSITY: f64 = 0.4;
/// Weight per extra sentence.
const SENTENCE_WEIGHT: f64 = 0.08;
/// Weight per structural punctuation mark in single-sentence text.
const PUNCTUATION_WEIGHT: f64 = 0.05;
/// Bonus for analytical vocabulary.
const KEYWORD_BONUS: f64 = 0.25;

static ANALYTICAL_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:compare|analyze|trade-off|design|plan|critique|evaluate|review|architecture)\b",
    )
    .unwrap_or_else(|e| panic!("keyword pattern is valid: {e}"))
});

/// Pick how many thoughts a session should plan for.
///
/// An explicit target wins but must lie inside `bounds`. Fixed-size ranges
/// return their only value. Otherwise the query's [`complexity_score`]
/// interpolates between `bounds.min` and `bounds.max`.
pub fn resolve_thought_count(
    level: ReasoningLevel,
    query: &str,
    bounds: ThoughtBounds,
    explicit_target: Option<i64>,
) -> Result<u32> {
    if let Some(target) = explicit_target {
        return validate_target(target, bounds);
    }
    if bounds.min >= bounds.max {
        return Ok(bounds.min);
    }

    let score = complexity_score(query);
    let span = f64::from(bounds.max - bounds.min);
    let count = bounds.min + (span * score).round() as u32;
    debug!(%level, score, count, "resolved thought count");
    Ok(count.min(bounds.max))
}

/// Check an explicit plan against `bounds`.
pub fn validate_target(target: i64, bounds: ThoughtBounds) -> Result<u32> {
    u32::try_from(target)
        .ok()
        .filter(|n| bounds.contains(*n))
        .ok_or(CacheError::InvalidThoughtCount {
            requested: target,
            min: bounds.min,
            max: bounds.max,
        })
}

/// Complexity of `query` in `[0, 1]`.
pub fn complexity_score(query: &str) -> f64 {
    let text = query.trim();
    let length = (text.len() as f64 / LENGTH_SATURATION_BYTES).min(1.0);
    let density = structure_density(text).min(MAX_DENSITY);
    let keywords = if ANALYTICAL_KEYWORDS.is_match(text) {
        KEYWORD_BONUS
    } else {
        0.0
    };
    (length + density + keywords).clamp(0.0, 1.0)
}

fn structure_density(text: &str) -> f64 {
    let sentences = sentence_count(text);
    if sentences >= 2 {
        (sentences - 1) as f64 * SENTENCE_WEIGHT
    } else {
        let marks = text
            .chars()
            .filter(|c| matches!(c, '?' | ':' | ';' | ',' | '\n'))
            .count();
        marks as f64 * PUNCTUATION_WEIGHT
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const BASIC: ThoughtBounds = ThoughtBounds::new(3, 5);

    #[test]
    fn short_query_gets_minimum() {
        let n = resolve_thought_count(ReasoningLevel::Basic, "hi", BASIC, None).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn long_query_gets_near_maximum() {
        let q = "x".repeat(1000);
        let n = resolve_thought_count(ReasoningLevel::Basic, &q, BASIC, None).unwrap();
        assert!(n >= 4, "got {n}");
    }

    #[test]
    fn fixed_range_returns_its_value() {
        let bounds = ThoughtBounds::new(7, 7);
        let q = "compare and evaluate ".repeat(50);
        assert_eq!(
            resolve_thought_count(ReasoningLevel::Normal, &q, bounds, None).unwrap(),
            7
        );
    }

    #[test]
    fn explicit_target_inside_bounds_wins() {
        assert_eq!(
            resolve_thought_count(ReasoningLevel::Basic, "hi", BASIC, Some(5)).unwrap(),
            5
        );
    }

    #[test]
    fn explicit_target_outside_bounds_is_rejected() {
        assert_matches!(
            resolve_thought_count(ReasoningLevel::Basic, "hi", BASIC, Some(6)),
            Err(CacheError::InvalidThoughtCount { requested: 6, min: 3, max: 5 })
        );
        assert_matches!(
            resolve_thought_count(ReasoningLevel::Basic, "hi", BASIC, Some(-1)),
            Err(CacheError::InvalidThoughtCount { requested: -1, .. })
        );
    }

    #[test]
    fn keywords_match_on_word_boundaries_only() {
        let diff = |a: &str, b: &str| (complexity_score(a) - complexity_score(b)).abs();
        assert!(diff("Please Analyze this", "Please xxxxxxx this") > 0.2);
        assert!(diff("a trade-off", "a tradexoff") > 0.2);
        // "planet" must not count as "plan"
        assert!(diff("planet", "xxxxxx") < 1e-9);
    }

    #[test]
    fn sentences_add_density() {
        let one = complexity_score("Alpha beta gamma delta");
        let three = complexity_score("Alpha. Beta gamma. Delta");
        assert!(three > one);
    }

    #[test]
    fn punctuation_adds_density_in_single_sentence() {
        let plain = complexity_score("alpha  beta  gamma  delta");
        let marked = complexity_score("alpha, beta; gamma: delta");
        assert!((marked - plain - 0.15).abs() < 1e-9);
    }

    #[test]
    fn density_is_capped() {
        let many = "a, ".repeat(100);
        let score = complexity_score(&many);
        let length = (many.trim().len() as f64 / 400.0).min(1.0);
        assert!(score <= length + MAX_DENSITY + 1e-9);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn result_within_level_bounds(q in "\\PC{0,600}", level_idx in 0usize..3) {
                let level = ReasoningLevel::ALL[level_idx];
                let bounds = level.bounds();
                let n = resolve_thought_count(level, &q, bounds, None).unwrap();
                prop_assert!(bounds.contains(n));
            }

            #[test]
            fn score_is_normalized(q in "\\PC{0,600}") {
                let s = complexity_score(&q);
                prop_assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}
