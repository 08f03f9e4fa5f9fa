//! Text-similarity and confidence-scoring primitives shared by detection
//! and cleanup.

use std::collections::HashSet;

use sift_types::{Pattern, PatternType};

/// Description overlap at or above this ratio is a duplicate outright.
pub const DUPLICATE_SIMILARITY_THRESHOLD: f64 = 0.85;
/// Overlap at or above this ratio is a duplicate when type and rate agree.
pub const RELATED_SIMILARITY_THRESHOLD: f64 = 0.70;
/// Maximum success-rate distance for the related-duplicate branch.
pub const RELATED_RATE_TOLERANCE: f64 = 0.05;

fn normalize_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Token-overlap similarity between two descriptions.
///
/// Returns 1.0 for identical normalized strings and 0.0 when either side is
/// empty after normalization.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = normalize_tokens(a);
    let tokens_b = normalize_tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    if tokens_a == tokens_b {
        return 1.0;
    }

    let set_a: HashSet<&str> = tokens_a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = tokens_b.iter().map(String::as_str).collect();
    let common = set_a.intersection(&set_b).count();
    let denominator = set_a.len().max(set_b.len());
    common as f64 / denominator as f64
}

/// Duplicate predicate over the fields the comparison actually needs.
pub fn is_duplicate_fields(
    description_a: &str,
    type_a: PatternType,
    rate_a: f64,
    description_b: &str,
    type_b: PatternType,
    rate_b: f64,
) -> bool {
    let similarity = text_similarity(description_a, description_b);
    if similarity >= DUPLICATE_SIMILARITY_THRESHOLD {
        return true;
    }
    similarity >= RELATED_SIMILARITY_THRESHOLD
        && type_a == type_b
        && (rate_a - rate_b).abs() <= RELATED_RATE_TOLERANCE
}

/// Duplicate predicate over two stored patterns.
pub fn is_duplicate(a: &Pattern, b: &Pattern) -> bool {
    is_duplicate_fields(
        &a.description,
        a.pattern_type,
        a.success_rate,
        &b.description,
        b.pattern_type,
        b.success_rate,
    )
}

/// Coarse confidence proxy from a sample total.
///
/// A step function, not a p-value; the steps are an intentional
/// simplification over real significance testing.
pub fn confidence_from_sample_count(samples: usize) -> f64 {
    if samples < 10 {
        0.5
    } else if samples < 20 {
        0.6
    } else if samples < 50 {
        0.7
    } else if samples < 100 {
        0.8
    } else {
        0.9
    }
}

#[cfg(test)]
mod tests {
    use super::{confidence_from_sample_count, is_duplicate_fields, text_similarity};
    use sift_types::PatternType;

    fn joined(range: impl Iterator<Item = String>) -> String {
        range.collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn identical_normalized_strings_score_one() {
        assert_eq!(text_similarity("Fast replies win!", "fast replies win"), 1.0);
    }

    #[test]
    fn empty_side_scores_zero() {
        assert_eq!(text_similarity("", "words here"), 0.0);
        assert_eq!(text_similarity("!!!", "words here"), 0.0);
    }

    #[test]
    fn overlap_ratio_uses_larger_token_set() {
        // 2 common tokens over max(3, 2).
        let similarity = text_similarity("alpha beta gamma", "alpha beta");
        assert!((similarity - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn boundary_at_exactly_085_is_duplicate_regardless_of_type() {
        // 17 common tokens over max(20, 20) = 0.85.
        let a = joined((0..20).map(|i| format!("word{i}")));
        let b = joined(
            (0..17)
                .map(|i| format!("word{i}"))
                .chain((17..20).map(|i| format!("other{i}"))),
        );
        assert!((text_similarity(&a, &b) - 0.85).abs() < 1e-9);
        assert!(is_duplicate_fields(
            &a,
            PatternType::Timing,
            0.9,
            &b,
            PatternType::WordUsage,
            0.1,
        ));
    }

    #[test]
    fn boundary_at_084_with_different_type_is_not_duplicate() {
        // 21 common tokens over max(25, 25) = 0.84.
        let a = joined((0..25).map(|i| format!("word{i}")));
        let b = joined(
            (0..21)
                .map(|i| format!("word{i}"))
                .chain((21..25).map(|i| format!("other{i}"))),
        );
        assert!((text_similarity(&a, &b) - 0.84).abs() < 1e-9);
        assert!(!is_duplicate_fields(
            &a,
            PatternType::Timing,
            0.5,
            &b,
            PatternType::WordUsage,
            0.5,
        ));
    }

    #[test]
    fn related_branch_requires_type_and_rate_agreement() {
        // 3 common tokens over max(4, 4) = 0.75.
        let a = "alpha beta gamma delta";
        let b = "alpha beta gamma epsilon";
        assert!(is_duplicate_fields(
            a,
            PatternType::WordUsage,
            0.60,
            b,
            PatternType::WordUsage,
            0.64,
        ));
        assert!(!is_duplicate_fields(
            a,
            PatternType::WordUsage,
            0.60,
            b,
            PatternType::WordUsage,
            0.66,
        ));
        assert!(!is_duplicate_fields(
            a,
            PatternType::WordUsage,
            0.60,
            b,
            PatternType::Timing,
            0.60,
        ));
    }

    #[test]
    fn confidence_steps_match_sample_totals() {
        let cases = [(9, 0.5), (19, 0.6), (49, 0.7), (99, 0.8), (150, 0.9)];
        for (samples, expected) in cases {
            assert_eq!(confidence_from_sample_count(samples), expected);
        }
    }
}
