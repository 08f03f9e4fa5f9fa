//! Detection rule constants.
//!
//! Per-type thresholds live in memory only; they are tuning knobs, not
//! persisted configuration.

/// Thresholds applied by the detection strategies and the candidate filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRules {
    /// A token is emerging when its successful-cohort count is at least this
    /// multiple of its failure-cohort count.
    pub word_significance_ratio: f64,
    /// Minimum successful-cohort occurrences for an emerging token.
    pub word_min_occurrences: usize,
    /// Minimum responses per side for word-usage comparison.
    pub word_min_cohort: usize,
    /// Minimum absolute mean conversion-time difference, in minutes.
    pub timing_min_delta_minutes: f64,
    /// Minimum outcomes per side for the timing comparison.
    pub timing_min_cohort: usize,
    /// Minimum mean word-count difference between cohorts.
    pub style_min_word_delta: f64,
    /// Minimum responses per side for the style comparison.
    pub style_min_cohort: usize,
    /// Minimum mean sentiment difference between cohorts.
    pub tone_min_sentiment_delta: f64,
    /// Minimum responses per side for the tone comparison.
    pub tone_min_cohort: usize,
    /// Candidates below this strength are dropped before persistence.
    pub min_strength: f64,
    /// Minimum outcome records for a detection run.
    pub min_sample_size: usize,
    /// Lower floor applied when auxiliary response data exists for the window.
    pub min_sample_size_with_auxiliary: usize,
    /// Effectiveness score at or above which a response joins the successful
    /// cohort even without a purchase.
    pub effective_score_floor: f64,
    /// Effectiveness score below which a non-purchase response joins the
    /// unsuccessful cohort.
    pub ineffective_score_ceiling: f64,
    /// Curated samples per cohort handed to the analysis collaborator.
    pub ai_sample_limit: usize,
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self {
            word_significance_ratio: 1.5,
            word_min_occurrences: 3,
            word_min_cohort: 3,
            timing_min_delta_minutes: 5.0,
            timing_min_cohort: 3,
            style_min_word_delta: 5.0,
            style_min_cohort: 5,
            tone_min_sentiment_delta: 0.2,
            tone_min_cohort: 5,
            min_strength: 0.4,
            min_sample_size: 10,
            min_sample_size_with_auxiliary: 5,
            effective_score_floor: 0.7,
            ineffective_score_ceiling: 0.4,
            ai_sample_limit: 10,
        }
    }
}

/// Tokens excluded from word-frequency comparison.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "did", "do", "for", "from",
    "had", "has", "have", "he", "her", "his", "i", "if", "in", "is", "it", "its", "me", "my",
    "no", "not", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them", "then",
    "there", "they", "this", "to", "was", "we", "were", "what", "when", "which", "will", "with",
    "would", "you", "your",
];

/// Whether `token` should be excluded from frequency comparison.
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::{is_stop_word, DetectionRules};

    #[test]
    fn defaults_match_documented_thresholds() {
        let rules = DetectionRules::default();
        assert_eq!(rules.word_significance_ratio, 1.5);
        assert_eq!(rules.word_min_occurrences, 3);
        assert_eq!(rules.timing_min_delta_minutes, 5.0);
        assert_eq!(rules.style_min_word_delta, 5.0);
        assert_eq!(rules.tone_min_sentiment_delta, 0.2);
        assert_eq!(rules.min_strength, 0.4);
    }

    #[test]
    fn stop_words_cover_common_fillers() {
        assert!(is_stop_word("the"));
        assert!(is_stop_word("with"));
        assert!(!is_stop_word("warranty"));
    }
}
