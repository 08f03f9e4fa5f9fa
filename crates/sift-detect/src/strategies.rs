//! Cohort-comparison heuristics shared by the detector and the analyzer.
//!
//! Each strategy is a pure function: it either clears its thresholds and
//! returns a candidate, or returns `None` and the caller moves on.

use std::collections::HashMap;

use serde_json::json;

use sift_ai::WordPatternInsight;
use sift_types::{
    clamp_unit, CandidatePattern, ConversationOutcome, OutcomeKind, PatternType,
    ResponseEffectiveness,
};

use crate::rules::{is_stop_word, DetectionRules};

/// Splits responses into successful and unsuccessful cohorts.
///
/// A purchase always lands in the successful cohort; otherwise the
/// effectiveness score decides. Mid-range responses belong to neither side.
pub fn split_response_cohorts<'a>(
    responses: &'a [ResponseEffectiveness],
    rules: &DetectionRules,
) -> (Vec<&'a ResponseEffectiveness>, Vec<&'a ResponseEffectiveness>) {
    let mut successful = Vec::new();
    let mut unsuccessful = Vec::new();
    for response in responses {
        if response.lead_to_purchase || response.effectiveness_score >= rules.effective_score_floor
        {
            successful.push(response);
        } else if response.effectiveness_score <= rules.ineffective_score_ceiling {
            unsuccessful.push(response);
        }
    }
    (successful, unsuccessful)
}

fn token_frequencies(texts: &[&str]) -> HashMap<String, usize> {
    let mut frequencies = HashMap::new();
    for text in texts {
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.len() >= 3 && !is_stop_word(token))
        {
            *frequencies.entry(token.to_string()).or_insert(0) += 1;
        }
    }
    frequencies
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Word-frequency comparison between cohort texts.
///
/// A token is emerging when it clears the occurrence floor in the successful
/// cohort and exceeds its failure-cohort count by the significance ratio.
#[tracing::instrument(level = "debug", skip_all)]
pub fn analyze_word_usage(
    successful_texts: &[&str],
    failure_texts: &[&str],
    rules: &DetectionRules,
    pattern_type: PatternType,
) -> Option<CandidatePattern> {
    if successful_texts.len() < rules.word_min_cohort
        || failure_texts.len() < rules.word_min_cohort
    {
        return None;
    }

    let successful_frequencies = token_frequencies(successful_texts);
    let failure_frequencies = token_frequencies(failure_texts);

    let mut emerging: Vec<(String, usize)> = successful_frequencies
        .into_iter()
        .filter(|(token, count)| {
            let failure_count = failure_frequencies.get(token).copied().unwrap_or(0);
            *count >= rules.word_min_occurrences
                && *count as f64 >= failure_count as f64 * rules.word_significance_ratio
        })
        .collect();
    if emerging.is_empty() {
        return None;
    }
    emerging.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

    let words: Vec<String> = emerging.iter().map(|(token, _)| token.clone()).collect();
    let shown: Vec<&str> = words.iter().take(5).map(String::as_str).collect();
    let cohort_ratio = emerging.len() as f64 / successful_texts.len().max(1) as f64;
    let strength = clamp_unit(0.5 + cohort_ratio * 0.4).min(0.9);
    let total = successful_texts.len() + failure_texts.len();

    Some(CandidatePattern {
        pattern_type,
        description: format!("Successful responses favor words: {}", shown.join(", ")),
        payload: json!({
            "significant_words": words,
            "successful_cohort": successful_texts.len(),
            "failure_cohort": failure_texts.len(),
        }),
        strength,
        success_rate: successful_texts.len() as f64 / total as f64,
        sample_size: total as u64,
        metadata: json!({ "source": "word_usage_shift" }),
    })
}

/// Mean conversion-time comparison between purchased and abandoned outcomes.
#[tracing::instrument(level = "debug", skip_all)]
pub fn analyze_timing_shift(
    outcomes: &[ConversationOutcome],
    rules: &DetectionRules,
) -> Option<CandidatePattern> {
    let purchased: Vec<f64> = outcomes
        .iter()
        .filter(|outcome| outcome.outcome == OutcomeKind::Purchase)
        .filter_map(|outcome| outcome.conversion_time_minutes)
        .collect();
    let abandoned: Vec<f64> = outcomes
        .iter()
        .filter(|outcome| outcome.outcome == OutcomeKind::Abandoned)
        .filter_map(|outcome| outcome.conversion_time_minutes)
        .collect();
    if purchased.len() < rules.timing_min_cohort || abandoned.len() < rules.timing_min_cohort {
        return None;
    }

    let purchased_mean = mean(&purchased)?;
    let abandoned_mean = mean(&abandoned)?;
    let delta = purchased_mean - abandoned_mean;
    if delta.abs() < rules.timing_min_delta_minutes {
        return None;
    }

    let direction = if delta < 0.0 { "faster" } else { "slower" };
    let total = purchased.len() + abandoned.len();
    Some(CandidatePattern {
        pattern_type: PatternType::Timing,
        description: format!(
            "Purchasing conversations resolve {:.0} minutes {direction} than abandoned ones",
            delta.abs()
        ),
        payload: json!({
            "purchased_mean_minutes": purchased_mean,
            "abandoned_mean_minutes": abandoned_mean,
            "delta_minutes": delta,
        }),
        strength: clamp_unit(0.4 + delta.abs() / 60.0).min(0.9),
        success_rate: purchased.len() as f64 / total as f64,
        sample_size: total as u64,
        metadata: json!({ "source": "timing_shift" }),
    })
}

/// Mean word-count comparison between effective and ineffective responses.
#[tracing::instrument(level = "debug", skip_all)]
pub fn analyze_response_style(
    responses: &[ResponseEffectiveness],
    rules: &DetectionRules,
) -> Option<CandidatePattern> {
    let (successful, unsuccessful) = split_response_cohorts(responses, rules);
    if successful.len() < rules.style_min_cohort || unsuccessful.len() < rules.style_min_cohort {
        return None;
    }

    let successful_counts: Vec<f64> = successful
        .iter()
        .map(|response| response.word_count as f64)
        .collect();
    let unsuccessful_counts: Vec<f64> = unsuccessful
        .iter()
        .map(|response| response.word_count as f64)
        .collect();
    let successful_mean = mean(&successful_counts)?;
    let unsuccessful_mean = mean(&unsuccessful_counts)?;
    let delta = successful_mean - unsuccessful_mean;
    if delta.abs() < rules.style_min_word_delta {
        return None;
    }

    let label = if delta < 0.0 { "concise" } else { "detailed" };
    let total = successful.len() + unsuccessful.len();
    Some(CandidatePattern {
        pattern_type: PatternType::ResponseStyle,
        description: format!(
            "Effective responses are {label}, averaging {:.0} words against {:.0}",
            successful_mean, unsuccessful_mean
        ),
        payload: json!({
            "style": label,
            "effective_mean_words": successful_mean,
            "ineffective_mean_words": unsuccessful_mean,
        }),
        strength: clamp_unit(0.4 + delta.abs() / 50.0).min(0.9),
        success_rate: successful.len() as f64 / total as f64,
        sample_size: total as u64,
        metadata: json!({ "source": "style_shift" }),
    })
}

/// Mean sentiment comparison between cohorts.
#[tracing::instrument(level = "debug", skip_all)]
pub fn analyze_emotional_tone(
    responses: &[ResponseEffectiveness],
    rules: &DetectionRules,
) -> Option<CandidatePattern> {
    let (successful, unsuccessful) = split_response_cohorts(responses, rules);
    if successful.len() < rules.tone_min_cohort || unsuccessful.len() < rules.tone_min_cohort {
        return None;
    }

    let successful_sentiment: Vec<f64> = successful
        .iter()
        .map(|response| response.sentiment_score)
        .collect();
    let unsuccessful_sentiment: Vec<f64> = unsuccessful
        .iter()
        .map(|response| response.sentiment_score)
        .collect();
    let successful_mean = mean(&successful_sentiment)?;
    let unsuccessful_mean = mean(&unsuccessful_sentiment)?;
    let delta = successful_mean - unsuccessful_mean;
    if delta.abs() < rules.tone_min_sentiment_delta {
        return None;
    }

    let label = if successful_mean > 0.2 {
        "positive"
    } else if successful_mean < -0.2 {
        "negative"
    } else {
        "neutral"
    };
    let total = successful.len() + unsuccessful.len();
    Some(CandidatePattern {
        pattern_type: PatternType::EmotionalTone,
        description: format!("Effective responses carry a {label} emotional tone"),
        payload: json!({
            "tone": label,
            "effective_mean_sentiment": successful_mean,
            "ineffective_mean_sentiment": unsuccessful_mean,
        }),
        strength: clamp_unit(0.4 + delta.abs()).min(0.9),
        success_rate: successful.len() as f64 / total as f64,
        sample_size: total as u64,
        metadata: json!({ "source": "tone_shift" }),
    })
}

/// Converts a collaborator insight into a candidate. `None` when the insight
/// names no successful words.
pub fn insight_to_candidate(
    insight: &WordPatternInsight,
    successful_total: usize,
    failure_total: usize,
) -> Option<CandidatePattern> {
    if insight.successful_words.is_empty() {
        return None;
    }

    let shown: Vec<&str> = insight
        .successful_words
        .iter()
        .take(5)
        .map(String::as_str)
        .collect();
    let total = successful_total + failure_total;
    let success_rate = if total == 0 {
        0.5
    } else {
        successful_total as f64 / total as f64
    };
    Some(CandidatePattern {
        pattern_type: PatternType::WordUsage,
        description: format!("AI analysis: successful responses favor {}", shown.join(", ")),
        payload: json!({
            "significant_words": insight.successful_words,
            "failure_words": insight.failure_words,
        }),
        strength: clamp_unit(insight.confidence),
        success_rate,
        sample_size: total as u64,
        metadata: json!({
            "source": "ai_analysis",
            "reasoning": insight.reasoning,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        analyze_emotional_tone, analyze_response_style, analyze_timing_shift, analyze_word_usage,
        insight_to_candidate,
    };
    use crate::rules::DetectionRules;
    use chrono::Utc;
    use sift_ai::WordPatternInsight;
    use sift_types::{ConversationOutcome, OutcomeKind, PatternType, ResponseEffectiveness};

    fn outcome(kind: OutcomeKind, minutes: f64) -> ConversationOutcome {
        ConversationOutcome {
            company_id: "co-1".to_string(),
            conversation_id: format!("conv-{minutes}-{kind:?}"),
            outcome: kind,
            conversion_time_minutes: Some(minutes),
            created_at: Utc::now(),
        }
    }

    fn response(score: f64, purchase: bool, sentiment: f64, words: u64) -> ResponseEffectiveness {
        ResponseEffectiveness {
            company_id: "co-1".to_string(),
            response_text: "sample response text".to_string(),
            effectiveness_score: score,
            lead_to_purchase: purchase,
            sentiment_score: sentiment,
            word_count: words,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn word_usage_flags_emerging_tokens() {
        let rules = DetectionRules::default();
        let successful = [
            "warranty warranty warranty included",
            "our warranty covers everything",
            "extended warranty offer today",
        ];
        let failure = ["cannot help", "out of stock today", "please wait"];
        let candidate = analyze_word_usage(&successful, &failure, &rules, PatternType::WordUsage)
            .expect("candidate");
        assert_eq!(candidate.pattern_type, PatternType::WordUsage);
        let words = candidate.payload["significant_words"]
            .as_array()
            .expect("words");
        assert!(words.iter().any(|word| word == "warranty"));
        assert!(candidate.strength >= 0.4);
    }

    #[test]
    fn word_usage_respects_significance_ratio() {
        let rules = DetectionRules::default();
        // "today" appears three times per side: no emergence.
        let successful = ["today today today", "closing now", "deal done here"];
        let failure = ["today today today", "nothing available", "sorry about that"];
        let candidate = analyze_word_usage(&successful, &failure, &rules, PatternType::WordUsage);
        assert!(candidate.is_none());
    }

    #[test]
    fn timing_shift_reports_direction_and_delta() {
        let rules = DetectionRules::default();
        let outcomes = vec![
            outcome(OutcomeKind::Purchase, 10.0),
            outcome(OutcomeKind::Purchase, 12.0),
            outcome(OutcomeKind::Purchase, 14.0),
            outcome(OutcomeKind::Abandoned, 30.0),
            outcome(OutcomeKind::Abandoned, 34.0),
            outcome(OutcomeKind::Abandoned, 38.0),
        ];
        let candidate = analyze_timing_shift(&outcomes, &rules).expect("candidate");
        assert_eq!(candidate.pattern_type, PatternType::Timing);
        assert!(candidate.description.contains("faster"));
        assert_eq!(candidate.sample_size, 6);
        assert_eq!(candidate.success_rate, 0.5);
    }

    #[test]
    fn timing_shift_below_delta_gate_returns_none() {
        let rules = DetectionRules::default();
        let outcomes = vec![
            outcome(OutcomeKind::Purchase, 10.0),
            outcome(OutcomeKind::Purchase, 11.0),
            outcome(OutcomeKind::Purchase, 12.0),
            outcome(OutcomeKind::Abandoned, 12.0),
            outcome(OutcomeKind::Abandoned, 13.0),
            outcome(OutcomeKind::Abandoned, 14.0),
        ];
        assert!(analyze_timing_shift(&outcomes, &rules).is_none());
    }

    #[test]
    fn style_shift_labels_concise_cohort() {
        let rules = DetectionRules::default();
        let mut responses = Vec::new();
        for _ in 0..5 {
            responses.push(response(0.9, true, 0.1, 12));
            responses.push(response(0.1, false, 0.1, 40));
        }
        let candidate = analyze_response_style(&responses, &rules).expect("candidate");
        assert_eq!(candidate.pattern_type, PatternType::ResponseStyle);
        assert_eq!(candidate.payload["style"], serde_json::json!("concise"));
    }

    #[test]
    fn tone_shift_labels_positive_cohort() {
        let rules = DetectionRules::default();
        let mut responses = Vec::new();
        for _ in 0..5 {
            responses.push(response(0.9, true, 0.6, 20));
            responses.push(response(0.1, false, -0.1, 20));
        }
        let candidate = analyze_emotional_tone(&responses, &rules).expect("candidate");
        assert_eq!(candidate.pattern_type, PatternType::EmotionalTone);
        assert_eq!(candidate.payload["tone"], serde_json::json!("positive"));
    }

    #[test]
    fn insight_conversion_requires_successful_words() {
        let empty = WordPatternInsight::default();
        assert!(insight_to_candidate(&empty, 10, 10).is_none());

        let insight = WordPatternInsight {
            successful_words: vec!["warranty".to_string()],
            failure_words: vec!["impossible".to_string()],
            confidence: 0.8,
            reasoning: "warranty language reassures buyers".to_string(),
        };
        let candidate = insight_to_candidate(&insight, 12, 8).expect("candidate");
        assert_eq!(candidate.pattern_type, PatternType::WordUsage);
        assert_eq!(candidate.strength, 0.8);
        assert_eq!(candidate.sample_size, 20);
        assert_eq!(candidate.success_rate, 0.6);
    }
}
