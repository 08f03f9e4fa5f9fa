//! Statistical cohort comparison over a full labeled window.
//!
//! The analyzer shares the detector's strategy algorithms but runs them over
//! the whole requested window and scores confidence with the sample-count
//! step function instead of the heuristic strength.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use sift_store::PatternStore;
use sift_types::{
    AnalysisMetadata, AnalysisOptions, AnalysisReport, CandidatePattern, Pattern, PatternType,
};

use crate::rules::DetectionRules;
use crate::similarity::confidence_from_sample_count;
use crate::strategies::{
    analyze_emotional_tone, analyze_response_style, analyze_timing_shift, analyze_word_usage,
    split_response_cohorts,
};

const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// On-demand statistical pattern analysis.
///
/// Returns candidates without persisting them. `save_success_pattern` is a
/// separate, unconditional insert with no duplicate check: a caller invoking
/// the analyzer repeatedly and saving every result can reintroduce duplicates
/// that only the cleanup service will later collapse.
pub struct SuccessAnalyzer {
    store: Arc<dyn PatternStore>,
    rules: DetectionRules,
    min_confidence: f64,
}

impl SuccessAnalyzer {
    pub fn new(store: Arc<dyn PatternStore>) -> Self {
        Self {
            store,
            rules: DetectionRules::default(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_rules(store: Arc<dyn PatternStore>, rules: DetectionRules) -> Self {
        Self {
            store,
            rules,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub async fn analyze_success_patterns(
        &self,
        company_id: &str,
        options: &AnalysisOptions,
    ) -> Result<AnalysisReport> {
        self.store
            .ping()
            .await
            .context("pattern store unreachable before fetch")?;

        let since = Utc::now() - chrono::Duration::days(i64::from(options.window_days));
        let outcomes = self
            .store
            .list_outcomes_since(company_id, since)
            .await
            .context("failed to fetch outcome records")?;
        let responses = self
            .store
            .list_responses_since(company_id, since)
            .await
            .context("failed to fetch response records")?;

        let mut metadata = AnalysisMetadata {
            company_id: company_id.to_string(),
            window_days: options.window_days,
            outcome_count: outcomes.len(),
            response_count: responses.len(),
            ..AnalysisMetadata::default()
        };

        if outcomes.len() < options.min_sample_size {
            metadata.reason_codes.push("insufficient_data".to_string());
            metadata.diagnostics.push(format!(
                "insufficient_data: outcomes={} required={}",
                outcomes.len(),
                options.min_sample_size
            ));
            return Ok(AnalysisReport {
                success: false,
                patterns: Vec::new(),
                metadata,
            });
        }

        let (successful, unsuccessful) = split_response_cohorts(&responses, &self.rules);
        let successful_texts: Vec<&str> = successful
            .iter()
            .map(|response| response.response_text.as_str())
            .collect();
        let failure_texts: Vec<&str> = unsuccessful
            .iter()
            .map(|response| response.response_text.as_str())
            .collect();

        let mut patterns = Vec::new();
        for pattern_type in &options.pattern_types {
            let candidate = match pattern_type {
                PatternType::WordUsage | PatternType::EmergingWords => analyze_word_usage(
                    &successful_texts,
                    &failure_texts,
                    &self.rules,
                    *pattern_type,
                ),
                PatternType::Timing => analyze_timing_shift(&outcomes, &self.rules),
                PatternType::ResponseStyle => analyze_response_style(&responses, &self.rules),
                PatternType::EmotionalTone => analyze_emotional_tone(&responses, &self.rules),
            };
            let Some(candidate) = candidate else {
                metadata
                    .diagnostics
                    .push(format!("no_signal: type={}", pattern_type.as_str()));
                continue;
            };

            let confidence = confidence_from_sample_count(candidate.sample_size as usize);
            if confidence < self.min_confidence {
                metadata.diagnostics.push(format!(
                    "below_confidence_threshold: type={} confidence={confidence:.2}",
                    pattern_type.as_str()
                ));
                continue;
            }
            patterns.push(self.candidate_into_pattern(company_id, candidate, confidence, options));
        }

        if patterns.is_empty() {
            metadata
                .reason_codes
                .push("no_patterns_found".to_string());
        }
        Ok(AnalysisReport {
            success: true,
            patterns,
            metadata,
        })
    }

    /// One unconditional insert; no duplicate check by contract.
    pub async fn save_success_pattern(&self, pattern: &Pattern) -> Result<()> {
        self.store
            .insert_pattern(pattern.clone())
            .await
            .context("failed to save analyzed pattern")
    }

    fn candidate_into_pattern(
        &self,
        company_id: &str,
        candidate: CandidatePattern,
        confidence: f64,
        options: &AnalysisOptions,
    ) -> Pattern {
        let mut pattern = Pattern::new(
            company_id,
            candidate.pattern_type,
            candidate.payload,
            candidate.description,
            candidate.success_rate,
            candidate.sample_size,
            confidence,
        );
        pattern.metadata = json!({
            "provenance": candidate.metadata,
            "window_days": options.window_days,
            "analyzed_at": Utc::now().to_rfc3339(),
        });
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::SuccessAnalyzer;
    use chrono::Utc;
    use sift_store::{InMemoryPatternStore, PatternStore};
    use sift_types::{
        AnalysisOptions, ConversationOutcome, OutcomeKind, PatternType, ResponseEffectiveness,
    };
    use std::sync::Arc;

    fn outcome(kind: OutcomeKind, minutes: f64, id: usize) -> ConversationOutcome {
        ConversationOutcome {
            company_id: "co-1".to_string(),
            conversation_id: format!("conv-{id}"),
            outcome: kind,
            conversion_time_minutes: Some(minutes),
            created_at: Utc::now(),
        }
    }

    fn response(text: &str, score: f64, purchase: bool) -> ResponseEffectiveness {
        ResponseEffectiveness {
            company_id: "co-1".to_string(),
            response_text: text.to_string(),
            effectiveness_score: score,
            lead_to_purchase: purchase,
            sentiment_score: 0.0,
            word_count: text.split_whitespace().count() as u64,
            created_at: Utc::now(),
        }
    }

    async fn seed_word_usage_window(store: &InMemoryPatternStore) {
        store.register_company("co-1").await.expect("register");
        for i in 0..6 {
            let kind = if i % 2 == 0 {
                OutcomeKind::Purchase
            } else {
                OutcomeKind::Abandoned
            };
            store
                .insert_outcome(outcome(kind, 20.0, i))
                .await
                .expect("outcome");
        }
        for i in 0..3 {
            store
                .insert_response(response(
                    &format!("warranty warranty warranty included {i}"),
                    0.9,
                    true,
                ))
                .await
                .expect("successful response");
            store
                .insert_response(response(&format!("cannot help with this {i}"), 0.1, false))
                .await
                .expect("failure response");
        }
    }

    #[tokio::test]
    async fn planted_token_surfaces_as_word_usage_pattern() {
        let store = Arc::new(InMemoryPatternStore::new());
        seed_word_usage_window(&store).await;
        let analyzer = SuccessAnalyzer::new(store.clone());

        let options = AnalysisOptions {
            window_days: 30,
            min_sample_size: 5,
            pattern_types: vec![PatternType::WordUsage],
        };
        let report = analyzer
            .analyze_success_patterns("co-1", &options)
            .await
            .expect("analyze");
        assert!(report.success);
        assert_eq!(report.patterns.len(), 1);

        let pattern = &report.patterns[0];
        assert_eq!(pattern.pattern_type, PatternType::WordUsage);
        let words = pattern.pattern["significant_words"].as_array().expect("words");
        assert!(words.iter().any(|word| word == "warranty"));
        // 6 responses total feed the step function.
        assert_eq!(pattern.confidence_level, 0.5);
    }

    #[tokio::test]
    async fn insufficient_outcomes_is_an_explicit_soft_result() {
        let store = Arc::new(InMemoryPatternStore::new());
        store.register_company("co-1").await.expect("register");
        let analyzer = SuccessAnalyzer::new(store);

        let report = analyzer
            .analyze_success_patterns("co-1", &AnalysisOptions::default())
            .await
            .expect("analyze");
        assert!(!report.success);
        assert!(report
            .metadata
            .reason_codes
            .iter()
            .any(|code| code == "insufficient_data"));
    }

    #[tokio::test]
    async fn analyzer_does_not_persist_and_save_has_no_duplicate_check() {
        let store = Arc::new(InMemoryPatternStore::new());
        seed_word_usage_window(&store).await;
        let analyzer = SuccessAnalyzer::new(store.clone());

        let options = AnalysisOptions {
            window_days: 30,
            min_sample_size: 5,
            pattern_types: vec![PatternType::WordUsage],
        };
        let report = analyzer
            .analyze_success_patterns("co-1", &options)
            .await
            .expect("analyze");
        assert!(store
            .list_patterns("co-1", false)
            .await
            .expect("list")
            .is_empty());

        // Saving the same result twice reintroduces a duplicate; that is the
        // documented contract caveat, collapsed later by cleanup.
        let mut first = report.patterns[0].clone();
        first.id = "saved-1".to_string();
        let mut second = report.patterns[0].clone();
        second.id = "saved-2".to_string();
        analyzer.save_success_pattern(&first).await.expect("first save");
        analyzer
            .save_success_pattern(&second)
            .await
            .expect("second save");
        assert_eq!(
            store.list_patterns("co-1", false).await.expect("list").len(),
            2
        );
    }

    #[tokio::test]
    async fn timing_analysis_uses_step_confidence() {
        let store = Arc::new(InMemoryPatternStore::new());
        store.register_company("co-1").await.expect("register");
        for i in 0..12 {
            store
                .insert_outcome(outcome(OutcomeKind::Purchase, 10.0, i))
                .await
                .expect("purchase");
            store
                .insert_outcome(outcome(OutcomeKind::Abandoned, 45.0, 100 + i))
                .await
                .expect("abandoned");
        }
        let analyzer = SuccessAnalyzer::new(store);

        let options = AnalysisOptions {
            window_days: 30,
            min_sample_size: 10,
            pattern_types: vec![PatternType::Timing],
        };
        let report = analyzer
            .analyze_success_patterns("co-1", &options)
            .await
            .expect("analyze");
        assert_eq!(report.patterns.len(), 1);
        // 24 samples land on the 20..50 step.
        assert_eq!(report.patterns[0].confidence_level, 0.7);
    }
}
