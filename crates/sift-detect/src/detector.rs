//! Pattern detection pipeline: fetch, strategies, filtering, dedup, persist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;

use sift_ai::{AnalysisOutcome, AnalysisRequest, TextAnalysisClient};
use sift_store::PatternStore;
use sift_types::{
    clamp_unit, CandidatePattern, DetectionMetadata, DetectionReport, Pattern, PatternType,
    ResponseEffectiveness,
};

use crate::rules::DetectionRules;
use crate::similarity::is_duplicate_fields;
use crate::strategies::{
    analyze_emotional_tone, analyze_response_style, analyze_timing_shift, analyze_word_usage,
    insight_to_candidate, split_response_cohorts,
};

const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrates detection strategies and persists surviving candidates.
pub struct PatternDetector {
    store: Arc<dyn PatternStore>,
    analysis: Arc<dyn TextAnalysisClient>,
    rules: DetectionRules,
    ai_timeout: Duration,
    /// Per-company stored-pattern cache used by the duplicate filter; cleared
    /// by the scheduler after each cycle.
    stored_cache: RwLock<HashMap<String, Vec<Pattern>>>,
}

impl PatternDetector {
    pub fn new(store: Arc<dyn PatternStore>, analysis: Arc<dyn TextAnalysisClient>) -> Self {
        Self::with_rules(store, analysis, DetectionRules::default())
    }

    pub fn with_rules(
        store: Arc<dyn PatternStore>,
        analysis: Arc<dyn TextAnalysisClient>,
        rules: DetectionRules,
    ) -> Self {
        Self {
            store,
            analysis,
            rules,
            ai_timeout: DEFAULT_AI_TIMEOUT,
            stored_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ai_timeout(mut self, timeout: Duration) -> Self {
        self.ai_timeout = timeout;
        self
    }

    /// Drops every cached stored-pattern list.
    pub async fn clear_cache(&self) {
        self.stored_cache.write().await.clear();
    }

    /// Mines the lookback window for new patterns and persists survivors.
    ///
    /// Storage unreachable before the fetch is the only hard error; every
    /// later problem degrades to a partial or empty-but-successful report.
    pub async fn detect_new_patterns(
        &self,
        company_id: &str,
        lookback_days: u32,
    ) -> Result<DetectionReport> {
        self.store
            .ping()
            .await
            .context("pattern store unreachable before fetch")?;

        let since = Utc::now() - chrono::Duration::days(i64::from(lookback_days));
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

        let mut metadata = DetectionMetadata {
            company_id: company_id.to_string(),
            lookback_days,
            outcome_count: outcomes.len(),
            response_count: responses.len(),
            ..DetectionMetadata::default()
        };

        // The floor drops when auxiliary response data exists for the window.
        let minimum_required = if responses.is_empty() {
            self.rules.min_sample_size
        } else {
            self.rules.min_sample_size_with_auxiliary
        };
        if outcomes.len() < minimum_required {
            push_unique_reason_code(&mut metadata.reason_codes, "insufficient_data");
            metadata.diagnostics.push(format!(
                "insufficient_data: outcomes={} required={minimum_required}",
                outcomes.len()
            ));
            return Ok(DetectionReport {
                success: false,
                patterns: Vec::new(),
                metadata,
            });
        }

        let mut candidates = Vec::new();
        let (successful, unsuccessful) = split_response_cohorts(&responses, &self.rules);
        let successful_texts: Vec<&str> = successful
            .iter()
            .map(|response| response.response_text.as_str())
            .collect();
        let failure_texts: Vec<&str> = unsuccessful
            .iter()
            .map(|response| response.response_text.as_str())
            .collect();

        if let Some(candidate) = analyze_word_usage(
            &successful_texts,
            &failure_texts,
            &self.rules,
            PatternType::EmergingWords,
        ) {
            candidates.push(candidate);
        }
        if let Some(candidate) = analyze_timing_shift(&outcomes, &self.rules) {
            candidates.push(candidate);
        }
        if let Some(candidate) = analyze_response_style(&responses, &self.rules) {
            candidates.push(candidate);
        }
        if let Some(candidate) = analyze_emotional_tone(&responses, &self.rules) {
            candidates.push(candidate);
        }
        self.run_delegated_analysis(
            company_id,
            &successful,
            &unsuccessful,
            &mut candidates,
            &mut metadata,
        )
        .await;

        metadata.candidate_count = candidates.len();

        let strong: Vec<CandidatePattern> = candidates
            .into_iter()
            .filter(|candidate| {
                if candidate.strength >= self.rules.min_strength {
                    return true;
                }
                metadata.diagnostics.push(format!(
                    "candidate_below_strength: type={} strength={:.2}",
                    candidate.pattern_type.as_str(),
                    candidate.strength
                ));
                false
            })
            .collect();

        // In-batch dedup here; duplicates of already-stored patterns are
        // handled by the merge path during persistence.
        let deduplicated = deduplicate_candidates(strong, &mut metadata);

        let mut persisted = Vec::new();
        let mut stored_view = self.stored_patterns(company_id, &mut metadata).await;
        for candidate in deduplicated {
            match self
                .persist_candidate(company_id, &candidate, lookback_days, &mut stored_view)
                .await
            {
                Ok(PersistOutcome::Inserted(pattern)) => {
                    metadata.inserted_count += 1;
                    persisted.push(pattern);
                }
                Ok(PersistOutcome::Merged) => {
                    metadata.merged_count += 1;
                }
                Ok(PersistOutcome::SkippedCompanyMissing) => {
                    push_unique_reason_code(&mut metadata.reason_codes, "company_missing");
                    metadata.diagnostics.push(format!(
                        "insert_skipped_company_missing: company_id={company_id} type={}",
                        candidate.pattern_type.as_str()
                    ));
                }
                Err(error) => {
                    // One failed row never aborts the batch.
                    tracing::warn!(
                        company_id,
                        pattern_type = candidate.pattern_type.as_str(),
                        error = %error,
                        "candidate persistence failed"
                    );
                    push_unique_reason_code(&mut metadata.reason_codes, "persistence_failure");
                    metadata
                        .diagnostics
                        .push(format!("persist_failed: error={error}"));
                }
            }
        }

        {
            let mut cache = self.stored_cache.write().await;
            cache.insert(company_id.to_string(), stored_view);
        }

        if metadata.reason_codes.is_empty() {
            push_unique_reason_code(&mut metadata.reason_codes, "detection_cycle_ok");
        }
        Ok(DetectionReport {
            success: true,
            patterns: persisted,
            metadata,
        })
    }

    async fn run_delegated_analysis(
        &self,
        company_id: &str,
        successful: &[&ResponseEffectiveness],
        unsuccessful: &[&ResponseEffectiveness],
        candidates: &mut Vec<CandidatePattern>,
        metadata: &mut DetectionMetadata,
    ) {
        let request = build_analysis_request(company_id, successful, unsuccessful, &self.rules);
        match tokio::time::timeout(self.ai_timeout, self.analysis.analyze(&request)).await {
            Err(_) => {
                push_unique_reason_code(&mut metadata.reason_codes, "ai_analysis_timed_out");
                metadata.diagnostics.push(format!(
                    "ai_analysis_timed_out: timeout_ms={}",
                    self.ai_timeout.as_millis()
                ));
            }
            Ok(Err(error)) => {
                tracing::warn!(company_id, error = %error, "delegated analysis failed");
                push_unique_reason_code(&mut metadata.reason_codes, "ai_analysis_failed");
                metadata
                    .diagnostics
                    .push(format!("ai_analysis_failed: error={error}"));
            }
            Ok(Ok(AnalysisOutcome::Unavailable)) => {
                // Not configured for this company; distinct from "found nothing".
                push_unique_reason_code(&mut metadata.reason_codes, "ai_capability_unavailable");
            }
            Ok(Ok(AnalysisOutcome::NoneFound)) => {
                push_unique_reason_code(&mut metadata.reason_codes, "ai_no_patterns_found");
            }
            Ok(Ok(AnalysisOutcome::Found(insights))) => {
                for insight in &insights {
                    if let Some(candidate) =
                        insight_to_candidate(insight, successful.len(), unsuccessful.len())
                    {
                        candidates.push(candidate);
                    }
                }
            }
        }
    }

    async fn stored_patterns(
        &self,
        company_id: &str,
        metadata: &mut DetectionMetadata,
    ) -> Vec<Pattern> {
        {
            let cache = self.stored_cache.read().await;
            if let Some(patterns) = cache.get(company_id) {
                return patterns.clone();
            }
        }
        match self.store.list_patterns(company_id, true).await {
            Ok(patterns) => patterns,
            Err(error) => {
                tracing::warn!(company_id, error = %error, "stored-pattern fetch failed; dedup degraded");
                metadata
                    .diagnostics
                    .push(format!("stored_pattern_fetch_failed: error={error}"));
                Vec::new()
            }
        }
    }

    async fn persist_candidate(
        &self,
        company_id: &str,
        candidate: &CandidatePattern,
        lookback_days: u32,
        stored_view: &mut Vec<Pattern>,
    ) -> Result<PersistOutcome, sift_store::PatternStoreError> {
        if let Some(existing) = stored_view.iter_mut().find(|pattern| {
            is_duplicate_fields(
                &pattern.description,
                pattern.pattern_type,
                pattern.success_rate,
                &candidate.description,
                candidate.pattern_type,
                candidate.success_rate,
            )
        }) {
            merge_candidate_into_existing(existing, candidate);
            self.store.update_pattern(existing.clone()).await?;
            return Ok(PersistOutcome::Merged);
        }

        // Referential-integrity guard: the company may have disappeared
        // between fetch and persist.
        if !self.store.company_exists(company_id).await? {
            return Ok(PersistOutcome::SkippedCompanyMissing);
        }

        let pattern = candidate_into_pattern(company_id, candidate, lookback_days);
        self.store.insert_pattern(pattern.clone()).await?;
        stored_view.push(pattern.clone());
        Ok(PersistOutcome::Inserted(pattern))
    }
}

enum PersistOutcome {
    Inserted(Pattern),
    Merged,
    SkippedCompanyMissing,
}

fn build_analysis_request(
    company_id: &str,
    successful: &[&ResponseEffectiveness],
    unsuccessful: &[&ResponseEffectiveness],
    rules: &DetectionRules,
) -> AnalysisRequest {
    let mut curated_successful: Vec<&ResponseEffectiveness> = successful.to_vec();
    curated_successful.sort_by(|left, right| {
        right
            .effectiveness_score
            .total_cmp(&left.effectiveness_score)
    });
    let mut curated_failures: Vec<&ResponseEffectiveness> = unsuccessful.to_vec();
    curated_failures.sort_by(|left, right| {
        left.effectiveness_score
            .total_cmp(&right.effectiveness_score)
    });

    AnalysisRequest {
        company_id: company_id.to_string(),
        successful_samples: curated_successful
            .iter()
            .take(rules.ai_sample_limit)
            .map(|response| response.response_text.clone())
            .collect(),
        failure_samples: curated_failures
            .iter()
            .take(rules.ai_sample_limit)
            .map(|response| response.response_text.clone())
            .collect(),
        successful_total: successful.len(),
        failure_total: unsuccessful.len(),
    }
}

/// Drops candidates that duplicate an earlier candidate in the same batch.
fn deduplicate_candidates(
    candidates: Vec<CandidatePattern>,
    metadata: &mut DetectionMetadata,
) -> Vec<CandidatePattern> {
    let mut accepted: Vec<CandidatePattern> = Vec::new();
    for candidate in candidates {
        let batch_duplicate = accepted.iter().any(|kept| {
            is_duplicate_fields(
                &kept.description,
                kept.pattern_type,
                kept.success_rate,
                &candidate.description,
                candidate.pattern_type,
                candidate.success_rate,
            )
        });
        if batch_duplicate {
            metadata.diagnostics.push(format!(
                "candidate_duplicates_batch: type={}",
                candidate.pattern_type.as_str()
            ));
            continue;
        }
        accepted.push(candidate);
    }
    accepted
}

fn candidate_into_pattern(
    company_id: &str,
    candidate: &CandidatePattern,
    lookback_days: u32,
) -> Pattern {
    let mut pattern = Pattern::new(
        company_id,
        candidate.pattern_type,
        candidate.payload.clone(),
        candidate.description.clone(),
        candidate.success_rate,
        candidate.sample_size,
        // Heuristic detection keeps the ad hoc strength as its confidence;
        // the statistical analyzer uses the sample-count step function.
        candidate.strength,
    );
    pattern.metadata = json!({
        "provenance": candidate.metadata,
        "lookback_days": lookback_days,
        "detected_at": Utc::now().to_rfc3339(),
    });
    pattern
}

fn merge_candidate_into_existing(existing: &mut Pattern, candidate: &CandidatePattern) {
    // Unweighted average of old and new rate. The cleanup service merges with
    // a sample-size-weighted average instead; the two paths are intentionally
    // kept distinct (see DESIGN.md).
    existing.success_rate = clamp_unit((existing.success_rate + candidate.success_rate) / 2.0);
    existing.sample_size = existing.sample_size.saturating_add(candidate.sample_size);
    existing.updated_at = Utc::now();

    if !existing.metadata.is_object() {
        existing.metadata = json!({});
    }
    if let Some(object) = existing.metadata.as_object_mut() {
        let history = object
            .entry("merge_history")
            .or_insert_with(|| json!([]));
        if let Some(entries) = history.as_array_mut() {
            entries.push(json!({
                "merged_at": Utc::now().to_rfc3339(),
                "source": "detector_batch_merge",
                "incoming_description": candidate.description,
                "incoming_rate": candidate.success_rate,
                "incoming_samples": candidate.sample_size,
            }));
        }
    }
}

fn push_unique_reason_code(reason_codes: &mut Vec<String>, reason_code: &str) {
    if reason_codes.iter().any(|existing| existing == reason_code) {
        return;
    }
    reason_codes.push(reason_code.to_string());
}
