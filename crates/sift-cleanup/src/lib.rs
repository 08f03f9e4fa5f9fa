//! Duplicate-pattern grouping and merging over stored corpora.
//!
//! Grouping is greedy single-link: once a pattern lands in a group it leaves
//! the candidate pool, so two patterns that are each similar to a shared
//! third but not to each other can stay ungrouped. That under-merge is a
//! known limitation kept on purpose (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use sift_detect::similarity::is_duplicate;
use sift_store::PatternStore;
use sift_types::{CleanupStats, CleanupSummary, DuplicateBucket, Pattern};

/// Weight used when a merged pattern carries no sample size.
const DEFAULT_MERGE_WEIGHT: u64 = 10;

/// Result of merging one duplicate group.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub representative_id: String,
    pub merged_rate: f64,
    pub deleted: usize,
}

/// Finds and merges near-duplicate patterns already in storage.
pub struct PatternCleanupService {
    store: Arc<dyn PatternStore>,
}

impl PatternCleanupService {
    pub fn new(store: Arc<dyn PatternStore>) -> Self {
        Self { store }
    }

    /// Greedy single-link grouping over all active patterns of one company.
    /// Returns only groups of size greater than one.
    pub async fn find_duplicate_patterns(&self, company_id: &str) -> Result<Vec<Vec<Pattern>>> {
        let patterns = self
            .store
            .list_patterns(company_id, true)
            .await
            .context("failed to list patterns for duplicate scan")?;

        let mut grouped = vec![false; patterns.len()];
        let mut groups = Vec::new();
        for anchor in 0..patterns.len() {
            if grouped[anchor] {
                continue;
            }
            let mut group = vec![patterns[anchor].clone()];
            grouped[anchor] = true;
            for candidate in anchor + 1..patterns.len() {
                if grouped[candidate] {
                    continue;
                }
                if is_duplicate(&patterns[anchor], &patterns[candidate]) {
                    group.push(patterns[candidate].clone());
                    grouped[candidate] = true;
                }
            }
            if group.len() > 1 {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Merges a duplicate group into its representative.
    ///
    /// The representative is the member with the highest success rate, ties
    /// broken by the most recent `created_at`. The merged rate is the
    /// sample-size-weighted average (the detector's in-batch merge uses an
    /// unweighted average instead; the two paths are deliberately distinct).
    pub async fn merge_similar_patterns(&self, group: &[Pattern]) -> Result<MergeOutcome> {
        let representative = group
            .iter()
            .max_by(|left, right| {
                left.success_rate
                    .total_cmp(&right.success_rate)
                    .then(left.created_at.cmp(&right.created_at))
            })
            .context("cannot merge an empty group")?;

        let mut weighted_sum = 0.0;
        let mut total_weight = 0_u64;
        for member in group {
            let weight = if member.sample_size == 0 {
                DEFAULT_MERGE_WEIGHT
            } else {
                member.sample_size
            };
            weighted_sum += member.success_rate * weight as f64;
            total_weight += weight;
        }
        let merged_rate = weighted_sum / total_weight as f64;

        let absorbed: Vec<&Pattern> = group
            .iter()
            .filter(|member| member.id != representative.id)
            .collect();
        let absorbed_ids: Vec<String> = absorbed.iter().map(|member| member.id.clone()).collect();

        let mut updated = representative.clone();
        updated.success_rate = merged_rate;
        updated.sample_size = total_weight;
        updated.updated_at = Utc::now();
        if !updated.metadata.is_object() {
            updated.metadata = json!({});
        }
        if let Some(object) = updated.metadata.as_object_mut() {
            let history = object.entry("merge_history").or_insert_with(|| json!([]));
            if let Some(entries) = history.as_array_mut() {
                entries.push(json!({
                    "merged_at": Utc::now().to_rfc3339(),
                    "source": "cleanup_weighted_merge",
                    "absorbed_ids": absorbed_ids,
                    "merged_rate": merged_rate,
                }));
            }
        }

        self.store
            .update_pattern(updated.clone())
            .await
            .context("failed to update merge representative")?;
        // Deletion is scoped to the representative's company.
        let deleted = self
            .store
            .delete_patterns(&updated.company_id, &absorbed_ids)
            .await
            .context("failed to delete absorbed duplicates")?;

        Ok(MergeOutcome {
            representative_id: updated.id,
            merged_rate,
            deleted,
        })
    }

    /// Runs find + merge over every duplicate group for one company.
    ///
    /// On a corpus the previous pass fully collapsed, a second run with no
    /// intervening writes merges nothing.
    pub async fn cleanup_duplicate_patterns(&self, company_id: &str) -> Result<CleanupSummary> {
        let started = Instant::now();
        let total_patterns = self
            .store
            .list_patterns(company_id, true)
            .await
            .context("failed to count patterns before cleanup")?
            .len();
        let groups = self.find_duplicate_patterns(company_id).await?;

        let mut summary = CleanupSummary {
            duplicate_groups_found: groups.len(),
            patterns_processed: total_patterns,
            ..CleanupSummary::default()
        };
        for group in &groups {
            match self.merge_similar_patterns(group).await {
                Ok(outcome) => {
                    summary.patterns_merged += 1;
                    summary.patterns_deleted += outcome.deleted;
                }
                Err(error) => {
                    // A failed group leaves its members for the next pass.
                    tracing::warn!(company_id, error = %error, "duplicate group merge failed");
                }
            }
        }
        summary.time_taken_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(summary)
    }

    /// Cheap pre-check: buckets patterns by `(type, rate rounded to 0.1)` and
    /// flags buckets with more than one member, without the pairwise scan.
    pub async fn get_cleanup_stats(&self, company_id: &str) -> Result<CleanupStats> {
        let patterns = self
            .store
            .list_patterns(company_id, false)
            .await
            .context("failed to list patterns for cleanup stats")?;
        let active_patterns = patterns.iter().filter(|pattern| pattern.is_active).count();

        let mut buckets: HashMap<(sift_types::PatternType, i64), usize> = HashMap::new();
        for pattern in patterns.iter().filter(|pattern| pattern.is_active) {
            let rounded = (pattern.success_rate * 10.0).round() as i64;
            *buckets
                .entry((pattern.pattern_type, rounded))
                .or_insert(0) += 1;
        }

        let mut potential: Vec<DuplicateBucket> = buckets
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((pattern_type, rounded), count)| DuplicateBucket {
                pattern_type,
                rounded_success_rate: rounded as f64 / 10.0,
                count,
            })
            .collect();
        potential.sort_by(|left, right| {
            left.pattern_type
                .as_str()
                .cmp(right.pattern_type.as_str())
                .then(left.rounded_success_rate.total_cmp(&right.rounded_success_rate))
        });

        Ok(CleanupStats {
            company_id: company_id.to_string(),
            total_patterns: patterns.len(),
            active_patterns,
            potential_duplicate_buckets: potential,
        })
    }
}
