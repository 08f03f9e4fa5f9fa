//! Shared data types for the Sift pattern-mining pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Settings-blob key holding the per-company opt-out flag.
pub const PATTERN_SYSTEM_ENABLED_KEY: &str = "pattern_system_enabled";

static PATTERN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique pattern id (`pat-<unix_ms>-<counter>`).
pub fn new_pattern_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = PATTERN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pat-{millis}-{count}")
}

/// Returns a process-unique usage-record id.
pub fn new_usage_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = PATTERN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("use-{millis}-{count}")
}

/// Clamps a rate or confidence into the `[0, 1]` interval.
///
/// NaN collapses to 0 so malformed arithmetic never escapes into storage.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Error returned when a pattern-type label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pattern type '{0}'")]
pub struct PatternTypeParseError(pub String);

/// Behavior category a pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    WordUsage,
    Timing,
    ResponseStyle,
    EmotionalTone,
    EmergingWords,
}

impl PatternType {
    /// Stable snake_case label matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WordUsage => "word_usage",
            Self::Timing => "timing",
            Self::ResponseStyle => "response_style",
            Self::EmotionalTone => "emotional_tone",
            Self::EmergingWords => "emerging_words",
        }
    }

    /// All pattern types, in detection order.
    pub fn all() -> &'static [PatternType] {
        &[
            Self::WordUsage,
            Self::Timing,
            Self::ResponseStyle,
            Self::EmotionalTone,
            Self::EmergingWords,
        ]
    }
}

impl FromStr for PatternType {
    type Err = PatternTypeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "word_usage" => Ok(Self::WordUsage),
            "timing" => Ok(Self::Timing),
            "response_style" => Ok(Self::ResponseStyle),
            "emotional_tone" => Ok(Self::EmotionalTone),
            "emerging_words" => Ok(Self::EmergingWords),
            other => Err(PatternTypeParseError(other.to_string())),
        }
    }
}

/// Terminal result of a tracked conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Purchase,
    Abandoned,
    Ongoing,
}

/// A scored, described, typed hypothesis about what response behavior
/// correlates with successful sales outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub company_id: String,
    pub pattern_type: PatternType,
    /// Opaque serialized payload describing the detected behavior.
    pub pattern: Value,
    pub description: String,
    pub success_rate: f64,
    pub sample_size: u64,
    pub confidence_level: f64,
    pub is_active: bool,
    pub is_approved: bool,
    /// Provenance, merge history, and model reasoning.
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pattern {
    /// Creates an active, unapproved pattern with a fresh id and clamped scores.
    pub fn new(
        company_id: impl Into<String>,
        pattern_type: PatternType,
        payload: Value,
        description: impl Into<String>,
        success_rate: f64,
        sample_size: u64,
        confidence_level: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_pattern_id(),
            company_id: company_id.into(),
            pattern_type,
            pattern: payload,
            description: description.into(),
            success_rate: clamp_unit(success_rate),
            sample_size,
            confidence_level: clamp_unit(confidence_level),
            is_active: true,
            is_approved: false,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Evidence of a pattern being applied to a live interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternUsage {
    pub id: String,
    pub pattern_id: String,
    pub company_id: String,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

impl PatternUsage {
    pub fn new(pattern_id: impl Into<String>, company_id: impl Into<String>, applied: bool) -> Self {
        Self {
            id: new_usage_id(),
            pattern_id: pattern_id.into(),
            company_id: company_id.into(),
            applied,
            created_at: Utc::now(),
        }
    }
}

/// Per-conversation result; read-only input to detection and analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationOutcome {
    pub company_id: String,
    pub conversation_id: String,
    pub outcome: OutcomeKind,
    /// Minutes from first contact to the terminal outcome, when known.
    pub conversion_time_minutes: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Per-response effectiveness record; read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEffectiveness {
    pub company_id: String,
    pub response_text: String,
    pub effectiveness_score: f64,
    pub lead_to_purchase: bool,
    pub sentiment_score: f64,
    pub word_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Typed accessor over the opaque per-company settings blob.
///
/// The blob is read-modify-write and never schema-enforced; every component
/// goes through this accessor instead of parsing the JSON ad hoc.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanySettings {
    blob: Value,
}

impl CompanySettings {
    /// Wraps a stored blob. Missing or non-object blobs behave as empty.
    pub fn from_blob(blob: Option<Value>) -> Self {
        let blob = match blob {
            Some(value @ Value::Object(_)) => value,
            _ => json!({}),
        };
        Self { blob }
    }

    /// Whether the pattern system is enabled for this company.
    ///
    /// Defaults to true when the flag is absent or not a boolean.
    pub fn pattern_system_enabled(&self) -> bool {
        self.blob
            .get(PATTERN_SYSTEM_ENABLED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Merges in the flag plus an audit trail without clobbering other keys.
    pub fn set_pattern_system_enabled(
        &mut self,
        enabled: bool,
        changed_by: &str,
        now_unix_ms: u64,
    ) {
        if !self.blob.is_object() {
            self.blob = json!({});
        }
        if let Some(object) = self.blob.as_object_mut() {
            object.insert(PATTERN_SYSTEM_ENABLED_KEY.to_string(), json!(enabled));
            object.insert("pattern_system_changed_by".to_string(), json!(changed_by));
            object.insert(
                "pattern_system_changed_at_unix_ms".to_string(),
                json!(now_unix_ms),
            );
        }
    }

    pub fn as_blob(&self) -> &Value {
        &self.blob
    }

    pub fn into_blob(self) -> Value {
        self.blob
    }
}

/// Candidate produced by a detection strategy before filtering and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePattern {
    pub pattern_type: PatternType,
    pub description: String,
    pub payload: Value,
    /// Heuristic strength in `[0, 1]`; candidates below the minimum are dropped.
    pub strength: f64,
    /// Observed success share of the underlying cohorts; feeds the duplicate
    /// predicate and the persisted row.
    pub success_rate: f64,
    pub sample_size: u64,
    /// Provenance: which strategy produced the candidate, plus any reasoning.
    #[serde(default)]
    pub metadata: Value,
}

/// Outcome of one `detect_new_patterns` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub success: bool,
    pub patterns: Vec<Pattern>,
    pub metadata: DetectionMetadata,
}

/// Diagnostics attached to a detection report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DetectionMetadata {
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub lookback_days: u32,
    #[serde(default)]
    pub outcome_count: usize,
    #[serde(default)]
    pub response_count: usize,
    #[serde(default)]
    pub candidate_count: usize,
    #[serde(default)]
    pub merged_count: usize,
    #[serde(default)]
    pub inserted_count: usize,
    #[serde(default)]
    pub reason_codes: Vec<String>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Options accepted by the Success Analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub window_days: u32,
    pub min_sample_size: usize,
    pub pattern_types: Vec<PatternType>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_sample_size: 20,
            pattern_types: PatternType::all().to_vec(),
        }
    }
}

/// Outcome of one `analyze_success_patterns` call. Candidates are returned,
/// never persisted automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub success: bool,
    pub patterns: Vec<Pattern>,
    pub metadata: AnalysisMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisMetadata {
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub window_days: u32,
    #[serde(default)]
    pub outcome_count: usize,
    #[serde(default)]
    pub response_count: usize,
    #[serde(default)]
    pub reason_codes: Vec<String>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Aggregate result of a full duplicate-cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CleanupSummary {
    pub duplicate_groups_found: usize,
    pub patterns_processed: usize,
    pub patterns_deleted: usize,
    pub patterns_merged: usize,
    pub time_taken_ms: u64,
}

/// One `(type, rounded rate)` bucket flagged by the cheap pre-scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateBucket {
    pub pattern_type: PatternType,
    /// Success rate rounded to one decimal place.
    pub rounded_success_rate: f64,
    pub count: usize,
}

/// Result of the cheap duplicate pre-scan; no pairwise comparison is run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CleanupStats {
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub total_patterns: usize,
    #[serde(default)]
    pub active_patterns: usize,
    #[serde(default)]
    pub potential_duplicate_buckets: Vec<DuplicateBucket>,
}

#[cfg(test)]
mod tests {
    use super::{
        clamp_unit, new_pattern_id, CompanySettings, Pattern, PatternType, PATTERN_SYSTEM_ENABLED_KEY,
    };
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn pattern_type_labels_round_trip() {
        for pattern_type in PatternType::all() {
            let parsed = PatternType::from_str(pattern_type.as_str()).expect("parse");
            assert_eq!(parsed, *pattern_type);
        }
        assert!(PatternType::from_str("telepathy").is_err());
    }

    #[test]
    fn clamp_unit_bounds_and_nan() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.35), 0.35);
    }

    #[test]
    fn pattern_ids_are_unique() {
        let a = new_pattern_id();
        let b = new_pattern_id();
        assert_ne!(a, b);
        assert!(a.starts_with("pat-"));
    }

    #[test]
    fn pattern_new_clamps_scores() {
        let pattern = Pattern::new("co-1", PatternType::Timing, json!({}), "desc", 1.4, 12, -0.3);
        assert_eq!(pattern.success_rate, 1.0);
        assert_eq!(pattern.confidence_level, 0.0);
        assert!(pattern.is_active);
        assert!(!pattern.is_approved);
    }

    #[test]
    fn settings_default_to_enabled() {
        assert!(CompanySettings::from_blob(None).pattern_system_enabled());
        assert!(
            CompanySettings::from_blob(Some(json!("garbage"))).pattern_system_enabled(),
            "non-object blob behaves as absent"
        );
        assert!(
            CompanySettings::from_blob(Some(json!({ PATTERN_SYSTEM_ENABLED_KEY: "yes" })))
                .pattern_system_enabled(),
            "non-boolean flag behaves as absent"
        );
    }

    #[test]
    fn settings_merge_preserves_unrelated_keys() {
        let blob = json!({ "greeting_template": "hi there", PATTERN_SYSTEM_ENABLED_KEY: true });
        let mut settings = CompanySettings::from_blob(Some(blob));
        settings.set_pattern_system_enabled(false, "ops@example.com", 1_700_000_000_000);

        let merged = settings.into_blob();
        assert_eq!(merged["greeting_template"], json!("hi there"));
        assert_eq!(merged[PATTERN_SYSTEM_ENABLED_KEY], json!(false));
        assert_eq!(merged["pattern_system_changed_by"], json!("ops@example.com"));
        assert_eq!(
            merged["pattern_system_changed_at_unix_ms"],
            json!(1_700_000_000_000_u64)
        );
    }
}
