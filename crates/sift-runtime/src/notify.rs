//! Notification contract for detection cycles that find new patterns.

use serde::{Deserialize, Serialize};

/// Per-company slice of a detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyCycleResult {
    pub company_id: String,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub new_patterns: usize,
    #[serde(default)]
    pub merged_patterns: usize,
    #[serde(default)]
    pub error: Option<String>,
}

/// Event emitted when a cycle discovers at least one new pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPatternsEvent {
    pub count: usize,
    pub per_company_results: Vec<CompanyCycleResult>,
    pub timestamp_unix_ms: u64,
}

/// Sink for cycle notifications. The default forwards to structured logging;
/// the contract supports any operator-facing channel.
pub trait CycleNotifier: Send + Sync {
    fn notify_new_patterns(&self, event: &NewPatternsEvent);
}

/// Logs the event through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingCycleNotifier;

impl CycleNotifier for LoggingCycleNotifier {
    fn notify_new_patterns(&self, event: &NewPatternsEvent) {
        tracing::info!(
            count = event.count,
            companies = event.per_company_results.len(),
            timestamp_unix_ms = event.timestamp_unix_ms,
            "detection cycle found new patterns"
        );
    }
}
