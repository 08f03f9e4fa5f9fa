//! Continuous per-company detection scheduling.
//!
//! One in-process scheduler object owns the roster, the interval, and the
//! recurring tokio timer. Companies are processed strictly sequentially
//! inside a cycle so one tenant's failure can never corrupt or skip a
//! sibling's slot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use sift_core::{clamp_duration, current_unix_timestamp_ms, write_text_atomic};
use sift_detect::PatternDetector;
use sift_store::PatternStore;
use sift_types::{CompanySettings, DetectionReport};

use crate::notify::{CompanyCycleResult, CycleNotifier, NewPatternsEvent};

const DETECTION_SCHEDULER_SCHEMA_VERSION: u32 = 1;
const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const MIN_DETECTION_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_DETECTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_WARMUP_DELAY: Duration = Duration::from_secs(30);
const MIN_LOOKBACK_DAYS: u32 = 3;
const MAX_LOOKBACK_DAYS: u32 = 30;
const REASON_PATTERN_SYSTEM_DISABLED: &str = "pattern_system_disabled";

fn detection_scheduler_schema_version() -> u32 {
    DETECTION_SCHEDULER_SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `DetectionSchedulerConfig` used across Sift components.
pub struct DetectionSchedulerConfig {
    pub interval: Duration,
    pub warmup_delay: Duration,
    pub state_path: PathBuf,
}

impl Default for DetectionSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DETECTION_INTERVAL,
            warmup_delay: DEFAULT_WARMUP_DELAY,
            state_path: PathBuf::from(".sift/detection-scheduler/state.json"),
        }
    }
}

/// Aggregate result of one full detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DetectionCycleSummary {
    #[serde(default)]
    pub timestamp_unix_ms: u64,
    #[serde(default)]
    pub total_new_patterns: usize,
    #[serde(default)]
    pub companies: Vec<CompanyCycleResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `DetectionSchedulerSnapshot` used across Sift components.
pub struct DetectionSchedulerSnapshot {
    #[serde(default = "detection_scheduler_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub updated_unix_ms: u64,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default)]
    pub monitored_companies: Vec<String>,
    #[serde(default)]
    pub last_cycle: Option<DetectionCycleSummary>,
    #[serde(default)]
    pub state_path: String,
}

impl Default for DetectionSchedulerSnapshot {
    fn default() -> Self {
        Self {
            schema_version: DETECTION_SCHEDULER_SCHEMA_VERSION,
            updated_unix_ms: current_unix_timestamp_ms(),
            is_running: false,
            interval_ms: 0,
            cycle_count: 0,
            monitored_companies: Vec::new(),
            last_cycle: None,
            state_path: String::new(),
        }
    }
}

/// Reads the last persisted scheduler snapshot, tolerating a missing file.
pub fn inspect_detection_scheduler(state_path: &Path) -> DetectionSchedulerSnapshot {
    let mut fallback = DetectionSchedulerSnapshot {
        state_path: state_path.display().to_string(),
        ..DetectionSchedulerSnapshot::default()
    };
    if !state_path.exists() {
        return fallback;
    }
    match std::fs::read_to_string(state_path)
        .ok()
        .and_then(|raw| serde_json::from_str::<DetectionSchedulerSnapshot>(&raw).ok())
    {
        Some(mut parsed) => {
            parsed.state_path = state_path.display().to_string();
            parsed
        }
        None => {
            fallback.state_path = state_path.display().to_string();
            fallback
        }
    }
}

struct SchedulerState {
    is_running: bool,
    interval: Duration,
    warmup_delay: Duration,
    companies: Vec<String>,
    cycle_count: u64,
    last_summary: Option<DetectionCycleSummary>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Continuous detection scheduler.
pub struct DetectionScheduler {
    store: Arc<dyn PatternStore>,
    detector: Arc<PatternDetector>,
    notifier: Arc<dyn CycleNotifier>,
    state_path: PathBuf,
    state: Mutex<SchedulerState>,
}

impl DetectionScheduler {
    pub fn new(
        store: Arc<dyn PatternStore>,
        detector: Arc<PatternDetector>,
        notifier: Arc<dyn CycleNotifier>,
        config: DetectionSchedulerConfig,
    ) -> Self {
        Self {
            store,
            detector,
            notifier,
            state_path: config.state_path,
            state: Mutex::new(SchedulerState {
                is_running: false,
                interval: clamp_duration(
                    config.interval,
                    MIN_DETECTION_INTERVAL,
                    MAX_DETECTION_INTERVAL,
                ),
                warmup_delay: config.warmup_delay,
                companies: Vec::new(),
                cycle_count: 0,
                last_summary: None,
                shutdown_tx: None,
                task: None,
            }),
        }
    }

    /// Starts the recurring loop. No-op when already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_running {
            tracing::debug!("detection scheduler already running");
            return Ok(());
        }

        let mut roster = self
            .store
            .list_company_ids()
            .await
            .context("failed to load monitored companies")?;
        for existing in &state.companies {
            if !roster.contains(existing) {
                roster.push(existing.clone());
            }
        }
        state.companies = roster;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let scheduler = Arc::clone(self);
        let interval = state.interval;
        let warmup_delay = state.warmup_delay;
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(warmup_delay) => {}
                _ = &mut shutdown_rx => return,
            }
            scheduler.run_detection_cycle().await;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_detection_cycle().await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        state.is_running = true;
        state.shutdown_tx = Some(shutdown_tx);
        state.task = Some(task);
        self.persist_snapshot(&state);
        Ok(())
    }

    /// Prevents future ticks; in-flight work runs to completion.
    pub async fn stop(&self) {
        let (shutdown_tx, task) = {
            let mut state = self.state.lock().await;
            if !state.is_running {
                return;
            }
            state.is_running = false;
            (state.shutdown_tx.take(), state.task.take())
        };
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        let state = self.state.lock().await;
        self.persist_snapshot(&state);
    }

    /// One sequential pass over the roster.
    pub async fn run_detection_cycle(&self) -> DetectionCycleSummary {
        let companies = {
            let state = self.state.lock().await;
            state.companies.clone()
        };

        let mut results = Vec::new();
        let mut total_new_patterns = 0_usize;
        for company_id in &companies {
            let result = self.detect_patterns_for_company(company_id).await;
            total_new_patterns += result.new_patterns;
            results.push(result);
        }

        let summary = DetectionCycleSummary {
            timestamp_unix_ms: current_unix_timestamp_ms(),
            total_new_patterns,
            companies: results,
        };

        if summary.total_new_patterns > 0 {
            self.notifier.notify_new_patterns(&NewPatternsEvent {
                count: summary.total_new_patterns,
                per_company_results: summary.companies.clone(),
                timestamp_unix_ms: summary.timestamp_unix_ms,
            });
        }
        self.detector.clear_cache().await;

        let mut state = self.state.lock().await;
        state.cycle_count = state.cycle_count.saturating_add(1);
        state.last_summary = Some(summary.clone());
        self.persist_snapshot(&state);
        summary
    }

    /// Flag check, adaptive lookback, then detection for a single company.
    async fn detect_patterns_for_company(&self, company_id: &str) -> CompanyCycleResult {
        if !self.pattern_system_enabled(company_id).await {
            return CompanyCycleResult {
                company_id: company_id.to_string(),
                skipped: true,
                reason: Some(REASON_PATTERN_SYSTEM_DISABLED.to_string()),
                new_patterns: 0,
                merged_patterns: 0,
                error: None,
            };
        }

        let lookback_days = self.adaptive_lookback_days(company_id).await;
        match self
            .detector
            .detect_new_patterns(company_id, lookback_days)
            .await
        {
            Ok(report) => CompanyCycleResult {
                company_id: company_id.to_string(),
                skipped: false,
                reason: (!report.success)
                    .then(|| report.metadata.reason_codes.join(",")),
                new_patterns: report.patterns.len(),
                merged_patterns: report.metadata.merged_count,
                error: None,
            },
            Err(error) => {
                tracing::warn!(company_id, error = %error, "company detection failed");
                CompanyCycleResult {
                    company_id: company_id.to_string(),
                    skipped: false,
                    reason: None,
                    new_patterns: 0,
                    merged_patterns: 0,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// On-demand single-company detection sharing the cycle's flag check.
    pub async fn run_immediate_detection(&self, company_id: &str) -> Result<DetectionReport> {
        if !self.pattern_system_enabled(company_id).await {
            anyhow::bail!("pattern system disabled for company '{company_id}'");
        }
        let lookback_days = self.adaptive_lookback_days(company_id).await;
        self.detector
            .detect_new_patterns(company_id, lookback_days)
            .await
    }

    async fn pattern_system_enabled(&self, company_id: &str) -> bool {
        match self.store.read_company_settings(company_id).await {
            Ok(blob) => CompanySettings::from_blob(blob).pattern_system_enabled(),
            Err(error) => {
                // Absent or unreadable settings default to enabled.
                tracing::debug!(company_id, error = %error, "settings read failed; defaulting to enabled");
                true
            }
        }
    }

    /// 3 to 30 days, widened the longer the company has gone without a new
    /// pattern.
    async fn adaptive_lookback_days(&self, company_id: &str) -> u32 {
        match self.store.newest_pattern_created_at(company_id).await {
            Ok(Some(newest)) => {
                let days_since = (Utc::now() - newest).num_days().max(0) as u32;
                days_since.clamp(MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS)
            }
            Ok(None) => MAX_LOOKBACK_DAYS,
            Err(_) => MAX_LOOKBACK_DAYS,
        }
    }

    /// Clamps to 5 minutes - 24 hours; restarts a running loop so the new
    /// interval applies immediately.
    pub async fn set_detection_interval(self: &Arc<Self>, minutes: u64) -> Result<()> {
        let requested = Duration::from_secs(minutes.saturating_mul(60));
        let clamped = clamp_duration(requested, MIN_DETECTION_INTERVAL, MAX_DETECTION_INTERVAL);
        let was_running = {
            let mut state = self.state.lock().await;
            state.interval = clamped;
            state.is_running
        };
        if was_running {
            self.stop().await;
            self.start().await?;
        }
        Ok(())
    }

    pub async fn add_company(&self, company_id: &str) {
        let mut state = self.state.lock().await;
        if !state.companies.iter().any(|existing| existing == company_id) {
            state.companies.push(company_id.to_string());
        }
    }

    pub async fn remove_company(&self, company_id: &str) {
        let mut state = self.state.lock().await;
        state.companies.retain(|existing| existing != company_id);
    }

    pub async fn get_status(&self) -> DetectionSchedulerSnapshot {
        let state = self.state.lock().await;
        self.build_snapshot(&state)
    }

    /// Merge-writes the enablement flag plus audit fields into the settings
    /// blob, preserving unrelated keys.
    pub async fn set_pattern_system_for_company(
        &self,
        company_id: &str,
        enabled: bool,
        changed_by: &str,
    ) -> Result<()> {
        let blob = self
            .store
            .read_company_settings(company_id)
            .await
            .context("failed to read company settings")?;
        let mut settings = CompanySettings::from_blob(blob);
        settings.set_pattern_system_enabled(enabled, changed_by, current_unix_timestamp_ms());
        self.store
            .write_company_settings(company_id, settings.into_blob())
            .await
            .context("failed to write company settings")
    }

    pub async fn enable_pattern_system_for_company(
        &self,
        company_id: &str,
        changed_by: &str,
    ) -> Result<()> {
        self.set_pattern_system_for_company(company_id, true, changed_by)
            .await
    }

    pub async fn disable_pattern_system_for_company(
        &self,
        company_id: &str,
        changed_by: &str,
    ) -> Result<()> {
        self.set_pattern_system_for_company(company_id, false, changed_by)
            .await
    }

    fn build_snapshot(&self, state: &SchedulerState) -> DetectionSchedulerSnapshot {
        DetectionSchedulerSnapshot {
            schema_version: DETECTION_SCHEDULER_SCHEMA_VERSION,
            updated_unix_ms: current_unix_timestamp_ms(),
            is_running: state.is_running,
            interval_ms: u64::try_from(state.interval.as_millis()).unwrap_or(u64::MAX),
            cycle_count: state.cycle_count,
            monitored_companies: state.companies.clone(),
            last_cycle: state.last_summary.clone(),
            state_path: self.state_path.display().to_string(),
        }
    }

    fn persist_snapshot(&self, state: &SchedulerState) {
        let snapshot = self.build_snapshot(state);
        let payload = match serde_json::to_string_pretty(&snapshot) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(error = %error, "detection snapshot serialization failed");
                return;
            }
        };
        if let Err(error) = write_text_atomic(&self.state_path, &payload) {
            tracing::warn!(
                path = %self.state_path.display(),
                error = %error,
                "detection snapshot persist failed"
            );
        }
    }
}
