//! Recurring corpus maintenance: weekly dedup + deactivation, daily stat
//! refresh, monthly archiving.
//!
//! The three schedules share one exclusivity flag. A scheduled tick that
//! lands while another run is in flight is skipped quietly; an explicit
//! immediate trigger in the same situation is the one hard "busy" error in
//! the pipeline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use sift_cleanup::PatternCleanupService;
use sift_core::{current_unix_timestamp_ms, write_text_atomic};
use sift_store::PatternStore;
use sift_types::clamp_unit;

const DEFAULT_WEEKLY_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_DAILY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MONTHLY_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_UNUSED_CUTOFF_DAYS: i64 = 30;
const DEFAULT_USAGE_RETENTION_DAYS: i64 = 90;
const DEFAULT_ARCHIVE_AGE_DAYS: i64 = 180;
const DEFAULT_RECENT_USAGE_DAYS: i64 = 7;
const RATE_BLEND_EXISTING_WEIGHT: f64 = 0.7;
const RATE_BLEND_RECENT_WEIGHT: f64 = 0.3;

/// Which maintenance schedule to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceKind {
    Weekly,
    Daily,
    Monthly,
}

impl MaintenanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            other => bail!("unknown maintenance kind '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `MaintenanceConfig` used across Sift components.
pub struct MaintenanceConfig {
    pub weekly_interval: Duration,
    pub daily_interval: Duration,
    pub monthly_interval: Duration,
    pub state_path: PathBuf,
    /// Active patterns older than this with no usage in the window are
    /// deactivated, never deleted.
    pub unused_cutoff_days: i64,
    pub usage_retention_days: i64,
    /// Inactive patterns older than this are archived then hard-deleted.
    pub archive_age_days: i64,
    pub recent_usage_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            weekly_interval: DEFAULT_WEEKLY_INTERVAL,
            daily_interval: DEFAULT_DAILY_INTERVAL,
            monthly_interval: DEFAULT_MONTHLY_INTERVAL,
            state_path: PathBuf::from(".sift/maintenance-scheduler/state.json"),
            unused_cutoff_days: DEFAULT_UNUSED_CUTOFF_DAYS,
            usage_retention_days: DEFAULT_USAGE_RETENTION_DAYS,
            archive_age_days: DEFAULT_ARCHIVE_AGE_DAYS,
            recent_usage_days: DEFAULT_RECENT_USAGE_DAYS,
        }
    }
}

/// Result of one maintenance run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MaintenanceRunReport {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub timestamp_unix_ms: u64,
    #[serde(default)]
    pub companies_processed: usize,
    #[serde(default)]
    pub duplicate_groups_merged: usize,
    #[serde(default)]
    pub patterns_deactivated: usize,
    #[serde(default)]
    pub rates_refreshed: usize,
    #[serde(default)]
    pub usage_purged: usize,
    #[serde(default)]
    pub patterns_archived: usize,
    #[serde(default)]
    pub patterns_deleted: usize,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Last run per schedule plus run counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MaintenanceStats {
    #[serde(default)]
    pub last_weekly: Option<MaintenanceRunReport>,
    #[serde(default)]
    pub last_daily: Option<MaintenanceRunReport>,
    #[serde(default)]
    pub last_monthly: Option<MaintenanceRunReport>,
    #[serde(default)]
    pub runs_completed: u64,
    #[serde(default)]
    pub runs_skipped_busy: u64,
}

struct MaintenanceState {
    is_running: bool,
    stats: MaintenanceStats,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Recurring maintenance scheduler layered on the cleanup service.
pub struct MaintenanceScheduler {
    store: Arc<dyn PatternStore>,
    cleanup: PatternCleanupService,
    config: MaintenanceConfig,
    busy: AtomicBool,
    state: Mutex<MaintenanceState>,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<dyn PatternStore>, config: MaintenanceConfig) -> Self {
        Self {
            cleanup: PatternCleanupService::new(store.clone()),
            store,
            config,
            busy: AtomicBool::new(false),
            state: Mutex::new(MaintenanceState {
                is_running: false,
                stats: MaintenanceStats::default(),
                shutdown_tx: None,
                tasks: Vec::new(),
            }),
        }
    }

    /// Starts the three recurring loops. No-op when already running.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.is_running {
            tracing::debug!("maintenance scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let schedules = [
            (MaintenanceKind::Weekly, self.config.weekly_interval),
            (MaintenanceKind::Daily, self.config.daily_interval),
            (MaintenanceKind::Monthly, self.config.monthly_interval),
        ];
        for (kind, interval) in schedules {
            let scheduler = Arc::clone(self);
            let mut shutdown_rx = shutdown_rx.clone();
            state.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            scheduler.run_scheduled(kind).await;
                        }
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        state.is_running = true;
        state.shutdown_tx = Some(shutdown_tx);
    }

    /// Prevents future ticks; an in-flight run completes.
    pub async fn stop(&self) {
        let (shutdown_tx, tasks) = {
            let mut state = self.state.lock().await;
            if !state.is_running {
                return;
            }
            state.is_running = false;
            (state.shutdown_tx.take(), std::mem::take(&mut state.tasks))
        };
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Scheduled entry point: a busy overlap is a quiet skip.
    async fn run_scheduled(&self, kind: MaintenanceKind) {
        if !self.try_acquire() {
            tracing::info!(kind = kind.as_str(), "maintenance tick skipped; run in progress");
            let mut state = self.state.lock().await;
            state.stats.runs_skipped_busy = state.stats.runs_skipped_busy.saturating_add(1);
            return;
        }
        let report = self.run_maintenance(kind).await;
        self.release();
        self.record_run(kind, report).await;
    }

    /// On-demand entry point sharing the exclusivity guard.
    ///
    /// Unlike a scheduled tick, a busy overlap here is a hard error: the
    /// caller explicitly asked for synchronous work.
    pub async fn run_immediate_maintenance(
        &self,
        kind: MaintenanceKind,
    ) -> Result<MaintenanceRunReport> {
        if !self.try_acquire() {
            bail!("maintenance run already in progress");
        }
        let report = self.run_maintenance(kind).await;
        self.release();
        self.record_run(kind, report.clone()).await;
        Ok(report)
    }

    pub async fn get_stats(&self) -> MaintenanceStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running
    }

    fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn record_run(&self, kind: MaintenanceKind, report: MaintenanceRunReport) {
        let mut state = self.state.lock().await;
        match kind {
            MaintenanceKind::Weekly => state.stats.last_weekly = Some(report),
            MaintenanceKind::Daily => state.stats.last_daily = Some(report),
            MaintenanceKind::Monthly => state.stats.last_monthly = Some(report),
        }
        state.stats.runs_completed = state.stats.runs_completed.saturating_add(1);

        match serde_json::to_string_pretty(&state.stats) {
            Ok(payload) => {
                if let Err(error) = write_text_atomic(&self.config.state_path, &payload) {
                    tracing::warn!(
                        path = %self.config.state_path.display(),
                        error = %error,
                        "maintenance stats persist failed"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "maintenance stats serialization failed");
            }
        }
    }

    async fn run_maintenance(&self, kind: MaintenanceKind) -> MaintenanceRunReport {
        let mut report = MaintenanceRunReport {
            kind: kind.as_str().to_string(),
            timestamp_unix_ms: current_unix_timestamp_ms(),
            ..MaintenanceRunReport::default()
        };

        let companies = match self.store.list_company_ids().await {
            Ok(companies) => companies,
            Err(error) => {
                report
                    .diagnostics
                    .push(format!("company_list_failed: error={error}"));
                return report;
            }
        };

        for company_id in &companies {
            let outcome = match kind {
                MaintenanceKind::Weekly => self.run_weekly_for_company(company_id, &mut report).await,
                MaintenanceKind::Daily => self.run_daily_for_company(company_id, &mut report).await,
                MaintenanceKind::Monthly => {
                    self.run_monthly_for_company(company_id, &mut report).await
                }
            };
            report.companies_processed += 1;
            if let Err(error) = outcome {
                tracing::warn!(
                    company_id = %company_id,
                    kind = kind.as_str(),
                    error = %error,
                    "company maintenance failed"
                );
                report
                    .diagnostics
                    .push(format!("company_failed: company_id={company_id} error={error}"));
            }
        }
        report
    }

    /// Weekly: full duplicate cleanup plus deactivation of stale unused
    /// patterns.
    async fn run_weekly_for_company(
        &self,
        company_id: &str,
        report: &mut MaintenanceRunReport,
    ) -> Result<()> {
        let summary = self.cleanup.cleanup_duplicate_patterns(company_id).await?;
        report.duplicate_groups_merged += summary.patterns_merged;
        report.patterns_deleted += summary.patterns_deleted;

        let cutoff = Utc::now() - chrono::Duration::days(self.config.unused_cutoff_days);
        let patterns = self.store.list_patterns(company_id, true).await?;
        let mut stale_ids = Vec::new();
        for pattern in &patterns {
            if pattern.created_at >= cutoff {
                continue;
            }
            if self
                .store
                .usage_exists_since(company_id, &pattern.id, cutoff)
                .await?
            {
                continue;
            }
            stale_ids.push(pattern.id.clone());
        }
        if !stale_ids.is_empty() {
            report.patterns_deactivated += self
                .store
                .deactivate_patterns(company_id, &stale_ids)
                .await?;
        }
        Ok(())
    }

    /// Daily: blend each active pattern's rate with its recent usage rate,
    /// then purge expired usage rows.
    async fn run_daily_for_company(
        &self,
        company_id: &str,
        report: &mut MaintenanceRunReport,
    ) -> Result<()> {
        let recent_since = Utc::now() - chrono::Duration::days(self.config.recent_usage_days);
        let patterns = self.store.list_patterns(company_id, true).await?;
        for pattern in patterns {
            let usage = self
                .store
                .list_usage_since(company_id, &pattern.id, recent_since)
                .await?;
            if usage.is_empty() {
                continue;
            }
            let applied = usage.iter().filter(|record| record.applied).count();
            let recent_rate = applied as f64 / usage.len() as f64;

            let mut updated = pattern;
            updated.success_rate = clamp_unit(
                updated.success_rate * RATE_BLEND_EXISTING_WEIGHT
                    + recent_rate * RATE_BLEND_RECENT_WEIGHT,
            );
            updated.updated_at = Utc::now();
            self.store.update_pattern(updated).await?;
            report.rates_refreshed += 1;
        }

        let retention_cutoff =
            Utc::now() - chrono::Duration::days(self.config.usage_retention_days);
        report.usage_purged += self
            .store
            .purge_usage_before(company_id, retention_cutoff)
            .await?;
        Ok(())
    }

    /// Monthly: archive (best-effort) then hard-delete long-inactive
    /// patterns.
    async fn run_monthly_for_company(
        &self,
        company_id: &str,
        report: &mut MaintenanceRunReport,
    ) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.archive_age_days);
        let patterns = self.store.list_patterns(company_id, false).await?;
        let expired: Vec<_> = patterns
            .into_iter()
            .filter(|pattern| !pattern.is_active && pattern.created_at < cutoff)
            .collect();
        if expired.is_empty() {
            return Ok(());
        }

        let mut expired_ids = Vec::new();
        for pattern in &expired {
            match self.store.archive_pattern(pattern).await {
                Ok(true) => report.patterns_archived += 1,
                Ok(false) => {
                    report
                        .diagnostics
                        .push(format!("archive_store_missing: company_id={company_id}"));
                }
                Err(error) => {
                    report.diagnostics.push(format!(
                        "archive_failed: pattern_id={} error={error}",
                        pattern.id
                    ));
                }
            }
            expired_ids.push(pattern.id.clone());
        }
        report.patterns_deleted += self.store.delete_patterns(company_id, &expired_ids).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MaintenanceConfig, MaintenanceKind, MaintenanceScheduler};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use sift_store::{InMemoryPatternStore, PatternStore};
    use sift_types::{Pattern, PatternType, PatternUsage};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn pattern(company_id: &str, id: &str, description: &str, rate: f64, age_days: i64) -> Pattern {
        let mut pattern = Pattern::new(
            company_id,
            PatternType::WordUsage,
            json!({}),
            description,
            rate,
            10,
            0.6,
        );
        pattern.id = id.to_string();
        pattern.created_at = Utc::now() - Duration::days(age_days);
        pattern.updated_at = pattern.created_at;
        pattern
    }

    fn scheduler(store: Arc<InMemoryPatternStore>, state_dir: &std::path::Path) -> MaintenanceScheduler {
        MaintenanceScheduler::new(
            store,
            MaintenanceConfig {
                state_path: state_dir.join("maintenance/state.json"),
                ..MaintenanceConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn weekly_deactivates_stale_unused_patterns_only() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPatternStore::new());
        store.register_company("co-1").await.expect("register");

        store
            .insert_pattern(pattern("co-1", "p-stale", "old unused words insight", 0.6, 45))
            .await
            .expect("stale");
        store
            .insert_pattern(pattern("co-1", "p-used", "old but recently applied timing", 0.6, 45))
            .await
            .expect("used");
        store
            .insert_pattern(pattern("co-1", "p-fresh", "recent emotional tone finding", 0.6, 5))
            .await
            .expect("fresh");
        store
            .record_usage(PatternUsage::new("p-used", "co-1", true))
            .await
            .expect("usage");

        let maintenance = scheduler(store.clone(), temp.path());
        let report = maintenance
            .run_immediate_maintenance(MaintenanceKind::Weekly)
            .await
            .expect("weekly");
        assert_eq!(report.patterns_deactivated, 1);

        let stale = store
            .get_pattern("co-1", "p-stale")
            .await
            .expect("get")
            .expect("still stored");
        assert!(!stale.is_active, "deactivated, never deleted");
        assert!(store
            .get_pattern("co-1", "p-used")
            .await
            .expect("get")
            .expect("present")
            .is_active);
        assert!(store
            .get_pattern("co-1", "p-fresh")
            .await
            .expect("get")
            .expect("present")
            .is_active);
    }

    #[tokio::test]
    async fn daily_blends_rates_and_purges_expired_usage() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPatternStore::new());
        store.register_company("co-1").await.expect("register");

        store
            .insert_pattern(pattern("co-1", "p-hot", "frequently applied discount wording", 0.5, 20))
            .await
            .expect("hot");
        store
            .insert_pattern(pattern("co-1", "p-idle", "idle pattern without recent usage", 0.9, 20))
            .await
            .expect("idle");
        for _ in 0..4 {
            store
                .record_usage(PatternUsage::new("p-hot", "co-1", true))
                .await
                .expect("usage");
        }
        let mut expired = PatternUsage::new("p-hot", "co-1", true);
        expired.created_at = Utc::now() - Duration::days(120);
        store.record_usage(expired).await.expect("expired usage");

        let maintenance = scheduler(store.clone(), temp.path());
        let report = maintenance
            .run_immediate_maintenance(MaintenanceKind::Daily)
            .await
            .expect("daily");
        assert_eq!(report.rates_refreshed, 1);
        assert_eq!(report.usage_purged, 1);

        let hot = store
            .get_pattern("co-1", "p-hot")
            .await
            .expect("get")
            .expect("present");
        // 0.5 * 0.7 + 1.0 * 0.3
        assert!((hot.success_rate - 0.65).abs() < 1e-9);
        let idle = store
            .get_pattern("co-1", "p-idle")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(idle.success_rate, 0.9, "no recent usage leaves the rate alone");
    }

    #[tokio::test]
    async fn monthly_archives_then_deletes_long_inactive_patterns() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPatternStore::new());
        store.register_company("co-1").await.expect("register");

        let mut expired = pattern("co-1", "p-expired", "abandoned stale hypothesis", 0.4, 220);
        expired.is_active = false;
        store.insert_pattern(expired).await.expect("expired");
        store
            .insert_pattern(pattern("co-1", "p-active-old", "still active veteran", 0.7, 220))
            .await
            .expect("active old");
        let mut inactive_recent = pattern("co-1", "p-new-off", "recently deactivated", 0.4, 30);
        inactive_recent.is_active = false;
        store
            .insert_pattern(inactive_recent)
            .await
            .expect("inactive recent");

        let maintenance = scheduler(store.clone(), temp.path());
        let report = maintenance
            .run_immediate_maintenance(MaintenanceKind::Monthly)
            .await
            .expect("monthly");
        assert_eq!(report.patterns_archived, 1);
        assert_eq!(report.patterns_deleted, 1);
        assert_eq!(store.archived_count().await, 1);

        assert!(store
            .get_pattern("co-1", "p-expired")
            .await
            .expect("get")
            .is_none());
        assert!(store
            .get_pattern("co-1", "p-active-old")
            .await
            .expect("get")
            .is_some());
        assert!(store
            .get_pattern("co-1", "p-new-off")
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn monthly_without_archive_store_still_deletes() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPatternStore::without_archive());
        store.register_company("co-1").await.expect("register");
        let mut expired = pattern("co-1", "p-expired", "abandoned stale hypothesis", 0.4, 220);
        expired.is_active = false;
        store.insert_pattern(expired).await.expect("expired");

        let maintenance = scheduler(store.clone(), temp.path());
        let report = maintenance
            .run_immediate_maintenance(MaintenanceKind::Monthly)
            .await
            .expect("monthly");
        assert_eq!(report.patterns_archived, 0);
        assert_eq!(report.patterns_deleted, 1);
        assert!(report
            .diagnostics
            .iter()
            .any(|line| line.contains("archive_store_missing")));
    }

    #[tokio::test]
    async fn immediate_trigger_errors_while_a_run_is_in_progress() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPatternStore::new());
        let maintenance = scheduler(store, temp.path());

        maintenance.busy.store(true, Ordering::SeqCst);
        let error = maintenance
            .run_immediate_maintenance(MaintenanceKind::Daily)
            .await
            .expect_err("busy");
        assert!(error.to_string().contains("already in progress"));

        maintenance.busy.store(false, Ordering::SeqCst);
        maintenance
            .run_immediate_maintenance(MaintenanceKind::Daily)
            .await
            .expect("runs after release");
    }

    #[tokio::test]
    async fn stats_track_last_runs_per_schedule() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPatternStore::new());
        store.register_company("co-1").await.expect("register");
        let maintenance = scheduler(store, temp.path());

        maintenance
            .run_immediate_maintenance(MaintenanceKind::Weekly)
            .await
            .expect("weekly");
        maintenance
            .run_immediate_maintenance(MaintenanceKind::Daily)
            .await
            .expect("daily");

        let stats = maintenance.get_stats().await;
        assert!(stats.last_weekly.is_some());
        assert!(stats.last_daily.is_some());
        assert!(stats.last_monthly.is_none());
        assert_eq!(stats.runs_completed, 2);
    }

    #[tokio::test]
    async fn maintenance_kind_labels_parse() {
        assert_eq!(
            MaintenanceKind::parse("weekly").expect("parse"),
            MaintenanceKind::Weekly
        );
        assert_eq!(
            MaintenanceKind::parse(" MONTHLY ").expect("parse"),
            MaintenanceKind::Monthly
        );
        assert!(MaintenanceKind::parse("hourly").is_err());
    }
}
