//! Operator CLI for the Sift pattern-mining pipeline.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use sift_ai::{HttpAnalysisClient, HttpAnalysisConfig, TextAnalysisClient};
use sift_cleanup::PatternCleanupService;
use sift_detect::{PatternDetector, SuccessAnalyzer};
use sift_runtime::{
    inspect_detection_scheduler, DetectionScheduler, DetectionSchedulerConfig,
    LoggingCycleNotifier, MaintenanceConfig, MaintenanceKind, MaintenanceScheduler,
};
use sift_store::{PatternStore, SqlitePatternStore};
use sift_types::{AnalysisOptions, PatternType};

#[derive(Parser)]
#[command(name = "sift", version, about = "Sales-conversation pattern mining and maintenance")]
struct Cli {
    /// SQLite database path.
    #[arg(long, default_value = ".sift/sift.db", env = "SIFT_DB_PATH")]
    db: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pattern detection for one company over a lookback window.
    Detect {
        #[arg(long)]
        company: String,
        #[arg(long, default_value_t = 14)]
        days: u32,
    },
    /// Run statistical success analysis; results are not persisted unless
    /// --save is passed.
    Analyze {
        #[arg(long)]
        company: String,
        #[arg(long, default_value_t = 30)]
        window_days: u32,
        #[arg(long, default_value_t = 20)]
        min_samples: usize,
        /// Comma-separated pattern types; all types when omitted.
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        #[arg(long)]
        save: bool,
    },
    /// List duplicate groups without merging them.
    FindDuplicates {
        #[arg(long)]
        company: String,
    },
    /// Merge every duplicate group for one company.
    Cleanup {
        #[arg(long)]
        company: String,
    },
    /// Cheap duplicate pre-scan without the pairwise comparison.
    CleanupStats {
        #[arg(long)]
        company: String,
    },
    /// Company registration and pattern-system flags.
    Company {
        #[command(subcommand)]
        action: CompanyAction,
    },
    /// Run one maintenance schedule immediately.
    Maintenance {
        /// weekly, daily, or monthly.
        #[arg(long)]
        kind: String,
    },
    /// Run the detection and maintenance schedulers until interrupted.
    Schedule {
        /// Detection interval in minutes; clamped to 5 minutes - 24 hours.
        #[arg(long)]
        interval_minutes: Option<u64>,
        #[arg(long, default_value = ".sift")]
        state_dir: PathBuf,
    },
    /// Show the persisted scheduler snapshot.
    Status {
        #[arg(long, default_value = ".sift")]
        state_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum CompanyAction {
    /// Register a company for monitoring.
    Register {
        #[arg(long)]
        company: String,
    },
    /// Turn the pattern system on for a company.
    Enable {
        #[arg(long)]
        company: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Turn the pattern system off for a company.
    Disable {
        #[arg(long)]
        company: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn analysis_client_from_env() -> Result<Arc<dyn TextAnalysisClient>> {
    let mut config = HttpAnalysisConfig::default();
    if let Ok(api_key) = std::env::var("SIFT_ANALYSIS_API_KEY") {
        config.api_key = api_key;
    }
    if let Ok(api_base) = std::env::var("SIFT_ANALYSIS_API_BASE") {
        config.api_base = api_base;
    }
    if let Ok(model) = std::env::var("SIFT_ANALYSIS_MODEL") {
        config.model = model;
    }
    let client = HttpAnalysisClient::new(config).context("failed to build analysis client")?;
    Ok(Arc::new(client))
}

fn parse_pattern_types(raw: &[String]) -> Result<Vec<PatternType>> {
    if raw.is_empty() {
        return Ok(PatternType::all().to_vec());
    }
    raw.iter()
        .map(|label| PatternType::from_str(label).map_err(anyhow::Error::from))
        .collect()
}

fn print_envelope(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

async fn run(cli: Cli) -> Result<()> {
    let store: Arc<dyn PatternStore> =
        Arc::new(SqlitePatternStore::new(&cli.db).context("failed to open pattern store")?);

    match cli.command {
        Command::Detect { company, days } => {
            let analysis = analysis_client_from_env()?;
            let detector = PatternDetector::new(store, analysis);
            let report = detector.detect_new_patterns(&company, days).await?;
            print_envelope(&serde_json::to_value(&report)?);
        }
        Command::Analyze {
            company,
            window_days,
            min_samples,
            types,
            save,
        } => {
            let analyzer = SuccessAnalyzer::new(store);
            let options = AnalysisOptions {
                window_days,
                min_sample_size: min_samples,
                pattern_types: parse_pattern_types(&types)?,
            };
            let report = analyzer.analyze_success_patterns(&company, &options).await?;
            if save {
                for pattern in &report.patterns {
                    analyzer.save_success_pattern(pattern).await?;
                }
            }
            print_envelope(&serde_json::to_value(&report)?);
        }
        Command::FindDuplicates { company } => {
            let cleanup = PatternCleanupService::new(store);
            let groups = cleanup.find_duplicate_patterns(&company).await?;
            print_envelope(&json!({ "success": true, "duplicate_groups": groups }));
        }
        Command::Cleanup { company } => {
            let cleanup = PatternCleanupService::new(store);
            let summary = cleanup.cleanup_duplicate_patterns(&company).await?;
            print_envelope(&json!({ "success": true, "stats": summary }));
        }
        Command::CleanupStats { company } => {
            let cleanup = PatternCleanupService::new(store);
            let stats = cleanup.get_cleanup_stats(&company).await?;
            print_envelope(&json!({ "success": true, "stats": stats }));
        }
        Command::Company { action } => match action {
            CompanyAction::Register { company } => {
                store.register_company(&company).await?;
                print_envelope(&json!({ "success": true }));
            }
            CompanyAction::Enable { company, by } => {
                let scheduler = build_detection_scheduler(store, PathBuf::from(".sift"))?;
                scheduler
                    .enable_pattern_system_for_company(&company, &by)
                    .await?;
                print_envelope(&json!({ "success": true }));
            }
            CompanyAction::Disable { company, by } => {
                let scheduler = build_detection_scheduler(store, PathBuf::from(".sift"))?;
                scheduler
                    .disable_pattern_system_for_company(&company, &by)
                    .await?;
                print_envelope(&json!({ "success": true }));
            }
        },
        Command::Maintenance { kind } => {
            let kind = MaintenanceKind::parse(&kind)?;
            let maintenance = MaintenanceScheduler::new(store, MaintenanceConfig::default());
            let report = maintenance.run_immediate_maintenance(kind).await?;
            print_envelope(&json!({ "success": true, "stats": report }));
        }
        Command::Schedule {
            interval_minutes,
            state_dir,
        } => {
            let detection = build_detection_scheduler(store.clone(), state_dir.clone())?;
            if let Some(minutes) = interval_minutes {
                detection.set_detection_interval(minutes).await?;
            }
            let maintenance = Arc::new(MaintenanceScheduler::new(
                store,
                MaintenanceConfig {
                    state_path: state_dir.join("maintenance-scheduler/state.json"),
                    ..MaintenanceConfig::default()
                },
            ));

            detection.start().await?;
            maintenance.start().await;
            tracing::info!("schedulers running; press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for ctrl-c")?;

            detection.stop().await;
            maintenance.stop().await;
            print_envelope(&json!({ "success": true }));
        }
        Command::Status { state_dir } => {
            let snapshot =
                inspect_detection_scheduler(&state_dir.join("detection-scheduler/state.json"));
            print_envelope(&json!({ "success": true, "data": snapshot }));
        }
    }
    Ok(())
}

fn build_detection_scheduler(
    store: Arc<dyn PatternStore>,
    state_dir: PathBuf,
) -> Result<Arc<DetectionScheduler>> {
    let analysis = analysis_client_from_env()?;
    let detector = Arc::new(PatternDetector::new(store.clone(), analysis));
    Ok(Arc::new(DetectionScheduler::new(
        store,
        detector,
        Arc::new(LoggingCycleNotifier),
        DetectionSchedulerConfig {
            state_path: state_dir.join("detection-scheduler/state.json"),
            ..DetectionSchedulerConfig::default()
        },
    )))
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        let envelope = json!({ "success": false, "error": format!("{error:#}") });
        println!(
            "{}",
            serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| "{}".to_string())
        );
        std::process::exit(1);
    }
}
