//! Scheduler runtimes for the Sift pattern-mining pipeline.
//!
//! `detection_runtime` drives the continuous per-company detection loop;
//! `maintenance_runtime` drives the weekly/daily/monthly corpus upkeep jobs;
//! `notify` carries the new-pattern notification contract.

pub mod detection_runtime;
pub mod maintenance_runtime;
pub mod notify;

pub use detection_runtime::{
    inspect_detection_scheduler, DetectionCycleSummary, DetectionScheduler,
    DetectionSchedulerConfig, DetectionSchedulerSnapshot,
};
pub use maintenance_runtime::{
    MaintenanceConfig, MaintenanceKind, MaintenanceRunReport, MaintenanceScheduler,
    MaintenanceStats,
};
pub use notify::{CompanyCycleResult, CycleNotifier, LoggingCycleNotifier, NewPatternsEvent};
