//! Pattern detection and statistical success analysis.
//!
//! `similarity` and `rules` hold the shared primitives; `strategies` holds
//! the cohort-comparison heuristics; `detector` orchestrates the full
//! detect-filter-dedup-persist pipeline and `analyzer` runs the on-demand
//! statistical comparison over a labeled window.

pub mod analyzer;
pub mod detector;
pub mod rules;
pub mod similarity;
pub mod strategies;

pub use analyzer::SuccessAnalyzer;
pub use detector::PatternDetector;
pub use rules::DetectionRules;
pub use similarity::{confidence_from_sample_count, is_duplicate, text_similarity};
