//! Delegated text-analysis collaborator for pattern detection.
//!
//! The capability is modeled with three distinct outcomes so a configuration
//! problem (`Unavailable`) is never mistaken for an analytical non-finding
//! (`NoneFound`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod parse;
mod provider;
mod retry;

pub use parse::{build_analysis_prompt, parse_insights, parse_insights_lenient};
pub use provider::{HttpAnalysisClient, HttpAnalysisConfig};

/// Curated cohort samples handed to the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub company_id: String,
    /// Representative response texts from the successful cohort.
    pub successful_samples: Vec<String>,
    /// Representative response texts from the unsuccessful cohort.
    pub failure_samples: Vec<String>,
    /// Full cohort sizes, which may exceed the curated sample counts.
    pub successful_total: usize,
    pub failure_total: usize,
}

/// One pattern descriptor returned by the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WordPatternInsight {
    #[serde(default)]
    pub successful_words: Vec<String>,
    #[serde(default)]
    pub failure_words: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Three-outcome capability result.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The collaborator ran and produced at least one descriptor.
    Found(Vec<WordPatternInsight>),
    /// The collaborator ran and found nothing.
    NoneFound,
    /// The capability is not configured for this caller.
    Unavailable,
}

/// Errors raised by analysis clients. Capability absence is not an error;
/// it is the `Unavailable` outcome.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
/// Trait contract for delegated text-analysis collaborators.
pub trait TextAnalysisClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, AnalysisError>;
}
