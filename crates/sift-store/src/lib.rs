//! Pattern store abstractions and in-memory backend.
//!
//! The trait is the single seam between the mining pipeline and persistence;
//! the in-memory backend serves tests and local experimentation while the
//! SQLite backend (`sqlite.rs`) provides durable storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

use sift_types::{ConversationOutcome, Pattern, PatternUsage, ResponseEffectiveness};

mod sqlite;

pub use sqlite::SqlitePatternStore;

/// Result type for pattern store operations.
pub type StoreResult<T> = Result<T, PatternStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum PatternStoreError {
    #[error("company '{0}' not found")]
    CompanyNotFound(String),
    #[error("pattern '{0}' not found")]
    PatternNotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Async store contract used by the detector, analyzer, cleanup service, and
/// both schedulers.
///
/// Every cross-record operation takes an explicit `company_id` and must never
/// touch another company's rows, even when pattern ids collide across tenants.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Cheap connectivity probe. Failure here is the one hard storage error
    /// the pipeline propagates.
    async fn ping(&self) -> StoreResult<()>;

    async fn register_company(&self, company_id: &str) -> StoreResult<()>;
    async fn company_exists(&self, company_id: &str) -> StoreResult<bool>;
    async fn list_company_ids(&self) -> StoreResult<Vec<String>>;

    /// Reads the opaque settings blob; `None` when the company has no blob.
    async fn read_company_settings(&self, company_id: &str) -> StoreResult<Option<Value>>;
    async fn write_company_settings(&self, company_id: &str, blob: Value) -> StoreResult<()>;

    async fn insert_pattern(&self, pattern: Pattern) -> StoreResult<()>;
    async fn update_pattern(&self, pattern: Pattern) -> StoreResult<()>;
    async fn get_pattern(&self, company_id: &str, pattern_id: &str)
        -> StoreResult<Option<Pattern>>;
    async fn list_patterns(&self, company_id: &str, active_only: bool)
        -> StoreResult<Vec<Pattern>>;
    async fn delete_patterns(&self, company_id: &str, pattern_ids: &[String])
        -> StoreResult<usize>;
    async fn deactivate_patterns(
        &self,
        company_id: &str,
        pattern_ids: &[String],
    ) -> StoreResult<usize>;
    async fn newest_pattern_created_at(
        &self,
        company_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    async fn record_usage(&self, usage: PatternUsage) -> StoreResult<()>;
    async fn list_usage_since(
        &self,
        company_id: &str,
        pattern_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<PatternUsage>>;
    async fn usage_exists_since(
        &self,
        company_id: &str,
        pattern_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn purge_usage_before(
        &self,
        company_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<usize>;

    async fn insert_outcome(&self, outcome: ConversationOutcome) -> StoreResult<()>;
    async fn list_outcomes_since(
        &self,
        company_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ConversationOutcome>>;
    async fn insert_response(&self, response: ResponseEffectiveness) -> StoreResult<()>;
    async fn list_responses_since(
        &self,
        company_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ResponseEffectiveness>>;

    /// Serializes a pattern into the archive ahead of a hard delete.
    ///
    /// Returns `false` when the backend carries no archive store; the monthly
    /// job treats that as "skip archiving, proceed with the delete".
    async fn archive_pattern(&self, pattern: &Pattern) -> StoreResult<bool>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryPatternStore {
    inner: RwLock<StoreInner>,
    unavailable: AtomicBool,
    archive_enabled: bool,
}

#[derive(Debug, Default)]
struct StoreInner {
    companies: HashMap<String, Option<Value>>,
    /// Keyed by `(company_id, pattern_id)` so colliding ids across tenants
    /// stay separate rows.
    patterns: HashMap<(String, String), Pattern>,
    usage: Vec<PatternUsage>,
    outcomes: Vec<ConversationOutcome>,
    responses: Vec<ResponseEffectiveness>,
    archive: Vec<Value>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self {
            archive_enabled: true,
            ..Self::default()
        }
    }

    /// Backend without an archive store; the monthly job skips archiving.
    pub fn without_archive() -> Self {
        Self::default()
    }

    /// Makes `ping` fail, simulating unreachable storage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of archived payloads, for assertions.
    pub async fn archived_count(&self) -> usize {
        self.inner.read().await.archive.len()
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn ping(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PatternStoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn register_company(&self, company_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.companies.entry(company_id.to_string()).or_insert(None);
        Ok(())
    }

    async fn company_exists(&self, company_id: &str) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.companies.contains_key(company_id))
    }

    async fn list_company_ids(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.companies.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn read_company_settings(&self, company_id: &str) -> StoreResult<Option<Value>> {
        let inner = self.inner.read().await;
        match inner.companies.get(company_id) {
            Some(blob) => Ok(blob.clone()),
            None => Err(PatternStoreError::CompanyNotFound(company_id.to_string())),
        }
    }

    async fn write_company_settings(&self, company_id: &str, blob: Value) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.companies.get_mut(company_id) {
            Some(stored) => {
                *stored = Some(blob);
                Ok(())
            }
            None => Err(PatternStoreError::CompanyNotFound(company_id.to_string())),
        }
    }

    async fn insert_pattern(&self, pattern: Pattern) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.companies.contains_key(&pattern.company_id) {
            return Err(PatternStoreError::CompanyNotFound(pattern.company_id));
        }
        inner
            .patterns
            .insert((pattern.company_id.clone(), pattern.id.clone()), pattern);
        Ok(())
    }

    async fn update_pattern(&self, pattern: Pattern) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = (pattern.company_id.clone(), pattern.id.clone());
        match inner.patterns.get_mut(&key) {
            Some(stored) => {
                *stored = pattern;
                Ok(())
            }
            None => Err(PatternStoreError::PatternNotFound(pattern.id)),
        }
    }

    async fn get_pattern(
        &self,
        company_id: &str,
        pattern_id: &str,
    ) -> StoreResult<Option<Pattern>> {
        let inner = self.inner.read().await;
        Ok(inner
            .patterns
            .get(&(company_id.to_string(), pattern_id.to_string()))
            .cloned())
    }

    async fn list_patterns(
        &self,
        company_id: &str,
        active_only: bool,
    ) -> StoreResult<Vec<Pattern>> {
        let inner = self.inner.read().await;
        let mut patterns: Vec<Pattern> = inner
            .patterns
            .values()
            .filter(|pattern| pattern.company_id == company_id)
            .filter(|pattern| !active_only || pattern.is_active)
            .cloned()
            .collect();
        patterns.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(patterns)
    }

    async fn delete_patterns(
        &self,
        company_id: &str,
        pattern_ids: &[String],
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.patterns.len();
        inner.patterns.retain(|(owner, pattern_id), _| {
            !(owner == company_id && pattern_ids.contains(pattern_id))
        });
        Ok(before - inner.patterns.len())
    }

    async fn deactivate_patterns(
        &self,
        company_id: &str,
        pattern_ids: &[String],
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut changed = 0_usize;
        for ((owner, pattern_id), pattern) in inner.patterns.iter_mut() {
            if owner == company_id && pattern_ids.contains(pattern_id) && pattern.is_active {
                pattern.is_active = false;
                pattern.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn newest_pattern_created_at(
        &self,
        company_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .patterns
            .values()
            .filter(|pattern| pattern.company_id == company_id)
            .map(|pattern| pattern.created_at)
            .max())
    }

    async fn record_usage(&self, usage: PatternUsage) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.usage.push(usage);
        Ok(())
    }

    async fn list_usage_since(
        &self,
        company_id: &str,
        pattern_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<PatternUsage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .usage
            .iter()
            .filter(|usage| {
                usage.company_id == company_id
                    && usage.pattern_id == pattern_id
                    && usage.created_at >= since
            })
            .cloned()
            .collect())
    }

    async fn usage_exists_since(
        &self,
        company_id: &str,
        pattern_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.usage.iter().any(|usage| {
            usage.company_id == company_id
                && usage.pattern_id == pattern_id
                && usage.created_at >= since
        }))
    }

    async fn purge_usage_before(
        &self,
        company_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.usage.len();
        inner
            .usage
            .retain(|usage| !(usage.company_id == company_id && usage.created_at < cutoff));
        Ok(before - inner.usage.len())
    }

    async fn insert_outcome(&self, outcome: ConversationOutcome) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.outcomes.push(outcome);
        Ok(())
    }

    async fn list_outcomes_since(
        &self,
        company_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ConversationOutcome>> {
        let inner = self.inner.read().await;
        Ok(inner
            .outcomes
            .iter()
            .filter(|outcome| outcome.company_id == company_id && outcome.created_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_response(&self, response: ResponseEffectiveness) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.responses.push(response);
        Ok(())
    }

    async fn list_responses_since(
        &self,
        company_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ResponseEffectiveness>> {
        let inner = self.inner.read().await;
        Ok(inner
            .responses
            .iter()
            .filter(|response| response.company_id == company_id && response.created_at >= since)
            .cloned()
            .collect())
    }

    async fn archive_pattern(&self, pattern: &Pattern) -> StoreResult<bool> {
        if !self.archive_enabled {
            return Ok(false);
        }
        let payload = serde_json::to_value(pattern)?;
        let mut inner = self.inner.write().await;
        inner.archive.push(payload);
        Ok(true)
    }
}
