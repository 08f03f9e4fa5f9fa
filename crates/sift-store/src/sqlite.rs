//! SQLite-backed `PatternStore` implementation with durable persistence.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{PatternStore, PatternStoreError, StoreResult};
use sift_types::{
    ConversationOutcome, OutcomeKind, Pattern, PatternType, PatternUsage, ResponseEffectiveness,
};

/// Persistent SQLite store backend.
///
/// Reads open their own connection; writes are serialized through a single
/// async gate so write-heavy maintenance passes do not contend with each
/// other inside one process.
#[derive(Debug)]
pub struct SqlitePatternStore {
    db_path: PathBuf,
    write_gate: Mutex<()>,
}

impl SqlitePatternStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self {
            db_path,
            write_gate: Mutex::new(()),
        };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                company_id TEXT PRIMARY KEY,
                settings_json TEXT NULL
            );

            CREATE TABLE IF NOT EXISTS patterns (
                pattern_id TEXT NOT NULL,
                company_id TEXT NOT NULL,
                pattern_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                description TEXT NOT NULL,
                success_rate REAL NOT NULL,
                sample_size INTEGER NOT NULL,
                confidence_level REAL NOT NULL,
                is_active INTEGER NOT NULL,
                is_approved INTEGER NOT NULL,
                metadata_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (company_id, pattern_id),
                FOREIGN KEY(company_id) REFERENCES companies(company_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_company_active
                ON patterns (company_id, is_active, created_at);

            CREATE TABLE IF NOT EXISTS pattern_usage (
                usage_id TEXT PRIMARY KEY,
                pattern_id TEXT NOT NULL,
                company_id TEXT NOT NULL,
                applied INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_company_pattern
                ON pattern_usage (company_id, pattern_id, created_at);

            CREATE TABLE IF NOT EXISTS outcomes (
                company_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                conversion_time_minutes REAL NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (company_id, conversation_id)
            );

            CREATE INDEX IF NOT EXISTS idx_outcomes_company_created
                ON outcomes (company_id, created_at);

            CREATE TABLE IF NOT EXISTS response_effectiveness (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id TEXT NOT NULL,
                response_text TEXT NOT NULL,
                effectiveness_score REAL NOT NULL,
                lead_to_purchase INTEGER NOT NULL,
                sentiment_score REAL NOT NULL,
                word_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_responses_company_created
                ON response_effectiveness (company_id, created_at);

            CREATE TABLE IF NOT EXISTS pattern_archive (
                archive_row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_id TEXT NOT NULL,
                company_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                archived_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

/// Fixed-width UTC timestamp format; lexicographic order matches time order.
fn to_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_pattern_type(raw: &str) -> StoreResult<PatternType> {
    PatternType::from_str(raw).map_err(|_| PatternStoreError::InvalidPersistedValue {
        field: "pattern_type",
        value: raw.to_string(),
    })
}

fn parse_outcome_kind(raw: &str) -> StoreResult<OutcomeKind> {
    match raw {
        "purchase" => Ok(OutcomeKind::Purchase),
        "abandoned" => Ok(OutcomeKind::Abandoned),
        "ongoing" => Ok(OutcomeKind::Ongoing),
        other => Err(PatternStoreError::InvalidPersistedValue {
            field: "outcome",
            value: other.to_string(),
        }),
    }
}

fn outcome_kind_label(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Purchase => "purchase",
        OutcomeKind::Abandoned => "abandoned",
        OutcomeKind::Ongoing => "ongoing",
    }
}

/// Raw column tuple pulled out of a `patterns` row before JSON/time parsing.
struct PatternRow {
    pattern_id: String,
    company_id: String,
    pattern_type: String,
    payload_json: String,
    description: String,
    success_rate: f64,
    sample_size: i64,
    confidence_level: f64,
    is_active: bool,
    is_approved: bool,
    metadata_json: String,
    created_at: String,
    updated_at: String,
}

const PATTERN_COLUMNS: &str = "pattern_id, company_id, pattern_type, payload_json, description, \
     success_rate, sample_size, confidence_level, is_active, is_approved, metadata_json, \
     created_at, updated_at";

fn read_pattern_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatternRow> {
    Ok(PatternRow {
        pattern_id: row.get(0)?,
        company_id: row.get(1)?,
        pattern_type: row.get(2)?,
        payload_json: row.get(3)?,
        description: row.get(4)?,
        success_rate: row.get(5)?,
        sample_size: row.get(6)?,
        confidence_level: row.get(7)?,
        is_active: row.get(8)?,
        is_approved: row.get(9)?,
        metadata_json: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn pattern_from_row(row: PatternRow) -> StoreResult<Pattern> {
    Ok(Pattern {
        id: row.pattern_id,
        company_id: row.company_id,
        pattern_type: parse_pattern_type(&row.pattern_type)?,
        pattern: serde_json::from_str(&row.payload_json)?,
        description: row.description,
        success_rate: row.success_rate,
        sample_size: u64::try_from(row.sample_size).unwrap_or(0),
        confidence_level: row.confidence_level,
        is_active: row.is_active,
        is_approved: row.is_approved,
        metadata: serde_json::from_str(&row.metadata_json)?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

#[async_trait]
impl PatternStore for SqlitePatternStore {
    async fn ping(&self) -> StoreResult<()> {
        let probe = || -> StoreResult<()> {
            let connection = self.open_connection()?;
            connection.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        };
        probe().map_err(|error| PatternStoreError::Unavailable(error.to_string()))
    }

    async fn register_company(&self, company_id: &str) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT OR IGNORE INTO companies (company_id, settings_json) VALUES (?1, NULL)",
            params![company_id],
        )?;
        Ok(())
    }

    async fn company_exists(&self, company_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let exists: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM companies WHERE company_id = ?1)",
            params![company_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn list_company_ids(&self) -> StoreResult<Vec<String>> {
        let connection = self.open_connection()?;
        let mut statement =
            connection.prepare("SELECT company_id FROM companies ORDER BY company_id")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn read_company_settings(&self, company_id: &str) -> StoreResult<Option<Value>> {
        let connection = self.open_connection()?;
        let raw: Option<Option<String>> = connection
            .query_row(
                "SELECT settings_json FROM companies WHERE company_id = ?1",
                params![company_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Err(PatternStoreError::CompanyNotFound(company_id.to_string())),
            Some(None) => Ok(None),
            Some(Some(raw)) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    async fn write_company_settings(&self, company_id: &str, blob: Value) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        let changed = connection.execute(
            "UPDATE companies SET settings_json = ?2 WHERE company_id = ?1",
            params![company_id, serde_json::to_string(&blob)?],
        )?;
        if changed == 0 {
            return Err(PatternStoreError::CompanyNotFound(company_id.to_string()));
        }
        Ok(())
    }

    async fn insert_pattern(&self, pattern: Pattern) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        let exists: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM companies WHERE company_id = ?1)",
            params![pattern.company_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(PatternStoreError::CompanyNotFound(pattern.company_id));
        }
        connection.execute(
            "INSERT INTO patterns (pattern_id, company_id, pattern_type, payload_json, \
             description, success_rate, sample_size, confidence_level, is_active, is_approved, \
             metadata_json, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                pattern.id,
                pattern.company_id,
                pattern.pattern_type.as_str(),
                serde_json::to_string(&pattern.pattern)?,
                pattern.description,
                pattern.success_rate,
                i64::try_from(pattern.sample_size).unwrap_or(i64::MAX),
                pattern.confidence_level,
                pattern.is_active,
                pattern.is_approved,
                serde_json::to_string(&pattern.metadata)?,
                to_timestamp(pattern.created_at),
                to_timestamp(pattern.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn update_pattern(&self, pattern: Pattern) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        let changed = connection.execute(
            "UPDATE patterns SET pattern_type = ?3, payload_json = ?4, description = ?5, \
             success_rate = ?6, sample_size = ?7, confidence_level = ?8, is_active = ?9, \
             is_approved = ?10, metadata_json = ?11, updated_at = ?12 \
             WHERE company_id = ?1 AND pattern_id = ?2",
            params![
                pattern.company_id,
                pattern.id,
                pattern.pattern_type.as_str(),
                serde_json::to_string(&pattern.pattern)?,
                pattern.description,
                pattern.success_rate,
                i64::try_from(pattern.sample_size).unwrap_or(i64::MAX),
                pattern.confidence_level,
                pattern.is_active,
                pattern.is_approved,
                serde_json::to_string(&pattern.metadata)?,
                to_timestamp(pattern.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(PatternStoreError::PatternNotFound(pattern.id));
        }
        Ok(())
    }

    async fn get_pattern(
        &self,
        company_id: &str,
        pattern_id: &str,
    ) -> StoreResult<Option<Pattern>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {PATTERN_COLUMNS} FROM patterns \
                     WHERE company_id = ?1 AND pattern_id = ?2"
                ),
                params![company_id, pattern_id],
                read_pattern_row,
            )
            .optional()?;
        row.map(pattern_from_row).transpose()
    }

    async fn list_patterns(
        &self,
        company_id: &str,
        active_only: bool,
    ) -> StoreResult<Vec<Pattern>> {
        let connection = self.open_connection()?;
        let query = if active_only {
            format!(
                "SELECT {PATTERN_COLUMNS} FROM patterns \
                 WHERE company_id = ?1 AND is_active = 1 ORDER BY created_at, pattern_id"
            )
        } else {
            format!(
                "SELECT {PATTERN_COLUMNS} FROM patterns \
                 WHERE company_id = ?1 ORDER BY created_at, pattern_id"
            )
        };
        let mut statement = connection.prepare(&query)?;
        let rows = statement.query_map(params![company_id], read_pattern_row)?;
        let mut patterns = Vec::new();
        for row in rows {
            patterns.push(pattern_from_row(row?)?);
        }
        Ok(patterns)
    }

    async fn delete_patterns(
        &self,
        company_id: &str,
        pattern_ids: &[String],
    ) -> StoreResult<usize> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        let mut deleted = 0_usize;
        for pattern_id in pattern_ids {
            deleted += connection.execute(
                "DELETE FROM patterns WHERE company_id = ?1 AND pattern_id = ?2",
                params![company_id, pattern_id],
            )?;
        }
        Ok(deleted)
    }

    async fn deactivate_patterns(
        &self,
        company_id: &str,
        pattern_ids: &[String],
    ) -> StoreResult<usize> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        let now = to_timestamp(Utc::now());
        let mut changed = 0_usize;
        for pattern_id in pattern_ids {
            changed += connection.execute(
                "UPDATE patterns SET is_active = 0, updated_at = ?3 \
                 WHERE company_id = ?1 AND pattern_id = ?2 AND is_active = 1",
                params![company_id, pattern_id, now],
            )?;
        }
        Ok(changed)
    }

    async fn newest_pattern_created_at(
        &self,
        company_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let connection = self.open_connection()?;
        let newest: Option<String> = connection.query_row(
            "SELECT MAX(created_at) FROM patterns WHERE company_id = ?1",
            params![company_id],
            |row| row.get(0),
        )?;
        newest.as_deref().map(parse_timestamp).transpose()
    }

    async fn record_usage(&self, usage: PatternUsage) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO pattern_usage (usage_id, pattern_id, company_id, applied, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                usage.id,
                usage.pattern_id,
                usage.company_id,
                usage.applied,
                to_timestamp(usage.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_usage_since(
        &self,
        company_id: &str,
        pattern_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<PatternUsage>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT usage_id, pattern_id, company_id, applied, created_at FROM pattern_usage \
             WHERE company_id = ?1 AND pattern_id = ?2 AND created_at >= ?3 \
             ORDER BY created_at",
        )?;
        let rows = statement.query_map(
            params![company_id, pattern_id, to_timestamp(since)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )?;
        let mut usage = Vec::new();
        for row in rows {
            let (id, pattern_id, company_id, applied, created_at) = row?;
            usage.push(PatternUsage {
                id,
                pattern_id,
                company_id,
                applied,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(usage)
    }

    async fn usage_exists_since(
        &self,
        company_id: &str,
        pattern_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let exists: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM pattern_usage \
             WHERE company_id = ?1 AND pattern_id = ?2 AND created_at >= ?3)",
            params![company_id, pattern_id, to_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn purge_usage_before(
        &self,
        company_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        let purged = connection.execute(
            "DELETE FROM pattern_usage WHERE company_id = ?1 AND created_at < ?2",
            params![company_id, to_timestamp(cutoff)],
        )?;
        Ok(purged)
    }

    async fn insert_outcome(&self, outcome: ConversationOutcome) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT OR REPLACE INTO outcomes \
             (company_id, conversation_id, outcome, conversion_time_minutes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                outcome.company_id,
                outcome.conversation_id,
                outcome_kind_label(outcome.outcome),
                outcome.conversion_time_minutes,
                to_timestamp(outcome.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_outcomes_since(
        &self,
        company_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ConversationOutcome>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT company_id, conversation_id, outcome, conversion_time_minutes, created_at \
             FROM outcomes WHERE company_id = ?1 AND created_at >= ?2 ORDER BY created_at",
        )?;
        let rows = statement.query_map(params![company_id, to_timestamp(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut outcomes = Vec::new();
        for row in rows {
            let (company_id, conversation_id, outcome, conversion_time_minutes, created_at) = row?;
            outcomes.push(ConversationOutcome {
                company_id,
                conversation_id,
                outcome: parse_outcome_kind(&outcome)?,
                conversion_time_minutes,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(outcomes)
    }

    async fn insert_response(&self, response: ResponseEffectiveness) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO response_effectiveness \
             (company_id, response_text, effectiveness_score, lead_to_purchase, sentiment_score, \
              word_count, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                response.company_id,
                response.response_text,
                response.effectiveness_score,
                response.lead_to_purchase,
                response.sentiment_score,
                i64::try_from(response.word_count).unwrap_or(i64::MAX),
                to_timestamp(response.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_responses_since(
        &self,
        company_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ResponseEffectiveness>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT company_id, response_text, effectiveness_score, lead_to_purchase, \
             sentiment_score, word_count, created_at FROM response_effectiveness \
             WHERE company_id = ?1 AND created_at >= ?2 ORDER BY created_at",
        )?;
        let rows = statement.query_map(params![company_id, to_timestamp(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut responses = Vec::new();
        for row in rows {
            let (
                company_id,
                response_text,
                effectiveness_score,
                lead_to_purchase,
                sentiment_score,
                word_count,
                created_at,
            ) = row?;
            responses.push(ResponseEffectiveness {
                company_id,
                response_text,
                effectiveness_score,
                lead_to_purchase,
                sentiment_score,
                word_count: u64::try_from(word_count).unwrap_or(0),
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(responses)
    }

    async fn archive_pattern(&self, pattern: &Pattern) -> StoreResult<bool> {
        let _gate = self.write_gate.lock().await;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO pattern_archive (pattern_id, company_id, payload_json, archived_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pattern.id,
                pattern.company_id,
                serde_json::to_string(pattern)?,
                to_timestamp(Utc::now()),
            ],
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlitePatternStore;
    use crate::{PatternStore, PatternStoreError};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use sift_types::{ConversationOutcome, OutcomeKind, Pattern, PatternType, PatternUsage};
    use tempfile::tempdir;

    fn sample_pattern(company_id: &str, id: &str, description: &str) -> Pattern {
        let mut pattern = Pattern::new(
            company_id,
            PatternType::ResponseStyle,
            json!({ "style": "concise" }),
            description,
            0.64,
            18,
            0.6,
        );
        pattern.id = id.to_string();
        pattern
    }

    #[tokio::test]
    async fn pattern_rows_round_trip() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        store.register_company("co-1").await.expect("register");

        let mut pattern = sample_pattern("co-1", "p-1", "short replies close faster");
        pattern.metadata = json!({ "source": "style_shift" });
        store.insert_pattern(pattern.clone()).await.expect("insert");

        let loaded = store
            .get_pattern("co-1", "p-1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.description, "short replies close faster");
        assert_eq!(loaded.pattern_type, PatternType::ResponseStyle);
        assert_eq!(loaded.metadata, json!({ "source": "style_shift" }));
        assert_eq!(loaded.sample_size, 18);

        let mut updated = loaded.clone();
        updated.success_rate = 0.72;
        updated.is_approved = true;
        store.update_pattern(updated).await.expect("update");
        let reloaded = store
            .get_pattern("co-1", "p-1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(reloaded.success_rate, 0.72);
        assert!(reloaded.is_approved);
    }

    #[tokio::test]
    async fn insert_rejects_unknown_company() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        let error = store
            .insert_pattern(sample_pattern("ghost", "p-1", "desc"))
            .await
            .expect_err("missing company");
        assert!(matches!(error, PatternStoreError::CompanyNotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_tenant_scoped_for_shared_ids() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        store.register_company("co-a").await.expect("register");
        store.register_company("co-b").await.expect("register");
        store
            .insert_pattern(sample_pattern("co-a", "shared", "a"))
            .await
            .expect("insert a");
        store
            .insert_pattern(sample_pattern("co-b", "shared", "b"))
            .await
            .expect("insert b");

        let deleted = store
            .delete_patterns("co-a", &["shared".to_string()])
            .await
            .expect("delete");
        assert_eq!(deleted, 1);
        assert!(store
            .get_pattern("co-b", "shared")
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn settings_round_trip_through_sqlite() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        store.register_company("co-1").await.expect("register");

        assert_eq!(
            store.read_company_settings("co-1").await.expect("read"),
            None
        );
        store
            .write_company_settings("co-1", json!({ "pattern_system_enabled": false, "tone": "warm" }))
            .await
            .expect("write");
        let blob = store
            .read_company_settings("co-1")
            .await
            .expect("read")
            .expect("blob");
        assert_eq!(blob["tone"], json!("warm"));
    }

    #[tokio::test]
    async fn usage_window_queries_and_purge() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        store.register_company("co-1").await.expect("register");

        let mut old = PatternUsage::new("p-1", "co-1", true);
        old.created_at = Utc::now() - Duration::days(100);
        store.record_usage(old).await.expect("old usage");
        store
            .record_usage(PatternUsage::new("p-1", "co-1", true))
            .await
            .expect("recent usage");

        let since = Utc::now() - Duration::days(7);
        assert!(store
            .usage_exists_since("co-1", "p-1", since)
            .await
            .expect("exists"));
        assert_eq!(
            store
                .list_usage_since("co-1", "p-1", since)
                .await
                .expect("list")
                .len(),
            1
        );

        let purged = store
            .purge_usage_before("co-1", Utc::now() - Duration::days(90))
            .await
            .expect("purge");
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn outcomes_and_archive_round_trip() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        store.register_company("co-1").await.expect("register");

        store
            .insert_outcome(ConversationOutcome {
                company_id: "co-1".to_string(),
                conversation_id: "conv-1".to_string(),
                outcome: OutcomeKind::Purchase,
                conversion_time_minutes: Some(14.5),
                created_at: Utc::now(),
            })
            .await
            .expect("outcome");

        let outcomes = store
            .list_outcomes_since("co-1", Utc::now() - Duration::days(1))
            .await
            .expect("list outcomes");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].outcome, OutcomeKind::Purchase);

        let archived = store
            .archive_pattern(&sample_pattern("co-1", "p-1", "desc"))
            .await
            .expect("archive");
        assert!(archived);
    }

    #[tokio::test]
    async fn newest_created_at_tracks_latest_insert() {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePatternStore::new(temp.path().join("sift.db")).expect("store");
        store.register_company("co-1").await.expect("register");
        assert!(store
            .newest_pattern_created_at("co-1")
            .await
            .expect("empty")
            .is_none());

        let mut older = sample_pattern("co-1", "p-old", "older");
        older.created_at = Utc::now() - Duration::days(10);
        let newer = sample_pattern("co-1", "p-new", "newer");
        let newest_expected = newer.created_at;
        store.insert_pattern(older).await.expect("older");
        store.insert_pattern(newer).await.expect("newer");

        let newest = store
            .newest_pattern_created_at("co-1")
            .await
            .expect("query")
            .expect("present");
        assert!((newest - newest_expected).num_seconds().abs() <= 1);
    }
}
