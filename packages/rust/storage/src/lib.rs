//! Turso Embedded / libSQL storage layer for the Heritix archive.
//!
//! The [`Storage`] struct wraps a libSQL database holding three collections:
//! knowledge metadata, enrichment content, and the processing log.
//!
//! **Access rules:**
//! - Pipeline and upload: read-write via [`Storage::open`]
//! - Status and search views: read-only via [`Storage::open_readonly`]
//!
//! Every status write is conditional on the expected current status, so an
//! illegal lifecycle edge can never reach the database.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use heritix_shared::{
    ContentField, HeritixError, KnowledgeContent, KnowledgeId, KnowledgeMetadata, LogOutcome,
    ProcessingLogEntry, ProcessingStatus, Result, SearchFilters, Stage,
};
use libsql::{Connection, Database, params};

/// Category value that disables the category filter in search.
pub const ALL_CATEGORIES: &str = "All";

/// Fields required to create a knowledge record.
#[derive(Debug, Clone)]
pub struct NewKnowledge {
    pub id: KnowledgeId,
    pub title: String,
    pub contributor: String,
    pub consent: bool,
    pub audio_url: String,
    pub original_filename: String,
}

/// One row of an archive search.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub id: KnowledgeId,
    pub title: String,
    pub contributor: String,
    pub category: Option<String>,
    pub detected_language: Option<String>,
    pub processing_status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
    /// `summary` field of the education result, when present.
    pub summary: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HeritixError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HeritixError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HeritixError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HeritixError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Metadata operations
    // -----------------------------------------------------------------------

    /// Insert a new knowledge record in `uploaded` state.
    ///
    /// The matching empty content row is created by trigger in the same
    /// statement.
    pub async fn insert_record(&self, record: &NewKnowledge) -> Result<KnowledgeMetadata> {
        self.check_writable()?;
        let now = Utc::now();
        let ts = timestamp(&now);
        self.conn
            .execute(
                "INSERT INTO knowledge (id, title, contributor, consent, audio_url, original_filename,
                                        processing_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.title.as_str(),
                    record.contributor.as_str(),
                    i64::from(record.consent),
                    record.audio_url.as_str(),
                    record.original_filename.as_str(),
                    ProcessingStatus::Uploaded.as_str(),
                    ts.as_str(),
                    ts.as_str(),
                ],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        Ok(KnowledgeMetadata {
            id: record.id.clone(),
            title: record.title.clone(),
            contributor: record.contributor.clone(),
            consent: record.consent,
            audio_url: record.audio_url.clone(),
            original_filename: record.original_filename.clone(),
            transcript: None,
            detected_language: None,
            category: None,
            processing_status: ProcessingStatus::Uploaded,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a record's metadata by ID.
    pub async fn get_metadata(&self, id: &KnowledgeId) -> Result<Option<KnowledgeMetadata>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, contributor, consent, audio_url, original_filename, transcript,
                        detected_language, category, processing_status, created_at, updated_at
                 FROM knowledge WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_metadata(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HeritixError::Storage(e.to_string())),
        }
    }

    /// Number of knowledge records in the archive.
    pub async fn count_records(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM knowledge", params![])
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| HeritixError::Storage(e.to_string()))? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(HeritixError::Storage(e.to_string())),
        }
    }

    /// Move a record from `from` to `to` if and only if its current status is `from`.
    ///
    /// Returns `false` when the record exists but is in another state (or does
    /// not exist). Fails with [`HeritixError::InvalidTransition`] for an edge
    /// the lifecycle does not allow.
    pub async fn transition_status(
        &self,
        id: &KnowledgeId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    ) -> Result<bool> {
        self.check_writable()?;
        if !from.can_transition_to(to) {
            return Err(HeritixError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        let now = timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE knowledge SET processing_status = ?1, updated_at = ?2
                 WHERE id = ?3 AND processing_status = ?4",
                params![to.as_str(), now.as_str(), id.to_string(), from.as_str()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Record the speech-to-text result.
    pub async fn set_transcription(
        &self,
        id: &KnowledgeId,
        transcript: &str,
        language: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE knowledge SET transcript = ?1, detected_language = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![transcript, language, now.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Record the category chosen by categorization.
    pub async fn set_category(&self, id: &KnowledgeId, category: &str) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE knowledge SET category = ?1, updated_at = ?2 WHERE id = ?3",
                params![category, now.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content operations
    // -----------------------------------------------------------------------

    /// Get a record's enrichment content by ID.
    pub async fn get_content(&self, id: &KnowledgeId) -> Result<Option<KnowledgeContent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT knowledge_id, extraction_data, categorization_data, context_data,
                        education_data, translations, processed_at, translation_errors
                 FROM knowledge_content WHERE knowledge_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_content(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HeritixError::Storage(e.to_string())),
        }
    }

    /// Overwrite one stage's result column.
    pub async fn set_content_field(
        &self,
        id: &KnowledgeId,
        field: ContentField,
        value: &serde_json::Value,
    ) -> Result<()> {
        self.check_writable()?;
        let json = serde_json::to_string(value)
            .map_err(|e| HeritixError::Storage(format!("failed to encode {}: {e}", field.column())))?;
        let sql = format!(
            "UPDATE knowledge_content SET {} = ?1 WHERE knowledge_id = ?2",
            field.column()
        );
        self.conn
            .execute(&sql, params![json.as_str(), id.to_string()])
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Merge translations into the record's map; existing languages are overwritten.
    ///
    /// `degraded` marks the merged languages as raw model output with that
    /// reason. Without it their earlier marks are cleared.
    pub async fn merge_translations(
        &self,
        id: &KnowledgeId,
        translations: &BTreeMap<String, String>,
        degraded: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let (mut merged, mut errors) = self
            .get_content(id)
            .await?
            .map(|c| (c.translations, c.translation_errors))
            .unwrap_or_default();
        for (lang, text) in translations {
            merged.insert(lang.clone(), text.clone());
            match degraded {
                Some(reason) => {
                    errors.insert(lang.clone(), reason.to_string());
                }
                None => {
                    errors.remove(lang);
                }
            }
        }

        let encode = |map: &BTreeMap<String, String>| {
            serde_json::to_string(map)
                .map_err(|e| HeritixError::Storage(format!("failed to encode translations: {e}")))
        };
        let (merged, errors) = (encode(&merged)?, encode(&errors)?);
        self.conn
            .execute(
                "UPDATE knowledge_content SET translations = ?1, translation_errors = ?2
                 WHERE knowledge_id = ?3",
                params![merged.as_str(), errors.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Set the content's `processed_at` to now.
    pub async fn touch_processed_at(&self, id: &KnowledgeId) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE knowledge_content SET processed_at = ?1 WHERE knowledge_id = ?2",
                params![now.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Processing log operations
    // -----------------------------------------------------------------------

    /// Append one entry to the processing log.
    pub async fn append_log(
        &self,
        id: &KnowledgeId,
        stage: Stage,
        outcome: LogOutcome,
        error_message: Option<&str>,
    ) -> Result<ProcessingLogEntry> {
        self.check_writable()?;
        let now = Utc::now();
        // Connection is shared across runs: take the sequence from the insert itself
        let mut rows = self
            .conn
            .query(
                "INSERT INTO processing_logs (knowledge_id, stage, status, error_message, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                params![
                    id.to_string(),
                    stage.as_str(),
                    outcome.as_str(),
                    error_message,
                    timestamp(&now),
                ],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        let seq = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
            Ok(None) => {
                return Err(HeritixError::Storage(
                    "log insert returned no sequence".into(),
                ));
            }
            Err(e) => return Err(HeritixError::Storage(e.to_string())),
        };

        Ok(ProcessingLogEntry {
            seq,
            knowledge_id: id.clone(),
            stage,
            outcome,
            error_message: error_message.map(String::from),
            timestamp: now,
        })
    }

    /// Most recent log entries for a record, newest first.
    pub async fn recent_logs(&self, id: &KnowledgeId, limit: u32) -> Result<Vec<ProcessingLogEntry>> {
        self.query_logs(
            "SELECT id, knowledge_id, stage, status, error_message, timestamp
             FROM processing_logs WHERE knowledge_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
            params![id.to_string(), limit],
        )
        .await
    }

    /// Full log for a record in the order it was written.
    pub async fn logs_chronological(&self, id: &KnowledgeId) -> Result<Vec<ProcessingLogEntry>> {
        self.query_logs(
            "SELECT id, knowledge_id, stage, status, error_message, timestamp
             FROM processing_logs WHERE knowledge_id = ?1
             ORDER BY timestamp ASC, id ASC",
            params![id.to_string()],
        )
        .await
    }

    async fn query_logs(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ProcessingLogEntry>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?
        {
            results.push(row_to_log_entry(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Search the archive, newest first.
    ///
    /// Category and language are exact matches evaluated in SQL. Free text
    /// matches title or transcript case-insensitively with Unicode folding,
    /// applied while streaming rows.
    pub async fn search(&self, filters: &SearchFilters, limit: u32) -> Result<Vec<SearchHit>> {
        let category = filters
            .category
            .as_deref()
            .filter(|c| !c.is_empty() && *c != ALL_CATEGORIES);
        let language = filters
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase);
        let needle = filters
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        let mut rows = self
            .conn
            .query(
                "SELECT k.id, k.title, k.contributor, k.category, k.detected_language,
                        k.processing_status, k.created_at, k.transcript, c.education_data
                 FROM knowledge k
                 LEFT JOIN knowledge_content c ON c.knowledge_id = k.id
                 WHERE (?1 IS NULL OR k.category = ?1)
                   AND (?2 IS NULL OR k.detected_language = ?2)
                 ORDER BY k.created_at DESC, k.id DESC",
                params![category, language.as_deref()],
            )
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| HeritixError::Storage(e.to_string()))?
        {
            if results.len() >= limit as usize {
                break;
            }

            let title: String = row
                .get(1)
                .map_err(|e| HeritixError::Storage(e.to_string()))?;
            if let Some(needle) = &needle {
                let transcript = row.get::<String>(7).unwrap_or_default();
                if !title.to_lowercase().contains(needle)
                    && !transcript.to_lowercase().contains(needle)
                {
                    continue;
                }
            }

            let summary = row
                .get::<String>(8)
                .ok()
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
                .and_then(|v| v.get("summary").and_then(|s| s.as_str()).map(String::from));

            results.push(SearchHit {
                id: parse_id(&row.get::<String>(0).map_err(|e| HeritixError::Storage(e.to_string()))?)?,
                title,
                contributor: row
                    .get::<String>(2)
                    .map_err(|e| HeritixError::Storage(e.to_string()))?,
                category: row.get::<String>(3).ok(),
                detected_language: row.get::<String>(4).ok(),
                processing_status: parse_status(
                    &row.get::<String>(5)
                        .map_err(|e| HeritixError::Storage(e.to_string()))?,
                )?,
                created_at: parse_timestamp(
                    &row.get::<String>(6)
                        .map_err(|e| HeritixError::Storage(e.to_string()))?,
                )?,
                summary,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so lexical order equals chronological order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HeritixError::Storage(format!("invalid date: {e}")))
}

fn parse_id(s: &str) -> Result<KnowledgeId> {
    s.parse()
        .map_err(|e| HeritixError::Storage(format!("invalid record id '{s}': {e}")))
}

fn parse_status(s: &str) -> Result<ProcessingStatus> {
    s.parse().map_err(HeritixError::Storage)
}

fn parse_json_column(row: &libsql::Row, idx: i32) -> Result<Option<serde_json::Value>> {
    match row.get::<String>(idx).ok() {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| HeritixError::Storage(format!("invalid JSON in column {idx}: {e}"))),
        None => Ok(None),
    }
}

/// Convert a database row to [`KnowledgeMetadata`].
fn row_to_metadata(row: &libsql::Row) -> Result<KnowledgeMetadata> {
    Ok(KnowledgeMetadata {
        id: parse_id(
            &row.get::<String>(0)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
        title: row
            .get::<String>(1)
            .map_err(|e| HeritixError::Storage(e.to_string()))?,
        contributor: row
            .get::<String>(2)
            .map_err(|e| HeritixError::Storage(e.to_string()))?,
        consent: row
            .get::<i64>(3)
            .map_err(|e| HeritixError::Storage(e.to_string()))?
            != 0,
        audio_url: row
            .get::<String>(4)
            .map_err(|e| HeritixError::Storage(e.to_string()))?,
        original_filename: row
            .get::<String>(5)
            .map_err(|e| HeritixError::Storage(e.to_string()))?,
        transcript: row.get::<String>(6).ok(),
        detected_language: row.get::<String>(7).ok(),
        category: row.get::<String>(8).ok(),
        processing_status: parse_status(
            &row.get::<String>(9)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
        created_at: parse_timestamp(
            &row.get::<String>(10)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
        updated_at: parse_timestamp(
            &row.get::<String>(11)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
    })
}

/// Convert a database row to [`KnowledgeContent`].
fn row_to_content(row: &libsql::Row) -> Result<KnowledgeContent> {
    let string_map = |idx: i32| -> Result<BTreeMap<String, String>> {
        match row.get::<String>(idx).ok() {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| HeritixError::Storage(format!("invalid translations JSON: {e}"))),
            None => Ok(BTreeMap::new()),
        }
    };
    let translations = string_map(5)?;
    let translation_errors = string_map(7)?;

    Ok(KnowledgeContent {
        knowledge_id: parse_id(
            &row.get::<String>(0)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
        extraction_data: parse_json_column(row, 1)?,
        categorization_data: parse_json_column(row, 2)?,
        context_data: parse_json_column(row, 3)?,
        education_data: parse_json_column(row, 4)?,
        translations,
        translation_errors,
        processed_at: parse_timestamp(
            &row.get::<String>(6)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
    })
}

/// Convert a database row to a [`ProcessingLogEntry`].
fn row_to_log_entry(row: &libsql::Row) -> Result<ProcessingLogEntry> {
    let stage: String = row
        .get(2)
        .map_err(|e| HeritixError::Storage(e.to_string()))?;
    let outcome: String = row
        .get(3)
        .map_err(|e| HeritixError::Storage(e.to_string()))?;

    Ok(ProcessingLogEntry {
        seq: row
            .get::<i64>(0)
            .map_err(|e| HeritixError::Storage(e.to_string()))?,
        knowledge_id: parse_id(
            &row.get::<String>(1)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
        stage: stage.parse().map_err(HeritixError::Storage)?,
        outcome: outcome.parse().map_err(HeritixError::Storage)?,
        error_message: row.get::<String>(4).ok(),
        timestamp: parse_timestamp(
            &row.get::<String>(5)
                .map_err(|e| HeritixError::Storage(e.to_string()))?,
        )?,
    })
}
