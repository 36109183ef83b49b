//! SQL migration definitions for the Heritix archive database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: knowledge, knowledge_content, processing_logs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Knowledge record metadata
CREATE TABLE IF NOT EXISTS knowledge (
    id                TEXT PRIMARY KEY,
    title             TEXT NOT NULL,
    contributor       TEXT NOT NULL,
    consent           INTEGER NOT NULL,
    audio_url         TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    transcript        TEXT,
    detected_language TEXT,
    category          TEXT,
    processing_status TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_knowledge_created_at ON knowledge(created_at);
CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge(category);
CREATE INDEX IF NOT EXISTS idx_knowledge_language ON knowledge(detected_language);

-- Enrichment results, one row per knowledge record
CREATE TABLE IF NOT EXISTS knowledge_content (
    knowledge_id        TEXT PRIMARY KEY REFERENCES knowledge(id) ON DELETE CASCADE,
    extraction_data     TEXT,
    categorization_data TEXT,
    context_data        TEXT,
    education_data      TEXT,
    translations        TEXT NOT NULL DEFAULT '{}',
    processed_at        TEXT NOT NULL
);

-- The content row is born with its metadata row
CREATE TRIGGER IF NOT EXISTS knowledge_content_insert AFTER INSERT ON knowledge BEGIN
    INSERT INTO knowledge_content (knowledge_id, processed_at)
    VALUES (new.id, new.created_at);
END;

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS processing_logs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    knowledge_id  TEXT NOT NULL REFERENCES knowledge(id) ON DELETE CASCADE,
    stage         TEXT NOT NULL,
    status        TEXT NOT NULL,
    error_message TEXT,
    timestamp     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_knowledge_ts ON processing_logs(knowledge_id, timestamp);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Degradation reasons for best-effort translations",
            sql: r#"
ALTER TABLE knowledge_content ADD COLUMN translation_errors TEXT NOT NULL DEFAULT '{}';

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
