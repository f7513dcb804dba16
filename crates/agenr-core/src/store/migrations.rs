//! Database Migrations
//!
//! Versioned schema for the knowledge store. Applied in order at open;
//! `schema_version` tracks the high-water mark.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: entries, tags, relations, conflicts, ingest log, FTS5",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Normalized claim parts, signal watermarks, suppressed contexts",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    entry_type TEXT NOT NULL DEFAULT 'fact',
    subject TEXT NOT NULL,
    canonical_key TEXT,
    content TEXT NOT NULL,
    importance INTEGER NOT NULL DEFAULT 5,
    expiry TEXT NOT NULL DEFAULT 'permanent',
    scope TEXT NOT NULL DEFAULT 'personal',
    platform TEXT,
    project TEXT,

    -- Provenance
    source_file TEXT,
    source_context TEXT,

    -- Exact-duplicate detection
    content_hash TEXT NOT NULL,

    -- Lifecycle counters
    recall_count INTEGER NOT NULL DEFAULT 0,
    confirmations INTEGER NOT NULL DEFAULT 0,
    contradictions INTEGER NOT NULL DEFAULT 0,
    quality_score REAL NOT NULL DEFAULT 0.5,
    recall_intervals TEXT NOT NULL DEFAULT '[]',

    -- Supersession (older row kept for audit)
    superseded_by TEXT REFERENCES entries(id),

    -- Retirement (soft delete)
    retired INTEGER NOT NULL DEFAULT 0,
    retired_at TEXT,
    retired_reason TEXT,

    -- Timestamps (ISO-8601 UTC)
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_recalled_at TEXT,

    -- Embedding metadata (vector itself lives in entry_embeddings)
    has_embedding INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(entry_type);
CREATE INDEX IF NOT EXISTS idx_entries_canonical_key ON entries(canonical_key);
CREATE INDEX IF NOT EXISTS idx_entries_content_hash ON entries(content_hash);
CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at);
CREATE INDEX IF NOT EXISTS idx_entries_importance ON entries(importance);
CREATE INDEX IF NOT EXISTS idx_entries_retired ON entries(retired);
CREATE INDEX IF NOT EXISTS idx_entries_superseded ON entries(superseded_by);

-- Tags relation, lowercased, cascade with the entry
CREATE TABLE IF NOT EXISTS entry_tags (
    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (entry_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_tags_tag ON entry_tags(tag);

-- Entry-to-entry relations
CREATE TABLE IF NOT EXISTS entry_relations (
    source_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,  -- 'supersedes', 'contradicts', 'coexists', 'related'
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, relation_type)
);

CREATE INDEX IF NOT EXISTS idx_relations_source ON entry_relations(source_id);
CREATE INDEX IF NOT EXISTS idx_relations_target ON entry_relations(target_id);

-- Conflict log: entry-vs-entry relations awaiting (or holding) a resolution
CREATE TABLE IF NOT EXISTS conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_a TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    entry_b TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.0,
    resolution TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'keep-new', 'keep-old', 'keep-both', 'auto'
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_conflicts_resolution ON conflicts(resolution);

-- Ingest log: one row per store_entries run.
-- Uniqueness on (source_file, content_hash) gives at-most-once ingest.
CREATE TABLE IF NOT EXISTS ingest_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_file TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    entries_added INTEGER NOT NULL DEFAULT 0,
    entries_updated INTEGER NOT NULL DEFAULT 0,
    entries_skipped INTEGER NOT NULL DEFAULT 0,
    entries_superseded INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    dedup_llm_calls INTEGER NOT NULL DEFAULT 0,
    UNIQUE (source_file, content_hash)
);

-- Embedding blobs (little-endian f32), fixed dimension recorded in store_meta
CREATE TABLE IF NOT EXISTS entry_embeddings (
    entry_id TEXT PRIMARY KEY REFERENCES entries(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Store-level key/value metadata (embedding dimension, etc.)
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- FTS5 over subject + content, porter stemming, kept in sync via triggers
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    id, subject, content,
    content='entries',
    content_rowid='rowid',
    tokenize='porter ascii'
);

CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, id, subject, content)
    VALUES (NEW.rowid, NEW.id, NEW.subject, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, id, subject, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.subject, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, id, subject, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.subject, OLD.content);
    INSERT INTO entries_fts(rowid, id, subject, content)
    VALUES (NEW.rowid, NEW.id, NEW.subject, NEW.content);
END;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Normalized claim parts + durable signal watermarks + per-context
/// suppression for retired entries
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE entries ADD COLUMN subject_entity TEXT;
ALTER TABLE entries ADD COLUMN subject_attribute TEXT;
ALTER TABLE entries ADD COLUMN suppressed_contexts TEXT NOT NULL DEFAULT '[]';

CREATE INDEX IF NOT EXISTS idx_entries_subject_entity ON entries(subject_entity);

-- One row per signal consumer: largest entries.rowid already seen
CREATE TABLE IF NOT EXISTS signal_watermarks (
    consumer_id TEXT PRIMARY KEY,
    max_rowid INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
