//! Knowledge store
//!
//! SQLite-backed store with integrated FTS5 and vector search. Owns the
//! write pipeline: exact-duplicate detection, claim- and vector-based dedup,
//! judge-routed supersession, retirement, and the conflict log. Uses
//! separate reader/writer connections behind mutexes so all methods take
//! `&self` and the store is `Send + Sync` (callers share an `Arc<Store>`).

pub mod dedup;
pub mod ledger;
pub mod migrations;

pub use dedup::{
    action_for_verdict, is_quick_redundant, DedupAction, DedupPolicy, Judge, JudgedRelation,
    JudgeVerdict, LlmJudge, DEDUP_TOP_K, DEFAULT_AUTO_SUPERSEDE_CONFIDENCE,
    DEFAULT_DEDUP_THRESHOLD,
};
pub use ledger::{LedgerRecord, MatchType, RetirementLedger, LEDGER_FILE_NAME};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

use crate::embed::{vector_from_bytes, vector_to_bytes, Embedder, EmbedError};
use crate::llm::LlmError;
use crate::memory::{Entry, EntryType, Expiry, NewEntry, Scope, StoreReport};

#[cfg(feature = "vector-search")]
use crate::search::VectorIndex;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error (disk full, locked, malformed)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error around the DB directory or sidecar files
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Entry not found
    #[error("entry not found: {0}")]
    NotFound(String),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
    /// Stored timestamp failed to parse
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// Bad request bounds or empty mandatory input
    #[error("validation error: {0}")]
    Validation(String),
    /// Conflict row already left the pending state
    #[error("conflict {0} already resolved")]
    ConflictAlreadyResolved(i64),
    /// Retirement ledger unreadable
    #[error("retirement ledger corrupt: {0}")]
    LedgerCorrupt(String),
    /// Embedding provider / dimension failure
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// Judge failure during dedup
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// Vector index failure
    #[error("vector index error: {0}")]
    Vector(String),
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// OPTIONS / AUXILIARY TYPES
// ============================================================================

/// Options for one `store_entries` run
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Bypass the at-most-once ingest guard
    pub force: bool,
    /// Run the vector dedup pass (on by default)
    pub online_dedup: bool,
    pub dedup: DedupPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            force: false,
            online_dedup: true,
            dedup: DedupPolicy::default(),
        }
    }
}

/// Retirement target: a single id, or a subject pattern optionally narrowed
/// by canonical key
#[derive(Debug, Clone)]
pub enum RetireQuery {
    Id(String),
    Subject {
        pattern: String,
        match_type: MatchType,
        canonical_key: Option<String>,
    },
}

/// Retirement options
#[derive(Debug, Clone)]
pub struct RetireOptions {
    pub reason: Option<String>,
    /// Defaults to `["session-start"]`
    pub suppressed_contexts: Vec<String>,
    /// Append subject-pattern retirements to the durable ledger
    pub write_ledger: bool,
}

impl Default for RetireOptions {
    fn default() -> Self {
        Self {
            reason: None,
            suppressed_contexts: vec!["session-start".to_string()],
            write_ledger: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetireOutcome {
    pub count: usize,
    pub ids: Vec<String>,
}

/// Human-facing conflict resolutions (the `auto` state is only written by
/// the pipeline itself)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    KeepNew,
    KeepOld,
    KeepBoth,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::KeepNew => "keep-new",
            ConflictResolution::KeepOld => "keep-old",
            ConflictResolution::KeepBoth => "keep-both",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "keep-new" => Some(ConflictResolution::KeepNew),
            "keep-old" => Some(ConflictResolution::KeepOld),
            "keep-both" => Some(ConflictResolution::KeepBoth),
            _ => None,
        }
    }
}

/// One conflict-log row. `entry_a` is the newer entry, `entry_b` the older.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRow {
    pub id: i64,
    pub entry_a: String,
    pub entry_b: String,
    pub relation: String,
    pub confidence: f64,
    pub resolution: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregate store statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: i64,
    pub active: i64,
    pub retired: i64,
    pub superseded: i64,
    pub with_embeddings: i64,
    pub pending_conflicts: i64,
    pub by_type: Vec<(String, i64)>,
    pub by_expiry: Vec<(String, i64)>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

// ============================================================================
// STORE
// ============================================================================

const QUERY_CACHE_CAPACITY: usize = 100;

/// The knowledge store
#[derive(Debug)]
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    db_path: PathBuf,
    dimensions: usize,
    #[cfg(feature = "vector-search")]
    vector_index: Mutex<VectorIndex>,
    /// LRU cache for query embeddings so repeated recalls skip the provider
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Store {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (and if necessary create) a store.
    ///
    /// `dimensions` is fixed at schema init: the first open records it in
    /// `store_meta`, later opens must agree. The retirement ledger is
    /// replayed before returning so retirements survive DB rebuilds.
    pub fn open(db_path: Option<PathBuf>, dimensions: usize) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("ai", "agenr", "agenr").ok_or_else(|| {
                    StoreError::Init("could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    let _ = std::fs::set_permissions(data_dir, perms);
                }
                data_dir.join("agenr.db")
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer_conn = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        // Pin the embedding dimension at schema init
        let recorded: Option<String> = writer_conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'embedding_dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match recorded {
            Some(value) => {
                let stored: usize = value
                    .parse()
                    .map_err(|_| StoreError::Init(format!("bad embedding_dimensions meta: {value}")))?;
                if stored != dimensions {
                    return Err(StoreError::Embed(EmbedError::DimensionMismatch {
                        expected: stored,
                        got: dimensions,
                    }));
                }
            }
            None => {
                writer_conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('embedding_dimensions', ?1)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        #[cfg(feature = "vector-search")]
        let vector_index = VectorIndex::new(dimensions)
            .map_err(|e| StoreError::Init(format!("failed to create vector index: {e}")))?;

        let query_cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
        ));

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            db_path: path,
            dimensions,
            #[cfg(feature = "vector-search")]
            vector_index: Mutex::new(vector_index),
            query_cache,
        };

        #[cfg(feature = "vector-search")]
        store.load_embeddings_into_index()?;

        let replayed = store.apply_ledger()?;
        if replayed > 0 {
            tracing::info!("retirement ledger re-applied to {replayed} entries");
        }

        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn schema_version(&self) -> Result<u32> {
        let reader = self.lock_reader()?;
        Ok(migrations::get_current_version(&reader)?)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".to_string()))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".to_string()))
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    const ENTRY_COLUMNS: &'static str = "id, entry_type, subject, canonical_key, subject_entity, \
        subject_attribute, content, importance, expiry, scope, platform, project, source_file, \
        source_context, content_hash, recall_count, confirmations, contradictions, quality_score, \
        recall_intervals, superseded_by, retired, retired_at, retired_reason, suppressed_contexts, \
        created_at, updated_at, last_recalled_at, has_embedding";

    fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| StoreError::InvalidTimestamp(raw.to_string()))
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
        let entry_type: String = row.get(1)?;
        let expiry: String = row.get(8)?;
        let scope: String = row.get(9)?;
        let recall_intervals: String = row.get(19)?;
        let suppressed: String = row.get(24)?;
        let created_at: String = row.get(25)?;
        let updated_at: String = row.get(26)?;
        let last_recalled_at: Option<String> = row.get(27)?;
        let retired_at: Option<String> = row.get(22)?;

        let parse = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };

        Ok(Entry {
            id: row.get(0)?,
            entry_type: EntryType::parse_name(&entry_type),
            subject: row.get(2)?,
            canonical_key: row.get(3)?,
            subject_entity: row.get(4)?,
            subject_attribute: row.get(5)?,
            content: row.get(6)?,
            importance: row.get(7)?,
            expiry: Expiry::parse_name(&expiry),
            scope: Scope::parse_name(&scope),
            platform: row.get(10)?,
            project: row.get(11)?,
            tags: vec![], // filled by load_tags
            source_file: row.get(12)?,
            source_context: row.get(13)?,
            content_hash: row.get(14)?,
            recall_count: row.get(15)?,
            confirmations: row.get(16)?,
            contradictions: row.get(17)?,
            quality_score: row.get(18)?,
            recall_intervals: serde_json::from_str(&recall_intervals).unwrap_or_default(),
            superseded_by: row.get(20)?,
            retired: row.get::<_, i64>(21)? != 0,
            retired_at: retired_at.map(|raw| parse(&raw)),
            retired_reason: row.get(23)?,
            suppressed_contexts: serde_json::from_str(&suppressed).unwrap_or_default(),
            created_at: parse(&created_at),
            updated_at: parse(&updated_at),
            last_recalled_at: last_recalled_at.map(|raw| parse(&raw)),
            has_embedding: row.get::<_, i64>(28)? != 0,
        })
    }

    fn load_tags(conn: &Connection, entry_id: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare_cached("SELECT tag FROM entry_tags WHERE entry_id = ?1 ORDER BY tag")?;
        let tags = stmt
            .query_map(params![entry_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tags)
    }

    fn fetch_entries(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Entry>> {
        let mut stmt = conn.prepare(sql)?;
        let mut entries = stmt
            .query_map(args, Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<Entry>>>()?;
        for entry in &mut entries {
            entry.tags = Self::load_tags(conn, &entry.id)?;
        }
        Ok(entries)
    }

    /// Fetch a single entry by id (retired/superseded rows stay queryable
    /// this way)
    pub fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!("SELECT {} FROM entries WHERE id = ?1", Self::ENTRY_COLUMNS);
        let mut entries = Self::fetch_entries(&reader, &sql, &[&id])?;
        Ok(entries.pop())
    }

    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.lock_reader()?;
        let blob: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM entry_embeddings WHERE entry_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.and_then(|b| vector_from_bytes(&b)))
    }

    // ========================================================================
    // WRITE PIPELINE (spec: embed -> exact dup -> claim dedup -> vector
    // dedup -> insert)
    // ========================================================================

    /// Store a batch of fresh entries.
    ///
    /// Exactly-once per `(source_file, ingest_hash)` unless `options.force`.
    /// The write for each entry is atomic and visible to the next one;
    /// judge/embedding calls never run while a connection lock is held.
    pub async fn store_entries(
        &self,
        entries: Vec<NewEntry>,
        source_file: &str,
        ingest_hash: &str,
        options: &StoreOptions,
        embedder: &dyn Embedder,
        judge: &dyn Judge,
    ) -> Result<StoreReport> {
        let start = Instant::now();
        let mut report = StoreReport {
            total_entries: entries.len(),
            ..Default::default()
        };

        if !options.force && self.ingest_already_logged(source_file, ingest_hash)? {
            tracing::debug!("duplicate ingest of {source_file} ({ingest_hash}), skipping");
            report.duplicate_ingest = true;
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(report);
        }

        for mut draft in entries {
            draft.importance = draft.importance.clamp(1, 10);
            draft.tags = draft
                .tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();

            // 1. Embed anything arriving without a vector
            let embedding = match draft.embedding.take() {
                Some(v) => {
                    crate::embed::check_dimensions(&v, self.dimensions)?;
                    v
                }
                None => {
                    let v = embedder.embed(&draft.content).await?;
                    crate::embed::check_dimensions(&v, self.dimensions)?;
                    v
                }
            };

            // 2. Exact duplicate by canonical-text hash
            let hash = content_hash(&draft);
            if let Some(existing) = self.find_active_by_hash(&hash)? {
                self.increment_counter(&existing.id, "confirmations")?;
                report.skipped += 1;
                report.confirmations_incremented_for.push(existing.id);
                continue;
            }

            // 3 + 4. Dedup candidates: same canonical key, then vector
            // neighbors above the threshold
            let mut candidates: Vec<(Entry, Option<f64>)> = Vec::new();
            if let Some(key) = &draft.canonical_key {
                for entry in self.find_active_by_canonical_key(key)? {
                    candidates.push((entry, None));
                }
            }
            if options.online_dedup {
                let hits = self.vector_search(&embedding, options.dedup.effective_top_k())?;
                for (id, sim) in hits {
                    let sim = sim as f64;
                    if sim < options.dedup.effective_threshold() {
                        continue;
                    }
                    if candidates.iter().any(|(c, _)| c.id == id) {
                        continue;
                    }
                    if let Some(entry) = self.get_entry(&id)? {
                        if entry.is_active() {
                            candidates.push((entry, Some(sim)));
                        }
                    }
                }
            }

            // 5. Route candidates through the supersession decision
            let mut skip = false;
            let mut supersede: Option<(Entry, f64)> = None;
            let mut contradictions: Vec<(Entry, f64)> = Vec::new();
            let mut coexists: Vec<Entry> = Vec::new();

            for (candidate, similarity) in candidates {
                if is_quick_redundant(&draft, &candidate) {
                    self.increment_counter(&candidate.id, "confirmations")?;
                    report.skipped += 1;
                    report.confirmations_incremented_for.push(candidate.id);
                    skip = true;
                    break;
                }

                let verdict = judge.judge(&draft, &candidate).await?;
                report.llm_dedup_calls += 1;

                match action_for_verdict(verdict, similarity, &options.dedup) {
                    DedupAction::SkipRedundant => {
                        self.increment_counter(&candidate.id, "confirmations")?;
                        report.skipped += 1;
                        report.confirmations_incremented_for.push(candidate.id);
                        skip = true;
                        break;
                    }
                    DedupAction::Supersede { confidence } => {
                        supersede = Some((candidate, confidence));
                        break;
                    }
                    DedupAction::Contradict { confidence } => {
                        contradictions.push((candidate, confidence));
                    }
                    DedupAction::Coexist { notable: true } => coexists.push(candidate),
                    DedupAction::Coexist { notable: false } | DedupAction::Continue => {}
                }
            }

            if skip {
                continue;
            }

            let inserted = self.insert_entry(&draft, source_file, &hash, &embedding)?;
            report.added += 1;

            if let Some((old, confidence)) = supersede {
                self.mark_superseded(&old.id, &inserted.id)?;
                self.insert_relation(&inserted.id, &old.id, "supersedes")?;
                self.insert_conflict(&inserted.id, &old.id, "supersedes", confidence, "auto")?;
                report.superseded += 1;
                report.relations_created += 1;
            }
            for (old, confidence) in contradictions {
                self.increment_counter(&old.id, "contradictions")?;
                self.insert_relation(&inserted.id, &old.id, "contradicts")?;
                self.insert_conflict(&inserted.id, &old.id, "contradicts", confidence, "pending")?;
                report.updated += 1;
                report.relations_created += 1;
            }
            for other in coexists {
                self.insert_relation(&inserted.id, &other.id, "coexists")?;
                report.relations_created += 1;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        self.append_ingest_log(source_file, ingest_hash, &report, options.force)?;
        Ok(report)
    }

    fn find_active_by_hash(&self, hash: &str) -> Result<Option<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE content_hash = ?1 AND retired = 0 AND superseded_by IS NULL LIMIT 1",
            Self::ENTRY_COLUMNS
        );
        let mut entries = Self::fetch_entries(&reader, &sql, &[&hash])?;
        Ok(entries.pop())
    }

    fn find_active_by_canonical_key(&self, key: &str) -> Result<Vec<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE canonical_key = ?1 AND retired = 0 AND superseded_by IS NULL \
             ORDER BY created_at DESC",
            Self::ENTRY_COLUMNS
        );
        Self::fetch_entries(&reader, &sql, &[&key])
    }

    /// Insert an entry row, its tags, and its embedding in one transaction,
    /// then add the vector to the index.
    fn insert_entry(
        &self,
        draft: &NewEntry,
        source_file: &str,
        hash: &str,
        embedding: &[f32],
    ) -> Result<Entry> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        {
            let mut writer = self.lock_writer()?;
            let tx = writer.transaction()?;
            tx.execute(
                "INSERT INTO entries (
                    id, entry_type, subject, canonical_key, subject_entity, subject_attribute,
                    content, importance, expiry, scope, platform, project,
                    source_file, source_context, content_hash,
                    created_at, updated_at, has_embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 1)",
                params![
                    id,
                    draft.entry_type.as_str(),
                    draft.subject,
                    draft.canonical_key,
                    draft.subject_entity,
                    draft.subject_attribute,
                    draft.content,
                    draft.importance,
                    draft.expiry.as_str(),
                    draft.scope.as_str(),
                    draft.platform,
                    draft.project,
                    source_file,
                    draft.source_context,
                    hash,
                    now,
                    now,
                ],
            )?;
            for tag in &draft.tags {
                tx.execute(
                    "INSERT OR IGNORE INTO entry_tags (entry_id, tag) VALUES (?1, ?2)",
                    params![id, tag],
                )?;
            }
            tx.execute(
                "INSERT INTO entry_embeddings (entry_id, embedding, dimensions, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, vector_to_bytes(embedding), embedding.len() as i64, now],
            )?;
            tx.commit()?;
        }

        self.index_add(&id, embedding)?;

        self.get_entry(&id)?.ok_or(StoreError::NotFound(id))
    }

    fn increment_counter(&self, id: &str, counter: &str) -> Result<()> {
        // counter is a compile-time column name, never user input
        debug_assert!(matches!(counter, "confirmations" | "contradictions"));
        let writer = self.lock_writer()?;
        writer.execute(
            &format!(
                "UPDATE entries SET {counter} = {counter} + 1, updated_at = ?1 WHERE id = ?2"
            ),
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    fn mark_superseded(&self, old_id: &str, new_id: &str) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "UPDATE entries SET superseded_by = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_id, Utc::now().to_rfc3339(), old_id],
        )?;
        Ok(())
    }

    fn insert_relation(&self, source_id: &str, target_id: &str, relation_type: &str) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR IGNORE INTO entry_relations (source_id, target_id, relation_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source_id, target_id, relation_type, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_conflict(
        &self,
        entry_a: &str,
        entry_b: &str,
        relation: &str,
        confidence: f64,
        resolution: &str,
    ) -> Result<i64> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT INTO conflicts (entry_a, entry_b, relation, confidence, resolution, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry_a,
                entry_b,
                relation,
                confidence,
                resolution,
                Utc::now().to_rfc3339(),
                if resolution == "pending" { None } else { Some(Utc::now().to_rfc3339()) },
            ],
        )?;
        Ok(writer.last_insert_rowid())
    }

    fn ingest_already_logged(&self, source_file: &str, hash: &str) -> Result<bool> {
        let reader = self.lock_reader()?;
        let count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM ingest_log WHERE source_file = ?1 AND content_hash = ?2",
            params![source_file, hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn append_ingest_log(
        &self,
        source_file: &str,
        hash: &str,
        report: &StoreReport,
        force: bool,
    ) -> Result<()> {
        let writer = self.lock_writer()?;
        let verb = if force { "INSERT OR REPLACE" } else { "INSERT OR IGNORE" };
        writer.execute(
            &format!(
                "{verb} INTO ingest_log (source_file, content_hash, ingested_at, entries_added, \
                 entries_updated, entries_skipped, entries_superseded, duration_ms, dedup_llm_calls)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                source_file,
                hash,
                Utc::now().to_rfc3339(),
                report.added as i64,
                report.updated as i64,
                report.skipped as i64,
                report.superseded as i64,
                report.duration_ms as i64,
                report.llm_dedup_calls as i64,
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // VECTOR INDEX
    // ========================================================================

    #[cfg(feature = "vector-search")]
    fn load_embeddings_into_index(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let reader = self.lock_reader()?;
            let mut stmt = reader.prepare("SELECT entry_id, embedding FROM entry_embeddings")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut index = self
            .vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".to_string()))?;

        for (entry_id, blob) in rows {
            if let Some(vector) = vector_from_bytes(&blob) {
                if let Err(e) = index.add(&entry_id, &vector) {
                    tracing::warn!("failed to load embedding for {entry_id}: {e}");
                }
            }
        }

        Ok(())
    }

    #[cfg(feature = "vector-search")]
    fn index_add(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut index = self
            .vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".to_string()))?;
        index
            .add(id, vector)
            .map_err(|e| StoreError::Vector(e.to_string()))
    }

    #[cfg(not(feature = "vector-search"))]
    fn index_add(&self, _id: &str, _vector: &[f32]) -> Result<()> {
        Ok(())
    }

    /// Top-k cosine neighbors. With `vector-search` this is the HNSW index;
    /// without it, a brute-force scan over the embeddings table.
    #[cfg(feature = "vector-search")]
    pub fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let index = self
            .vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".to_string()))?;
        index
            .search(query, k)
            .map_err(|e| StoreError::Vector(e.to_string()))
    }

    #[cfg(not(feature = "vector-search"))]
    pub fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        use crate::embed::cosine_similarity;
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare("SELECT entry_id, embedding FROM entry_embeddings")?;
        let mut scored: Vec<(String, f32)> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, blob)| vector_from_bytes(&blob).map(|v| (id, v)))
            .map(|(id, v)| {
                let sim = cosine_similarity(query, &v);
                (id, sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Rebuild the in-process index from the embeddings table
    #[cfg(feature = "vector-search")]
    pub fn rebuild_vector_index(&self) -> Result<usize> {
        {
            let mut index = self
                .vector_index
                .lock()
                .map_err(|_| StoreError::Init("vector index lock poisoned".to_string()))?;
            index.clear().map_err(|e| StoreError::Vector(e.to_string()))?;
        }
        self.load_embeddings_into_index()?;
        let index = self
            .vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".to_string()))?;
        Ok(index.len())
    }

    #[cfg(not(feature = "vector-search"))]
    pub fn rebuild_vector_index(&self) -> Result<usize> {
        let reader = self.lock_reader()?;
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM entry_embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // QUERY-EMBEDDING CACHE
    // ========================================================================

    pub fn cached_query_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let mut cache = self.query_cache.lock().ok()?;
        cache.get(text).cloned()
    }

    pub fn cache_query_embedding(&self, text: &str, vector: Vec<f32>) {
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector);
        }
    }

    // ========================================================================
    // RETIREMENT
    // ========================================================================

    /// Retire entries by id or subject pattern. Retired rows stay queryable
    /// by id but never surface from recall, dedup, or signals.
    pub fn retire(&self, query: &RetireQuery, options: &RetireOptions) -> Result<RetireOutcome> {
        let ids: Vec<String> = match query {
            RetireQuery::Id(id) => {
                if self.get_entry(id)?.is_none() {
                    return Err(StoreError::NotFound(id.clone()));
                }
                vec![id.clone()]
            }
            RetireQuery::Subject {
                pattern,
                match_type,
                canonical_key,
            } => {
                let active = self.all_active_entries()?;
                active
                    .into_iter()
                    .filter(|e| match_type.matches(pattern, &e.subject))
                    .filter(|e| match canonical_key {
                        Some(key) => e.canonical_key.as_deref() == Some(key.as_str()),
                        None => true,
                    })
                    .map(|e| e.id)
                    .collect()
            }
        };

        let count = self.retire_ids(&ids, options.reason.as_deref(), &options.suppressed_contexts)?;

        if options.write_ledger {
            if let RetireQuery::Subject {
                pattern,
                match_type,
                canonical_key,
            } = query
            {
                let ledger_path = self.ledger_path();
                RetirementLedger::append(
                    &ledger_path,
                    LedgerRecord {
                        id: Uuid::new_v4().to_string(),
                        created_at: Utc::now(),
                        subject_pattern: pattern.clone(),
                        match_type: *match_type,
                        canonical_key: canonical_key.clone(),
                        reason: options.reason.clone(),
                        suppressed_contexts: options.suppressed_contexts.clone(),
                    },
                )?;
            }
        }

        Ok(RetireOutcome { count, ids })
    }

    fn retire_ids(&self, ids: &[String], reason: Option<&str>, suppressed: &[String]) -> Result<usize> {
        let suppressed_json =
            serde_json::to_string(suppressed).unwrap_or_else(|_| "[]".to_string());
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        let writer = self.lock_writer()?;
        for id in ids {
            count += writer.execute(
                "UPDATE entries SET retired = 1, retired_at = ?1, retired_reason = ?2, \
                 suppressed_contexts = ?3, updated_at = ?1 WHERE id = ?4 AND retired = 0",
                params![now, reason, suppressed_json, id],
            )?;
        }
        Ok(count)
    }

    fn ledger_path(&self) -> PathBuf {
        let dir = self
            .db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        RetirementLedger::path_for(&dir)
    }

    /// Re-apply every ledger record. Idempotent: records only set
    /// `retired = 1`.
    pub fn apply_ledger(&self) -> Result<usize> {
        let ledger = RetirementLedger::load(&self.ledger_path())?;
        let mut total = 0;
        for record in &ledger.retirements {
            let active = self.all_active_entries()?;
            let ids: Vec<String> = active
                .into_iter()
                .filter(|e| record.match_type.matches(&record.subject_pattern, &e.subject))
                .filter(|e| match &record.canonical_key {
                    Some(key) => e.canonical_key.as_deref() == Some(key.as_str()),
                    None => true,
                })
                .map(|e| e.id)
                .collect();
            total += self.retire_ids(&ids, record.reason.as_deref(), &record.suppressed_contexts)?;
        }
        Ok(total)
    }

    // ========================================================================
    // CONFLICT LOG
    // ========================================================================

    fn row_to_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRow> {
        let created_at: String = row.get(6)?;
        let resolved_at: Option<String> = row.get(7)?;
        let parse = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };
        Ok(ConflictRow {
            id: row.get(0)?,
            entry_a: row.get(1)?,
            entry_b: row.get(2)?,
            relation: row.get(3)?,
            confidence: row.get(4)?,
            resolution: row.get(5)?,
            created_at: parse(&created_at),
            resolved_at: resolved_at.map(|raw| parse(&raw)),
        })
    }

    pub fn pending_conflicts(&self) -> Result<Vec<ConflictRow>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, entry_a, entry_b, relation, confidence, resolution, created_at, resolved_at
             FROM conflicts WHERE resolution = 'pending' ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_conflict(&self, id: i64) -> Result<Option<ConflictRow>> {
        let reader = self.lock_reader()?;
        let row = reader
            .query_row(
                "SELECT id, entry_a, entry_b, relation, confidence, resolution, created_at, resolved_at
                 FROM conflicts WHERE id = ?1",
                params![id],
                Self::row_to_conflict,
            )
            .optional()?;
        Ok(row)
    }

    /// Resolve a pending conflict. Runs under an immediate transaction with
    /// a re-check of the pending state so a concurrent resolver gets
    /// `ConflictAlreadyResolved` instead of double-retiring.
    pub fn resolve_conflict(&self, id: i64, resolution: ConflictResolution) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut writer = self.lock_writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "SELECT resolution, entry_a, entry_b FROM conflicts WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let (current, entry_a, entry_b) = match row {
            Some(r) => r,
            None => return Err(StoreError::NotFound(format!("conflict {id}"))),
        };
        if current != "pending" {
            return Err(StoreError::ConflictAlreadyResolved(id));
        }

        tx.execute(
            "UPDATE conflicts SET resolution = ?1, resolved_at = ?2 WHERE id = ?3",
            params![resolution.as_str(), now, id],
        )?;

        // keep-new retires the older entry (entry_b); keep-old the newer
        let loser = match resolution {
            ConflictResolution::KeepNew => Some(entry_b),
            ConflictResolution::KeepOld => Some(entry_a),
            ConflictResolution::KeepBoth => None,
        };
        if let Some(loser) = loser {
            tx.execute(
                "UPDATE entries SET retired = 1, retired_at = ?1, retired_reason = ?2, \
                 suppressed_contexts = ?3, updated_at = ?1 WHERE id = ?4 AND retired = 0",
                params![
                    now,
                    format!("conflict {id} resolved {}", resolution.as_str()),
                    "[\"session-start\"]",
                    loser
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // SIGNAL WATERMARKS
    // ========================================================================

    pub fn max_rowid(&self) -> Result<i64> {
        let reader = self.lock_reader()?;
        let max: i64 = reader.query_row(
            "SELECT COALESCE(MAX(rowid), 0) FROM entries",
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    pub fn watermark(&self, consumer: &str) -> Result<Option<i64>> {
        let reader = self.lock_reader()?;
        let value = reader
            .query_row(
                "SELECT max_rowid FROM signal_watermarks WHERE consumer_id = ?1",
                params![consumer],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_watermark(&self, consumer: &str, rowid: i64) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT INTO signal_watermarks (consumer_id, max_rowid, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(consumer_id) DO UPDATE SET max_rowid = excluded.max_rowid, updated_at = excluded.updated_at",
            params![consumer, rowid, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Active entries with rowid above the watermark, newest last, filtered
    /// by minimum importance
    pub fn entries_above_watermark(
        &self,
        rowid: i64,
        min_importance: i64,
        limit: usize,
    ) -> Result<Vec<(i64, Entry)>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT rowid, {} FROM entries WHERE rowid > ?1 AND retired = 0 AND superseded_by IS NULL \
             AND importance >= ?2 ORDER BY rowid LIMIT ?3",
            Self::ENTRY_COLUMNS
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt
            .query_map(params![rowid, min_importance, limit as i64], |row| {
                let rid: i64 = row.get(0)?;
                // Entry columns shifted by one
                let entry = Self::row_to_entry_offset(row, 1)?;
                Ok((rid, entry))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (rid, mut entry) in rows {
            entry.tags = Self::load_tags(&reader, &entry.id)?;
            out.push((rid, entry));
        }
        Ok(out)
    }

    /// Largest rowid among entries above the watermark regardless of
    /// importance. The watermark always advances past everything seen, even
    /// rows that did not qualify for a notice.
    pub fn max_rowid_above(&self, rowid: i64) -> Result<i64> {
        let reader = self.lock_reader()?;
        let max: i64 = reader.query_row(
            "SELECT COALESCE(MAX(rowid), ?1) FROM entries WHERE rowid > ?1",
            params![rowid],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn row_to_entry_offset(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Entry> {
        // Mirrors row_to_entry with shifted indices (used when rowid is
        // selected first)
        let get_s = |i: usize| row.get::<_, String>(i + offset);
        let entry_type = get_s(1)?;
        let expiry = get_s(8)?;
        let scope = get_s(9)?;
        let recall_intervals = get_s(19)?;
        let suppressed = get_s(24)?;
        let created_at = get_s(25)?;
        let updated_at = get_s(26)?;
        let last_recalled_at: Option<String> = row.get(27 + offset)?;
        let retired_at: Option<String> = row.get(22 + offset)?;
        let parse = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };
        Ok(Entry {
            id: row.get(offset)?,
            entry_type: EntryType::parse_name(&entry_type),
            subject: row.get(2 + offset)?,
            canonical_key: row.get(3 + offset)?,
            subject_entity: row.get(4 + offset)?,
            subject_attribute: row.get(5 + offset)?,
            content: row.get(6 + offset)?,
            importance: row.get(7 + offset)?,
            expiry: Expiry::parse_name(&expiry),
            scope: Scope::parse_name(&scope),
            platform: row.get(10 + offset)?,
            project: row.get(11 + offset)?,
            tags: vec![],
            source_file: row.get(12 + offset)?,
            source_context: row.get(13 + offset)?,
            content_hash: row.get(14 + offset)?,
            recall_count: row.get(15 + offset)?,
            confirmations: row.get(16 + offset)?,
            contradictions: row.get(17 + offset)?,
            quality_score: row.get(18 + offset)?,
            recall_intervals: serde_json::from_str(&recall_intervals).unwrap_or_default(),
            superseded_by: row.get(20 + offset)?,
            retired: row.get::<_, i64>(21 + offset)? != 0,
            retired_at: retired_at.map(|raw| parse(&raw)),
            retired_reason: row.get(23 + offset)?,
            suppressed_contexts: serde_json::from_str(&suppressed).unwrap_or_default(),
            created_at: parse(&created_at),
            updated_at: parse(&updated_at),
            last_recalled_at: last_recalled_at.map(|raw| parse(&raw)),
            has_embedding: row.get::<_, i64>(28 + offset)? != 0,
        })
    }

    // ========================================================================
    // RECALL SUPPORT
    // ========================================================================

    pub fn all_active_entries(&self) -> Result<Vec<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE retired = 0 AND superseded_by IS NULL ORDER BY created_at DESC",
            Self::ENTRY_COLUMNS
        );
        Self::fetch_entries(&reader, &sql, &[])
    }

    /// Batch fetch by id, preserving the given order
    pub fn entries_by_ids(&self, ids: &[String]) -> Result<Vec<Entry>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.get_entry(id)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Ids matching the sanitized FTS query (used for the keyword bonus)
    pub fn fts_match_ids(&self, raw_query: &str, limit: usize) -> Result<HashSet<String>> {
        let Some(match_expr) = crate::search::sanitize_fts_query(raw_query) else {
            return Ok(HashSet::new());
        };
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id FROM entries_fts WHERE entries_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![match_expr, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    /// Recency-ordered active entries (session-start candidate fetch)
    pub fn recent_active_entries(&self, limit: usize) -> Result<Vec<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE retired = 0 AND superseded_by IS NULL \
             ORDER BY created_at DESC LIMIT ?1",
            Self::ENTRY_COLUMNS
        );
        Self::fetch_entries(&reader, &sql, &[&(limit as i64)])
    }

    /// Importance-then-recency ordered active entries (browse candidate
    /// fetch)
    pub fn browse_candidates(&self, limit: usize) -> Result<Vec<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE retired = 0 AND superseded_by IS NULL \
             ORDER BY importance DESC, created_at DESC LIMIT ?1",
            Self::ENTRY_COLUMNS
        );
        Self::fetch_entries(&reader, &sql, &[&(limit as i64)])
    }

    /// Core-tier active entries (always emitted at session start)
    pub fn core_entries(&self) -> Result<Vec<Entry>> {
        let reader = self.lock_reader()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE retired = 0 AND superseded_by IS NULL AND expiry = 'core' \
             ORDER BY importance DESC, created_at DESC",
            Self::ENTRY_COLUMNS
        );
        Self::fetch_entries(&reader, &sql, &[])
    }

    /// Recall side effects, batched in one transaction: bump recall_count,
    /// stamp last_recalled_at, append to recall_intervals, and promote
    /// importance when the count crosses 3 / 10 / 25 (capped at 9).
    pub fn record_recalls(&self, ids: &[String], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now_str = now.to_rfc3339();
        let epoch = now.timestamp();

        let mut writer = self.lock_writer()?;
        let tx = writer.transaction()?;
        for id in ids {
            let row = tx
                .query_row(
                    "SELECT recall_count, importance, recall_intervals FROM entries WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((recall_count, importance, intervals_raw)) = row else {
                continue;
            };

            let new_count = recall_count + 1;
            let mut intervals: Vec<i64> = serde_json::from_str(&intervals_raw).unwrap_or_default();
            intervals.push(epoch);
            let intervals_json =
                serde_json::to_string(&intervals).unwrap_or_else(|_| "[]".to_string());

            let new_importance = if matches!(new_count, 3 | 10 | 25) && importance < 9 {
                importance + 1
            } else {
                importance
            };

            tx.execute(
                "UPDATE entries SET recall_count = ?1, last_recalled_at = ?2, \
                 recall_intervals = ?3, importance = ?4, updated_at = ?2 WHERE id = ?5",
                params![new_count, now_str, intervals_json, new_importance, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Overwrite an entry's quality score (quality-feedback pass)
    pub fn set_quality_score(&self, id: &str, score: f64) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "UPDATE entries SET quality_score = ?1, updated_at = ?2 WHERE id = ?3",
            params![score.clamp(0.0, 1.0), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let reader = self.lock_reader()?;

        let total: i64 = reader.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
        let retired: i64 =
            reader.query_row("SELECT COUNT(*) FROM entries WHERE retired = 1", [], |r| r.get(0))?;
        let superseded: i64 = reader.query_row(
            "SELECT COUNT(*) FROM entries WHERE superseded_by IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let active: i64 = reader.query_row(
            "SELECT COUNT(*) FROM entries WHERE retired = 0 AND superseded_by IS NULL",
            [],
            |r| r.get(0),
        )?;
        let with_embeddings: i64 =
            reader.query_row("SELECT COUNT(*) FROM entry_embeddings", [], |r| r.get(0))?;
        let pending_conflicts: i64 = reader.query_row(
            "SELECT COUNT(*) FROM conflicts WHERE resolution = 'pending'",
            [],
            |r| r.get(0),
        )?;

        let mut by_type = Vec::new();
        {
            let mut stmt = reader.prepare(
                "SELECT entry_type, COUNT(*) FROM entries WHERE retired = 0 AND superseded_by IS NULL \
                 GROUP BY entry_type ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in rows {
                by_type.push(row?);
            }
        }

        let mut by_expiry = Vec::new();
        {
            let mut stmt = reader.prepare(
                "SELECT expiry, COUNT(*) FROM entries WHERE retired = 0 AND superseded_by IS NULL \
                 GROUP BY expiry ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in rows {
                by_expiry.push(row?);
            }
        }

        let oldest: Option<String> =
            reader.query_row("SELECT MIN(created_at) FROM entries", [], |r| r.get(0))?;
        let newest: Option<String> =
            reader.query_row("SELECT MAX(created_at) FROM entries", [], |r| r.get(0))?;

        Ok(StoreStats {
            total,
            active,
            retired,
            superseded,
            with_embeddings,
            pending_conflicts,
            by_type,
            by_expiry,
            oldest: oldest.and_then(|raw| Self::parse_ts(&raw).ok()),
            newest: newest.and_then(|raw| Self::parse_ts(&raw).ok()),
        })
    }

    /// Active entries for `db export`
    pub fn export_active(&self) -> Result<Vec<Entry>> {
        self.all_active_entries()
    }

    /// Integrity pass; returns human-readable problems (empty = healthy)
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        let reader = self.lock_reader()?;

        let entries_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
        let fts_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM entries_fts", [], |r| r.get(0))?;
        if entries_count != fts_count {
            problems.push(format!(
                "FTS index out of sync: {entries_count} entries vs {fts_count} FTS rows"
            ));
        }

        let dangling: i64 = reader.query_row(
            "SELECT COUNT(*) FROM entries e WHERE e.superseded_by IS NOT NULL \
             AND NOT EXISTS (SELECT 1 FROM entries s WHERE s.id = e.superseded_by)",
            [],
            |r| r.get(0),
        )?;
        if dangling > 0 {
            problems.push(format!("{dangling} entries reference a missing superseding entry"));
        }

        let bad_dims: i64 = reader.query_row(
            "SELECT COUNT(*) FROM entry_embeddings WHERE dimensions != ?1",
            params![self.dimensions as i64],
            |r| r.get(0),
        )?;
        if bad_dims > 0 {
            problems.push(format!(
                "{bad_dims} embeddings disagree with the schema dimension {}",
                self.dimensions
            ));
        }

        drop(reader);
        if let Err(e) = RetirementLedger::load(&self.ledger_path()) {
            problems.push(format!("retirement ledger unreadable: {e}"));
        }

        Ok(problems)
    }

    /// Wipe all rows (entries cascade into tags/relations/embeddings/
    /// conflicts). The schema, meta, and ledger file survive.
    pub fn reset(&self) -> Result<()> {
        {
            let writer = self.lock_writer()?;
            writer.execute_batch(
                "DELETE FROM entries;
                 DELETE FROM ingest_log;
                 DELETE FROM signal_watermarks;",
            )?;
        }
        #[cfg(feature = "vector-search")]
        {
            let mut index = self
                .vector_index
                .lock()
                .map_err(|_| StoreError::Init("vector index lock poisoned".to_string()))?;
            index.clear().map_err(|e| StoreError::Vector(e.to_string()))?;
        }
        Ok(())
    }
}

// ============================================================================
// HASHING
// ============================================================================

/// SHA-256 hex of an entry's canonical text
pub fn content_hash(draft: &NewEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(draft.canonical_text().as_bytes());
    hex_encode(&hasher.finalize())
}

/// SHA-256 hex of arbitrary ingest content (watch pipeline chunks)
pub fn ingest_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// TESTS
// ============================================================================
