//! Watch pipeline
//!
//! The only long-running loop in the system. Every interval it stats the
//! active transcript file, reads bytes past the recorded offset, parses and
//! chunks them, drives the extractor, and commits entries through the write
//! pipeline. The offset advances only past chunks that actually succeeded
//! and is made durable before the next cycle. Cycles for a given file are
//! strictly serial; errors are logged and the loop continues.

pub mod state;

pub use state::{FileState, WatchState, STATE_FILE_NAME};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::context::ContextFiles;
use crate::embed::Embedder;
use crate::extract::{chunk_messages, ExtractError, Extractor, CHUNK_OVERLAP_CHARS, DEFAULT_CHUNK_CHARS};
use crate::store::{ingest_content_hash, Judge, Store, StoreError, StoreOptions};
use crate::transcript::parse_transcript;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("watch state error: {0}")]
    State(String),
    #[error("no session file found for target: {0}")]
    NoTarget(String),
}

pub type Result<T> = std::result::Result<T, WatchError>;

// ============================================================================
// OPTIONS / TARGETS
// ============================================================================

/// Default cycle interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum new bytes before a cycle does any work
pub const DEFAULT_MIN_CHUNK_CHARS: u64 = 2000;

/// What to watch
#[derive(Debug, Clone)]
pub enum WatchTarget {
    /// A single transcript file
    File(PathBuf),
    /// A sessions directory; the most recently modified .jsonl is active
    Dir(PathBuf),
    /// Probe the known session roots under the home directory
    Auto,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    pub min_chunk_chars: u64,
    /// Run one cycle and exit
    pub once: bool,
    /// Full cycle without DB writes or offset advance
    pub dry_run: bool,
    pub chunk_chars: usize,
    pub overlap_chars: usize,
    pub state_path: PathBuf,
    pub store_options: StoreOptions,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            min_chunk_chars: DEFAULT_MIN_CHUNK_CHARS,
            once: false,
            dry_run: false,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            overlap_chars: CHUNK_OVERLAP_CHARS,
            state_path: WatchState::default_path()
                .unwrap_or_else(|| PathBuf::from("watch-state.json")),
            store_options: StoreOptions::default(),
        }
    }
}

/// Outcome of one cycle over one file
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub bytes_read: u64,
    pub entries_stored: usize,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    pub offset_before: u64,
    pub offset_after: u64,
    /// Below the min-chunk threshold; nothing was done
    pub skipped: bool,
    /// File shrank under the recorded offset; offset reset to 0
    pub truncated: bool,
}

/// Summary of a whole watch run
#[derive(Debug, Clone, Default)]
pub struct WatchSummary {
    pub cycles: usize,
    pub skipped_cycles: usize,
    pub entries_stored: usize,
    pub bytes_read: u64,
    pub file_switches: usize,
}

// ============================================================================
// WATCHER
// ============================================================================

pub struct Watcher {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    judge: Arc<dyn Judge>,
    extractor: Arc<dyn Extractor>,
    context: Option<Arc<ContextFiles>>,
    options: WatchOptions,
    state: WatchState,
}

impl Watcher {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        judge: Arc<dyn Judge>,
        extractor: Arc<dyn Extractor>,
        options: WatchOptions,
    ) -> Result<Self> {
        let state = WatchState::load(&options.state_path)?;
        Ok(Self {
            store,
            embedder,
            judge,
            extractor,
            context: None,
            options,
            state,
        })
    }

    /// Attach best-effort context-file refreshes after productive cycles
    pub fn with_context(mut self, context: Arc<ContextFiles>) -> Self {
        self.context = Some(context);
        self
    }

    /// Run the watch loop until `once` completes, the shutdown channel
    /// fires, or the interval loop is cancelled.
    pub async fn run(
        mut self,
        target: WatchTarget,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<WatchSummary> {
        let mut summary = WatchSummary::default();
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut active_file: Option<PathBuf> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    tracing::info!("shutdown requested, stopping watcher");
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let resolved = match resolve_target(&target) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("no watchable session file: {e}");
                    if self.options.once {
                        return Err(e);
                    }
                    continue;
                }
            };

            if active_file.as_deref() != Some(resolved.as_path()) {
                if let Some(previous) = &active_file {
                    // The old offset stays frozen in state for a later return
                    tracing::info!(
                        "switch: {} -> {}",
                        previous.display(),
                        resolved.display()
                    );
                    summary.file_switches += 1;
                }
                active_file = Some(resolved.clone());
            }

            match self.run_cycle(&resolved).await {
                Ok(outcome) => {
                    summary.cycles += 1;
                    summary.bytes_read += outcome.bytes_read;
                    summary.entries_stored += outcome.entries_stored;
                    if outcome.skipped {
                        summary.skipped_cycles += 1;
                    }
                    if outcome.entries_stored > 0 {
                        if let Some(context) = &self.context {
                            context.schedule_refresh(Arc::clone(&self.store));
                        }
                    }
                }
                // The watcher never propagates: log and keep looping
                Err(e) => tracing::warn!("watch cycle failed for {}: {e}", resolved.display()),
            }

            if self.options.once {
                break;
            }
        }

        Ok(summary)
    }

    /// One cycle over one file. Public so `--once` and tests can drive it
    /// directly.
    pub async fn run_cycle(&mut self, path: &Path) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();

        let file_state = self.state.file_mut(path);
        outcome.offset_before = file_state.byte_offset;

        if size < file_state.byte_offset {
            tracing::warn!(
                "{} shrank below recorded offset ({} < {}), treating as truncation",
                path.display(),
                size,
                file_state.byte_offset
            );
            file_state.byte_offset = 0;
            outcome.truncated = true;
        }

        let offset = file_state.byte_offset;
        let new_bytes = size - offset;
        if new_bytes < self.options.min_chunk_chars {
            outcome.skipped = true;
            outcome.offset_after = offset;
            return Ok(outcome);
        }

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(new_bytes as usize);
        file.read_to_end(&mut buf).await?;
        outcome.bytes_read = buf.len() as u64;

        let window = String::from_utf8_lossy(&buf);
        let parsed = parse_transcript(&window);
        if parsed.skipped_lines > 0 {
            tracing::debug!(
                "{}: {} unparseable lines skipped",
                path.display(),
                parsed.skipped_lines
            );
        }

        if parsed.messages.is_empty() {
            // Nothing extractable; consume the complete lines so junk is not
            // re-read forever. The incomplete tail stays for the next cycle.
            if !self.options.dry_run {
                let file_state = self.state.file_mut(path);
                file_state.byte_offset = offset + parsed.consumed_bytes as u64;
                file_state.total_run_count += 1;
                file_state.last_run_at = Some(chrono::Utc::now());
                outcome.offset_after = file_state.byte_offset;
                self.state.save(&self.options.state_path)?;
            } else {
                outcome.offset_after = offset;
            }
            return Ok(outcome);
        }

        let chunks = chunk_messages(
            &parsed.messages,
            self.options.chunk_chars,
            self.options.overlap_chars,
        );

        // consumed_through tracks how far extraction actually succeeded; on
        // a transient failure the remaining chunks stay unconsumed and are
        // re-read next cycle (the carry-over)
        let mut consumed_through: u64 = 0;
        let mut all_ok = true;

        for (i, chunk) in chunks.iter().enumerate() {
            if self.options.dry_run {
                outcome.chunks_ok += 1;
                continue;
            }
            match self.extractor.extract_chunk(&chunk.text).await {
                Ok((entries, warnings)) => {
                    for warning in warnings {
                        tracing::debug!("extractor warning: {warning}");
                    }
                    if !entries.is_empty() {
                        let hash = ingest_content_hash(&chunk.text);
                        let report = self
                            .store
                            .store_entries(
                                entries,
                                &path.display().to_string(),
                                &hash,
                                &self.options.store_options,
                                self.embedder.as_ref(),
                                self.judge.as_ref(),
                            )
                            .await;
                        match report {
                            Ok(report) => outcome.entries_stored += report.added,
                            Err(e) => {
                                tracing::warn!("store failed for chunk {i}: {e}");
                                all_ok = false;
                                break;
                            }
                        }
                    }
                    consumed_through = chunk.byte_end as u64;
                    outcome.chunks_ok += 1;
                }
                Err(ExtractError::Transient(msg)) => {
                    tracing::warn!("transient extraction failure on chunk {i}, will retry: {msg}");
                    all_ok = false;
                    break;
                }
                Err(ExtractError::Fatal(msg)) => {
                    // Retrying the same input cannot help; skip past it
                    tracing::warn!("fatal extraction failure on chunk {i}, skipping: {msg}");
                    consumed_through = chunk.byte_end as u64;
                    outcome.chunks_failed += 1;
                }
            }
        }

        if self.options.dry_run {
            outcome.offset_after = offset;
            return Ok(outcome);
        }

        let advance = if all_ok {
            // Everything extracted: consume all complete lines, including
            // skipped junk and inter-message bytes
            parsed.consumed_bytes as u64
        } else {
            consumed_through
        };

        let file_state = self.state.file_mut(path);
        file_state.byte_offset = offset + advance;
        file_state.total_entries_stored += outcome.entries_stored as u64;
        file_state.total_run_count += 1;
        file_state.last_run_at = Some(chrono::Utc::now());
        outcome.offset_after = file_state.byte_offset;

        // Offset durability before the next cycle begins
        self.state.save(&self.options.state_path)?;

        Ok(outcome)
    }
}

// ============================================================================
// TARGET RESOLUTION
// ============================================================================

/// Session roots probed by `--auto`
fn known_session_roots() -> Vec<PathBuf> {
    let Some(base) = directories::BaseDirs::new() else {
        return vec![];
    };
    let home = base.home_dir();
    vec![
        home.join(".openclaw/sessions"),
        home.join(".claude/projects"),
        home.join(".codex/sessions"),
    ]
}

fn resolve_target(target: &WatchTarget) -> Result<PathBuf> {
    match target {
        WatchTarget::File(path) => {
            if path.exists() {
                Ok(path.clone())
            } else {
                Err(WatchError::NoTarget(path.display().to_string()))
            }
        }
        WatchTarget::Dir(dir) => newest_session_file(dir)
            .ok_or_else(|| WatchError::NoTarget(dir.display().to_string())),
        WatchTarget::Auto => {
            for root in known_session_roots() {
                if let Some(found) = newest_session_file(&root) {
                    return Ok(found);
                }
            }
            Err(WatchError::NoTarget("auto".to_string()))
        }
    }
}

/// Most recently modified .jsonl under a directory (one level of nesting,
/// matching per-project session layouts)
fn newest_session_file(dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut consider = |path: PathBuf| {
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            return;
        }
        if let Ok(meta) = std::fs::metadata(&path) {
            if let Ok(mtime) = meta.modified() {
                if best.as_ref().is_none_or(|(t, _)| mtime > *t) {
                    best = Some((mtime, path));
                }
            }
        }
    };

    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Ok(children) = std::fs::read_dir(&path) {
                for child in children.flatten() {
                    consider(child.path());
                }
            }
        } else {
            consider(path);
        }
    }
    best.map(|(_, path)| path)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbedError;
    use crate::llm::LlmError;
    use crate::memory::{Entry, EntryType, NewEntry};
    use crate::store::{JudgeVerdict, JudgedRelation};
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use std::io::Write as _;
    use tempfile::TempDir;

    const DIMS: usize = 8;

    struct MockEmbedder;

    #[async_trait]
    impl Embedder for MockEmbedder {
        fn dimensions(&self) -> usize {
            DIMS
        }
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            let mut v: Vec<f32> = digest[..DIMS].iter().map(|b| *b as f32 / 255.0).collect();
            crate::embed::normalize(&mut v);
            Ok(v)
        }
    }

    struct NeverJudge;

    #[async_trait]
    impl Judge for NeverJudge {
        async fn judge(
            &self,
            _incoming: &NewEntry,
            _existing: &Entry,
        ) -> std::result::Result<JudgeVerdict, LlmError> {
            Ok(JudgeVerdict {
                relation: JudgedRelation::Unrelated,
                confidence: 0.0,
            })
        }
    }

    /// Extracts one entry per chunk, unique per chunk content
    struct CountingExtractor;

    #[async_trait]
    impl Extractor for CountingExtractor {
        async fn extract_chunk(
            &self,
            chunk_text: &str,
        ) -> std::result::Result<(Vec<NewEntry>, Vec<String>), ExtractError> {
            let mut hasher = Sha256::new();
            hasher.update(chunk_text.as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            Ok((
                vec![NewEntry::new(
                    EntryType::Fact,
                    format!("chunk {}", &digest[..8]),
                    format!("knowledge from {}", &digest[..8]),
                )],
                vec![],
            ))
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl Extractor for FailingExtractor {
        async fn extract_chunk(
            &self,
            _chunk_text: &str,
        ) -> std::result::Result<(Vec<NewEntry>, Vec<String>), ExtractError> {
            Err(ExtractError::Transient("503".to_string()))
        }
    }

    fn transcript_line(i: usize, pad: usize) -> String {
        format!(
            "{{\"role\": \"user\", \"content\": \"message {} {}\"}}\n",
            i,
            "x".repeat(pad)
        )
    }

    fn write_transcript(path: &Path, lines: usize, pad: usize) -> u64 {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for i in 0..lines {
            file.write_all(transcript_line(i, pad).as_bytes()).unwrap();
        }
        file.sync_all().unwrap();
        std::fs::metadata(path).unwrap().len()
    }

    fn watcher(dir: &TempDir, extractor: Arc<dyn Extractor>) -> Watcher {
        let store = Arc::new(Store::open(Some(dir.path().join("watch.db")), DIMS).unwrap());
        let options = WatchOptions {
            state_path: dir.path().join("watch-state.json"),
            once: true,
            ..Default::default()
        };
        Watcher::new(store, Arc::new(MockEmbedder), Arc::new(NeverJudge), extractor, options)
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_consumes_all_bytes_on_success() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("session.jsonl");
        let size = write_transcript(&transcript, 10, 500);
        assert!(size >= 5000);

        let mut w = watcher(&dir, Arc::new(CountingExtractor));
        let outcome = w.run_cycle(&transcript).await.unwrap();

        assert_eq!(outcome.bytes_read, size);
        assert_eq!(outcome.offset_after, size);
        assert!(outcome.entries_stored > 0);
        assert!(!outcome.skipped);

        // The offset is durable
        let state = WatchState::load(&dir.path().join("watch-state.json")).unwrap();
        assert_eq!(state.file(&transcript).unwrap().byte_offset, size);
    }

    #[tokio::test]
    async fn test_small_append_skips_without_advancing() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("session.jsonl");
        let size = write_transcript(&transcript, 10, 500);

        let mut w = watcher(&dir, Arc::new(CountingExtractor));
        w.run_cycle(&transcript).await.unwrap();

        // Append ~1KB, below the 2000-char threshold
        write_transcript(&transcript, 2, 400);
        let outcome = w.run_cycle(&transcript).await.unwrap();

        assert!(outcome.skipped);
        assert_eq!(outcome.offset_after, size);
        assert_eq!(outcome.bytes_read, 0);
    }

    #[tokio::test]
    async fn test_truncation_resets_offset() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("session.jsonl");
        write_transcript(&transcript, 10, 500);

        let mut w = watcher(&dir, Arc::new(CountingExtractor));
        w.run_cycle(&transcript).await.unwrap();

        // Rewrite the file smaller than the recorded offset
        std::fs::write(&transcript, transcript_line(0, 2500)).unwrap();
        let outcome = w.run_cycle(&transcript).await.unwrap();

        assert!(outcome.truncated);
        assert_eq!(outcome.offset_after, std::fs::metadata(&transcript).unwrap().len());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_offset() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("session.jsonl");
        write_transcript(&transcript, 10, 500);

        let mut w = watcher(&dir, Arc::new(FailingExtractor));
        let outcome = w.run_cycle(&transcript).await.unwrap();

        // Nothing consumed; everything retried next cycle
        assert_eq!(outcome.offset_after, 0);
        assert_eq!(outcome.entries_stored, 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_advances_or_stores() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("session.jsonl");
        write_transcript(&transcript, 10, 500);

        let store = Arc::new(Store::open(Some(dir.path().join("watch.db")), DIMS).unwrap());
        let options = WatchOptions {
            state_path: dir.path().join("watch-state.json"),
            once: true,
            dry_run: true,
            ..Default::default()
        };
        let mut w = Watcher::new(
            Arc::clone(&store),
            Arc::new(MockEmbedder),
            Arc::new(NeverJudge),
            Arc::new(CountingExtractor),
            options,
        )
        .unwrap();

        let outcome = w.run_cycle(&transcript).await.unwrap();
        assert_eq!(outcome.offset_after, 0);
        assert_eq!(outcome.entries_stored, 0);
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_offsets_monotone_across_cycles() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("session.jsonl");
        let mut w = watcher(&dir, Arc::new(CountingExtractor));

        let mut last_offset = 0;
        for _ in 0..3 {
            write_transcript(&transcript, 5, 500);
            let outcome = w.run_cycle(&transcript).await.unwrap();
            assert!(outcome.offset_after >= last_offset);
            last_offset = outcome.offset_after;
        }
    }

    #[test]
    fn test_newest_session_file_picks_latest() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.jsonl");
        let new = dir.path().join("new.jsonl");
        std::fs::write(&old, "x").unwrap();
        std::fs::write(&new, "y").unwrap();
        let earlier = std::time::SystemTime::now() - Duration::from_secs(3600);
        let file = std::fs::File::open(&old).unwrap();
        file.set_modified(earlier).unwrap();

        assert_eq!(newest_session_file(dir.path()), Some(new));
    }

    #[test]
    fn test_resolve_missing_file_errors() {
        let err = resolve_target(&WatchTarget::File(PathBuf::from("/nope/missing.jsonl")));
        assert!(matches!(err, Err(WatchError::NoTarget(_))));
    }
}
