//! Watch-pipeline scenarios: resume offsets, the min-chunk skip, monotone
//! offsets, and durable state across watcher restarts.

use agenr_e2e_tests::mocks::{DownExtractor, HashExtractor, MockEmbedder, ScriptedJudge, DIMS};

use agenr_core::{Store, WatchOptions, Watcher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Write JSONL transcript lines so the file lands at exactly `total_bytes`
fn write_exact_transcript(path: &Path, total_bytes: u64) {
    const LINE_OVERHEAD: usize = r#"{"role": "user", "content": ""}"#.len() + 1;
    // Fixed-size filler lines, exact-size closer
    const STANDARD_LINE: usize = 600;

    let existing = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let mut remaining = (total_bytes - existing) as usize;
    assert!(remaining > LINE_OVERHEAD, "append too small to encode a line");

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();

    let mut line_for = |body_len: usize| {
        format!(
            "{{\"role\": \"user\", \"content\": \"{}\"}}\n",
            "x".repeat(body_len)
        )
    };

    // Keep enough slack that the final line can always close exactly
    while remaining > STANDARD_LINE + LINE_OVERHEAD {
        let line = line_for(STANDARD_LINE - LINE_OVERHEAD);
        remaining -= line.len();
        file.write_all(line.as_bytes()).unwrap();
    }
    let line = line_for(remaining - LINE_OVERHEAD);
    file.write_all(line.as_bytes()).unwrap();

    file.sync_all().unwrap();
    assert_eq!(std::fs::metadata(path).unwrap().len(), total_bytes);
}

fn watcher_for(dir: &TempDir, state_name: &str) -> (Watcher, Arc<Store>) {
    let store = Arc::new(Store::open(Some(dir.path().join("watch.db")), DIMS).unwrap());
    let options = WatchOptions {
        state_path: dir.path().join(state_name),
        once: true,
        ..Default::default()
    };
    let watcher = Watcher::new(
        Arc::clone(&store),
        Arc::new(MockEmbedder::new()),
        Arc::new(ScriptedJudge::unrelated()),
        Arc::new(HashExtractor),
        options,
    )
    .unwrap();
    (watcher, store)
}

fn transcript_path(dir: &TempDir) -> PathBuf {
    dir.path().join("session.jsonl")
}

/// Seed scenario 5: 5 KB written, one cycle consumes all 5120 bytes and
/// records offset 5120; a 1 KB append stays below min_chunk and the offset
/// does not move.
#[tokio::test]
async fn watch_resume_seed_scenario() {
    let dir = TempDir::new().unwrap();
    let transcript = transcript_path(&dir);
    write_exact_transcript(&transcript, 5120);

    let (mut watcher, store) = watcher_for(&dir, "watch-state.json");

    let first = watcher.run_cycle(&transcript).await.unwrap();
    assert_eq!(first.bytes_read, 5120);
    assert_eq!(first.offset_after, 5120);
    assert!(first.entries_stored > 0);
    assert!(store.stats().unwrap().total > 0);

    // Append 1 KB: below min_chunk (2000), the cycle skips
    write_exact_transcript(&transcript, 5120 + 1024);
    let second = watcher.run_cycle(&transcript).await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.bytes_read, 0);
    assert_eq!(second.offset_after, 5120);
}

/// Offsets never decrease across cycles, and each productive cycle
/// advances at least past the threshold that admitted it.
#[tokio::test]
async fn offsets_are_monotone() {
    let dir = TempDir::new().unwrap();
    let transcript = transcript_path(&dir);
    let (mut watcher, _store) = watcher_for(&dir, "watch-state.json");

    let mut last = 0u64;
    let mut size = 0u64;
    for _ in 0..4 {
        size += 3000;
        write_exact_transcript(&transcript, size);
        let outcome = watcher.run_cycle(&transcript).await.unwrap();
        assert!(outcome.offset_after >= last, "offset regressed");
        if !outcome.skipped {
            assert!(outcome.offset_after > last);
        }
        last = outcome.offset_after;
    }
}

/// A fresh watcher process resumes from the durable offset rather than
/// re-ingesting from zero.
#[tokio::test]
async fn restart_resumes_from_durable_offset() {
    let dir = TempDir::new().unwrap();
    let transcript = transcript_path(&dir);
    write_exact_transcript(&transcript, 4096);

    {
        let (mut watcher, _store) = watcher_for(&dir, "watch-state.json");
        let outcome = watcher.run_cycle(&transcript).await.unwrap();
        assert_eq!(outcome.offset_after, 4096);
    }

    // New watcher over the same state file
    let (mut watcher, _store) = watcher_for(&dir, "watch-state.json");
    let outcome = watcher.run_cycle(&transcript).await.unwrap();
    assert!(outcome.skipped, "nothing new should be read after restart");
    assert_eq!(outcome.offset_before, 4096);
    assert_eq!(outcome.offset_after, 4096);
}

/// A transient extractor outage consumes nothing; the same bytes are
/// re-presented the next cycle, and the store stays clean.
#[tokio::test]
async fn transient_outage_leaves_carry_over() {
    let dir = TempDir::new().unwrap();
    let transcript = transcript_path(&dir);
    write_exact_transcript(&transcript, 4096);

    let store = Arc::new(Store::open(Some(dir.path().join("watch.db")), DIMS).unwrap());
    let options = WatchOptions {
        state_path: dir.path().join("watch-state.json"),
        once: true,
        ..Default::default()
    };
    let mut down = Watcher::new(
        Arc::clone(&store),
        Arc::new(MockEmbedder::new()),
        Arc::new(ScriptedJudge::unrelated()),
        Arc::new(DownExtractor),
        options.clone(),
    )
    .unwrap();

    let outcome = down.run_cycle(&transcript).await.unwrap();
    assert_eq!(outcome.offset_after, 0);
    assert_eq!(store.stats().unwrap().total, 0);

    // Recovery: a healthy extractor over the same state picks everything up
    let mut healthy = Watcher::new(
        Arc::clone(&store),
        Arc::new(MockEmbedder::new()),
        Arc::new(ScriptedJudge::unrelated()),
        Arc::new(HashExtractor),
        options,
    )
    .unwrap();
    let outcome = healthy.run_cycle(&transcript).await.unwrap();
    assert_eq!(outcome.offset_after, 4096);
    assert!(store.stats().unwrap().total > 0);
}

/// Re-running a cycle over identical bytes after a manual offset rollback
/// does not duplicate entries: the ingest log absorbs the replay.
#[tokio::test]
async fn replayed_bytes_do_not_duplicate_entries() {
    let dir = TempDir::new().unwrap();
    let transcript = transcript_path(&dir);
    write_exact_transcript(&transcript, 4096);

    let (mut watcher, store) = watcher_for(&dir, "watch-state.json");
    watcher.run_cycle(&transcript).await.unwrap();
    let total_after_first = store.stats().unwrap().total;

    // Simulate a lost state file (offset back to zero)
    std::fs::remove_file(dir.path().join("watch-state.json")).unwrap();
    let (mut rewound, _) = watcher_for(&dir, "watch-state.json");
    rewound.run_cycle(&transcript).await.unwrap();

    assert_eq!(store.stats().unwrap().total, total_after_first);
}
