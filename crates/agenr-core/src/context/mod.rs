//! Context file writeouts
//!
//! Optional markdown snapshots of the store, refreshed best-effort after
//! productive watch cycles: `context.md` (full), `context-mini.md` (top 20),
//! and `context-hot.md` (recent and important only; written empty when
//! nothing qualifies). Refreshes for a given directory are serialized so
//! they never overlap, and failures never break the producer.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::memory::Entry;
use crate::store::Store;

/// Cap for the full context file
const CONTEXT_MAX_ENTRIES: usize = 200;

/// Cap for the mini context file
const MINI_MAX_ENTRIES: usize = 20;

/// Hot = created within this window and importance at or above the bar
const HOT_WINDOW_DAYS: i64 = 7;
const HOT_MIN_IMPORTANCE: i64 = 7;

pub struct ContextFiles {
    dir: PathBuf,
    /// One async mutex per output directory keeps refreshes serial
    locks: tokio::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl ContextFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fire-and-forget refresh; errors are logged, never surfaced
    pub fn schedule_refresh(self: &Arc<Self>, store: Arc<Store>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.refresh(store).await {
                tracing::warn!("context refresh failed: {e}");
            }
        });
    }

    /// Rewrite all three context files. Serialized per directory.
    pub async fn refresh(&self, store: Arc<Store>) -> std::io::Result<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(self.dir.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        let entries = store
            .browse_candidates(CONTEXT_MAX_ENTRIES)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        std::fs::create_dir_all(&self.dir)?;

        write_atomic(
            &self.dir.join("context.md"),
            &render(&entries, "Agenr Memory"),
        )?;
        write_atomic(
            &self.dir.join("context-mini.md"),
            &render(&entries[..entries.len().min(MINI_MAX_ENTRIES)], "Agenr Memory (mini)"),
        )?;

        let cutoff = Utc::now() - Duration::days(HOT_WINDOW_DAYS);
        let hot: Vec<Entry> = entries
            .iter()
            .filter(|e| e.importance >= HOT_MIN_IMPORTANCE && e.created_at >= cutoff)
            .cloned()
            .collect();
        let hot_body = if hot.is_empty() {
            String::new()
        } else {
            render(&hot, "Agenr Memory (hot)")
        };
        write_atomic(&self.dir.join("context-hot.md"), &hot_body)?;

        Ok(())
    }
}

fn render(entries: &[Entry], title: &str) -> String {
    let mut out = format!("# {title}\n\n");
    let mut current_type: Option<&str> = None;
    for entry in entries {
        let type_name = entry.entry_type.as_str();
        if current_type != Some(type_name) {
            out.push_str(&format!("## {type_name}\n\n"));
            current_type = Some(type_name);
        }
        out.push_str(&format!(
            "- [imp:{}] **{}**: {}\n",
            entry.importance,
            entry.subject,
            single_line(&entry.content)
        ));
    }
    out
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn write_atomic(path: &Path, body: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("md.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

// ============================================================================
// TESTS
// ============================================================================
