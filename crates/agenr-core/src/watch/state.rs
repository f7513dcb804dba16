//! Watch state
//!
//! `watch-state.json` records, per watched file, the cumulative byte offset
//! plus run bookkeeping. Offsets are strictly non-decreasing within a file
//! identity; the file is rewritten atomically after every cycle so a crash
//! never loses a committed offset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Result, WatchError};

pub const STATE_FILE_NAME: &str = "watch-state.json";
pub const STATE_VERSION: u32 = 1;

/// Per-file watch bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub byte_offset: u64,
    pub total_entries_stored: u64,
    pub total_run_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

/// The on-disk watch state document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchState {
    pub version: u32,
    /// Keyed by absolute file path
    pub files: BTreeMap<String, FileState>,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            files: BTreeMap::new(),
        }
    }
}

impl WatchState {
    /// Default state path under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("ai", "agenr", "agenr")
            .map(|dirs| dirs.config_dir().join(STATE_FILE_NAME))
    }

    /// Load state; a missing file is a fresh state
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| WatchError::State(format!("{}: {e}", path.display())))
    }

    /// Atomic rewrite (`write(tmp) -> fsync -> rename`)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            let body = serde_json::to_string_pretty(self)
                .map_err(|e| WatchError::State(e.to_string()))?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn file(&self, path: &Path) -> Option<&FileState> {
        self.files.get(&path.display().to_string())
    }

    pub fn file_mut(&mut self, path: &Path) -> &mut FileState {
        self.files.entry(path.display().to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_fresh_state() {
        let dir = TempDir::new().unwrap();
        let state = WatchState::load(&dir.path().join(STATE_FILE_NAME)).unwrap();
        assert!(state.files.is_empty());
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);

        let mut state = WatchState::default();
        let file = state.file_mut(Path::new("/tmp/session.jsonl"));
        file.byte_offset = 5120;
        file.total_run_count = 2;
        file.last_run_at = Some(Utc::now());
        state.save(&path).unwrap();

        let restored = WatchState::load(&path).unwrap();
        let file = restored.file(Path::new("/tmp/session.jsonl")).unwrap();
        assert_eq!(file.byte_offset, 5120);
        assert_eq!(file.total_run_count, 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        std::fs::write(&path, "{{{{").unwrap();
        assert!(matches!(
            WatchState::load(&path),
            Err(WatchError::State(_))
        ));
    }
}
