//! Retirement ledger
//!
//! A durable JSON file beside the database recording subject-pattern
//! retirements. Replayed at every open so retirements survive DB rebuilds.
//! Records only ever set `retired = 1`, which makes replay idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Result, StoreError};

/// Ledger file name, placed in the database directory
pub const LEDGER_FILE_NAME: &str = "retirements.json";

pub const LEDGER_VERSION: u32 = 1;

/// Pattern match mode for subject retirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Contains,
}

impl MatchType {
    pub fn matches(&self, pattern: &str, subject: &str) -> bool {
        let pattern = pattern.to_lowercase();
        let subject = subject.to_lowercase();
        match self {
            MatchType::Exact => subject == pattern,
            MatchType::Contains => subject.contains(&pattern),
        }
    }
}

/// One retirement record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub subject_pattern: String,
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub suppressed_contexts: Vec<String>,
}

/// The on-disk ledger document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetirementLedger {
    pub version: u32,
    pub retirements: Vec<LedgerRecord>,
}

impl Default for RetirementLedger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            retirements: vec![],
        }
    }
}

impl RetirementLedger {
    /// Ledger path for a database directory
    pub fn path_for(db_dir: &Path) -> PathBuf {
        db_dir.join(LEDGER_FILE_NAME)
    }

    /// Load the ledger; a missing file is an empty ledger
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let ledger: RetirementLedger = serde_json::from_str(&raw)
            .map_err(|e| StoreError::LedgerCorrupt(format!("{}: {e}", path.display())))?;
        Ok(ledger)
    }

    /// Append a record and write the ledger back atomically
    /// (`write(tmp) -> fsync -> rename`).
    pub fn append(path: &Path, record: LedgerRecord) -> Result<()> {
        let mut ledger = Self::load(path)?;
        ledger.retirements.push(record);
        ledger.save(path)
    }

    /// Atomic rewrite for crash safety
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            let body = serde_json::to_string_pretty(self)
                .map_err(|e| StoreError::LedgerCorrupt(e.to_string()))?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
