//! Memory types: entries, queries, reports

mod entry;

pub use entry::{Entry, EntryType, Expiry, NewEntry, Scope};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// STORE REPORT
// ============================================================================

/// Outcome of one `store_entries` run. Also recorded in the ingest log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub superseded: usize,
    pub llm_dedup_calls: usize,
    pub relations_created: usize,
    pub total_entries: usize,
    pub duration_ms: u64,
    /// Ids whose `confirmations` counter was bumped by exact-duplicate hits
    pub confirmations_incremented_for: Vec<String>,
    /// True when the (source_file, content_hash) pair was already ingested
    /// and the run was a no-op
    pub duplicate_ingest: bool,
}

// ============================================================================
// RECALL QUERY
// ============================================================================

/// Recall context, selecting the candidate-acquisition mode and the
/// suppression label checked against `suppressed_contexts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecallContext {
    #[default]
    Default,
    SessionStart,
    Browse,
}

impl RecallContext {
    /// Label stored in `suppressed_contexts`
    pub fn as_str(&self) -> &'static str {
        match self {
            RecallContext::Default => "default",
            RecallContext::SessionStart => "session-start",
            RecallContext::Browse => "browse",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "session-start" => RecallContext::SessionStart,
            "browse" => RecallContext::Browse,
            _ => RecallContext::Default,
        }
    }
}

/// Recall query. Every field optional unless noted; defaults match the
/// documented recall parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecallQuery {
    /// Query text; absent for session-start and browse modes
    pub text: Option<String>,
    pub context: RecallContext,
    /// Restrict to these entry types (empty = all)
    pub types: Vec<EntryType>,
    pub expiry: Option<Expiry>,
    pub min_importance: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    /// Upper date bound; when present, recency decay anchors here
    pub until: Option<DateTime<Utc>>,
    /// Entries must carry all of these tags
    pub tags: Vec<String>,
    pub scope: Option<Scope>,
    pub platform: Option<String>,
    pub project: Option<String>,
    /// When true, entries with no project tag are excluded too
    pub project_strict: bool,
    pub exclude_project: Option<String>,
    pub limit: Option<usize>,
    /// Disable the freshness boost
    pub no_boost: bool,
    /// Skip the recall-metadata side effects
    pub no_update: bool,
    /// Browse mode: rank purely by importance x recency, ignore text
    pub browse: bool,
}

impl RecallQuery {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn semantic(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).max(1)
    }
}

// ============================================================================
// RECALL RESULT
// ============================================================================

/// Per-factor breakdown of a recall score, surfaced for debugging and the
/// `--json` CLI output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub vector: f64,
    pub recency: f64,
    pub importance: f64,
    pub recall: f64,
    pub freshness: f64,
    pub todo_penalty: f64,
    pub fts: f64,
    pub spacing: f64,
    pub quality: f64,
}

/// Session-start budget category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCategory {
    Core,
    Active,
    Preferences,
    Recent,
}

/// One ranked recall hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    pub entry: Entry,
    /// Final score in [0, 1]
    pub score: f64,
    pub scores: ScoreBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<SessionCategory>,
}
