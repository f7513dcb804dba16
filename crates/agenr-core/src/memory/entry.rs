//! Knowledge Entry - The atomic unit of memory
//!
//! Each entry is a typed piece of distilled knowledge with:
//! - Content, subject, and optional normalized claim identity
//! - Importance / expiry / scope classification
//! - Lifecycle counters mutated only by the write pipeline and recall
//! - Supersession and retirement state (rows are never destroyed)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// Types of knowledge entries
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// A discrete fact
    #[default]
    Fact,
    /// A decision that was made, with its rationale
    Decision,
    /// A user or project preference
    Preference,
    /// Something that happened (session events, handoffs)
    Event,
    /// An open task
    Todo,
    /// A derived insight or observation
    Insight,
}

impl EntryType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Fact => "fact",
            EntryType::Decision => "decision",
            EntryType::Preference => "preference",
            EntryType::Event => "event",
            EntryType::Todo => "todo",
            EntryType::Insight => "insight",
        }
    }

    /// Parse from string name, defaulting to `Fact`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fact" => EntryType::Fact,
            "decision" => EntryType::Decision,
            "preference" => EntryType::Preference,
            "event" => EntryType::Event,
            "todo" => EntryType::Todo,
            "insight" => EntryType::Insight,
            _ => EntryType::Fact,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// EXPIRY TIER
// ============================================================================

/// Expiry tier, driving the recency half-life during recall scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    /// Never decays; always surfaced first at session start
    Core,
    /// Long-lived knowledge (365-day half-life)
    #[default]
    Permanent,
    /// Short-lived knowledge (30-day half-life)
    Temporary,
}

impl Expiry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Expiry::Core => "core",
            Expiry::Permanent => "permanent",
            Expiry::Temporary => "temporary",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "core" => Expiry::Core,
            "temporary" => Expiry::Temporary,
            _ => Expiry::Permanent,
        }
    }

    /// Recency half-life in days; `None` means no decay (core tier)
    pub fn half_life_days(&self) -> Option<f64> {
        match self {
            Expiry::Core => None,
            Expiry::Permanent => Some(365.0),
            Expiry::Temporary => Some(30.0),
        }
    }
}

impl std::fmt::Display for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Visibility scope. The read filter is hierarchical: a request at some
/// scope also sees everything more public than it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible only to requests made at private scope
    Private,
    #[default]
    Personal,
    Public,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Private => "private",
            Scope::Personal => "personal",
            Scope::Public => "public",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "private" => Scope::Private,
            "public" => Scope::Public,
            _ => Scope::Personal,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Scope::Private => 0,
            Scope::Personal => 1,
            Scope::Public => 2,
        }
    }

    /// Whether an entry at `entry_scope` is visible to a request at `self`.
    /// `personal` sees `personal|public`; `private` sees all three.
    pub fn can_see(&self, entry_scope: Scope) -> bool {
        entry_scope.rank() >= self.rank()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ENTRY
// ============================================================================

/// A stored knowledge entry.
///
/// Immutable after insert except for the lifecycle counters, bounded
/// importance promotion, supersession, retirement, and the recall
/// timestamps. The write pipeline is the only mutation path.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique identifier (UUID v4), generated at insert
    pub id: String,
    pub entry_type: EntryType,
    /// Short human-readable label
    pub subject: String,
    /// Optional normalized `entity/attribute` identity for claim dedup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_attribute: Option<String>,
    /// Full natural-language body
    pub content: String,
    /// 1..10, clamped on write; never decreases
    pub importance: i64,
    pub expiry: Expiry,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Lowercased, unordered
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<String>,
    /// SHA-256 hex of the canonical text, for exact-duplicate detection
    pub content_hash: String,

    // ========== Lifecycle counters ==========
    pub recall_count: i64,
    pub confirmations: i64,
    pub contradictions: i64,
    /// 0..1, default 0.5, updated by the quality-feedback pass
    pub quality_score: f64,
    /// Epoch-second timestamps of recalls, append-only
    pub recall_intervals: Vec<i64>,

    // ========== Supersession / retirement ==========
    /// Id of the replacing entry; the superseded row is kept for audit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub retired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_reason: Option<String>,
    /// Contexts this entry is suppressed in (subset of {"session-start"})
    pub suppressed_contexts: Vec<String>,

    // ========== Timestamps ==========
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recalled_at: Option<DateTime<Utc>>,

    /// Whether an embedding row exists for this entry
    pub has_embedding: bool,
}

impl Entry {
    /// Active = neither retired nor superseded; only active entries are
    /// eligible for recall, dedup candidacy, and signals.
    pub fn is_active(&self) -> bool {
        !self.retired && self.superseded_by.is_none()
    }

    /// Whether this entry is suppressed in the given recall context label.
    pub fn suppressed_in(&self, context: &str) -> bool {
        self.suppressed_contexts.iter().any(|c| c == context)
    }

    /// Age in fractional days relative to `anchor`.
    pub fn days_old_at(&self, anchor: DateTime<Utc>) -> f64 {
        (anchor - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// A fresh entry headed into the write pipeline (no id yet).
///
/// Uses `deny_unknown_fields` so malformed extractor output fails loudly at
/// the store boundary instead of silently dropping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewEntry {
    pub entry_type: EntryType,
    pub subject: String,
    pub content: String,
    /// Clamped to 1..10 on write
    #[serde(default = "default_importance")]
    pub importance: i64,
    #[serde(default)]
    pub expiry: Expiry,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<String>,
    /// Precomputed embedding; the pipeline embeds anything missing one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

fn default_importance() -> i64 {
    5
}

impl NewEntry {
    /// Minimal constructor used by tests and the handoff fallback path.
    pub fn new(entry_type: EntryType, subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            entry_type,
            subject: subject.into(),
            content: content.into(),
            importance: 5,
            expiry: Expiry::default(),
            scope: Scope::default(),
            canonical_key: None,
            subject_entity: None,
            subject_attribute: None,
            platform: None,
            project: None,
            tags: vec![],
            source_context: None,
            embedding: None,
        }
    }

    /// Canonical text hashed for exact-duplicate detection. Identity fields
    /// are trimmed and lowercased; the body keeps its original casing.
    pub fn canonical_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.entry_type.as_str(),
            self.subject.trim().to_lowercase(),
            self.canonical_key.as_deref().unwrap_or("").trim().to_lowercase(),
            self.content.trim(),
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
