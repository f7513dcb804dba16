//! # Agenr Core
//!
//! Long-lived, local-first knowledge memory for AI coding agents:
//!
//! - **Knowledge store**: SQLite with FTS5 and HNSW vector search; typed
//!   entries with supersession, retirement, and a durable conflict log
//! - **Write pipeline**: exact-duplicate detection, claim- and vector-based
//!   dedup, judge-routed auto-supersession, at-most-once ingest
//! - **Hybrid recall**: semantic + keyword ranking with tiered recency
//!   decay, spaced-recall strength, freshness boost, and a token-budgeted
//!   session-start composition
//! - **Watch pipeline**: incremental transcript ingestion with durable
//!   byte offsets, at-most-once extraction, and crash-safe state
//! - **Signals**: watermark-driven notices for newly important entries
//! - **Handoff**: fallback-first cross-session summaries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agenr_core::{Store, NewEntry, EntryType, RecallQuery};
//!
//! let store = Store::open(None, agenr_core::embed::DEFAULT_DIMENSIONS)?;
//!
//! let entry = NewEntry::new(EntryType::Fact, "Alex", "Prefers pnpm");
//! let report = store.store_entries(
//!     vec![entry], "manual", "hash", &Default::default(), &embedder, &judge,
//! ).await?;
//!
//! let results = agenr_core::recall::recall(
//!     &store, &embedder, &RecallQuery::semantic("package manager"), &Default::default(),
//! ).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `vector-search` (default): HNSW vector index via USearch
//! - `bundled-sqlite` (default): bundle SQLite with FTS5
//! - `local-embeddings`: fully local embeddings via fastembed

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod context;
pub mod embed;
pub mod extract;
pub mod handoff;
pub mod hooks;
pub mod llm;
pub mod memory;
pub mod recall;
pub mod search;
pub mod signal;
pub mod store;
pub mod transcript;
pub mod watch;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Memory types
pub use memory::{
    Entry, EntryType, Expiry, NewEntry, RecallContext, RecallQuery, RecallResult, ScoreBreakdown,
    Scope, SessionCategory, StoreReport,
};

// Store layer
pub use store::{
    content_hash, ingest_content_hash, ConflictResolution, ConflictRow, DedupPolicy, Judge,
    JudgeVerdict, JudgedRelation, LedgerRecord, LlmJudge, MatchType, Result, RetireOptions,
    RetireOutcome, RetireQuery, RetirementLedger, Store, StoreError, StoreOptions, StoreStats,
};

// Embeddings
pub use embed::{cosine_similarity, Embedder, EmbedError, RemoteEmbedder, DEFAULT_DIMENSIONS};

#[cfg(feature = "local-embeddings")]
pub use embed::LocalEmbedder;

// LLM glue
pub use llm::{
    ChatMessage, ChatRequest, ChatResponse, HttpModelClient, LlmError, ModelClient, ModelSet,
    ModelTask, ToolCall, ToolSpec,
};

// Extraction
pub use extract::{Chunk, ExtractError, ExtractionOutput, Extractor, LlmExtractor};

// Recall
pub use recall::{quality_feedback, RecallSettings};

// Watch pipeline
pub use watch::{
    CycleOutcome, FileState, WatchError, WatchOptions, WatchState, WatchSummary, WatchTarget,
    Watcher,
};

// Signals and handoff
pub use handoff::{Handoff, HANDOFF_MAX_CHARS, HANDOFF_MAX_MESSAGES};
pub use signal::{SignalConfig, Signals};

// Plugin host
pub use hooks::{PluginHost, PromptContext};

// Configuration
pub use config::{Config, ConfigError};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Embedder, Entry, EntryType, Expiry, Judge, NewEntry, RecallContext, RecallQuery,
        RecallResult, RecallSettings, Result, Scope, Store, StoreError, StoreOptions, StoreReport,
    };

    pub use crate::{Handoff, PluginHost, SignalConfig, Signals, Watcher, WatchOptions, WatchTarget};
}
