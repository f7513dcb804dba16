//! Search primitives
//!
//! - HNSW vector index (USearch) keyed by entry id
//! - FTS5 query sanitizer for the keyword bonus pass

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
mod vector;

#[cfg(feature = "vector-search")]
pub use vector::{VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};

/// Sanitize free text into a safe FTS5 MATCH expression.
///
/// Bare user input is full of FTS5 operators (`"`, `-`, `*`, `NEAR`); each
/// whitespace token is quoted and the tokens are OR-joined so any hit
/// qualifies for the keyword bonus. Returns `None` when nothing searchable
/// remains.
pub fn sanitize_fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .filter(|t| t.len() > 2)
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}
