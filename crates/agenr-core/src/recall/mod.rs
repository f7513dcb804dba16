//! Recall engine
//!
//! Three candidate-acquisition modes (semantic, session-start, browse), a
//! shared post-fetch filter pass, the hybrid scoring formula, and the
//! recall-time side effects. Reads are concurrent with writes; retired and
//! superseded rows are filtered at query time so readers always see a
//! consistent view.

pub mod feedback;
pub mod scoring;
pub mod session_start;

pub use feedback::quality_feedback;
pub use session_start::DEFAULT_SESSION_BUDGET;

use chrono::Utc;

use crate::embed::Embedder;
use crate::memory::{
    Entry, RecallContext, RecallQuery, RecallResult, Scope, SessionCategory,
};
use crate::store::{Result, Store, StoreError};

/// Vector candidates fetched for a semantic query
pub const SEMANTIC_TOP_K: usize = 50;

/// Fetch multiplier when the query carries date bounds (filters thin the
/// candidate set before ranking)
pub const DATE_BOUND_MULTIPLIER: usize = 3;

/// Browse over-fetch factor and floor
pub const BROWSE_OVERFETCH: usize = 3;
pub const BROWSE_MIN_FETCH: usize = 50;

/// Session-start candidate fetch cap
const SESSION_START_FETCH: usize = 500;

/// Engine settings that live outside the per-call query
#[derive(Debug, Clone)]
pub struct RecallSettings {
    /// Token budget for session-start composition
    pub session_start_budget: usize,
}

impl Default for RecallSettings {
    fn default() -> Self {
        Self {
            session_start_budget: DEFAULT_SESSION_BUDGET,
        }
    }
}

/// Run a recall query.
///
/// Returns ranked results with per-factor score breakdowns. Unless
/// `no_update` is set, the returned ids get their recall metadata bumped in
/// one transaction afterwards.
pub async fn recall(
    store: &Store,
    embedder: &dyn Embedder,
    query: &RecallQuery,
    settings: &RecallSettings,
) -> Result<Vec<RecallResult>> {
    if let (Some(since), Some(until)) = (query.since, query.until) {
        if since > until {
            return Err(StoreError::Validation(format!(
                "since ({since}) is after until ({until})"
            )));
        }
    }

    let results = if query.browse || query.context == RecallContext::Browse {
        browse_mode(store, query)?
    } else if query.context == RecallContext::SessionStart && query.text.is_none() {
        session_start_mode(store, query, settings)?
    } else {
        match query.text.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                semantic_mode(store, embedder, query, text).await?
            }
            _ => {
                return Err(StoreError::Validation(
                    "query text is required outside session-start and browse".to_string(),
                ));
            }
        }
    };

    if !query.no_update {
        let ids: Vec<String> = results.iter().map(|r| r.entry.id.clone()).collect();
        store.record_recalls(&ids, Utc::now())?;
    }

    Ok(results)
}

// ============================================================================
// FILTER PASS
// ============================================================================

/// Shared post-fetch filter applied by every mode. Skips anything retired,
/// superseded, suppressed in the active context, or outside the query's
/// type/scope/tag/date/project/platform bounds.
fn passes_filters(entry: &Entry, query: &RecallQuery) -> bool {
    if !entry.is_active() {
        return false;
    }
    if entry.suppressed_in(query.context.as_str()) {
        return false;
    }
    if !query.types.is_empty() && !query.types.contains(&entry.entry_type) {
        return false;
    }
    if let Some(expiry) = query.expiry {
        if entry.expiry != expiry {
            return false;
        }
    }
    if let Some(min) = query.min_importance {
        if entry.importance < min {
            return false;
        }
    }
    if let Some(since) = query.since {
        if entry.created_at < since {
            return false;
        }
    }
    if let Some(until) = query.until {
        if entry.created_at > until {
            return false;
        }
    }
    if !query.tags.is_empty() {
        for tag in &query.tags {
            let tag = tag.to_lowercase();
            if !entry.tags.iter().any(|t| *t == tag) {
                return false;
            }
        }
    }

    let request_scope = query.scope.unwrap_or(Scope::Personal);
    if !request_scope.can_see(entry.scope) {
        return false;
    }

    if let Some(platform) = &query.platform {
        match &entry.platform {
            Some(p) if p == platform => {}
            None => {} // untagged entries pass platform filters
            Some(_) => return false,
        }
    }
    if let Some(project) = &query.project {
        match &entry.project {
            Some(p) if p == project => {}
            None if !query.project_strict => {}
            _ => return false,
        }
    }
    if let Some(excluded) = &query.exclude_project {
        if entry.project.as_deref() == Some(excluded.as_str()) {
            return false;
        }
    }

    true
}

// ============================================================================
// SEMANTIC MODE
// ============================================================================

async fn semantic_mode(
    store: &Store,
    embedder: &dyn Embedder,
    query: &RecallQuery,
    text: &str,
) -> Result<Vec<RecallResult>> {
    let embedding = match store.cached_query_embedding(text) {
        Some(v) => v,
        None => {
            let v = embedder.embed(text).await?;
            crate::embed::check_dimensions(&v, store.dimensions())?;
            store.cache_query_embedding(text, v.clone());
            v
        }
    };

    let k = if query.since.is_some() || query.until.is_some() {
        SEMANTIC_TOP_K * DATE_BOUND_MULTIPLIER
    } else {
        SEMANTIC_TOP_K
    };

    let hits = store.vector_search(&embedding, k)?;
    let fts_ids = store.fts_match_ids(text, k)?;

    let real_now = Utc::now();
    let anchor = query.until.unwrap_or(real_now);

    let mut results = Vec::new();
    for (id, sim) in hits {
        let Some(entry) = store.get_entry(&id)? else {
            continue;
        };
        if !passes_filters(&entry, query) {
            continue;
        }
        let fts_hit = fts_ids.contains(&entry.id);
        let (score, scores) = scoring::semantic_score(
            &entry,
            sim as f64,
            fts_hit,
            anchor,
            real_now,
            query.no_boost,
        );
        results.push(RecallResult {
            entry,
            score,
            scores,
            category: None,
        });
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(query.effective_limit());
    Ok(results)
}

// ============================================================================
// SESSION-START MODE
// ============================================================================

fn session_start_mode(
    store: &Store,
    query: &RecallQuery,
    settings: &RecallSettings,
) -> Result<Vec<RecallResult>> {
    let now = Utc::now();

    // Core entries bypass the budget and are emitted first
    let mut output: Vec<RecallResult> = Vec::new();
    for entry in store.core_entries()? {
        if !passes_filters(&entry, query) {
            continue;
        }
        let (score, scores) = scoring::session_start_score(&entry, now, query.no_boost);
        output.push(RecallResult {
            entry,
            score,
            scores,
            category: Some(SessionCategory::Core),
        });
    }

    // Non-core candidates fetched purely by recency, then partitioned
    let mut active = Vec::new();
    let mut preferences = Vec::new();
    let mut recent = Vec::new();

    for entry in store.recent_active_entries(SESSION_START_FETCH)? {
        if entry.expiry == crate::memory::Expiry::Core {
            continue;
        }
        if !passes_filters(&entry, query) {
            continue;
        }
        let (score, scores) = scoring::session_start_score(&entry, now, query.no_boost);
        let result = RecallResult {
            category: Some(session_start::categorize(entry.entry_type)),
            entry,
            score,
            scores,
        };
        match result.category {
            Some(SessionCategory::Active) => active.push(result),
            Some(SessionCategory::Preferences) => preferences.push(result),
            _ => recent.push(result),
        }
    }

    let by_score = |a: &RecallResult, b: &RecallResult| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
    };
    active.sort_by(by_score);
    preferences.sort_by(by_score);
    // Ties in the recent category break by updated_at descending
    recent.sort_by(|a, b| {
        by_score(a, b).then_with(|| b.entry.updated_at.cmp(&a.entry.updated_at))
    });

    let composed = session_start::compose(
        active,
        preferences,
        recent,
        settings.session_start_budget,
    );
    output.extend(composed);

    if let Some(limit) = query.limit {
        output.truncate(limit.max(1));
    }
    Ok(output)
}

// ============================================================================
// BROWSE MODE
// ============================================================================

fn browse_mode(store: &Store, query: &RecallQuery) -> Result<Vec<RecallResult>> {
    let limit = query.effective_limit();
    let fetch = (limit * BROWSE_OVERFETCH).max(BROWSE_MIN_FETCH);
    let now = Utc::now();

    let mut results = Vec::new();
    for entry in store.browse_candidates(fetch)? {
        if !passes_filters(&entry, query) {
            continue;
        }
        let (score, scores) = scoring::browse_score(&entry, now);
        results.push(RecallResult {
            entry,
            score,
            scores,
            category: None,
        });
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    Ok(results)
}

// ============================================================================
// TESTS
// ============================================================================
