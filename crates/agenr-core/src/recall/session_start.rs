//! Session-start composition
//!
//! Partitions non-core candidates into active / preferences / recent,
//! splits a token budget between the partitions with clamped fractions,
//! consumes each partition in score order, and spills unused budget through
//! one pooled overflow pass. Core entries bypass the budget entirely.

use crate::memory::{EntryType, RecallResult, SessionCategory};

/// Default session-start token budget
pub const DEFAULT_SESSION_BUDGET: usize = 2000;

/// Words-to-tokens fudge factor
const TOKENS_PER_WORD: f64 = 1.3;

/// Fraction clamps per partition
const ACTIVE_MIN: f64 = 0.10;
const ACTIVE_MAX: f64 = 0.30;
const PREFS_MIN: f64 = 0.20;
const PREFS_MAX: f64 = 0.40;
const RECENT_FLOOR: f64 = 0.20;

/// Token estimate for one entry: `ceil(word_count * 1.3)` over the fields
/// that end up in the rendered context block.
pub fn token_estimate(result: &RecallResult) -> usize {
    let entry = &result.entry;
    let mut words = 0usize;
    words += entry.entry_type.as_str().split_whitespace().count();
    words += entry.subject.split_whitespace().count();
    words += entry.content.split_whitespace().count();
    words += 1; // importance renders as one token-ish number
    words += entry.expiry.as_str().split_whitespace().count();
    words += entry.tags.iter().map(|t| t.split_whitespace().count()).sum::<usize>();
    (words as f64 * TOKENS_PER_WORD).ceil() as usize
}

/// Category for a non-core candidate
pub fn categorize(entry_type: EntryType) -> SessionCategory {
    match entry_type {
        EntryType::Todo => SessionCategory::Active,
        EntryType::Preference | EntryType::Decision => SessionCategory::Preferences,
        _ => SessionCategory::Recent,
    }
}

/// Budget fractions after clamping and the recent floor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetSplit {
    pub active: f64,
    pub preferences: f64,
    pub recent: f64,
}

/// Compute the budget split for the observed partition sizes.
///
/// `recent` is floored at 0.20 by stealing from `preferences`.
pub fn budget_split(active_count: usize, prefs_count: usize, recent_count: usize) -> BudgetSplit {
    let total = (active_count + prefs_count + recent_count).max(1) as f64;

    let mut active = (active_count as f64 / total).clamp(ACTIVE_MIN, ACTIVE_MAX);
    let mut prefs = (prefs_count as f64 / total).clamp(PREFS_MIN, PREFS_MAX);
    let mut recent = 1.0 - active - prefs;

    if recent < RECENT_FLOOR {
        prefs -= RECENT_FLOOR - recent;
        recent = RECENT_FLOOR;
    }

    debug_assert!((active + prefs + recent - 1.0).abs() < 1e-9);
    BudgetSplit {
        active,
        preferences: prefs,
        recent,
    }
}

/// Consume the partitions against the budget.
///
/// Candidates in each partition must already be sorted by score descending.
/// Each partition admits entries that fit its share exactly; anything that
/// does not fit spills into one pooled overflow pass over the combined
/// leftover budget, in global score order. Only the pooled pass may
/// overshoot, by at most one entry's estimate, so the total stays within
/// budget plus one admitted entry.
pub fn compose(
    mut active: Vec<RecallResult>,
    mut preferences: Vec<RecallResult>,
    mut recent: Vec<RecallResult>,
    budget_tokens: usize,
) -> Vec<RecallResult> {
    let split = budget_split(active.len(), preferences.len(), recent.len());
    let budget = budget_tokens as f64;

    for (results, category) in [
        (&mut active, SessionCategory::Active),
        (&mut preferences, SessionCategory::Preferences),
        (&mut recent, SessionCategory::Recent),
    ] {
        for result in results.iter_mut() {
            result.category = Some(category);
        }
    }

    let mut selected = Vec::new();
    let mut leftovers: Vec<RecallResult> = Vec::new();
    let mut pooled_remainder = 0.0;

    for (partition, fraction) in [
        (active, split.active),
        (preferences, split.preferences),
        (recent, split.recent),
    ] {
        let mut remaining = budget * fraction;
        for result in partition {
            let cost = token_estimate(&result) as f64;
            if cost <= remaining {
                remaining -= cost;
                selected.push(result);
            } else {
                leftovers.push(result);
            }
        }
        pooled_remainder += remaining;
    }

    // Single pooled overflow pass in score order
    leftovers.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for result in leftovers {
        if pooled_remainder <= 0.0 {
            break;
        }
        pooled_remainder -= token_estimate(&result) as f64;
        selected.push(result);
    }

    selected
}

// ============================================================================
// TESTS
// ============================================================================
