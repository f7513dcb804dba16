//! Recall scoring
//!
//! Pure functions implementing the hybrid score: shifted power-law recency
//! with per-tier half-lives, importance normalization, spaced-recall
//! strength, freshness boost, todo staleness, contradiction penalty,
//! quality multiplier, and the FTS bonus. Everything here is deterministic
//! given the anchor timestamps, which keeps the formula unit-testable.

use chrono::{DateTime, Utc};

use crate::memory::{Entry, EntryType, Expiry, ScoreBreakdown};

/// Exponent flattening raw cosine similarity
const SIM_EXPONENT: f64 = 0.7;

/// Additive bonus for an FTS keyword hit
pub const FTS_BONUS: f64 = 0.15;

/// Floor for the todo staleness penalty
const TODO_PENALTY_FLOOR: f64 = 0.3;

/// Todo staleness half-life in days
const TODO_HALF_LIFE_DAYS: f64 = 7.0;

/// Contradiction penalty once an entry has accumulated 2+ contradictions
const CONTRADICTION_PENALTY: f64 = 0.8;

/// Freshness boost window and ceiling
const FRESHNESS_WINDOW_DAYS: f64 = 14.0;
const FRESHNESS_MAX: f64 = 1.5;
const FRESHNESS_HALF_LIFE_DAYS: f64 = 7.0;
const FRESHNESS_MIN_IMPORTANCE: i64 = 7;

/// Shifted power decay with tier half-life.
///
/// `recency(d, tier) = (1 + (19/81) * max(d, 0) / half_life)^-0.5`
///
/// The 19/81 shift makes recency(half_life) land at 0.9 rather than 0.5, so
/// a permanent entry loses only 10% of its recency factor per year. Core
/// tier never decays.
pub fn recency(days_old: f64, tier: Expiry) -> f64 {
    match tier.half_life_days() {
        None => 1.0,
        Some(half_life) => {
            (1.0 + (19.0 / 81.0) * days_old.max(0.0) / half_life).powf(-0.5)
        }
    }
}

/// Importance normalized into [0.55, 1.0]
pub fn importance_factor(importance: i64) -> f64 {
    let clamped = importance.clamp(1, 10) as f64;
    0.55 + ((clamped - 1.0) / 9.0) * 0.45
}

/// Largest consecutive gap (days) inside the sorted recall intervals.
///
/// With fewer than two recorded intervals a legacy synthesis from
/// `(created_at, last_recalled_at, recall_count)` imputes uniform spacing.
/// The imputation is in-memory only and never written back.
pub fn max_gap_days(entry: &Entry) -> f64 {
    let mut intervals = entry.recall_intervals.clone();
    intervals.sort_unstable();

    if intervals.len() >= 2 {
        let mut max_gap = 0_i64;
        for window in intervals.windows(2) {
            max_gap = max_gap.max(window[1] - window[0]);
        }
        return max_gap as f64 / 86_400.0;
    }

    // Legacy synthesis
    if entry.recall_count > 0 {
        if let Some(last) = entry.last_recalled_at {
            let span_days =
                (last - entry.created_at).num_seconds().max(0) as f64 / 86_400.0;
            return span_days / entry.recall_count as f64;
        }
    }
    0.0
}

/// Spacing multiplier: recalls spread over longer gaps count for more
pub fn spacing_factor(entry: &Entry) -> f64 {
    (max_gap_days(entry) + 1.0).ln_1p().max(1.0)
}

/// Spaced-recall strength in [0, 1]
pub fn spaced_recall(entry: &Entry, now: DateTime<Utc>) -> f64 {
    let base = if entry.recall_count > 0 {
        let strength = ((entry.recall_count as f64).powf(0.7) / 5.0).min(1.0);
        let days_since_recall = entry
            .last_recalled_at
            .map(|last| (now - last).num_seconds().max(0) as f64 / 86_400.0)
            .unwrap_or(0.0);
        strength * recency(days_since_recall, entry.expiry)
    } else {
        0.0
    };
    (base * spacing_factor(entry)).min(1.0)
}

/// Freshness boost: recent high-importance entries get up to 1.5x.
/// Anchored at real now even when the query carries an `until` bound.
pub fn freshness_boost(entry: &Entry, real_now: DateTime<Utc>) -> f64 {
    if entry.importance < FRESHNESS_MIN_IMPORTANCE {
        return 1.0;
    }
    let days_old = entry.days_old_at(real_now);
    if days_old > FRESHNESS_WINDOW_DAYS {
        return 1.0;
    }
    let strength = (entry.importance - (FRESHNESS_MIN_IMPORTANCE - 1)) as f64 / 4.0;
    let decay = (-days_old / FRESHNESS_HALF_LIFE_DAYS * std::f64::consts::LN_2).exp();
    (1.0 + 0.5 * strength * decay).clamp(1.0, FRESHNESS_MAX)
}

/// Todo staleness: exponential decay with a 7-day half-life, floored
pub fn todo_penalty(entry: &Entry, anchor: DateTime<Utc>) -> f64 {
    if entry.entry_type != EntryType::Todo {
        return 1.0;
    }
    let days_old = entry.days_old_at(anchor);
    (-days_old / TODO_HALF_LIFE_DAYS * std::f64::consts::LN_2)
        .exp()
        .max(TODO_PENALTY_FLOOR)
}

/// Quality multiplier in [0.7, 1.3]
pub fn quality_factor(quality_score: f64) -> f64 {
    0.7 + quality_score.clamp(0.0, 1.0) * 0.6
}

fn contradiction_penalty(entry: &Entry) -> f64 {
    if entry.contradictions >= 2 {
        CONTRADICTION_PENALTY
    } else {
        1.0
    }
}

/// Full semantic score for a candidate.
///
/// `anchor` is the recency anchor (`until` when the query carries a date
/// bound, otherwise now); `real_now` always feeds the freshness boost.
pub fn semantic_score(
    entry: &Entry,
    sim_raw: f64,
    fts_hit: bool,
    anchor: DateTime<Utc>,
    real_now: DateTime<Utc>,
    no_boost: bool,
) -> (f64, ScoreBreakdown) {
    let sim = sim_raw.clamp(0.0, 1.0).powf(SIM_EXPONENT);
    let rec = recency(entry.days_old_at(anchor), entry.expiry);
    let imp = importance_factor(entry.importance);
    let spacing = spacing_factor(entry);
    let spaced = spaced_recall(entry, real_now);
    let fresh = if no_boost { 1.0 } else { freshness_boost(entry, real_now) };
    let memory_strength = (imp.max(spaced) * fresh).min(1.0);
    let todo_pen = todo_penalty(entry, real_now);
    let contra_pen = contradiction_penalty(entry);
    let quality = quality_factor(entry.quality_score);
    let fts_bonus = if fts_hit { FTS_BONUS } else { 0.0 };

    let score = (sim * (0.3 + 0.7 * rec) * memory_strength * todo_pen * contra_pen * quality
        + fts_bonus)
        .min(1.0)
        .max(0.0);

    let breakdown = ScoreBreakdown {
        vector: sim_raw,
        recency: rec,
        importance: imp,
        recall: spaced,
        freshness: fresh,
        todo_penalty: todo_pen,
        fts: fts_bonus,
        spacing,
        quality,
    };

    (score, breakdown)
}

/// Session-start score: the semantic formula with the similarity term fixed
/// at 1 (there is no query text to compare against).
pub fn session_start_score(
    entry: &Entry,
    now: DateTime<Utc>,
    no_boost: bool,
) -> (f64, ScoreBreakdown) {
    semantic_score(entry, 1.0, false, now, now, no_boost)
}

/// Browse score: pure importance x recency with a 30-day half-life
pub fn browse_score(entry: &Entry, now: DateTime<Utc>) -> (f64, ScoreBreakdown) {
    let imp = importance_factor(entry.importance);
    let days_old = entry.days_old_at(now);
    let decay = (-(days_old / 30.0) * std::f64::consts::LN_2).exp();
    let score = (imp * decay).clamp(0.0, 1.0);
    let breakdown = ScoreBreakdown {
        importance: imp,
        recency: decay,
        ..Default::default()
    };
    (score, breakdown)
}

// ============================================================================
// TESTS
// ============================================================================
