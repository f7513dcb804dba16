//! Quality feedback
//!
//! At a session boundary the assistant's final response is embedded and
//! compared against the entries that were recalled during the session. An
//! entry the response clearly drew on earns a positive signal; an entry the
//! user corrected (its content re-stored through the store tool) earns a
//! zero; everything else gets a weak neutral signal. The running
//! `quality_score` is an exponential moving average with a per-type floor.

use crate::embed::{cosine_similarity, Embedder};
use crate::memory::EntryType;
use crate::store::{Result, Store};

/// Cosine threshold for "the response used this entry"
const USED_THRESHOLD: f32 = 0.5;

/// Cosine threshold for "a store tool call corrected this entry"
const CORRECTED_THRESHOLD: f32 = 0.6;

const SIGNAL_USED: f64 = 1.0;
const SIGNAL_CORRECTED: f64 = 0.0;
const SIGNAL_UNCLEAR: f64 = 0.4;

/// EMA weights: q' = 0.8*q + 0.2*signal
const KEEP_WEIGHT: f64 = 0.8;
const SIGNAL_WEIGHT: f64 = 0.2;

/// Quality floor per entry type. Facts and preferences never sink below
/// 0.35; everything else can fall to 0.1.
fn quality_floor(entry_type: EntryType) -> f64 {
    match entry_type {
        EntryType::Fact | EntryType::Preference => 0.35,
        _ => 0.1,
    }
}

/// Next quality score for one observed signal
pub fn next_quality(current: f64, signal: f64, entry_type: EntryType) -> f64 {
    let blended = KEEP_WEIGHT * current.clamp(0.0, 1.0) + SIGNAL_WEIGHT * signal;
    blended.max(quality_floor(entry_type)).min(1.0)
}

/// Run the feedback pass over the session's recalled entries.
///
/// `store_tool_contents` are the bodies of any store tool calls made during
/// the session; similarity to one of those overrides the "used" signal with
/// a correction. Returns the number of entries whose score changed.
pub async fn quality_feedback(
    store: &Store,
    embedder: &dyn Embedder,
    response_text: &str,
    recalled_ids: &[String],
    store_tool_contents: &[String],
) -> Result<usize> {
    if recalled_ids.is_empty() || response_text.trim().is_empty() {
        return Ok(0);
    }

    let response_vec = embedder.embed(response_text).await?;
    let mut correction_vecs = Vec::with_capacity(store_tool_contents.len());
    for content in store_tool_contents {
        if !content.trim().is_empty() {
            correction_vecs.push(embedder.embed(content).await?);
        }
    }

    let mut updated = 0;
    for id in recalled_ids {
        let Some(entry) = store.get_entry(id)? else {
            continue;
        };
        let Some(entry_vec) = store.get_embedding(id)? else {
            continue;
        };

        let mut signal = if cosine_similarity(&response_vec, &entry_vec) >= USED_THRESHOLD {
            SIGNAL_USED
        } else {
            SIGNAL_UNCLEAR
        };

        // A nearby store tool call means the user restated this knowledge:
        // treat the old entry as corrected regardless of the used signal
        if correction_vecs
            .iter()
            .any(|c| cosine_similarity(c, &entry_vec) >= CORRECTED_THRESHOLD)
        {
            signal = SIGNAL_CORRECTED;
        }

        let next = next_quality(entry.quality_score, signal, entry.entry_type);
        if (next - entry.quality_score).abs() > f64::EPSILON {
            store.set_quality_score(id, next)?;
            updated += 1;
        }
    }

    Ok(updated)
}
