//! Signal subsystem
//!
//! Short notices pushed into a running session when new high-importance
//! entries landed since its last visit. The per-consumer watermark is
//! durable in the DB and advances past everything seen on every check,
//! whether or not a notice is actually delivered; cooldown and per-session
//! caps only suppress delivery. Signal checks never propagate errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::memory::Entry;
use crate::store::Store;

/// Signal delivery knobs
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Entries below this importance never signal
    pub min_importance: i64,
    /// Entries listed per notice
    pub max_per_signal: usize,
    /// Minimum spacing between deliveries to one consumer
    pub cooldown: Duration,
    /// Lifetime delivery cap per consumer session
    pub max_per_session: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_importance: 7,
            max_per_signal: 5,
            cooldown: Duration::from_secs(120),
            max_per_session: 5,
        }
    }
}

#[derive(Debug, Default)]
struct DeliveryState {
    last_delivered: Option<Instant>,
    delivered_count: usize,
}

/// Signal checker. Delivery state is in-memory per process; the watermark
/// is durable in the store.
pub struct Signals {
    store: Arc<Store>,
    config: SignalConfig,
    delivery: Mutex<HashMap<String, DeliveryState>>,
}

impl Signals {
    pub fn new(store: Arc<Store>, config: SignalConfig) -> Self {
        Self {
            store,
            config,
            delivery: Mutex::new(HashMap::new()),
        }
    }

    /// First-use initialization: the watermark starts at the current max
    /// rowid so a new consumer never receives the whole backlog.
    pub fn initialize_watermark(&self, consumer: &str) -> Option<i64> {
        match self.store.watermark(consumer) {
            Ok(Some(existing)) => Some(existing),
            Ok(None) => {
                let max = self.store.max_rowid().ok()?;
                if let Err(e) = self.store.set_watermark(consumer, max) {
                    tracing::warn!("failed to initialize watermark for {consumer}: {e}");
                    return None;
                }
                Some(max)
            }
            Err(e) => {
                tracing::warn!("watermark lookup failed for {consumer}: {e}");
                None
            }
        }
    }

    /// Check for new high-importance entries. Returns a formatted notice,
    /// or `None` when nothing qualifies or delivery is suppressed.
    pub fn check(&self, consumer: &str) -> Option<String> {
        let watermark = match self.store.watermark(consumer) {
            Ok(Some(w)) => w,
            Ok(None) => {
                self.initialize_watermark(consumer);
                return None;
            }
            Err(e) => {
                tracing::warn!("signal check failed for {consumer}: {e}");
                return None;
            }
        };

        let qualifying = match self.store.entries_above_watermark(
            watermark,
            self.config.min_importance,
            self.config.max_per_signal,
        ) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("signal fetch failed for {consumer}: {e}");
                return None;
            }
        };

        // Advance past everything observed, including non-qualifying rows,
        // before any suppression decision
        match self.store.max_rowid_above(watermark) {
            Ok(new_max) if new_max > watermark => {
                if let Err(e) = self.store.set_watermark(consumer, new_max) {
                    tracing::warn!("watermark advance failed for {consumer}: {e}");
                    return None;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("watermark scan failed for {consumer}: {e}");
                return None;
            }
        }

        if qualifying.is_empty() {
            return None;
        }

        // Delivery suppression (does not affect the watermark above)
        {
            let mut delivery = self.delivery.lock().ok()?;
            let state = delivery.entry(consumer.to_string()).or_default();
            if state.delivered_count >= self.config.max_per_session {
                tracing::debug!("signal suppressed for {consumer}: session cap reached");
                return None;
            }
            if let Some(last) = state.last_delivered {
                if last.elapsed() < self.config.cooldown {
                    tracing::debug!("signal suppressed for {consumer}: cooldown");
                    return None;
                }
            }
            state.last_delivered = Some(Instant::now());
            state.delivered_count += 1;
        }

        let entries: Vec<&Entry> = qualifying.iter().map(|(_, e)| e).collect();
        Some(format_notice(&entries))
    }
}

/// Compact multiline notice:
///
/// ```text
/// AGENR SIGNAL: N new high-importance entr{y|ies}
/// - [type, imp:K] "subject"
/// -> Use agenr_recall query="<subject>" for details.
/// ```
pub fn format_notice(entries: &[&Entry]) -> String {
    let noun = if entries.len() == 1 { "entry" } else { "entries" };
    let mut out = format!(
        "AGENR SIGNAL: {} new high-importance {noun}\n",
        entries.len()
    );
    for entry in entries {
        out.push_str(&format!(
            "- [{}, imp:{}] \"{}\"\n",
            entry.entry_type, entry.importance, entry.subject
        ));
    }
    if let Some(first) = entries.first() {
        out.push_str(&format!(
            "-> Use agenr_recall query=\"{}\" for details.",
            first.subject
        ));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
