//! Plugin host
//!
//! The four abstract events a session host drives: `before_prompt_build`
//! (memory markdown on first contact, cooldown-gated signals afterwards),
//! `before_reset` and `command` (handoff protocol), and `tool` (the
//! recall/store/extract/retire tools). Tool failures return a text
//! envelope instead of throwing, and the event handlers never propagate.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::embed::Embedder;
use crate::extract::Extractor;
use crate::handoff::Handoff;
use crate::memory::{
    EntryType, NewEntry, RecallContext, RecallQuery, RecallResult, Scope, SessionCategory,
};
use crate::recall::{self, RecallSettings};
use crate::signal::Signals;
use crate::store::{
    ingest_content_hash, Judge, MatchType, RetireOptions, RetireQuery, Store, StoreOptions,
};
use crate::transcript::Message;

/// Result of `before_prompt_build`
#[derive(Debug, Default)]
pub struct PromptContext {
    /// Markdown (or a signal notice) to prepend to the prompt
    pub prepend_context: Option<String>,
}

pub struct PluginHost {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    judge: Arc<dyn Judge>,
    extractor: Option<Arc<dyn Extractor>>,
    signals: Arc<Signals>,
    handoff: Arc<Handoff>,
    recall_settings: RecallSettings,
    store_options: StoreOptions,
    /// Sessions that already received their memory block
    primed_sessions: Mutex<HashSet<String>>,
    /// Entry ids recalled into each session, for the quality-feedback pass
    session_recalls: Mutex<std::collections::HashMap<String, Vec<String>>>,
    /// Bodies of recent store tool calls (correction signal)
    store_tool_contents: Mutex<Vec<String>>,
}

/// Store-tool bodies kept for correction matching
const STORE_CONTENT_WINDOW: usize = 32;

impl PluginHost {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        judge: Arc<dyn Judge>,
        extractor: Option<Arc<dyn Extractor>>,
        signals: Arc<Signals>,
        handoff: Arc<Handoff>,
        recall_settings: RecallSettings,
        store_options: StoreOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            judge,
            extractor,
            signals,
            handoff,
            recall_settings,
            store_options,
            primed_sessions: Mutex::new(HashSet::new()),
            session_recalls: Mutex::new(std::collections::HashMap::new()),
            store_tool_contents: Mutex::new(Vec::new()),
        }
    }

    fn remember_recalled(&self, session_id: &str, ids: impl IntoIterator<Item = String>) {
        if let Ok(mut recalls) = self.session_recalls.lock() {
            recalls.entry(session_id.to_string()).or_default().extend(ids);
        }
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// First call in a session returns the session-start memory block;
    /// later calls may return a signal notice.
    pub async fn before_prompt_build(&self, session_id: &str, _prompt: Option<&str>) -> PromptContext {
        let first_contact = {
            let Ok(mut primed) = self.primed_sessions.lock() else {
                return PromptContext::default();
            };
            primed.insert(session_id.to_string())
        };

        if first_contact {
            // New consumers start at the current watermark: no backlog flood
            self.signals.initialize_watermark(session_id);

            let query = RecallQuery {
                context: RecallContext::SessionStart,
                ..Default::default()
            };
            match recall::recall(&self.store, self.embedder.as_ref(), &query, &self.recall_settings)
                .await
            {
                Ok(results) if !results.is_empty() => {
                    self.remember_recalled(
                        session_id,
                        results.iter().map(|r| r.entry.id.clone()),
                    );
                    PromptContext {
                        prepend_context: Some(render_memory_block(&results)),
                    }
                }
                Ok(_) => PromptContext::default(),
                Err(e) => {
                    tracing::warn!("session-start recall failed: {e}");
                    PromptContext::default()
                }
            }
        } else {
            PromptContext {
                prepend_context: self.signals.check(session_id),
            }
        }
    }

    /// Session reset: score the session's recalled entries against the
    /// final response, then run the handoff protocol. Both are best-effort.
    pub async fn before_reset(
        &self,
        session_id: &str,
        messages: &[Message],
        session_file: Option<&Path>,
    ) {
        self.run_quality_feedback(session_id, messages).await;
        self.handoff.deliver(session_id, messages, session_file).await;
    }

    async fn run_quality_feedback(&self, session_id: &str, messages: &[Message]) {
        let recalled = self
            .session_recalls
            .lock()
            .ok()
            .and_then(|mut recalls| recalls.remove(session_id))
            .unwrap_or_default();
        if recalled.is_empty() {
            return;
        }
        let Some(response) = messages.iter().rev().find(|m| m.role == "assistant") else {
            return;
        };
        let store_contents = self
            .store_tool_contents
            .lock()
            .map(|contents| contents.clone())
            .unwrap_or_default();

        match recall::quality_feedback(
            &self.store,
            self.embedder.as_ref(),
            &response.text,
            &recalled,
            &store_contents,
        )
        .await
        {
            Ok(updated) if updated > 0 => {
                tracing::debug!("quality feedback updated {updated} entries for {session_id}");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("quality feedback failed for {session_id}: {e}"),
        }
    }

    /// `new` / `reset` commands also trigger the handoff
    pub async fn command(
        &self,
        action: &str,
        session_id: &str,
        messages: &[Message],
        session_file: Option<&Path>,
    ) {
        match action {
            "new" | "reset" => {
                self.handoff.deliver(session_id, messages, session_file).await;
            }
            other => tracing::debug!("ignoring unknown command action '{other}'"),
        }
    }

    /// Tool dispatch. Always returns a content envelope; failures are
    /// reported inside it, never thrown.
    pub async fn tool(&self, name: &str, args: Value) -> Value {
        let result = match name {
            "recall" => self.tool_recall(args).await,
            "store" => self.tool_store(args).await,
            "extract" => self.tool_extract(args).await,
            "retire" => self.tool_retire(args).await,
            other => Err(format!("unknown tool '{other}'")),
        };

        match result {
            Ok(value) => text_envelope(&value.to_string()),
            Err(message) => text_envelope(&format!("{name} failed: {message}")),
        }
    }

    // ========================================================================
    // TOOLS
    // ========================================================================

    async fn tool_recall(&self, args: Value) -> Result<Value, String> {
        let text = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "query cannot be empty".to_string())?;

        let mut query = RecallQuery::semantic(text);
        if let Some(limit) = args.get("limit").and_then(Value::as_u64) {
            query.limit = Some((limit as usize).clamp(1, 100));
        }
        if let Some(types) = args.get("types").and_then(Value::as_str) {
            query.types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(EntryType::parse_name)
                .collect();
        }
        if let Some(scope) = args.get("scope").and_then(Value::as_str) {
            query.scope = Some(Scope::parse_name(scope));
        }
        if let Some(project) = args.get("project").and_then(Value::as_str) {
            query.project = Some(project.to_string());
        }

        let results =
            recall::recall(&self.store, self.embedder.as_ref(), &query, &self.recall_settings)
                .await
                .map_err(|e| e.to_string())?;

        let rendered: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "id": r.entry.id,
                    "type": r.entry.entry_type.as_str(),
                    "subject": r.entry.subject,
                    "content": r.entry.content,
                    "importance": r.entry.importance,
                    "score": r.score,
                    "tags": r.entry.tags,
                })
            })
            .collect();
        Ok(json!({"total": rendered.len(), "results": rendered}))
    }

    async fn tool_store(&self, args: Value) -> Result<Value, String> {
        let entries: Vec<NewEntry> = match args.get("entries") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| e.to_string())?,
            None => {
                // Single-entry shorthand
                let entry: NewEntry = serde_json::from_value(args).map_err(|e| e.to_string())?;
                vec![entry]
            }
        };
        if entries.is_empty() {
            return Err("no entries to store".to_string());
        }

        if let Ok(mut contents) = self.store_tool_contents.lock() {
            contents.extend(entries.iter().map(|e| e.content.clone()));
            let overflow = contents.len().saturating_sub(STORE_CONTENT_WINDOW);
            if overflow > 0 {
                contents.drain(..overflow);
            }
        }

        let payload = serde_json::to_string(&entries).map_err(|e| e.to_string())?;
        let report = self
            .store
            .store_entries(
                entries,
                "tool:store",
                &ingest_content_hash(&payload),
                &self.store_options,
                self.embedder.as_ref(),
                self.judge.as_ref(),
            )
            .await
            .map_err(|e| e.to_string())?;

        serde_json::to_value(&report).map_err(|e| e.to_string())
    }

    async fn tool_extract(&self, args: Value) -> Result<Value, String> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| "no extraction model configured".to_string())?;
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "text cannot be empty".to_string())?;

        let (entries, warnings) = extractor
            .extract_chunk(text)
            .await
            .map_err(|e| e.to_string())?;
        if entries.is_empty() {
            return Ok(json!({"added": 0, "warnings": warnings}));
        }

        let report = self
            .store
            .store_entries(
                entries,
                "tool:extract",
                &ingest_content_hash(text),
                &self.store_options,
                self.embedder.as_ref(),
                self.judge.as_ref(),
            )
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "added": report.added,
            "skipped": report.skipped,
            "superseded": report.superseded,
            "warnings": warnings,
        }))
    }

    async fn tool_retire(&self, args: Value) -> Result<Value, String> {
        let query = if let Some(id) = args.get("id").and_then(Value::as_str) {
            RetireQuery::Id(id.to_string())
        } else if let Some(subject) = args.get("subject").and_then(Value::as_str) {
            let contains = args.get("contains").and_then(Value::as_bool).unwrap_or(false);
            RetireQuery::Subject {
                pattern: subject.to_string(),
                match_type: if contains { MatchType::Contains } else { MatchType::Exact },
                canonical_key: args
                    .get("canonicalKey")
                    .and_then(Value::as_str)
                    .map(String::from),
            }
        } else {
            return Err("either 'id' or 'subject' is required".to_string());
        };

        let options = RetireOptions {
            reason: args.get("reason").and_then(Value::as_str).map(String::from),
            write_ledger: args.get("persist").and_then(Value::as_bool).unwrap_or(false),
            ..Default::default()
        };

        let outcome = self.store.retire(&query, &options).map_err(|e| e.to_string())?;
        Ok(json!({"count": outcome.count, "ids": outcome.ids}))
    }
}

// ============================================================================
// RENDERING
// ============================================================================

fn text_envelope(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

/// Render session-start results as the memory markdown block
pub fn render_memory_block(results: &[RecallResult]) -> String {
    let mut out = String::from("# Memory\n");
    let sections = [
        (SessionCategory::Core, "## Core"),
        (SessionCategory::Active, "## Active"),
        (SessionCategory::Preferences, "## Preferences"),
        (SessionCategory::Recent, "## Recent"),
    ];
    for (category, heading) in sections {
        let in_section: Vec<&RecallResult> = results
            .iter()
            .filter(|r| r.category == Some(category))
            .collect();
        if in_section.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{heading}\n"));
        for result in in_section {
            let entry = &result.entry;
            out.push_str(&format!(
                "- [{}, imp:{}] {}: {}\n",
                entry.entry_type,
                entry.importance,
                entry.subject,
                entry.content.split_whitespace().collect::<Vec<_>>().join(" "),
            ));
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
