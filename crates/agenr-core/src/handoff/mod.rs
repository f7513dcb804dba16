//! Handoff subsystem
//!
//! At a session boundary the next session needs something to read.
//! Fallback first: the last user/assistant exchange is stored synchronously
//! as a high-importance event entry, guaranteeing a durable note even if
//! every LLM call fails. An asynchronous upgrade then summarizes the
//! merged transcript; if it produces anything, the fallback is retired and
//! replaced. Each session id triggers at most one handoff, guarded by a
//! short-lived cache. Failures are logged and discarded; the fallback is
//! the system of record.

use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::embed::Embedder;
use crate::llm::{
    complete_with_retries, ChatMessage, ChatRequest, ModelClient, ModelSet, ModelTask,
};
use crate::memory::{EntryType, Expiry, NewEntry};
use crate::store::{
    ingest_content_hash, Judge, MatchType, RetireOptions, RetireQuery, Store, StoreOptions,
};
use crate::transcript::Message;

/// Transcript caps for the LLM upgrade
pub const HANDOFF_MAX_MESSAGES: usize = 50;
pub const HANDOFF_MAX_CHARS: usize = 8000;

/// Seen-session guard: one handoff per session id within this window
const SEEN_TTL: Duration = Duration::from_secs(60);
const SEEN_CAPACITY: usize = 64;

/// Sibling reset files older than this are not merged
const SIBLING_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

const SUMMARY_SYSTEM_PROMPT: &str = "You write concise handoff notes between AI coding-agent \
sessions. Summarize the transcript into exactly four labelled paragraphs, each starting with its \
label on its own line: WORKING ON, KEY FINDINGS, OPEN THREADS, IMPORTANT FACTS. Be specific \
(file names, decisions, blockers). No preamble, no closing remarks.";

pub struct Handoff {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    judge: Arc<dyn Judge>,
    client: Option<Arc<dyn ModelClient>>,
    summary_model: String,
    seen: Mutex<LruCache<String, Instant>>,
}

impl Handoff {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        judge: Arc<dyn Judge>,
        client: Option<Arc<dyn ModelClient>>,
        models: &ModelSet,
    ) -> Self {
        Self {
            store,
            embedder,
            judge,
            client,
            summary_model: models.model_for(ModelTask::HandoffSummary).to_string(),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEEN_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Lazy-expiration check on the seen cache; returns true when this
    /// session already triggered a handoff within the TTL.
    fn already_handled(&self, session_id: &str) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return false;
        };
        // Sweep expired entries so the cache stays a true one-minute guard
        let expired: Vec<String> = seen
            .iter()
            .filter(|(_, at)| at.elapsed() >= SEEN_TTL)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            seen.pop(&key);
        }

        if seen.contains(session_id) {
            return true;
        }
        seen.put(session_id.to_string(), Instant::now());
        false
    }

    /// Deliver a handoff for a session boundary. Returns false when the
    /// session was already handled. Never propagates errors.
    pub async fn deliver(
        self: &Arc<Self>,
        session_id: &str,
        messages: &[Message],
        session_file: Option<&Path>,
    ) -> bool {
        if self.already_handled(session_id) {
            tracing::debug!("handoff already delivered for session {session_id}");
            return false;
        }

        // 1. Fallback first: synchronous, best-effort durable
        let subject = format!("session handoff {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"));
        let fallback_stored = match self
            .store_handoff_entry(&subject, &fallback_text(messages), session_file)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("handoff fallback store failed: {e}");
                false
            }
        };

        // 2. LLM upgrade: fire-and-forget
        if let Some(client) = &self.client {
            let this = Arc::clone(self);
            let client = Arc::clone(client);
            let subject = subject.clone();
            let messages = messages.to_vec();
            let session_file = session_file.map(Path::to_path_buf);
            tokio::spawn(async move {
                this.upgrade(client, &subject, &messages, session_file.as_deref(), fallback_stored)
                    .await;
            });
        }

        true
    }

    /// The asynchronous upgrade pass. Public so tests can await it
    /// directly instead of racing the spawned task.
    pub async fn upgrade(
        &self,
        client: Arc<dyn ModelClient>,
        fallback_subject: &str,
        messages: &[Message],
        session_file: Option<&Path>,
        retire_fallback: bool,
    ) {
        let transcript = merged_transcript(messages, session_file);
        if transcript.trim().is_empty() {
            return;
        }

        let mut request = ChatRequest::new(&self.summary_model);
        request.system = Some(SUMMARY_SYSTEM_PROMPT.to_string());
        request.max_tokens = 1024;
        request.messages.push(ChatMessage::user(transcript));

        let summary = match complete_with_retries(client.as_ref(), request).await {
            Ok(response) => response.text.trim().to_string(),
            Err(e) => {
                tracing::warn!("handoff summary failed, fallback stands: {e}");
                return;
            }
        };
        if summary.is_empty() {
            return;
        }

        // Retire the fallback (same subject, same tags), then insert the
        // upgraded note
        if retire_fallback {
            let retired = self.store.retire(
                &RetireQuery::Subject {
                    pattern: fallback_subject.to_string(),
                    match_type: MatchType::Exact,
                    canonical_key: None,
                },
                &RetireOptions {
                    reason: Some("upgraded by handoff summary".to_string()),
                    ..Default::default()
                },
            );
            if let Err(e) = retired {
                tracing::warn!("failed to retire handoff fallback: {e}");
            }
        }

        if let Err(e) = self
            .store_handoff_entry(fallback_subject, &summary, session_file)
            .await
        {
            tracing::warn!("failed to store upgraded handoff: {e}");
        }
    }

    async fn store_handoff_entry(
        &self,
        subject: &str,
        content: &str,
        session_file: Option<&Path>,
    ) -> crate::store::Result<()> {
        if content.trim().is_empty() {
            return Ok(());
        }
        let mut entry = NewEntry::new(EntryType::Event, subject, content);
        entry.importance = 9;
        entry.expiry = Expiry::Temporary;
        entry.tags = vec!["handoff".to_string(), "session".to_string()];

        let source = session_file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "handoff".to_string());
        // No dedup: the fallback must land without judge round-trips
        let options = StoreOptions {
            online_dedup: false,
            ..Default::default()
        };
        self.store
            .store_entries(
                vec![entry],
                &source,
                &ingest_content_hash(content),
                &options,
                self.embedder.as_ref(),
                self.judge.as_ref(),
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// TRANSCRIPT ASSEMBLY
// ============================================================================

/// The last user/assistant exchange as plain text
pub fn fallback_text(messages: &[Message]) -> String {
    let last_assistant = messages.iter().rev().find(|m| m.role == "assistant");
    let last_user = messages.iter().rev().find(|m| m.role == "user");

    let mut parts = Vec::new();
    if let Some(user) = last_user {
        parts.push(format!("User: {}", user.text));
    }
    if let Some(assistant) = last_assistant {
        parts.push(format!("Assistant: {}", assistant.text));
    }
    parts.join("\n\n")
}

/// Merged transcript for the summarizer: up to [`HANDOFF_MAX_MESSAGES`] of
/// the session tail capped at [`HANDOFF_MAX_CHARS`], preceded by the tail
/// of a reset sibling found by mtime within 24 hours.
fn merged_transcript(messages: &[Message], session_file: Option<&Path>) -> String {
    let mut out = String::new();

    if let Some(sibling) = session_file.and_then(find_reset_sibling) {
        if let Ok(raw) = std::fs::read_to_string(&sibling) {
            let parsed = crate::transcript::parse_transcript(&raw);
            let tail: Vec<&Message> = parsed.messages.iter().rev().take(10).collect();
            if !tail.is_empty() {
                out.push_str("[previous session]\n");
                for message in tail.into_iter().rev() {
                    out.push_str(&format!("{}: {}\n", message.role, message.text));
                }
                out.push('\n');
            }
        }
    }

    let start = messages.len().saturating_sub(HANDOFF_MAX_MESSAGES);
    for message in &messages[start..] {
        out.push_str(&format!("{}: {}\n", message.role, message.text));
    }

    if out.len() > HANDOFF_MAX_CHARS {
        // Keep the tail: the end of a session matters more than its start
        let cut = out.len() - HANDOFF_MAX_CHARS;
        let mut boundary = cut;
        while !out.is_char_boundary(boundary) {
            boundary += 1;
        }
        out = out[boundary..].to_string();
    }

    out
}

/// A sibling session file in the same directory, modified within 24 hours,
/// that is not the session file itself. This is how a pre-reset transcript
/// is found after the host rotated files.
fn find_reset_sibling(session_file: &Path) -> Option<PathBuf> {
    let dir = session_file.parent()?;
    let now = std::time::SystemTime::now();

    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path == session_file {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(mtime) = meta.modified() else { continue };
        let age = now.duration_since(mtime).unwrap_or_default();
        if age > SIBLING_MAX_AGE {
            continue;
        }
        if best.as_ref().is_none_or(|(t, _)| mtime > *t) {
            best = Some((mtime, path));
        }
    }
    best.map(|(_, path)| path)
}

// ============================================================================
// TESTS
// ============================================================================
