//! Supersession decision
//!
//! Given a fresh entry and a dedup candidate (same canonical key or high
//! vector similarity), decide what the write pipeline does. A cheap
//! redundancy shortcut avoids an LLM round-trip for obviously weaker
//! repeats; everything else is routed through the pluggable judge.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm::{
    complete_with_retries, ChatMessage, ChatRequest, LlmError, ModelClient, ModelSet, ModelTask,
};
use crate::memory::{Entry, NewEntry};

/// Default confidence required for automatic supersession
pub const DEFAULT_AUTO_SUPERSEDE_CONFIDENCE: f64 = 0.85;

/// Default cosine threshold for vector dedup candidacy
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.85;

/// Vector candidates fetched per entry
pub const DEDUP_TOP_K: usize = 10;

/// Similarity above which a coexists relation is worth recording
pub const NOTABLE_SIMILARITY: f64 = 0.75;

// ============================================================================
// JUDGE CONTRACT
// ============================================================================

/// Relation the judge assigns between a new entry and a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgedRelation {
    Supersedes,
    Contradicts,
    Coexists,
    Unrelated,
}

impl JudgedRelation {
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "supersedes" => Some(JudgedRelation::Supersedes),
            "contradicts" => Some(JudgedRelation::Contradicts),
            "coexists" => Some(JudgedRelation::Coexists),
            "unrelated" => Some(JudgedRelation::Unrelated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub relation: JudgedRelation,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

/// Pluggable oracle deciding how a new entry relates to an existing one.
/// Tie-breaks favor the newer entry.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, incoming: &NewEntry, existing: &Entry) -> Result<JudgeVerdict, LlmError>;
}

// ============================================================================
// DECISION POLICY
// ============================================================================

/// Knobs for the dedup pass
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    /// Cosine threshold for vector candidacy
    pub threshold: f64,
    /// Judge confidence required for automatic supersession
    pub auto_supersede_confidence: f64,
    /// Widen the candidate fetch and lower the threshold slightly
    pub aggressive: bool,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DEDUP_THRESHOLD,
            auto_supersede_confidence: DEFAULT_AUTO_SUPERSEDE_CONFIDENCE,
            aggressive: false,
        }
    }
}

impl DedupPolicy {
    pub fn effective_threshold(&self) -> f64 {
        if self.aggressive {
            (self.threshold - 0.05).max(0.0)
        } else {
            self.threshold
        }
    }

    pub fn effective_top_k(&self) -> usize {
        if self.aggressive { DEDUP_TOP_K * 2 } else { DEDUP_TOP_K }
    }
}

/// What the pipeline should do with the new entry after examining one
/// candidate
#[derive(Debug, Clone, PartialEq)]
pub enum DedupAction {
    /// Redundant repeat: skip the new entry, bump the candidate's
    /// confirmations
    SkipRedundant,
    /// Insert the new entry, mark the candidate superseded, log an auto
    /// conflict row
    Supersede { confidence: f64 },
    /// Insert both, log a pending conflict row, bump the candidate's
    /// contradictions
    Contradict { confidence: f64 },
    /// Insert the new entry; record a coexists relation when the similarity
    /// was notable
    Coexist { notable: bool },
    /// Nothing decisive; continue to the next candidate
    Continue,
}

/// Cheap shortcut: a clearly less important repeat of something stored in
/// the last hour is redundant without consulting the judge.
pub fn is_quick_redundant(incoming: &NewEntry, candidate: &Entry) -> bool {
    let age = Utc::now() - candidate.created_at;
    incoming.importance < candidate.importance - 2 && age < Duration::hours(1)
}

/// Map a judge verdict onto a pipeline action
pub fn action_for_verdict(
    verdict: JudgeVerdict,
    similarity: Option<f64>,
    policy: &DedupPolicy,
) -> DedupAction {
    match verdict.relation {
        JudgedRelation::Supersedes if verdict.confidence >= policy.auto_supersede_confidence => {
            DedupAction::Supersede {
                confidence: verdict.confidence,
            }
        }
        // Low-confidence supersession is treated as contradiction: keep both
        // and leave the conflict pending for a human or a later auto pass
        JudgedRelation::Supersedes | JudgedRelation::Contradicts => DedupAction::Contradict {
            confidence: verdict.confidence,
        },
        JudgedRelation::Coexists | JudgedRelation::Unrelated => DedupAction::Coexist {
            notable: similarity.is_some_and(|s| s >= NOTABLE_SIMILARITY),
        },
    }
}

// ============================================================================
// LLM-BACKED JUDGE
// ============================================================================

const JUDGE_SYSTEM_PROMPT: &str = "You compare two knowledge entries about the same subject and \
decide how the NEW entry relates to the EXISTING one. Answer with a single JSON object: \
{\"relation\": \"supersedes\"|\"contradicts\"|\"coexists\"|\"unrelated\", \"confidence\": 0.0-1.0}. \
'supersedes' means the new entry is an updated version of the same claim and should replace the \
old one. 'contradicts' means they cannot both be true but it is unclear which is current. \
'coexists' means both can be true. When in doubt between supersedes and contradicts, prefer the \
newer entry. Output only the JSON object.";

/// Judge backed by the configured contradiction-judge model
pub struct LlmJudge {
    client: std::sync::Arc<dyn ModelClient>,
    model: String,
}

impl LlmJudge {
    pub fn new(client: std::sync::Arc<dyn ModelClient>, models: &ModelSet) -> Self {
        Self {
            client,
            model: models.model_for(ModelTask::ContradictionJudge).to_string(),
        }
    }

    fn parse_verdict(text: &str) -> Result<JudgeVerdict, LlmError> {
        // The model is instructed to emit bare JSON; tolerate a fenced block
        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .map(|s| s.trim_end_matches("```").trim())
            .unwrap_or(trimmed);

        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| LlmError::Malformed(format!("judge output not JSON: {e}")))?;

        let relation = value
            .get("relation")
            .and_then(serde_json::Value::as_str)
            .and_then(JudgedRelation::parse_name)
            .ok_or_else(|| LlmError::Malformed("judge output missing relation".to_string()))?;

        let confidence = value
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        Ok(JudgeVerdict {
            relation,
            confidence,
        })
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, incoming: &NewEntry, existing: &Entry) -> Result<JudgeVerdict, LlmError> {
        let prompt = json!({
            "existing": {
                "subject": existing.subject,
                "content": existing.content,
                "canonicalKey": existing.canonical_key,
                "createdAt": existing.created_at.to_rfc3339(),
                "importance": existing.importance,
            },
            "new": {
                "subject": incoming.subject,
                "content": incoming.content,
                "canonicalKey": incoming.canonical_key,
                "importance": incoming.importance,
            },
        });

        let mut request = ChatRequest::new(&self.model);
        request.system = Some(JUDGE_SYSTEM_PROMPT.to_string());
        request.max_tokens = 256;
        request
            .messages
            .push(ChatMessage::user(prompt.to_string()));

        let response = complete_with_retries(self.client.as_ref(), request).await?;
        Self::parse_verdict(&response.text)
    }
}

// ============================================================================
// TESTS
// ============================================================================
