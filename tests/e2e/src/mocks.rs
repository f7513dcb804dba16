//! Deterministic stand-ins for the external oracles

use agenr_core::{
    ChatRequest, ChatResponse, Embedder, EmbedError, Entry, ExtractError, Extractor, Judge,
    JudgeVerdict, JudgedRelation, LlmError, ModelClient, NewEntry,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Embedding dimension used throughout the e2e suite
pub const DIMS: usize = 16;

/// Hash-seeded unit-vector embedder: identical text embeds identically,
/// different text lands far apart. Texts registered as synonyms share one
/// vector, which is how vector-dedup scenarios are staged.
pub struct MockEmbedder {
    synonyms: Mutex<Vec<Vec<String>>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            synonyms: Mutex::new(vec![]),
        }
    }

    /// Make every text in the group embed to the same vector
    pub fn with_synonyms(self, group: &[&str]) -> Self {
        self.synonyms
            .lock()
            .unwrap()
            .push(group.iter().map(|s| s.to_string()).collect());
        self
    }

    fn canonical(&self, text: &str) -> String {
        let groups = self.synonyms.lock().unwrap();
        for group in groups.iter() {
            if group.iter().any(|g| g == text) {
                return group[0].clone();
            }
        }
        text.to_string()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let canonical = self.canonical(text);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let mut v: Vec<f32> = digest[..DIMS].iter().map(|b| *b as f32 / 255.0).collect();
        agenr_core::embed::normalize(&mut v);
        Ok(v)
    }
}

/// Judge scripted to a fixed verdict, counting invocations
pub struct ScriptedJudge {
    verdict: JudgeVerdict,
    pub calls: AtomicUsize,
}

impl ScriptedJudge {
    pub fn new(relation: JudgedRelation, confidence: f64) -> Self {
        Self {
            verdict: JudgeVerdict {
                relation,
                confidence,
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// A judge that never finds anything related
    pub fn unrelated() -> Self {
        Self::new(JudgedRelation::Unrelated, 0.0)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(
        &self,
        _incoming: &NewEntry,
        _existing: &Entry,
    ) -> Result<JudgeVerdict, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

/// Extractor that emits one fact per chunk, derived from the chunk hash
pub struct HashExtractor;

#[async_trait]
impl Extractor for HashExtractor {
    async fn extract_chunk(
        &self,
        chunk_text: &str,
    ) -> Result<(Vec<NewEntry>, Vec<String>), ExtractError> {
        let mut hasher = Sha256::new();
        hasher.update(chunk_text.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Ok((
            vec![NewEntry::new(
                agenr_core::EntryType::Fact,
                format!("chunk {}", &digest[..8]),
                format!("distilled knowledge {}", &digest[..8]),
            )],
            vec![],
        ))
    }
}

/// Extractor that always fails transiently (nothing is consumed)
pub struct DownExtractor;

#[async_trait]
impl Extractor for DownExtractor {
    async fn extract_chunk(
        &self,
        _chunk_text: &str,
    ) -> Result<(Vec<NewEntry>, Vec<String>), ExtractError> {
        Err(ExtractError::Transient("mock outage".to_string()))
    }
}

/// Model client returning one fixed text response
pub struct ScriptedModelClient {
    pub response: String,
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            text: self.response.clone(),
            tool_calls: vec![],
        })
    }
}
