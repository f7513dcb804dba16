//! Extraction
//!
//! Turns transcript chunks into typed entries via the extraction model. The
//! model is an oracle from the core's perspective: per-chunk calls either
//! return entries (plus warnings) or fail with a transient/fatal
//! classification the watcher uses to decide how far to advance its offset.

pub mod chunk;
pub mod parse;

pub use chunk::{chunk_messages, Chunk, CHUNK_OVERLAP_CHARS, DEFAULT_CHUNK_CHARS};
pub use parse::{parse_extraction, SUBMIT_TOOL};

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{
    complete_with_retries, ChatMessage, ChatRequest, LlmError, ModelClient, ModelSet, ModelTask,
    ToolSpec,
};
use crate::memory::NewEntry;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Extraction failure classification
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
    /// Retryable next cycle; the chunk stays unconsumed
    #[error("transient extraction failure: {0}")]
    Transient(String),
    /// Surfaced; retrying the same input will not help
    #[error("fatal extraction failure: {0}")]
    Fatal(String),
}

impl From<LlmError> for ExtractError {
    fn from(err: LlmError) -> Self {
        if err.is_transient() {
            ExtractError::Transient(err.to_string())
        } else {
            ExtractError::Fatal(err.to_string())
        }
    }
}

// ============================================================================
// EXTRACTOR CONTRACT
// ============================================================================

/// Result of one whole-input extraction run
#[derive(Debug, Default)]
pub struct ExtractionOutput {
    pub entries: Vec<NewEntry>,
    pub successful_chunks: usize,
    /// Indices of chunks whose extraction failed
    pub failed_chunks: Vec<usize>,
    pub warnings: Vec<String>,
}

/// Chunk-level extraction oracle
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract entries from one chunk of transcript text
    async fn extract_chunk(
        &self,
        chunk_text: &str,
    ) -> Result<(Vec<NewEntry>, Vec<String>), ExtractError>;
}

/// Run an extractor over a chunk list, collecting the batch-level report.
/// Failures are recorded per chunk; the run itself never errors.
pub async fn run_extraction(extractor: &dyn Extractor, chunks: &[Chunk]) -> ExtractionOutput {
    let mut output = ExtractionOutput::default();
    for (i, chunk) in chunks.iter().enumerate() {
        match extractor.extract_chunk(&chunk.text).await {
            Ok((entries, warnings)) => {
                output.entries.extend(entries);
                output.warnings.extend(warnings);
                output.successful_chunks += 1;
            }
            Err(e) => {
                tracing::warn!("extraction failed for chunk {i}: {e}");
                output.failed_chunks.push(i);
            }
        }
    }
    output
}

// ============================================================================
// LLM-BACKED EXTRACTOR
// ============================================================================

const EXTRACTION_SYSTEM_PROMPT: &str = "You distill AI coding-agent transcripts into durable \
knowledge entries. Extract only knowledge worth remembering across sessions: user preferences, \
decisions with their rationale, stable facts about people/projects/systems, open todos, and \
notable events. Skip transient chatter, code the user can re-read, and anything already implied \
by an earlier entry in the same transcript. Submit entries with the submit_knowledge tool. Keep \
content self-contained (readable without the transcript), subjects short, and importance honest: \
7+ is reserved for things the next session genuinely needs.";

fn submit_tool_spec() -> ToolSpec {
    ToolSpec {
        name: SUBMIT_TOOL.to_string(),
        description: "Submit the knowledge entries extracted from this transcript chunk"
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "entries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "type": "string",
                                "enum": ["fact", "decision", "preference", "event", "todo", "insight"]
                            },
                            "subject": {"type": "string"},
                            "content": {"type": "string"},
                            "importance": {"type": "integer", "minimum": 1, "maximum": 10},
                            "expiry": {"type": "string", "enum": ["core", "permanent", "temporary"]},
                            "tags": {"type": "array", "items": {"type": "string"}},
                            "scope": {"type": "string", "enum": ["private", "personal", "public"]},
                            "canonical_key": {"type": "string"},
                            "source_context": {"type": "string"}
                        },
                        "required": ["type", "subject", "content"]
                    }
                }
            },
            "required": ["entries"]
        }),
    }
}

/// Extractor backed by the configured extraction model
pub struct LlmExtractor {
    client: std::sync::Arc<dyn ModelClient>,
    model: String,
    temperature: Option<f32>,
    system_prompt_prefix: Option<String>,
}

impl LlmExtractor {
    pub fn new(client: std::sync::Arc<dyn ModelClient>, models: &ModelSet) -> Self {
        Self {
            client,
            model: models.model_for(ModelTask::Extraction).to_string(),
            temperature: None,
            system_prompt_prefix: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_system_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.system_prompt_prefix = Some(prefix.into());
        self
    }

    fn system_prompt(&self) -> String {
        match &self.system_prompt_prefix {
            Some(prefix) => format!("{prefix}\n\n{EXTRACTION_SYSTEM_PROMPT}"),
            None => EXTRACTION_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract_chunk(
        &self,
        chunk_text: &str,
    ) -> Result<(Vec<NewEntry>, Vec<String>), ExtractError> {
        let mut request = ChatRequest::new(&self.model);
        request.system = Some(self.system_prompt());
        request.temperature = self.temperature;
        request.tools = vec![submit_tool_spec()];
        request.messages.push(ChatMessage::user(format!(
            "Extract knowledge entries from this transcript chunk:\n\n{chunk_text}"
        )));

        let response = complete_with_retries(self.client.as_ref(), request).await?;
        Ok(parse_extraction(&response))
    }
}

// ============================================================================
// TESTS
// ============================================================================
