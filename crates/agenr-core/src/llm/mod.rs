//! LLM provider glue
//!
//! The provider SDK itself is an external collaborator; the core only sees
//! the `ModelClient` trait. This module carries the request/response shapes,
//! the per-task model capability set, and the shared retry policy:
//! transient failures retried up to 3x with exponential backoff, a rejected
//! temperature retried once with no temperature.

mod http;

pub use http::HttpModelClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// LLM error classification. `Transient` is the only retryable kind.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// 429 / 5xx / network; retried up to [`MAX_RETRIES`] times
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Credentials missing or rejected
    #[error("provider auth failure: {0}")]
    Auth(String),
    /// The model rejected the requested temperature
    #[error("temperature not supported: {0}")]
    TemperatureUnsupported(String),
    /// Schema rejection or other permanent request failure
    #[error("fatal provider failure: {0}")]
    Fatal(String),
    /// The response could not be parsed into the expected shape
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A tool offered to the model (structured-output channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool input
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages: vec![],
            tools: vec![],
            temperature: None,
            max_tokens: 4096,
        }
    }
}

/// A tool invocation returned by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Concatenated text blocks
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// First call of the named tool, if the model made one
    pub fn tool_call(&self, name: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|c| c.name == name)
    }
}

// ============================================================================
// MODEL CLIENT TRAIT
// ============================================================================

/// The single seam between the core and any LLM provider
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Maximum attempts for transient failures
pub const MAX_RETRIES: u32 = 3;

/// Base backoff delay; doubled per attempt
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Issue a request with the shared retry policy.
///
/// Transient errors back off and retry up to [`MAX_RETRIES`] total attempts.
/// A temperature rejection is retried exactly once with the temperature
/// stripped. Everything else surfaces immediately.
pub async fn complete_with_retries(
    client: &dyn ModelClient,
    request: ChatRequest,
) -> Result<ChatResponse, LlmError> {
    let mut request = request;
    let mut temperature_retried = false;
    let mut attempt: u32 = 0;

    loop {
        match client.complete(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(LlmError::Transient(msg)) => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    return Err(LlmError::Transient(msg));
                }
                let delay = BASE_BACKOFF * 2u32.pow(attempt - 1);
                tracing::debug!("transient LLM failure, retry {attempt}/{MAX_RETRIES} in {delay:?}: {msg}");
                tokio::time::sleep(delay).await;
            }
            Err(LlmError::TemperatureUnsupported(msg)) if !temperature_retried => {
                tracing::debug!("model rejected temperature, retrying without: {msg}");
                request.temperature = None;
                temperature_retried = true;
            }
            Err(other) => return Err(other),
        }
    }
}

// ============================================================================
// MODEL CAPABILITY SET
// ============================================================================

/// The closed set of LLM-backed tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    Extraction,
    ClaimExtraction,
    ContradictionJudge,
    HandoffSummary,
}

impl ModelTask {
    pub const ALL: [ModelTask; 4] = [
        ModelTask::Extraction,
        ModelTask::ClaimExtraction,
        ModelTask::ContradictionJudge,
        ModelTask::HandoffSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::Extraction => "extraction",
            ModelTask::ClaimExtraction => "claim_extraction",
            ModelTask::ContradictionJudge => "contradiction_judge",
            ModelTask::HandoffSummary => "handoff_summary",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "extraction" => Some(ModelTask::Extraction),
            "claim_extraction" => Some(ModelTask::ClaimExtraction),
            "contradiction_judge" => Some(ModelTask::ContradictionJudge),
            "handoff_summary" => Some(ModelTask::HandoffSummary),
            _ => None,
        }
    }
}

/// Per-task model selection. Missing tasks fall back to the default model
/// id; unknown task keys are rejected at construction.
#[derive(Debug, Clone)]
pub struct ModelSet {
    default_model: String,
    overrides: HashMap<ModelTask, String>,
}

impl ModelSet {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            overrides: HashMap::new(),
        }
    }

    /// Build from a raw config map. Unknown keys are an error so typos in
    /// config surface at startup rather than silently using the default.
    pub fn from_map(
        default_model: impl Into<String>,
        raw: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let mut set = Self::new(default_model);
        for (key, model) in raw {
            let task = ModelTask::parse_name(key)
                .ok_or_else(|| format!("unknown model task '{key}'"))?;
            set.overrides.insert(task, model.clone());
        }
        Ok(set)
    }

    pub fn model_for(&self, task: ModelTask) -> &str {
        self.overrides
            .get(&task)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for FlakyClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(LlmError::Transient("503".to_string()))
            } else {
                Ok(ChatResponse {
                    text: "ok".to_string(),
                    tool_calls: vec![],
                })
            }
        }
    }

    struct NoTemperatureClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for NoTemperatureClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.temperature.is_some() {
                Err(LlmError::TemperatureUnsupported("t".to_string()))
            } else {
                Ok(ChatResponse::default())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_then_succeeds() {
        let client = FlakyClient {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        };
        let result = complete_with_retries(&client, ChatRequest::new("m")).await;
        assert!(result.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_retries() {
        let client = FlakyClient {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        };
        let result = complete_with_retries(&client, ChatRequest::new("m")).await;
        assert!(matches!(result, Err(LlmError::Transient(_))));
        assert_eq!(client.calls.load(Ordering::SeqCst), MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_temperature_rejection_retried_once_without() {
        let client = NoTemperatureClient {
            calls: AtomicU32::new(0),
        };
        let mut request = ChatRequest::new("m");
        request.temperature = Some(0.2);
        let result = complete_with_retries(&client, request).await;
        assert!(result.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_model_set_fallback_and_override() {
        let mut raw = HashMap::new();
        raw.insert("contradiction_judge".to_string(), "judge-mini".to_string());
        let set = ModelSet::from_map("default-model", &raw).unwrap();
        assert_eq!(set.model_for(ModelTask::ContradictionJudge), "judge-mini");
        assert_eq!(set.model_for(ModelTask::Extraction), "default-model");
    }

    #[test]
    fn test_model_set_rejects_unknown_task() {
        let mut raw = HashMap::new();
        raw.insert("summarizer".to_string(), "m".to_string());
        assert!(ModelSet::from_map("d", &raw).is_err());
    }
}
