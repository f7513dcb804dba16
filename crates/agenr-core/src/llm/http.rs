//! HTTP model client
//!
//! Speaks the messages-API shape: POST `{base_url}/v1/messages` with
//! `{model, system, messages, tools, temperature, max_tokens}`, content
//! blocks of `text` and `tool_use` in the response. Status codes are
//! classified into the retryable/fatal split the retry policy expects.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChatRequest, ChatResponse, ChatRole, LlmError, ModelClient, ToolCall};

/// Bounded per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpModelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn build_body(request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }

    fn parse_response(value: &Value) -> Result<ChatResponse, LlmError> {
        let blocks = value
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::Malformed("missing content array".to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let arguments = block.get("input").cloned().unwrap_or(Value::Null);
                    tool_calls.push(ToolCall { name, arguments });
                }
                _ => {}
            }
        }

        Ok(ChatResponse { text, tool_calls })
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return LlmError::Transient(format!("HTTP {status}"));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return LlmError::Auth(format!("HTTP {status}"));
        }
        if status == reqwest::StatusCode::BAD_REQUEST && body.contains("temperature") {
            return LlmError::TemperatureUnsupported(body.to_string());
        }
        LlmError::Fatal(format!("HTTP {status}: {body}"))
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = Self::build_body(&request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LlmError::Transient(e.to_string())
                } else {
                    LlmError::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &text));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        Self::parse_response(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolSpec;

    #[test]
    fn test_build_body_shape() {
        let mut request = ChatRequest::new("test-model");
        request.system = Some("be terse".to_string());
        request.messages.push(super::super::ChatMessage::user("hi"));
        request.temperature = Some(0.3);
        request.tools.push(ToolSpec {
            name: "submit_knowledge".to_string(),
            description: "submit".to_string(),
            input_schema: json!({"type": "object"}),
        });

        let body = HttpModelClient::build_body(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["tools"][0]["name"], "submit_knowledge");
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_build_body_omits_absent_fields() {
        let request = ChatRequest::new("m");
        let body = HttpModelClient::build_body(&request);
        assert!(body.get("system").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_response_text_and_tool_use() {
        let value = json!({
            "content": [
                {"type": "text", "text": "thinking..."},
                {"type": "tool_use", "name": "submit_knowledge", "input": {"entries": []}},
            ]
        });
        let response = HttpModelClient::parse_response(&value).unwrap();
        assert_eq!(response.text, "thinking...");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "submit_knowledge");
    }

    #[test]
    fn test_parse_response_missing_content() {
        let value = json!({"oops": true});
        assert!(matches!(
            HttpModelClient::parse_response(&value),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn test_classify_errors() {
        use reqwest::StatusCode;
        assert!(matches!(
            HttpModelClient::classify_error(StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::Transient(_)
        ));
        assert!(matches!(
            HttpModelClient::classify_error(StatusCode::BAD_GATEWAY, ""),
            LlmError::Transient(_)
        ));
        assert!(matches!(
            HttpModelClient::classify_error(StatusCode::UNAUTHORIZED, ""),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            HttpModelClient::classify_error(
                StatusCode::BAD_REQUEST,
                "temperature is not supported"
            ),
            LlmError::TemperatureUnsupported(_)
        ));
        assert!(matches!(
            HttpModelClient::classify_error(StatusCode::BAD_REQUEST, "bad schema"),
            LlmError::Fatal(_)
        ));
    }
}
