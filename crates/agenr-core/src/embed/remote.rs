//! Remote HTTP embedder
//!
//! Talks to an embeddings endpoint with the common `{model, input}` ->
//! `{data: [{embedding: [...]}]}` shape. The API key is resolved once from
//! config/env and held for process lifetime.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{check_dimensions, Embedder, EmbedError, MAX_TEXT_LENGTH};

/// Request timeout. Every external call must be bounded (spec: callers
/// classify timeouts as transient).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Remote embedding client
pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            dimensions,
        }
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "dimensions": self.dimensions,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Provider(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EmbedError::Auth(format!("provider returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbedError::Provider(format!("HTTP {status}: {text}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Provider(format!("malformed response: {e}")))?;

        let mut out = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            check_dimensions(&item.embedding, self.dimensions)?;
            out.push(item.embedding);
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::InvalidInput("text cannot be empty".to_string()));
        }
        let text = truncate_chars(text, MAX_TEXT_LENGTH);
        let mut vectors = self.request(&[text.as_ref()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Provider("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let truncated: Vec<std::borrow::Cow<'_, str>> =
            texts.iter().map(|t| truncate_chars(t, MAX_TEXT_LENGTH)).collect();
        let refs: Vec<&str> = truncated.iter().map(|t| t.as_ref()).collect();
        let vectors = self.request(&refs).await?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::Provider(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

/// UTF-8 safe truncation by character count
fn truncate_chars(s: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    if s.chars().count() <= max_chars {
        std::borrow::Cow::Borrowed(s)
    } else {
        std::borrow::Cow::Owned(s.chars().take(max_chars).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_short_is_borrowed() {
        let s = "short";
        assert!(matches!(truncate_chars(s, 10), std::borrow::Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let s = "héllo wörld";
        let t = truncate_chars(s, 4);
        assert_eq!(t.as_ref(), "héll");
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let embedder = RemoteEmbedder::new("http://localhost:0", "m", "key", 4);
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, EmbedError::InvalidInput(_)));
    }
}
