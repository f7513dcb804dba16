//! Embeddings
//!
//! The embedding provider is an external collaborator: the core only needs
//! `text -> fixed-dimension vector`. The default implementation is a remote
//! HTTP client; the `local-embeddings` feature adds a fully local fastembed
//! backend. The dimension is fixed at schema init and enforced on every write.

mod remote;

#[cfg(feature = "local-embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "local-embeddings")))]
mod local;

pub use remote::RemoteEmbedder;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

use async_trait::async_trait;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default embedding dimension. Matches the Matryoshka truncation used by the
/// local backend (768 -> 256) and the remote default.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Maximum text length sent to a provider (characters; truncated if longer)
pub const MAX_TEXT_LENGTH: usize = 8192;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    /// Vector length disagrees with the schema constant. Fatal per request;
    /// never retried.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Transient provider failure (timeout, 429, 5xx); caller may retry
    #[error("embedding provider failure: {0}")]
    Provider(String),
    /// Invalid input (empty text)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Missing or rejected credentials
    #[error("embedding auth failure: {0}")]
    Auth(String),
}

// ============================================================================
// EMBEDDER TRAIT
// ============================================================================

/// Text-to-vector oracle. Implementations must return vectors of exactly
/// `dimensions()` length.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimension
    fn dimensions(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed a batch; the default just loops
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

// ============================================================================
// VECTOR HELPERS
// ============================================================================

/// Serialize a vector to little-endian bytes for BLOB storage
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a BLOB back into a vector. Returns `None` on a torn blob.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// L2-normalize in place
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector {
            *x /= norm;
        }
    }
}

/// Check a provider result against the expected dimension
pub fn check_dimensions(vector: &[f32], expected: usize) -> Result<(), EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            got: vector.len(),
        });
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_vector_bytes_roundtrip() {
        let original = vec![1.5_f32, -2.5, 3.25, 0.0];
        let bytes = vector_to_bytes(&original);
        let restored = vector_from_bytes(&bytes).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_vector_from_torn_blob() {
        assert!(vector_from_bytes(&[0, 1, 2]).is_none());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0_f32, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 0.0001);
        assert!((v[1] - 0.8).abs() < 0.0001);
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(&[0.0; 4], 4).is_ok());
        let err = check_dimensions(&[0.0; 3], 4).unwrap_err();
        match err {
            EmbedError::DimensionMismatch { expected, got } => {
                assert_eq!(expected, 4);
                assert_eq!(got, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
