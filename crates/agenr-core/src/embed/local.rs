//! Local embeddings via fastembed (ONNX inference, no API key)
//!
//! Uses nomic-embed-text-v1.5 (768d) truncated to 256d via Matryoshka
//! representation learning: the first N dims of the output ARE a valid
//! N-dimensional embedding with minimal quality loss.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

use super::{normalize, Embedder, EmbedError, DEFAULT_DIMENSIONS, MAX_TEXT_LENGTH};

static EMBEDDING_MODEL_RESULT: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Cache directory for downloaded model files.
/// AGENR_FASTEMBED_CACHE overrides; otherwise the platform cache dir.
fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("AGENR_FASTEMBED_CACHE") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("ai", "agenr", "agenr") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/agenr/fastembed");
    }

    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbedError> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = get_cache_dir();

        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create cache directory {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "Failed to initialize nomic-embed-text-v1.5: {}. \
                Ensure ONNX runtime is available and model files can be downloaded.",
                e
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbedError::Provider(format!("model lock poisoned: {e}"))),
        Err(err) => Err(EmbedError::Provider(err.clone())),
    }
}

/// Truncate to `DEFAULT_DIMENSIONS` and L2-normalize
fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > DEFAULT_DIMENSIONS {
        vector.truncate(DEFAULT_DIMENSIONS);
    }
    normalize(&mut vector);
    vector
}

/// Fully local embedder
pub struct LocalEmbedder {
    _unused: (),
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self { _unused: () }
    }

    /// Eagerly load (and if necessary download) the model
    pub fn init(&self) -> Result<(), EmbedError> {
        let _model = get_model()?;
        Ok(())
    }

    pub fn model_name(&self) -> &'static str {
        "nomic-ai/nomic-embed-text-v1.5"
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::InvalidInput("text cannot be empty".to_string()));
        }
        // ONNX inference is CPU-bound and synchronous under the hood
        let owned: String = text.chars().take(MAX_TEXT_LENGTH).collect();
        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut model = get_model()?;
            model
                .embed(vec![owned.as_str()], None)
                .map_err(|e| EmbedError::Provider(e.to_string()))
        })
        .await
        .map_err(|e| EmbedError::Provider(format!("embedding task failed: {e}")))??;

        vectors
            .into_iter()
            .next()
            .map(matryoshka_truncate)
            .ok_or_else(|| EmbedError::Provider("no embedding generated".to_string()))
    }
}
