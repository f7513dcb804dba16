//! Configuration
//!
//! JSON config at `<config_dir>/agenr/config.json`, deserialized with
//! serde defaults so a missing file means stock settings. Secrets come
//! from the environment first (`AGENR_API_KEY`, `AGENR_EMBED_API_KEY`) and
//! are resolved once for process lifetime. Malformed config is fatal at
//! startup only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::llm::ModelSet;
use crate::recall::RecallSettings;
use crate::signal::SignalConfig;
use crate::store::{DedupPolicy, StoreOptions};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Fallback model id when `models.<task>` has no override
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("config malformed: {0}")]
    Parse(String),
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSection {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    /// Overridden by AGENR_EMBED_API_KEY
    pub api_key: Option<String>,
    /// Use the local fastembed backend instead of the remote API
    pub local: bool,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: crate::embed::DEFAULT_DIMENSIONS,
            api_key: None,
            local: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupSection {
    pub online: bool,
    pub threshold: f64,
    pub aggressive: bool,
    pub auto_supersede_confidence: f64,
}

impl Default for DedupSection {
    fn default() -> Self {
        let policy = DedupPolicy::default();
        Self {
            online: true,
            threshold: policy.threshold,
            aggressive: policy.aggressive,
            auto_supersede_confidence: policy.auto_supersede_confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalsSection {
    pub min_importance: i64,
    pub max_per_signal: usize,
    pub cooldown_ms: u64,
    pub max_per_session: usize,
}

impl Default for SignalsSection {
    fn default() -> Self {
        let config = SignalConfig::default();
        Self {
            min_importance: config.min_importance,
            max_per_signal: config.max_per_signal,
            cooldown_ms: config.cooldown.as_millis() as u64,
            max_per_session: config.max_per_session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecallSection {
    pub session_start_budget: usize,
}

impl Default for RecallSection {
    fn default() -> Self {
        Self {
            session_start_budget: crate::recall::DEFAULT_SESSION_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchSection {
    pub interval_secs: u64,
    pub min_chunk_chars: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            interval_secs: crate::watch::DEFAULT_INTERVAL.as_secs(),
            min_chunk_chars: crate::watch::DEFAULT_MIN_CHUNK_CHARS,
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Override the platform-default database location
    pub db_path: Option<PathBuf>,
    /// Default LLM model id; `models.<task>` overrides per task
    pub default_model: Option<String>,
    /// Per-task model map; keys restricted to the known capability set
    pub models: HashMap<String, String>,
    /// Overridden by AGENR_API_KEY
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub embedding: EmbeddingSection,
    pub dedup: DedupSection,
    pub signals: SignalsSection,
    pub recall: RecallSection,
    pub watch: WatchSection,
}

impl Config {
    /// Default config path under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("ai", "agenr", "agenr")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from the default location; a missing file is stock settings
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific path, validating the model map
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        // Unknown model-task keys surface at startup, not at call time
        config.model_set()?;
        Ok(config)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var("AGENR_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn embed_api_key(&self) -> Option<String> {
        std::env::var("AGENR_EMBED_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.embedding.api_key.clone())
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or("https://api.anthropic.com")
    }

    pub fn model_set(&self) -> Result<ModelSet, ConfigError> {
        let default = self.default_model.as_deref().unwrap_or(DEFAULT_MODEL);
        ModelSet::from_map(default, &self.models).map_err(ConfigError::Invalid)
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy {
            threshold: self.dedup.threshold.clamp(0.0, 1.0),
            auto_supersede_confidence: self.dedup.auto_supersede_confidence.clamp(0.0, 1.0),
            aggressive: self.dedup.aggressive,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            force: false,
            online_dedup: self.dedup.online,
            dedup: self.dedup_policy(),
        }
    }

    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            min_importance: self.signals.min_importance,
            max_per_signal: self.signals.max_per_signal,
            cooldown: std::time::Duration::from_millis(self.signals.cooldown_ms),
            max_per_session: self.signals.max_per_session,
        }
    }

    pub fn recall_settings(&self) -> RecallSettings {
        RecallSettings {
            session_start_budget: self.recall.session_start_budget,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelTask;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.dedup.threshold, 0.85);
        assert_eq!(config.signals.min_importance, 7);
        assert_eq!(config.recall.session_start_budget, 2000);
        assert_eq!(config.watch.interval_secs, 300);
    }

    #[test]
    fn test_load_with_model_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "defaultModel": "big-model",
                "models": {"contradiction_judge": "small-model"},
                "dedup": {"threshold": 0.9}
            }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        let models = config.model_set().unwrap();
        assert_eq!(models.model_for(ModelTask::ContradictionJudge), "small-model");
        assert_eq!(models.model_for(ModelTask::Extraction), "big-model");
        assert_eq!(config.dedup.threshold, 0.9);
        // Unspecified sections keep defaults
        assert_eq!(config.signals.max_per_signal, 5);
    }

    #[test]
    fn test_unknown_model_task_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"models": {"summarizer": "m"}}"#).unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_policy_clamping() {
        let config = Config {
            dedup: DedupSection {
                threshold: 7.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.dedup_policy().threshold, 1.0);
    }
}
