//! Runtime configuration.
//!
//! Two layers: API settings come from the environment (credentials are never
//! written to files), pipeline tuning comes from an optional TOML file. CLI
//! flags are applied on top by the binaries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::ranking::RankingOptions;

/// Default OpenAI-compatible API root (Volcengine Ark).
pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "doubao-embedding-text-240715";

/// Default chat model for refinement, decomposition and synthesis.
pub const DEFAULT_CHAT_MODEL: &str = "doubao-1-5-thinking-pro-250415";

/// Default number of texts per embedding request during ingestion.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Environment variables searched for the API key, in order.
pub const API_KEY_VARS: [&str; 3] = ["ARK_API_KEY", "DOUBAO_API_KEY", "OPENAI_API_KEY"];

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key found; set one of {}", API_KEY_VARS.join(", "))]
    MissingCredentials,

    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Endpoint, model and credential settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub batch_size: usize,
    pub embedding_timeout: Duration,
    pub chat_timeout: Duration,
    pub max_retries: usize,
}

impl ApiSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingCredentials` when no API key variable is set.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|name| non_empty(name))
            .ok_or(ConfigError::MissingCredentials)?;

        let batch_size = match non_empty("BATCH_SIZE") {
            None => DEFAULT_BATCH_SIZE,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, default = DEFAULT_BATCH_SIZE, "Invalid BATCH_SIZE, using default");
                    DEFAULT_BATCH_SIZE
                }
            },
        };

        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: non_empty("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            embedding_model: non_empty("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            chat_model: non_empty("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            batch_size,
            embedding_timeout: Duration::from_secs(30),
            chat_timeout: Duration::from_secs(300),
            max_retries: 3,
        })
    }
}

/// Tuning for the outline pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Abstract embedding store
    pub abstract_store: PathBuf,

    /// Full-text paragraph embedding store
    pub fulltext_store: PathBuf,

    /// Directory for block, aggregate and review files
    pub output_dir: PathBuf,

    /// Ranking depth for each keyword
    pub top_k_per_keyword: usize,

    pub abstract_threshold: f32,
    pub fulltext_threshold: f32,

    /// Cap on keywords taken from a refinement response
    pub max_refined_keywords: usize,

    /// Cap on reference passages per synthesis prompt
    pub max_references: usize,

    /// Run even when a store file is absent (its searches return nothing)
    pub allow_missing_stores: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            abstract_store: PathBuf::from("embeddings/abstract_embeddings.json"),
            fulltext_store: PathBuf::from("embeddings/fulltext_embeddings.json"),
            output_dir: PathBuf::from("outline_results"),
            top_k_per_keyword: 5,
            abstract_threshold: 0.1,
            fulltext_threshold: 0.2,
            max_refined_keywords: 10,
            max_references: 15,
            allow_missing_stores: false,
        }
    }
}

impl PipelineConfig {
    /// Load a TOML tuning file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string.
    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("abstract_threshold", self.abstract_threshold),
            ("fulltext_threshold", self.fulltext_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: "must be between -1.0 and 1.0".to_string(),
                });
            }
        }
        if self.top_k_per_keyword == 0 {
            return Err(ConfigError::Invalid {
                field: "top_k_per_keyword".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn abstract_options(&self) -> RankingOptions {
        RankingOptions::new(self.top_k_per_keyword, self.abstract_threshold)
    }

    pub fn fulltext_options(&self) -> RankingOptions {
        RankingOptions::new(self.top_k_per_keyword, self.fulltext_threshold)
    }
}
