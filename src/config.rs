//! Runtime configuration: JSON file plus environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generation::ThrottleConfig;
use crate::interpretation::ModelMetadata;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: String,
    pub model: String,
    pub prompt_version: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1".to_string(),
            prompt_version: 0,
        }
    }
}

impl ModelSettings {
    /// Stamps metadata for a result generated today.
    pub fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            provider: self.provider.clone(),
            model: self.model.clone(),
            prompt_version: self.prompt_version,
            date: chrono::Utc::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Slice budget in bytes.
    pub max_section_length: usize,
    /// Ceiling for a fully rendered prompt, in bytes.
    pub max_request_length: usize,
    pub max_output_tokens: u32,
    pub max_parse_attempts: u32,
    pub token_block_size: usize,
    pub wait_between_calls_secs: u64,
    pub call_padding_secs: u64,
    pub wait_reference_length: usize,
    pub max_generation_retries: u32,
    pub top_k: usize,
    pub top_interactions: usize,
    pub model: ModelSettings,
    pub cache_path: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_section_length: 80_000,
            max_request_length: 490_000,
            max_output_tokens: 3_000,
            max_parse_attempts: 3,
            token_block_size: 30_000_000,
            wait_between_calls_secs: 60,
            call_padding_secs: 2,
            wait_reference_length: 3_500_000,
            max_generation_retries: 2,
            top_k: 20,
            top_interactions: 100,
            model: ModelSettings::default(),
            cache_path: PathBuf::from(".legiscore_cache.sqlite"),
        }
    }
}

impl HarnessConfig {
    /// Loads `path` when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.with_env_overrides(|var| std::env::var(var).ok())
    }

    /// Applies `LEGISCORE_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LEGISCORE_CACHE_PATH") {
            self.cache_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("LEGISCORE_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = lookup("LEGISCORE_MAX_SECTION_LENGTH") {
            self.max_section_length = parse_env("LEGISCORE_MAX_SECTION_LENGTH", v)?;
        }
        if let Some(v) = lookup("LEGISCORE_MAX_REQUEST_LENGTH") {
            self.max_request_length = parse_env("LEGISCORE_MAX_REQUEST_LENGTH", v)?;
        }
        Ok(self)
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            wait_between_calls: Duration::from_secs(self.wait_between_calls_secs),
            reference_length: self.wait_reference_length,
            padding: Duration::from_secs(self.call_padding_secs),
            max_retries: self.max_generation_retries,
            ..ThrottleConfig::default()
        }
    }
}

fn parse_env(var: &'static str, value: String) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}
