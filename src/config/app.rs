//! Application configuration loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chat::{
    CoordinatorConfig, GeneratingFlagPolicy, DEFAULT_SYSTEM_PROMPT, DEFAULT_TOKENS_LIMIT,
};
use crate::engine::{SamplingMethod, SessionConfig, DEFAULT_OLLAMA_URL};

/// Model used when nothing else is configured.
pub const DEFAULT_MODEL_ID: &str = "llama3.2:1b";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Everything the binary needs to wire the core together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model_id: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub tokens_limit: u32,
    pub sampling: SamplingMethod,
    pub session: SessionConfig,
    pub generating_flag: GeneratingFlagPolicy,
    pub registry_poll_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            api_key: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tokens_limit: DEFAULT_TOKENS_LIMIT,
            sampling: SamplingMethod::Argmax,
            session: SessionConfig::default(),
            generating_flag: GeneratingFlagPolicy::default(),
            registry_poll_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), model = %config.model_id, "config loaded");
        Ok(config)
    }

    /// Reject values the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::Invalid("model_id must not be empty".into()));
        }
        if self.tokens_limit == 0 {
            return Err(ConfigError::Invalid("tokens_limit must be positive".into()));
        }
        if self.registry_poll_ms == 0 {
            return Err(ConfigError::Invalid("registry_poll_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn registry_poll_interval(&self) -> Duration {
        Duration::from_millis(self.registry_poll_ms)
    }

    /// Request parameters for the generation coordinator.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            model_id: self.model_id.clone(),
            session: self.session,
            system_prompt: self.system_prompt.clone(),
            tokens_limit: self.tokens_limit,
            sampling: self.sampling,
            flag_policy: self.generating_flag,
        }
    }
}
