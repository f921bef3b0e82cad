//! Types shared across the inference engine boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Availability of one model artifact as reported by the engine's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    /// Registry not loaded yet.
    Unknown,
    NotDownloaded,
    Downloading { progress: f32 },
    Paused { progress: f32 },
    Downloaded,
    Error { message: String },
}

impl ModelState {
    /// Whether a session can be created against the model.
    pub fn is_downloaded(&self) -> bool {
        matches!(self, ModelState::Downloaded)
    }

    /// Download progress in `[0, 1]`, if a download has started.
    pub fn progress(&self) -> Option<f32> {
        match self {
            ModelState::Downloading { progress } | ModelState::Paused { progress } => {
                Some(*progress)
            }
            _ => None,
        }
    }

    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            ModelState::Unknown => "Unknown",
            ModelState::NotDownloaded => "Not downloaded",
            ModelState::Downloading { .. } => "Downloading",
            ModelState::Paused { .. } => "Paused",
            ModelState::Downloaded => "Downloaded",
            ModelState::Error { .. } => "Error",
        }
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Downloading { progress } | ModelState::Paused { progress } => {
                write!(f, "{} ({:.1}%)", self.label(), progress * 100.0)
            }
            ModelState::Error { message } => write!(f, "Error: {}", message),
            other => f.write_str(other.label()),
        }
    }
}

/// One entry of the engine's model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Metadata returned by a registry refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub models: Vec<RegistryEntry>,
}

impl RegistrySnapshot {
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }
}

/// Behavioural preset forwarded to the engine when a session loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    General,
    #[default]
    Summarization,
    Classification,
}

/// Sampling seed option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingSeed {
    #[default]
    Default,
    Custom(u64),
}

/// Context window option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextLength {
    #[default]
    Default,
    Custom(u32),
}

/// Options applied when a session is loaded. Forwarded verbatim to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub preset: Preset,
    #[serde(default)]
    pub sampling_seed: SamplingSeed,
    #[serde(default)]
    pub context_length: ContextLength,
}

/// Role of an input message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Input to a streaming run.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Text(String),
    Messages(Vec<InputMessage>),
}

impl SessionInput {
    /// Flatten into chat messages; bare text becomes a single user message.
    pub fn into_messages(self) -> Vec<InputMessage> {
        match self {
            SessionInput::Text(text) => vec![InputMessage::user(text)],
            SessionInput::Messages(messages) => messages,
        }
    }
}

/// Token selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum SamplingMethod {
    /// Always pick the most likely token.
    #[default]
    Argmax,
    Stochastic {
        temperature: f32,
        top_k: Option<u32>,
        top_p: Option<f32>,
    },
}

/// Cumulative text produced so far by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialOutput {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Finished,
    TokenLimit,
    /// The partial-output callback asked to stop.
    Cancelled,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutput {
    pub text: String,
    pub stop_reason: StopReason,
}

/// Errors reported by the inference engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine not reachable at {0}")]
    Unavailable(String),
    #[error("Engine API error: {0}")]
    Api(String),
    #[error("Model '{0}' not found")]
    ModelNotFound(String),
    #[error("Session lost: {0}")]
    SessionLost(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Other(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Api(format!("invalid response: {}", e))
    }
}
