//! Message types for core-to-UI communication.

use serde::{Deserialize, Serialize};

use crate::chat::{ChatTurn, GenerationPhase, TurnId};
use crate::engine::ModelState;
use crate::session::SessionPhase;

/// Message levels for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A text notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// The tracked model changed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStateMessage {
    pub model_id: String,
    pub state: ModelState,
}

/// The session manager changed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub model_id: Option<String>,
    pub phase: SessionPhase,
}

/// A turn was added to the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnAppendedMessage {
    pub turn: ChatTurn,
}

/// The text of an existing turn was replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnUpdatedMessage {
    pub id: TurnId,
    pub text: String,
}

/// Generation coordinator transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMessage {
    pub phase: GenerationPhase,
    pub is_generating: bool,
}

/// Any message type (for serialization).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Text(TextMessage),
    ModelState(ModelStateMessage),
    Session(SessionMessage),
    TurnAppended(TurnAppendedMessage),
    TurnUpdated(TurnUpdatedMessage),
    Generation(GenerationMessage),
    ConversationCleared,
}

impl Message {
    /// Create an info message.
    pub fn info(text: impl Into<String>) -> Self {
        Self::Text(TextMessage {
            level: MessageLevel::Info,
            text: text.into(),
        })
    }

    /// Create a success message.
    pub fn success(text: impl Into<String>) -> Self {
        Self::Text(TextMessage {
            level: MessageLevel::Success,
            text: text.into(),
        })
    }

    /// Create a warning message.
    pub fn warning(text: impl Into<String>) -> Self {
        Self::Text(TextMessage {
            level: MessageLevel::Warning,
            text: text.into(),
        })
    }

    /// Create an error message.
    pub fn error(text: impl Into<String>) -> Self {
        Self::Text(TextMessage {
            level: MessageLevel::Error,
            text: text.into(),
        })
    }

    pub fn model_state(model_id: &str, state: ModelState) -> Self {
        Self::ModelState(ModelStateMessage {
            model_id: model_id.to_string(),
            state,
        })
    }

    pub fn session(model_id: Option<&str>, phase: SessionPhase) -> Self {
        Self::Session(SessionMessage {
            model_id: model_id.map(str::to_string),
            phase,
        })
    }

    pub fn turn_appended(turn: ChatTurn) -> Self {
        Self::TurnAppended(TurnAppendedMessage { turn })
    }

    pub fn turn_updated(id: TurnId, text: impl Into<String>) -> Self {
        Self::TurnUpdated(TurnUpdatedMessage {
            id,
            text: text.into(),
        })
    }

    pub fn generation(phase: GenerationPhase, is_generating: bool) -> Self {
        Self::Generation(GenerationMessage {
            phase,
            is_generating,
        })
    }
}
