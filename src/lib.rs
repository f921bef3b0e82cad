//! Localchat Library
//!
//! Core of a chat client for a language model served by a local inference
//! engine (Ollama). The front end is a terminal REPL, but every piece of
//! state is observable through watch channels and the [`messaging`] bus so
//! other front ends can drive the same core.
//!
//! ## Main Components
//!
//! - [`engine`] - Engine abstraction and the Ollama adapter
//! - [`models`] - Tracks availability and download progress of one model
//! - [`session`] - Lazily creates and caches the engine session
//! - [`chat`] - Conversation transcript and the generation coordinator
//! - [`messaging`] - Broadcast bus of state changes
//! - [`config`] - Configuration file and XDG paths
//! - [`cli`] - Command-line interface (REPL, commands, runner)
//!
//! ## Quick Start
//!
//! ```ignore
//! use localchat::{AppConfig, ChatApp, OllamaEngine};
//!
//! let config = AppConfig::default();
//! let app = ChatApp::start(&config, Arc::new(OllamaEngine::new(&config.base_url)));
//! app.startup().await?;
//! app.chat.send("Why is the sky blue?").await;
//! app.chat.wait_idle().await;
//! ```

pub mod app;
pub mod chat;
pub mod cli;
pub mod config;
pub mod engine;
pub mod messaging;
pub mod models;
pub mod session;

// Re-export commonly used types
pub use app::ChatApp;
pub use chat::{
    ChatTurn, CoordinatorConfig, CoordinatorHandle, GenerationCoordinator, GenerationError,
    GenerationPhase, SendOutcome,
};
pub use config::{AppConfig, ConfigError, XdgDirs};
pub use engine::{EngineError, InferenceEngine, ModelState, OllamaEngine};
pub use messaging::{Message, MessageBus, MessageSender};
pub use models::{ModelTracker, RegistryError};
pub use session::{SessionError, SessionManager, SessionPhase};
