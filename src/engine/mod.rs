//! Contract consumed from the external inference engine.
//!
//! The engine owns model download, weight loading, tokenization and
//! sampling. This crate only talks to it through [`InferenceEngine`] and
//! [`EngineSession`]:
//!
//! ```text
//!   ModelTracker ──► InferenceEngine::{update_registry, state, download, pause}
//!   SessionManager ─► InferenceEngine::create_session ─► EngineSession::load
//!   Coordinator ────► EngineSession::run (partials via callback)
//! ```
//!
//! [`ollama::OllamaEngine`] is the shipped implementation.

use std::sync::Arc;

use async_trait::async_trait;

pub mod ollama;
mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use ollama::{OllamaEngine, DEFAULT_OLLAMA_URL};
pub use types::*;

/// Callback receiving cumulative partial output. Return `false` to stop.
pub type PartialCallback<'a> = dyn FnMut(&PartialOutput) -> bool + Send + 'a;

/// Registry and session factory of an inference engine.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Reload registry metadata.
    async fn update_registry(&self) -> Result<RegistrySnapshot, EngineError>;

    /// Latest known state for a model, `None` before the registry is loaded.
    fn state(&self, model_id: &str) -> Option<ModelState>;

    /// Start (or resume) downloading a model. Returns immediately.
    fn download(&self, model_id: &str);

    /// Pause a running download. Returns immediately.
    fn pause(&self, model_id: &str);

    /// Create an unloaded session bound to `model_id`.
    fn create_session(&self, model_id: &str) -> Result<Arc<dyn EngineSession>, EngineError>;
}

/// A generation session bound to one model.
#[async_trait]
pub trait EngineSession: Send + Sync {
    fn model_id(&self) -> &str;

    /// Load weights and apply `config`.
    async fn load(&self, config: &SessionConfig) -> Result<(), EngineError>;

    /// Generate a response, reporting cumulative text through `on_partial`.
    async fn run(
        &self,
        input: SessionInput,
        tokens_limit: u32,
        sampling: SamplingMethod,
        on_partial: &mut PartialCallback<'_>,
    ) -> Result<FinalOutput, EngineError>;
}
