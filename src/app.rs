//! Wiring of the chat core.
//!
//! `ChatApp` builds the object graph once, at process start, and hands out
//! references to whichever front end drives it:
//!
//! ```text
//!   engine ──► ModelTracker ──► SessionManager ──► GenerationCoordinator
//!                  │                                      │
//!                  └──────────────► MessageBus ◄──────────┘
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chat::{CoordinatorHandle, GenerationCoordinator};
use crate::config::AppConfig;
use crate::engine::{InferenceEngine, ModelState};
use crate::messaging::MessageBus;
use crate::models::{ModelTracker, RegistryError};
use crate::session::SessionManager;

/// The running chat core.
pub struct ChatApp {
    pub tracker: ModelTracker,
    pub chat: CoordinatorHandle,
    pub bus: MessageBus,
    poller: JoinHandle<()>,
}

impl ChatApp {
    /// Build the core around `engine` and start its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &AppConfig, engine: Arc<dyn InferenceEngine>) -> Self {
        let bus = MessageBus::new();
        let tracker =
            ModelTracker::new(engine.clone(), config.model_id.clone()).with_bus(bus.sender());
        let sessions = SessionManager::new(engine, tracker.clone()).with_bus(bus.sender());
        let chat = GenerationCoordinator::new(config.coordinator_config(), sessions, &tracker)
            .with_bus(bus.sender())
            .spawn();
        let poller = tracker.watch_changes(config.registry_poll_interval());

        debug!(model = %config.model_id, "chat core started");
        Self {
            tracker,
            chat,
            bus,
            poller,
        }
    }

    /// Load the registry and, when the model is already on disk, warm up
    /// the session so the first prompt does not pay for the load.
    pub async fn startup(&self) -> Result<ModelState, RegistryError> {
        self.tracker.refresh_registry().await?;
        let state = self.tracker.current_state();
        if state.is_downloaded() {
            info!(model = %self.tracker.model_id(), "model present, preparing session");
            // Fails only after the coordinator has shut down.
            let _ = self.chat.prepare_session();
        }
        Ok(state)
    }

    pub fn model_id(&self) -> &str {
        self.tracker.model_id()
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
