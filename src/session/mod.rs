//! Session management for localchat.
//!
//! A session is a loaded binding between this process and one model inside
//! the inference engine. At most one exists at a time; the manager owns it
//! and lends out the handle for the duration of a generation.
//!
//! ## State Machine
//!
//! ```text
//!   Absent ──ensure──► Creating ──load ok──► Loaded
//!     ▲                   │                    │
//!     └──── failure ──────┘                    │
//!     └──────────────── invalidate ────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use localchat::session::SessionManager;
//!
//! let mut manager = SessionManager::new(engine, tracker);
//! let session = manager.ensure_session("llama3.2:1b", &SessionConfig::default()).await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::engine::{EngineSession, InferenceEngine, ModelState, SessionConfig};
use crate::messaging::{Message, MessageSender};
use crate::models::ModelTracker;

/// Shared handle to a loaded engine session.
pub type SessionHandle = Arc<dyn EngineSession>;

/// Error type for session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Model '{0}' is not downloaded")]
    ModelNotReady(String),

    #[error("{0}")]
    LoadFailed(String),

    #[error("Failed to create session: {0}")]
    Create(String),
}

/// Lifecycle phase of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Absent,
    Creating,
    Loaded,
}

struct BoundSession {
    model_id: String,
    handle: SessionHandle,
}

/// Resets `Creating` back to `Absent` if establishment fails or is
/// abandoned midway.
struct PhaseGuard<'a> {
    phase: &'a mut SessionPhase,
    bus: &'a Option<MessageSender>,
    armed: bool,
}

impl PhaseGuard<'_> {
    fn settle(mut self, phase: SessionPhase) {
        *self.phase = phase;
        self.armed = false;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.phase = SessionPhase::Absent;
            publish(self.bus, None, SessionPhase::Absent);
        }
    }
}

/// Owns the single engine session.
pub struct SessionManager {
    engine: Arc<dyn InferenceEngine>,
    tracker: ModelTracker,
    current: Option<BoundSession>,
    phase: SessionPhase,
    bus: Option<MessageSender>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, tracker: ModelTracker) -> Self {
        Self {
            engine,
            tracker,
            current: None,
            phase: SessionPhase::Absent,
            bus: None,
        }
    }

    /// Publish phase changes on `bus`.
    pub fn with_bus(mut self, bus: MessageSender) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Return a loaded session for `model_id`, creating and loading one if
    /// needed.
    ///
    /// Repeated calls for the same model return the same handle without
    /// loading again. A session bound to another model is dropped first.
    pub async fn ensure_session(
        &mut self,
        model_id: &str,
        config: &SessionConfig,
    ) -> Result<SessionHandle, SessionError> {
        if let Some(bound) = &self.current {
            if bound.model_id == model_id {
                debug!(model = %model_id, "reusing loaded session");
                return Ok(bound.handle.clone());
            }
            info!(from = %bound.model_id, to = %model_id, "switching session model");
            self.invalidate();
        }

        let state = self.tracker.state_of(model_id);
        if state != ModelState::Downloaded {
            debug!(model = %model_id, state = %state, "session requested for unavailable model");
            return Err(SessionError::ModelNotReady(model_id.to_string()));
        }

        publish(&self.bus, Some(model_id), SessionPhase::Creating);
        let guard = PhaseGuard {
            phase: &mut self.phase,
            bus: &self.bus,
            armed: true,
        };
        *guard.phase = SessionPhase::Creating;

        let handle = match self.engine.create_session(model_id) {
            Ok(handle) => handle,
            Err(e) => {
                error!(model = %model_id, error = %e, "session creation failed");
                drop(guard);
                return Err(SessionError::Create(e.to_string()));
            }
        };

        debug!(
            model = %model_id,
            preset = ?config.preset,
            seed = ?config.sampling_seed,
            context = ?config.context_length,
            "loading session"
        );
        if let Err(e) = handle.load(config).await {
            error!(model = %model_id, error = %e, "session load failed");
            drop(guard);
            return Err(SessionError::LoadFailed(e.to_string()));
        }

        guard.settle(SessionPhase::Loaded);
        self.current = Some(BoundSession {
            model_id: model_id.to_string(),
            handle: handle.clone(),
        });
        info!(model = %model_id, "session loaded");
        publish(&self.bus, Some(model_id), SessionPhase::Loaded);
        Ok(handle)
    }

    /// Drop the current session, if any.
    pub fn invalidate(&mut self) {
        let dropped = self.current.take();
        let was = self.phase;
        self.phase = SessionPhase::Absent;
        if let Some(bound) = dropped {
            info!(model = %bound.model_id, "session invalidated");
        }
        if was != SessionPhase::Absent {
            publish(&self.bus, None, SessionPhase::Absent);
        }
    }
}

fn publish(bus: &Option<MessageSender>, model_id: Option<&str>, phase: SessionPhase) {
    if let Some(bus) = bus {
        bus.publish(Message::session(model_id, phase));
    }
}
