//! Availability tracking for the configured model.
//!
//! `ModelTracker` never invents a state: it reads what the engine's registry
//! reports and forwards download/pause commands. Changes are observed by
//! polling ([`ModelTracker::poll`]) and fanned out through a watch channel
//! and the message bus.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::{EngineError, InferenceEngine, ModelState, RegistrySnapshot};
use crate::messaging::{Message, MessageSender};

/// Registry refresh failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Failed to load model registry: {0}")]
    Unavailable(#[from] EngineError),
}

#[derive(Debug, Default)]
struct RefreshStatus {
    loaded_once: bool,
    last_error: Option<String>,
    snapshot: Option<RegistrySnapshot>,
}

/// Tracks the lifecycle state of one model artifact.
#[derive(Clone)]
pub struct ModelTracker {
    engine: Arc<dyn InferenceEngine>,
    model_id: String,
    status: Arc<RwLock<RefreshStatus>>,
    state_tx: Arc<watch::Sender<ModelState>>,
    bus: Option<MessageSender>,
}

impl ModelTracker {
    pub fn new(engine: Arc<dyn InferenceEngine>, model_id: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ModelState::Unknown);
        Self {
            engine,
            model_id: model_id.into(),
            status: Arc::new(RwLock::new(RefreshStatus::default())),
            state_tx: Arc::new(state_tx),
            bus: None,
        }
    }

    /// Publish state changes on `bus`.
    pub fn with_bus(mut self, bus: MessageSender) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn registry_loaded(&self) -> bool {
        self.status.read().map(|s| s.loaded_once).unwrap_or(false)
    }

    /// Latest state of the tracked model; `Unknown` until the first refresh.
    pub fn current_state(&self) -> ModelState {
        self.state_of(&self.model_id)
    }

    /// Latest state of any model id known to the engine.
    pub fn state_of(&self, model_id: &str) -> ModelState {
        if !self.registry_loaded() {
            return ModelState::Unknown;
        }
        self.engine.state(model_id).unwrap_or(ModelState::Unknown)
    }

    /// State to show the user: a failed first refresh surfaces as `Error`.
    pub fn display_state(&self) -> ModelState {
        if let Ok(status) = self.status.read() {
            if !status.loaded_once {
                if let Some(message) = &status.last_error {
                    return ModelState::Error {
                        message: message.clone(),
                    };
                }
            }
        }
        self.current_state()
    }

    /// Last registry snapshot, if any refresh succeeded.
    pub fn snapshot(&self) -> Option<RegistrySnapshot> {
        self.status.read().ok().and_then(|s| s.snapshot.clone())
    }

    /// Reload registry metadata from the engine.
    ///
    /// On failure the previous state is kept; calling again is the retry path.
    pub async fn refresh_registry(&self) -> Result<RegistrySnapshot, RegistryError> {
        debug!(model = %self.model_id, "refreshing model registry");
        match self.engine.update_registry().await {
            Ok(snapshot) => {
                if let Ok(mut status) = self.status.write() {
                    status.loaded_once = true;
                    status.last_error = None;
                    status.snapshot = Some(snapshot.clone());
                }
                info!(
                    model = %self.model_id,
                    known_models = snapshot.models.len(),
                    "model registry loaded"
                );
                self.poll();
                Ok(snapshot)
            }
            Err(e) => {
                error!(model = %self.model_id, error = %e, "model registry refresh failed");
                if let Ok(mut status) = self.status.write() {
                    status.last_error = Some(e.to_string());
                }
                let err = RegistryError::from(e);
                if !self.registry_loaded() {
                    if let Some(bus) = &self.bus {
                        bus.publish(Message::model_state(&self.model_id, self.display_state()));
                    }
                }
                Err(err)
            }
        }
    }

    /// Ask the engine to download the tracked model. Returns immediately.
    pub fn request_download(&self) {
        info!(model = %self.model_id, "download requested");
        self.engine.download(&self.model_id);
        self.poll();
    }

    /// Ask the engine to pause a running download. Returns immediately.
    pub fn pause_download(&self) {
        info!(model = %self.model_id, "pause requested");
        self.engine.pause(&self.model_id);
        self.poll();
    }

    /// Observe state changes of the tracked model.
    pub fn subscribe(&self) -> watch::Receiver<ModelState> {
        self.state_tx.subscribe()
    }

    /// Re-read the engine state and notify observers if it changed.
    ///
    /// Returns the new state when it differs from the last observed one.
    pub fn poll(&self) -> Option<ModelState> {
        let latest = self.current_state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == latest {
                false
            } else {
                *current = latest.clone();
                true
            }
        });
        if !changed {
            return None;
        }
        debug!(model = %self.model_id, state = %latest, "model state changed");
        if let Some(bus) = &self.bus {
            bus.publish(Message::model_state(&self.model_id, latest.clone()));
        }
        Some(latest)
    }

    /// Poll every `interval` until the returned task is aborted.
    pub fn watch_changes(&self, interval: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracker.poll();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::ScriptedEngine;
    use crate::messaging::MessageBus;

    const MODEL: &str = "llama3.2:1b";

    fn tracker_for(engine: &ScriptedEngine) -> ModelTracker {
        ModelTracker::new(Arc::new(engine.clone()), MODEL)
    }

    // =========================================================================
    // State Tests
    // =========================================================================

    #[test]
    fn test_unknown_before_refresh() {
        let engine = ScriptedEngine::with_downloaded(MODEL);
        let tracker = tracker_for(&engine);
        assert_eq!(tracker.current_state(), ModelState::Unknown);
    }

    #[tokio::test]
    async fn test_refresh_reflects_engine_state() {
        let engine = ScriptedEngine::with_downloaded(MODEL);
        let tracker = tracker_for(&engine);

        let snapshot = tracker.refresh_registry().await.unwrap();
        assert!(snapshot.contains(MODEL));
        assert_eq!(tracker.current_state(), ModelState::Downloaded);
        assert_eq!(tracker.snapshot(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_missing_model_stays_unknown() {
        let engine = ScriptedEngine::new();
        let tracker = tracker_for(&engine);
        tracker.refresh_registry().await.unwrap();
        assert_eq!(tracker.current_state(), ModelState::Unknown);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_prior_state() {
        let engine = ScriptedEngine::with_downloaded(MODEL);
        let tracker = tracker_for(&engine);
        tracker.refresh_registry().await.unwrap();

        engine.push_registry_result(Err(EngineError::Unavailable("http://x".into())));
        let err = tracker.refresh_registry().await.unwrap_err();

        assert_eq!(
            err,
            RegistryError::Unavailable(EngineError::Unavailable("http://x".into()))
        );
        assert_eq!(tracker.current_state(), ModelState::Downloaded);
        assert_eq!(tracker.display_state(), ModelState::Downloaded);
    }

    #[tokio::test]
    async fn test_failed_first_refresh_displays_error_then_retry_recovers() {
        let engine = ScriptedEngine::with_downloaded(MODEL);
        let tracker = tracker_for(&engine);

        engine.push_registry_result(Err(EngineError::Other("offline".into())));
        assert!(tracker.refresh_registry().await.is_err());
        assert_eq!(tracker.current_state(), ModelState::Unknown);
        assert_eq!(
            tracker.display_state(),
            ModelState::Error {
                message: "offline".into()
            }
        );

        tracker.refresh_registry().await.unwrap();
        assert_eq!(tracker.display_state(), ModelState::Downloaded);
    }

    // =========================================================================
    // Download Lifecycle Tests
    // =========================================================================

    #[tokio::test]
    async fn test_download_lifecycle_in_order() {
        let engine = ScriptedEngine::new();
        engine.set_state(MODEL, ModelState::NotDownloaded);
        let bus = MessageBus::new();
        let mut rx = bus.subscribe();
        let tracker = tracker_for(&engine).with_bus(bus.sender());

        tracker.refresh_registry().await.unwrap();
        assert_eq!(tracker.current_state(), ModelState::NotDownloaded);

        tracker.request_download();
        assert_eq!(engine.commands(), vec![format!("download:{}", MODEL)]);

        let mut observed = vec![tracker.current_state()];
        for state in [
            ModelState::Downloading { progress: 0.4 },
            ModelState::Downloading { progress: 0.9 },
            ModelState::Downloaded,
        ] {
            engine.set_state(MODEL, state);
            tracker.poll();
            observed.push(tracker.current_state());
        }

        let expected = vec![
            ModelState::NotDownloaded,
            ModelState::Downloading { progress: 0.4 },
            ModelState::Downloading { progress: 0.9 },
            ModelState::Downloaded,
        ];
        assert_eq!(observed, expected);

        let published: Vec<ModelState> = rx
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                Message::ModelState(s) => Some(s.state),
                _ => None,
            })
            .collect();
        assert_eq!(published, expected);
    }

    #[tokio::test]
    async fn test_pause_forwards_command() {
        let engine = ScriptedEngine::new();
        engine.set_state(MODEL, ModelState::Downloading { progress: 0.3 });
        let tracker = tracker_for(&engine);
        tracker.refresh_registry().await.unwrap();

        tracker.pause_download();
        engine.set_state(MODEL, ModelState::Paused { progress: 0.3 });

        assert_eq!(engine.commands(), vec![format!("pause:{}", MODEL)]);
        assert_eq!(tracker.poll(), Some(ModelState::Paused { progress: 0.3 }));
        assert_eq!(tracker.poll(), None);
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let engine = ScriptedEngine::with_downloaded(MODEL);
        let tracker = tracker_for(&engine);
        let mut rx = tracker.subscribe();

        tracker.refresh_registry().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ModelState::Downloaded);
    }

    #[tokio::test]
    async fn test_watch_changes_polls() {
        let engine = ScriptedEngine::new();
        engine.set_state(MODEL, ModelState::Downloading { progress: 0.1 });
        let tracker = tracker_for(&engine);
        tracker.refresh_registry().await.unwrap();
        let mut rx = tracker.subscribe();
        rx.borrow_and_update();

        let task = tracker.watch_changes(Duration::from_millis(5));
        engine.set_state(MODEL, ModelState::Downloaded);

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), ModelState::Downloaded);
        task.abort();
    }
}
