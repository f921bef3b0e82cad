//! In-memory engine driven by test scripts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    EngineError, EngineSession, FinalOutput, InferenceEngine, ModelState, PartialCallback,
    PartialOutput, RegistryEntry, RegistrySnapshot, SamplingMethod, SessionConfig, SessionInput,
    StopReason,
};

/// Behaviour of one `run` call.
#[derive(Clone)]
pub struct RunScript {
    pub partials: Vec<String>,
    pub outcome: Result<StopReason, EngineError>,
    /// Run blocks on this before emitting anything.
    pub gate: Option<Arc<Notify>>,
    /// Run blocks on this after the partials, before finishing.
    pub hold: Option<Arc<Notify>>,
    pub panics: bool,
}

impl RunScript {
    pub fn partials(partials: &[&str]) -> Self {
        Self {
            partials: partials.iter().map(|s| s.to_string()).collect(),
            outcome: Ok(StopReason::Finished),
            gate: None,
            hold: None,
            panics: false,
        }
    }

    pub fn failing(partials: &[&str], error: EngineError) -> Self {
        Self {
            outcome: Err(error),
            ..Self::partials(partials)
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn held(mut self, hold: Arc<Notify>) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Run panics after its partials.
    pub fn panicking(partials: &[&str]) -> Self {
        Self {
            panics: true,
            ..Self::partials(partials)
        }
    }
}

/// Arguments captured from a `run` call.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub input: SessionInput,
    pub tokens_limit: u32,
    pub sampling: SamplingMethod,
}

#[derive(Default)]
struct Shared {
    states: Mutex<HashMap<String, ModelState>>,
    registry_results: Mutex<VecDeque<Result<RegistrySnapshot, EngineError>>>,
    load_results: Mutex<VecDeque<Result<(), EngineError>>>,
    load_gate: Mutex<Option<Arc<Notify>>>,
    runs: Mutex<VecDeque<RunScript>>,
    recorded_runs: Mutex<Vec<RecordedRun>>,
    commands: Mutex<Vec<String>>,
    created: AtomicUsize,
    loaded: AtomicUsize,
    stop_requests: AtomicUsize,
}

/// Engine whose every answer is scripted by the test.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose registry already lists `model_id` as downloaded.
    pub fn with_downloaded(model_id: &str) -> Self {
        let engine = Self::new();
        engine.set_state(model_id, ModelState::Downloaded);
        engine
    }

    pub fn set_state(&self, model_id: &str, state: ModelState) {
        self.shared
            .states
            .lock()
            .unwrap()
            .insert(model_id.to_string(), state);
    }

    pub fn push_registry_result(&self, result: Result<RegistrySnapshot, EngineError>) {
        self.shared.registry_results.lock().unwrap().push_back(result);
    }

    pub fn push_load_result(&self, result: Result<(), EngineError>) {
        self.shared.load_results.lock().unwrap().push_back(result);
    }

    /// Every following `load` waits on `gate`.
    pub fn gate_loads(&self, gate: Arc<Notify>) {
        *self.shared.load_gate.lock().unwrap() = Some(gate);
    }

    /// Let following loads complete immediately again.
    pub fn ungate_loads(&self) {
        *self.shared.load_gate.lock().unwrap() = None;
    }

    pub fn push_run(&self, script: RunScript) {
        self.shared.runs.lock().unwrap().push_back(script);
    }

    pub fn created_sessions(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.shared.loaded.load(Ordering::SeqCst)
    }

    /// Number of times a partial callback returned `false`.
    pub fn stop_requests(&self) -> usize {
        self.shared.stop_requests.load(Ordering::SeqCst)
    }

    pub fn recorded_runs(&self) -> Vec<RecordedRun> {
        self.shared.recorded_runs.lock().unwrap().clone()
    }

    /// `download:<id>` / `pause:<id>` in call order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn update_registry(&self) -> Result<RegistrySnapshot, EngineError> {
        let next = self.shared.registry_results.lock().unwrap().pop_front();
        match next {
            Some(result) => {
                if let Ok(snapshot) = &result {
                    let mut states = self.shared.states.lock().unwrap();
                    for entry in &snapshot.models {
                        states
                            .entry(entry.id.clone())
                            .or_insert(ModelState::Downloaded);
                    }
                }
                result
            }
            None => {
                let states = self.shared.states.lock().unwrap();
                Ok(RegistrySnapshot {
                    models: states
                        .keys()
                        .map(|id| RegistryEntry {
                            id: id.clone(),
                            size_bytes: None,
                        })
                        .collect(),
                })
            }
        }
    }

    fn state(&self, model_id: &str) -> Option<ModelState> {
        self.shared.states.lock().unwrap().get(model_id).cloned()
    }

    fn download(&self, model_id: &str) {
        self.shared
            .commands
            .lock()
            .unwrap()
            .push(format!("download:{}", model_id));
    }

    fn pause(&self, model_id: &str) {
        self.shared
            .commands
            .lock()
            .unwrap()
            .push(format!("pause:{}", model_id));
    }

    fn create_session(&self, model_id: &str) -> Result<Arc<dyn EngineSession>, EngineError> {
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            model_id: model_id.to_string(),
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedSession {
    model_id: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn load(&self, _config: &SessionConfig) -> Result<(), EngineError> {
        self.shared.loaded.fetch_add(1, Ordering::SeqCst);
        let gate = self.shared.load_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let result = self.shared.load_results.lock().unwrap().pop_front();
        result.unwrap_or(Ok(()))
    }

    async fn run(
        &self,
        input: SessionInput,
        tokens_limit: u32,
        sampling: SamplingMethod,
        on_partial: &mut PartialCallback<'_>,
    ) -> Result<FinalOutput, EngineError> {
        self.shared.recorded_runs.lock().unwrap().push(RecordedRun {
            input,
            tokens_limit,
            sampling,
        });
        let script = self
            .shared
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RunScript::partials(&[]));

        if let Some(gate) = &script.gate {
            gate.notified().await;
        }

        let mut last = String::new();
        for text in &script.partials {
            last = text.clone();
            let keep_going = on_partial(&PartialOutput { text: text.clone() });
            tokio::task::yield_now().await;
            if !keep_going {
                self.shared.stop_requests.fetch_add(1, Ordering::SeqCst);
                return Ok(FinalOutput {
                    text: last,
                    stop_reason: StopReason::Cancelled,
                });
            }
        }

        if let Some(hold) = &script.hold {
            hold.notified().await;
        }
        if script.panics {
            panic!("scripted engine crashed");
        }

        script.outcome.map(|stop_reason| FinalOutput {
            text: last,
            stop_reason,
        })
    }
}
