//! Ollama adapter for the inference engine contract.
//!
//! Talks to a locally running `ollama serve` over its HTTP API:
//!
//! - `GET  /api/tags`     registry
//! - `POST /api/pull`     download (NDJSON progress)
//! - `POST /api/generate` session load (empty prompt loads weights)
//! - `POST /api/chat`     streaming run (NDJSON deltas)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    ContextLength, EngineError, EngineSession, FinalOutput, InferenceEngine, InputMessage,
    ModelState, PartialCallback, PartialOutput, RegistryEntry, RegistrySnapshot, SamplingMethod,
    SamplingSeed, SessionConfig, SessionInput, StopReason,
};

/// Default Ollama server URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// How long Ollama keeps a loaded model resident.
const KEEP_ALIVE: &str = "30m";

/// Canonical registry key: Ollama lists untagged models as `name:latest`.
fn normalize_id(model_id: &str) -> String {
    if model_id.contains(':') {
        model_id.to_string()
    } else {
        format!("{}:latest", model_id)
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl PullLine {
    fn progress(&self) -> Option<f32> {
        match (self.completed, self.total) {
            (Some(done), Some(total)) if total > 0 => {
                Some((done as f64 / total as f64).clamp(0.0, 1.0) as f32)
            }
            _ => None,
        }
    }
}

/// Generation options understood by Ollama.
#[derive(Debug, Default, PartialEq, Serialize)]
struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl ModelOptions {
    fn from_config(config: &SessionConfig) -> Self {
        Self {
            num_ctx: match config.context_length {
                ContextLength::Default => None,
                ContextLength::Custom(n) => Some(n),
            },
            seed: match config.sampling_seed {
                SamplingSeed::Default => None,
                SamplingSeed::Custom(seed) => Some(seed),
            },
            ..Self::default()
        }
    }

    fn with_sampling(mut self, sampling: SamplingMethod) -> Self {
        match sampling {
            SamplingMethod::Argmax => {
                self.temperature = Some(0.0);
                self.top_k = Some(1);
            }
            SamplingMethod::Stochastic {
                temperature,
                top_k,
                top_p,
            } => {
                self.temperature = Some(temperature);
                self.top_k = top_k;
                self.top_p = top_p;
            }
        }
        self
    }
}

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
    keep_alive: &'a str,
    stream: bool,
    options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<InputMessage>,
    stream: bool,
    keep_alive: &'a str,
    options: ModelOptions,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatDelta>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// NDJSON framing
// =============================================================================

/// Splits a byte stream into newline-delimited lines.
#[derive(Debug, Default)]
struct NdjsonLines {
    buffer: Vec<u8>,
}

impl NdjsonLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Trailing line without a newline terminator.
    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

// =============================================================================
// Connection
// =============================================================================

#[derive(Clone)]
struct Connection {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Connection {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, EngineError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                EngineError::Unavailable(self.base_url.clone())
            } else {
                EngineError::from(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(EngineError::Api(format!("{}: {}", status, detail)))
    }
}

// =============================================================================
// Engine
// =============================================================================

struct PullTask {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    conn: Connection,
    states: RwLock<HashMap<String, ModelState>>,
    registry_loaded: AtomicBool,
    pulls: Mutex<HashMap<String, PullTask>>,
    next_pull: AtomicU64,
}

impl Inner {
    fn set_state(&self, key: &str, state: ModelState) {
        if let Ok(mut states) = self.states.write() {
            states.insert(key.to_string(), state);
        }
    }

    fn current(&self, key: &str) -> Option<ModelState> {
        self.states.read().ok().and_then(|s| s.get(key).cloned())
    }

    /// Fold a fresh tag listing into the known states.
    fn merge_registry(&self, listed: &[String]) {
        let Ok(mut states) = self.states.write() else {
            return;
        };
        states.retain(|id, state| match state {
            ModelState::Downloaded => listed.contains(id),
            _ => true,
        });
        for id in listed {
            let in_progress = matches!(
                states.get(id),
                Some(ModelState::Downloading { .. } | ModelState::Paused { .. })
            );
            if !in_progress {
                states.insert(id.clone(), ModelState::Downloaded);
            }
        }
    }

    async fn stream_pull(&self, key: &str) -> Result<(), EngineError> {
        let response = self
            .conn
            .send(
                self.conn
                    .post("/api/pull")
                    .json(&serde_json::json!({ "model": key, "stream": true })),
            )
            .await?;

        let mut lines = NdjsonLines::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                self.apply_pull_line(key, &line)?;
            }
        }
        if let Some(line) = lines.finish() {
            self.apply_pull_line(key, &line)?;
        }
        Ok(())
    }

    fn apply_pull_line(&self, key: &str, line: &str) -> Result<(), EngineError> {
        let parsed: PullLine = serde_json::from_str(line)?;
        if let Some(error) = parsed.error {
            return Err(EngineError::Api(error));
        }
        if let Some(progress) = parsed.progress() {
            self.set_state(key, ModelState::Downloading { progress });
        }
        if parsed.status.as_deref() == Some("success") {
            self.set_state(key, ModelState::Downloaded);
        }
        Ok(())
    }

    fn finish_pull(&self, key: &str, pull_id: u64) {
        if let Ok(mut pulls) = self.pulls.lock() {
            if pulls.get(key).map(|p| p.id) == Some(pull_id) {
                pulls.remove(key);
            }
        }
    }
}

/// Inference engine backed by a local Ollama server.
#[derive(Clone)]
pub struct OllamaEngine {
    inner: Arc<Inner>,
}

impl OllamaEngine {
    /// Create an engine talking to `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_connection(Connection {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        })
    }

    /// Send `key` as a bearer token on every request.
    pub fn with_api_key(self, key: Option<String>) -> Self {
        let mut conn = self.inner.conn.clone();
        conn.api_key = key;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn,
                states: RwLock::new(HashMap::new()),
                registry_loaded: AtomicBool::new(false),
                pulls: Mutex::new(HashMap::new()),
                next_pull: AtomicU64::new(0),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.conn.base_url
    }
}

impl Default for OllamaEngine {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL)
    }
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn update_registry(&self) -> Result<RegistrySnapshot, EngineError> {
        let response = self.inner.conn.send(self.inner.conn.get("/api/tags")).await?;
        let tags: TagsResponse = serde_json::from_str(&response.text().await?)?;

        let listed: Vec<String> = tags.models.iter().map(|m| normalize_id(&m.name)).collect();
        self.inner.merge_registry(&listed);
        self.inner.registry_loaded.store(true, Ordering::SeqCst);
        debug!(models = listed.len(), "Ollama registry refreshed");

        Ok(RegistrySnapshot {
            models: tags
                .models
                .into_iter()
                .map(|m| RegistryEntry {
                    id: normalize_id(&m.name),
                    size_bytes: m.size,
                })
                .collect(),
        })
    }

    fn state(&self, model_id: &str) -> Option<ModelState> {
        let key = normalize_id(model_id);
        match self.inner.current(&key) {
            Some(state) => Some(state),
            None if self.inner.registry_loaded.load(Ordering::SeqCst) => {
                Some(ModelState::NotDownloaded)
            }
            None => None,
        }
    }

    fn download(&self, model_id: &str) {
        let key = normalize_id(model_id);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(model = %key, "download requested outside of an async runtime");
            self.inner.set_state(
                &key,
                ModelState::Error {
                    message: "no async runtime available".to_string(),
                },
            );
            return;
        };
        let Ok(mut pulls) = self.inner.pulls.lock() else {
            return;
        };
        if pulls.get(&key).is_some_and(|p| !p.handle.is_finished()) {
            debug!(model = %key, "download already running");
            return;
        }

        let resume_from = self.state(&key).and_then(|s| s.progress()).unwrap_or(0.0);
        self.inner
            .set_state(&key, ModelState::Downloading { progress: resume_from });

        let pull_id = self.inner.next_pull.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let task_key = key.clone();
        let handle = runtime.spawn(async move {
            info!(model = %task_key, "pulling model");
            match inner.stream_pull(&task_key).await {
                Ok(()) => inner.set_state(&task_key, ModelState::Downloaded),
                Err(e) => {
                    warn!(model = %task_key, error = %e, "model pull failed");
                    inner.set_state(
                        &task_key,
                        ModelState::Error {
                            message: e.to_string(),
                        },
                    );
                }
            }
            inner.finish_pull(&task_key, pull_id);
        });
        pulls.insert(key, PullTask { id: pull_id, handle });
    }

    fn pause(&self, model_id: &str) {
        let key = normalize_id(model_id);
        let task = self.inner.pulls.lock().ok().and_then(|mut p| p.remove(&key));
        let Some(task) = task else {
            debug!(model = %key, "no download to pause");
            return;
        };
        task.handle.abort();
        if let Some(ModelState::Downloading { progress }) = self.inner.current(&key) {
            self.inner.set_state(&key, ModelState::Paused { progress });
            info!(model = %key, progress, "download paused");
        }
    }

    fn create_session(&self, model_id: &str) -> Result<Arc<dyn EngineSession>, EngineError> {
        Ok(Arc::new(OllamaSession {
            conn: self.inner.conn.clone(),
            model_id: normalize_id(model_id),
            config: RwLock::new(None),
        }))
    }
}

// =============================================================================
// Session
// =============================================================================

/// A model loaded in Ollama.
pub struct OllamaSession {
    conn: Connection,
    model_id: String,
    config: RwLock<Option<SessionConfig>>,
}

impl OllamaSession {
    fn loaded_config(&self) -> Result<SessionConfig, EngineError> {
        self.config
            .read()
            .ok()
            .and_then(|c| *c)
            .ok_or_else(|| EngineError::SessionLost("session is not loaded".to_string()))
    }
}

#[async_trait]
impl EngineSession for OllamaSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn load(&self, config: &SessionConfig) -> Result<(), EngineError> {
        debug!(model = %self.model_id, preset = ?config.preset, "loading session");
        let request = LoadRequest {
            model: &self.model_id,
            keep_alive: KEEP_ALIVE,
            stream: false,
            options: ModelOptions::from_config(config),
        };
        self.conn
            .send(self.conn.post("/api/generate").json(&request))
            .await
            .map_err(|e| match e {
                EngineError::Api(msg) if msg.starts_with("404") => {
                    EngineError::ModelNotFound(self.model_id.clone())
                }
                other => other,
            })?;

        if let Ok(mut slot) = self.config.write() {
            *slot = Some(*config);
        }
        info!(model = %self.model_id, "session loaded");
        Ok(())
    }

    async fn run(
        &self,
        input: SessionInput,
        tokens_limit: u32,
        sampling: SamplingMethod,
        on_partial: &mut PartialCallback<'_>,
    ) -> Result<FinalOutput, EngineError> {
        let config = self.loaded_config()?;
        let request = ChatRequest {
            model: &self.model_id,
            messages: input.into_messages(),
            stream: true,
            keep_alive: KEEP_ALIVE,
            options: ModelOptions {
                num_predict: Some(tokens_limit),
                ..ModelOptions::from_config(&config)
            }
            .with_sampling(sampling),
        };

        let response = self
            .conn
            .send(self.conn.post("/api/chat").json(&request))
            .await?;

        let mut text = String::new();
        let mut lines = NdjsonLines::default();
        let mut stream = response.bytes_stream();

        let mut ended = false;
        while !ended {
            let batch = match stream.next().await {
                Some(chunk) => lines.push(&chunk?),
                None => {
                    ended = true;
                    lines.finish().into_iter().collect()
                }
            };

            for line in batch {
                let parsed: ChatLine = serde_json::from_str(&line)?;
                if let Some(error) = parsed.error {
                    return Err(EngineError::Api(error));
                }
                if let Some(delta) = parsed.message {
                    if !delta.content.is_empty() {
                        text.push_str(&delta.content);
                        if !on_partial(&PartialOutput { text: text.clone() }) {
                            debug!(model = %self.model_id, "generation stopped by caller");
                            return Ok(FinalOutput {
                                text,
                                stop_reason: StopReason::Cancelled,
                            });
                        }
                    }
                }
                if parsed.done {
                    let stop_reason = match parsed.done_reason.as_deref() {
                        Some("length") => StopReason::TokenLimit,
                        _ => StopReason::Finished,
                    };
                    return Ok(FinalOutput { text, stop_reason });
                }
            }
        }

        Err(EngineError::SessionLost(
            "stream ended before completion".to_string(),
        ))
    }
}
