//! Generation coordinator.
//!
//! One actor task owns the conversation and the generation state machine:
//!
//! ```text
//!   Idle ──send──► AwaitingSession ──session ok──► Generating ──finished──► Idle
//!                        │                             │
//!                        └──── failure ──► Failed ◄────┘ (error)
//!                                            │
//!                                            └──► Idle
//! ```
//!
//! Commands arrive over a channel from any number of [`CoordinatorHandle`]s.
//! Session establishment and streaming run in a per-cycle task which reports
//! back to the actor with events tagged by cycle id, so every transcript
//! mutation happens on the actor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::conversation::{ChatTurn, ConversationStore, TurnId};
use crate::engine::{
    EngineError, FinalOutput, InputMessage, ModelState, PartialOutput, SamplingMethod,
    SessionConfig, SessionInput, StopReason,
};
use crate::messaging::{Message, MessageSender};
use crate::models::ModelTracker;
use crate::session::{SessionError, SessionManager};

/// Default system instruction sent ahead of every prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Default generated-token ceiling per reply.
pub const DEFAULT_TOKENS_LIMIT: u32 = 1024;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Idle,
    AwaitingSession,
    Generating,
    Failed,
}

/// When the "currently generating" flag drops back to false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratingFlagPolicy {
    /// At the terminal event of the cycle.
    #[default]
    OnCompletion,
    /// At the first partial output (legacy behaviour).
    OnFirstPartial,
}

/// Generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("A generation is already in progress")]
    ConcurrentGeneration,

    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("{0}")]
    Stream(String),

    #[error("Generation coordinator has shut down")]
    CoordinatorClosed,
}

/// Result of a `send` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted { user: TurnId, assistant: TurnId },
    Rejected(GenerationError),
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted { .. })
    }
}

/// Fixed request parameters for each generation.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub model_id: String,
    pub session: SessionConfig,
    pub system_prompt: String,
    pub tokens_limit: u32,
    pub sampling: SamplingMethod,
    pub flag_policy: GeneratingFlagPolicy,
}

impl CoordinatorConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            session: SessionConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tokens_limit: DEFAULT_TOKENS_LIMIT,
            sampling: SamplingMethod::Argmax,
            flag_policy: GeneratingFlagPolicy::default(),
        }
    }
}

enum Command {
    Send {
        prompt: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    Prepare,
    Cancel,
    Invalidate,
    Clear,
}

enum CycleEvent {
    SessionReady,
    SessionFailed(SessionError),
    Partial(String),
    Finished(Result<FinalOutput, EngineError>),
}

struct Tagged {
    cycle: u64,
    event: CycleEvent,
}

struct OpenCycle {
    id: u64,
    turn: TurnId,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl OpenCycle {
    fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Builder for the coordinator actor.
pub struct GenerationCoordinator {
    config: CoordinatorConfig,
    sessions: SessionManager,
    model_rx: watch::Receiver<ModelState>,
    bus: Option<MessageSender>,
}

impl GenerationCoordinator {
    pub fn new(config: CoordinatorConfig, sessions: SessionManager, tracker: &ModelTracker) -> Self {
        Self {
            config,
            sessions,
            model_rx: tracker.subscribe(),
            bus: None,
        }
    }

    /// Publish every transition on `bus`.
    pub fn with_bus(mut self, bus: MessageSender) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Start the actor on the current runtime.
    pub fn spawn(self) -> CoordinatorHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (conversation_tx, conversation_rx) = watch::channel(Arc::new(Vec::new()));
        let (phase_tx, phase_rx) = watch::channel(GenerationPhase::Idle);
        let (generating_tx, generating_rx) = watch::channel(false);

        let last_model_state = self.model_rx.borrow().clone();
        let actor = Actor {
            config: Arc::new(self.config),
            sessions: Arc::new(Mutex::new(self.sessions)),
            store: ConversationStore::new(),
            cycle: None,
            prepare: None,
            next_cycle: 0,
            event_tx,
            conversation_tx,
            phase_tx,
            generating_tx,
            bus: self.bus,
            last_model_state,
        };
        tokio::spawn(actor.run(command_rx, event_rx, self.model_rx));

        CoordinatorHandle {
            commands: command_tx,
            conversation: conversation_rx,
            phase: phase_rx,
            generating: generating_rx,
        }
    }
}

/// Cloneable front door to the coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    conversation: watch::Receiver<Arc<Vec<ChatTurn>>>,
    phase: watch::Receiver<GenerationPhase>,
    generating: watch::Receiver<bool>,
}

impl CoordinatorHandle {
    /// Submit a prompt. Rejected when empty or while a cycle is in flight.
    pub async fn send(&self, prompt: impl Into<String>) -> SendOutcome {
        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            prompt: prompt.into(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return SendOutcome::Rejected(GenerationError::CoordinatorClosed);
        }
        rx.await
            .unwrap_or(SendOutcome::Rejected(GenerationError::CoordinatorClosed))
    }

    /// Establish the session ahead of the first prompt.
    pub fn prepare_session(&self) -> Result<(), GenerationError> {
        self.command(Command::Prepare)
    }

    /// Stop the in-flight generation, keeping whatever text it produced.
    pub fn cancel(&self) -> Result<(), GenerationError> {
        self.command(Command::Cancel)
    }

    /// Drop the current session; the next send loads a fresh one.
    pub fn invalidate_session(&self) -> Result<(), GenerationError> {
        self.command(Command::Invalidate)
    }

    /// Reset the conversation.
    pub fn clear(&self) -> Result<(), GenerationError> {
        self.command(Command::Clear)
    }

    fn command(&self, command: Command) -> Result<(), GenerationError> {
        self.commands
            .send(command)
            .map_err(|_| GenerationError::CoordinatorClosed)
    }

    /// Snapshot of the transcript.
    pub fn conversation(&self) -> Arc<Vec<ChatTurn>> {
        self.conversation.borrow().clone()
    }

    pub fn is_generating(&self) -> bool {
        *self.generating.borrow()
    }

    pub fn phase(&self) -> GenerationPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_conversation(&self) -> watch::Receiver<Arc<Vec<ChatTurn>>> {
        self.conversation.clone()
    }

    pub fn subscribe_generating(&self) -> watch::Receiver<bool> {
        self.generating.clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<GenerationPhase> {
        self.phase.clone()
    }

    /// Wait until no cycle is in flight.
    pub async fn wait_idle(&self) {
        let mut phase = self.phase.clone();
        let _ = phase.wait_for(|p| *p == GenerationPhase::Idle).await;
    }
}

struct Actor {
    config: Arc<CoordinatorConfig>,
    sessions: Arc<Mutex<SessionManager>>,
    store: ConversationStore,
    cycle: Option<OpenCycle>,
    prepare: Option<JoinHandle<()>>,
    next_cycle: u64,
    event_tx: mpsc::UnboundedSender<Tagged>,
    conversation_tx: watch::Sender<Arc<Vec<ChatTurn>>>,
    phase_tx: watch::Sender<GenerationPhase>,
    generating_tx: watch::Sender<bool>,
    bus: Option<MessageSender>,
    last_model_state: ModelState,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Tagged>,
        mut model_rx: watch::Receiver<ModelState>,
    ) {
        let mut watching_model = true;
        loop {
            tokio::select! {
                biased;
                Some(tagged) = events.recv() => self.on_event(tagged).await,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                exit = cycle_exit(&mut self.cycle) => {
                    // The task may have finished after `events` was polled.
                    while let Ok(tagged) = events.try_recv() {
                        self.on_event(tagged).await;
                    }
                    self.on_cycle_exit(exit);
                }
                changed = model_rx.changed(), if watching_model => {
                    if changed.is_err() {
                        watching_model = false;
                        continue;
                    }
                    let state = model_rx.borrow_and_update().clone();
                    self.on_model_state(state).await;
                }
            }
        }

        if let Some(cycle) = self.cycle.take() {
            cycle.stop();
        }
        if let Some(task) = self.prepare.take() {
            task.abort();
        }
        debug!("generation coordinator stopped");
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { prompt, reply } => {
                let outcome = self.on_send(prompt);
                let _ = reply.send(outcome);
            }
            Command::Prepare => self.on_prepare(),
            Command::Cancel => self.on_cancel(),
            Command::Invalidate => self.invalidate("session was invalidated").await,
            Command::Clear => self.on_clear(),
        }
    }

    fn on_send(&mut self, prompt: String) -> SendOutcome {
        if prompt.trim().is_empty() {
            debug!("empty prompt ignored");
            return SendOutcome::Rejected(GenerationError::EmptyPrompt);
        }
        if let Some(cycle) = &self.cycle {
            debug!(cycle = cycle.id, "prompt rejected while generating");
            return SendOutcome::Rejected(GenerationError::ConcurrentGeneration);
        }

        let user = self.store.append_user(prompt.clone());
        self.announce_turn(user);
        let assistant = self.store.append_assistant_placeholder();
        self.announce_turn(assistant);

        self.next_cycle += 1;
        let id = self.next_cycle;
        self.set_phase(GenerationPhase::AwaitingSession);
        self.set_generating(true);

        let cancel = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_cycle(
            id,
            prompt,
            self.config.clone(),
            self.sessions.clone(),
            cancel.clone(),
            self.event_tx.clone(),
        ));
        self.cycle = Some(OpenCycle {
            id,
            turn: assistant,
            cancel,
            task,
        });
        info!(cycle = id, model = %self.config.model_id, "generation started");

        SendOutcome::Accepted { user, assistant }
    }

    fn on_prepare(&mut self) {
        if self.prepare.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("session preparation already running");
            return;
        }
        let sessions = self.sessions.clone();
        let config = self.config.clone();
        let bus = self.bus.clone();
        self.prepare = Some(tokio::spawn(async move {
            let mut manager = sessions.lock().await;
            if let Err(e) = manager
                .ensure_session(&config.model_id, &config.session)
                .await
            {
                warn!(model = %config.model_id, error = %e, "could not prepare session");
                if let Some(bus) = &bus {
                    bus.error(format!("Could not load {}: {}", config.model_id, e));
                }
            }
        }));
    }

    fn on_cancel(&mut self) {
        let Some(cycle) = self.cycle.take() else {
            debug!("cancel with nothing in flight");
            return;
        };
        cycle.stop();
        info!(cycle = cycle.id, "generation cancelled");
        self.set_phase(GenerationPhase::Idle);
        self.set_generating(false);
    }

    /// Close any open cycle and drop the session.
    ///
    /// Every task that can hold the session lock is aborted first, so the
    /// lock is released as soon as those tasks are dropped.
    async fn invalidate(&mut self, reason: &str) {
        if self.cycle.is_some() {
            self.fail_cycle(reason);
        }
        if let Some(task) = self.prepare.take() {
            task.abort();
        }
        self.sessions.lock().await.invalidate();
    }

    fn on_clear(&mut self) {
        if let Some(cycle) = self.cycle.take() {
            cycle.stop();
            self.set_phase(GenerationPhase::Idle);
            self.set_generating(false);
        }
        self.store.clear();
        self.publish_conversation();
        self.publish(Message::ConversationCleared);
        info!("conversation cleared");
    }

    async fn on_model_state(&mut self, state: ModelState) {
        let previous = std::mem::replace(&mut self.last_model_state, state.clone());
        if previous.is_downloaded() && !state.is_downloaded() {
            info!(model = %self.config.model_id, state = %state, "model no longer available");
            self.invalidate("model is no longer available").await;
        }
    }

    // ---------------------------------------------------------------------
    // Cycle events
    // ---------------------------------------------------------------------

    async fn on_event(&mut self, tagged: Tagged) {
        let Some(cycle) = &self.cycle else {
            debug!(cycle = tagged.cycle, "event for closed cycle dropped");
            return;
        };
        if cycle.id != tagged.cycle {
            debug!(cycle = tagged.cycle, open = cycle.id, "stale cycle event dropped");
            return;
        }
        let turn = cycle.turn;

        match tagged.event {
            CycleEvent::SessionReady => {
                self.set_phase(GenerationPhase::Generating);
            }
            CycleEvent::SessionFailed(e) => {
                error!(cycle = tagged.cycle, error = %e, "session unavailable");
                self.fail_cycle(&e.to_string());
            }
            CycleEvent::Partial(text) => {
                self.write_turn(turn, text);
                if self.config.flag_policy == GeneratingFlagPolicy::OnFirstPartial {
                    self.set_generating(false);
                }
            }
            CycleEvent::Finished(Ok(output)) => {
                if !output.text.is_empty() {
                    self.write_turn(turn, output.text);
                }
                match output.stop_reason {
                    StopReason::TokenLimit => {
                        warn!(cycle = tagged.cycle, "reply truncated at token limit")
                    }
                    reason => debug!(cycle = tagged.cycle, ?reason, "generation finished"),
                }
                self.close_cycle();
                self.set_phase(GenerationPhase::Idle);
                self.set_generating(false);
            }
            CycleEvent::Finished(Err(e)) => {
                let lost = matches!(e, EngineError::SessionLost(_));
                let e = GenerationError::Stream(e.to_string());
                error!(cycle = tagged.cycle, error = %e, "generation failed");
                if lost {
                    // The engine dropped the session; the next send loads a new one.
                    self.invalidate(&e.to_string()).await;
                } else {
                    self.fail_cycle(&e.to_string());
                }
            }
        }
    }

    fn on_cycle_exit(&mut self, exit: Result<(), JoinError>) {
        let Some(cycle) = self.cycle.as_ref() else {
            return;
        };
        match exit {
            Err(e) if e.is_panic() => {
                error!(cycle = cycle.id, "generation task panicked")
            }
            _ => error!(cycle = cycle.id, "generation task ended without a result"),
        }
        self.fail_cycle("generation task ended unexpectedly");
    }

    /// Write `Error: <message>` into the open turn and return to idle.
    fn fail_cycle(&mut self, message: &str) {
        let Some(cycle) = self.close_cycle() else {
            return;
        };
        self.write_turn(cycle.turn, format!("Error: {}", message));
        self.set_phase(GenerationPhase::Failed);
        self.set_phase(GenerationPhase::Idle);
        self.set_generating(false);
    }

    fn close_cycle(&mut self) -> Option<OpenCycle> {
        let cycle = self.cycle.take()?;
        cycle.stop();
        Some(cycle)
    }

    // ---------------------------------------------------------------------
    // Observables
    // ---------------------------------------------------------------------

    fn write_turn(&mut self, id: TurnId, text: String) {
        if self.store.update_text(id, text.clone()) {
            self.publish_conversation();
            self.publish(Message::turn_updated(id, text));
        }
    }

    fn announce_turn(&mut self, id: TurnId) {
        self.publish_conversation();
        if let Some(turn) = self.store.get(id) {
            self.publish(Message::turn_appended(turn.clone()));
        }
    }

    fn publish_conversation(&self) {
        self.conversation_tx.send_replace(Arc::new(self.store.all()));
    }

    fn set_phase(&self, phase: GenerationPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!(from = ?previous, to = ?phase, "generation phase");
            self.publish(Message::generation(phase, *self.generating_tx.borrow()));
        }
    }

    fn set_generating(&self, generating: bool) {
        let changed = self.generating_tx.send_if_modified(|current| {
            let changed = *current != generating;
            *current = generating;
            changed
        });
        if changed {
            self.publish(Message::generation(*self.phase_tx.borrow(), generating));
        }
    }

    fn publish(&self, message: Message) {
        if let Some(bus) = &self.bus {
            bus.publish(message);
        }
    }
}

/// Resolves when the open cycle's task exits; pending when there is none.
async fn cycle_exit(cycle: &mut Option<OpenCycle>) -> Result<(), JoinError> {
    match cycle {
        Some(cycle) => (&mut cycle.task).await,
        None => std::future::pending().await,
    }
}

/// One generation: establish the session, then stream the reply.
async fn run_cycle(
    cycle: u64,
    prompt: String,
    config: Arc<CoordinatorConfig>,
    sessions: Arc<Mutex<SessionManager>>,
    cancel: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<Tagged>,
) {
    let emit = |event: CycleEvent| {
        let _ = events.send(Tagged { cycle, event });
    };

    let session = {
        let mut manager = sessions.lock().await;
        manager
            .ensure_session(&config.model_id, &config.session)
            .await
    };
    let session = match session {
        Ok(session) => session,
        Err(e) => {
            emit(CycleEvent::SessionFailed(e));
            return;
        }
    };
    emit(CycleEvent::SessionReady);

    let input = SessionInput::Messages(vec![
        InputMessage::system(config.system_prompt.clone()),
        InputMessage::user(prompt),
    ]);
    let partial_tx = events.clone();
    let mut on_partial = move |partial: &PartialOutput| {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        partial_tx
            .send(Tagged {
                cycle,
                event: CycleEvent::Partial(partial.text.clone()),
            })
            .is_ok()
    };

    let result = session
        .run(input, config.tokens_limit, config.sampling, &mut on_partial)
        .await;
    emit(CycleEvent::Finished(result));
}
