//! Interactive REPL implementation.
//!
//! Reads lines with reedline, dispatches slash commands, and streams replies
//! from the generation coordinator to the terminal:
//!
//! - Plain text is sent as a prompt; the reply streams in place
//! - Ctrl+C during a reply cancels it, keeping the partial text
//! - `/download` shows a progress spinner until the download settles

use std::path::PathBuf;

use reedline::Signal;
use tracing::{debug, warn};

use super::commands::{help_text, ReplCommand};
use super::prompt::{create_reedline, ChatPrompt};
use super::render::{describe_state, StreamPrinter, TerminalRenderer};
use super::spinner::Spinner;
use crate::app::ChatApp;
use crate::chat::{GenerationPhase, SendOutcome};
use crate::engine::ModelState;
use crate::messaging::{BusError, Message, MessageReceiver};

/// Result of handling a command.
pub enum CommandResult {
    /// Continue the REPL loop
    Continue,
    /// Exit the REPL
    Exit,
}

/// How a prompt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Completed,
    Failed,
    Rejected,
}

/// REPL state.
pub struct Repl {
    app: ChatApp,
    renderer: TerminalRenderer,
    history: Option<PathBuf>,
    /// Background notices (e.g. a failed session load) shown before the next prompt.
    notices: MessageReceiver,
}

impl Repl {
    /// Create a new REPL driving `app`.
    pub fn new(app: ChatApp) -> Self {
        let notices = app.bus.subscribe();
        Self {
            app,
            renderer: TerminalRenderer::new(),
            history: None,
            notices,
        }
    }

    /// Persist line history to `path`.
    pub fn with_history(mut self, path: PathBuf) -> Self {
        self.history = Some(path);
        self
    }

    pub fn app(&self) -> &ChatApp {
        &self.app
    }

    /// Run the REPL loop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut line_editor = create_reedline(self.history.clone());

        loop {
            self.render_notices();
            let prompt = ChatPrompt::new(self.app.model_id(), self.app.tracker.display_state());

            match line_editor.read_line(&prompt) {
                Ok(Signal::Success(line)) => {
                    let Some(command) = ReplCommand::parse(&line) else {
                        continue;
                    };
                    match self.handle_command(command).await {
                        Ok(CommandResult::Exit) => break,
                        Ok(CommandResult::Continue) => {}
                        Err(e) => {
                            let _ = self.renderer.render(&Message::error(format!("Error: {}", e)));
                        }
                    }
                }
                Ok(Signal::CtrlC) => {
                    println!("^C");
                    continue;
                }
                Ok(Signal::CtrlD) => break,
                Err(err) => {
                    let _ = self
                        .renderer
                        .render(&Message::error(format!("Readline error: {}", err)));
                    break;
                }
            }
        }

        println!("Bye!");
        Ok(())
    }

    /// Handle one parsed line.
    pub async fn handle_command(&mut self, command: ReplCommand) -> anyhow::Result<CommandResult> {
        debug!(?command, "repl command");
        match command {
            ReplCommand::Help => println!("{}", help_text()),
            ReplCommand::Status => self.show_status()?,
            ReplCommand::Download => self.download().await?,
            ReplCommand::Pause => self.pause()?,
            ReplCommand::Refresh => self.refresh().await?,
            ReplCommand::Cancel => {
                if self.app.chat.phase() == GenerationPhase::Idle {
                    self.renderer.render(&Message::info("Nothing to cancel"))?;
                } else {
                    self.app.chat.cancel()?;
                }
            }
            ReplCommand::Clear => {
                self.app.chat.clear()?;
                self.renderer.render(&Message::ConversationCleared)?;
            }
            ReplCommand::Quit => return Ok(CommandResult::Exit),
            ReplCommand::Prompt(text) => {
                self.handle_prompt(&text).await?;
            }
            ReplCommand::Unknown(cmd) => {
                self.renderer.render(&Message::warning(format!(
                    "Unknown command: {} (try /help)",
                    cmd
                )))?;
            }
        }
        Ok(CommandResult::Continue)
    }

    /// Send `prompt` and stream the reply until the cycle ends.
    pub async fn handle_prompt(&mut self, prompt: &str) -> anyhow::Result<Reply> {
        // Subscribe before sending so no update is missed.
        let mut rx = self.app.bus.subscribe();
        let assistant = match self.app.chat.send(prompt).await {
            SendOutcome::Accepted { assistant, .. } => assistant,
            SendOutcome::Rejected(e) => {
                self.renderer.render(&Message::warning(e.to_string()))?;
                return Ok(Reply::Rejected);
            }
        };

        let mut spinner = Some(Spinner::new().start("Thinking..."));
        let mut printer = StreamPrinter::new();
        let mut reply = Reply::Completed;

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Ok(Message::TurnUpdated(update)) if update.id == assistant => {
                        if let Some(s) = spinner.take() {
                            s.stop().await;
                        }
                        printer.update(&update.text)?;
                    }
                    Ok(Message::Generation(g)) => {
                        if g.phase == GenerationPhase::Failed {
                            reply = Reply::Failed;
                        }
                        if g.phase == GenerationPhase::Idle {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(BusError::Lagged(skipped)) => warn!(skipped, "reply updates skipped"),
                    Err(BusError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    debug!("interrupt, cancelling reply");
                    self.app.chat.cancel()?;
                }
            }
        }

        if let Some(s) = spinner.take() {
            s.stop().await;
        }
        // Catch up on anything a lagging receiver skipped.
        let conversation = self.app.chat.conversation();
        if let Some(turn) = conversation.iter().find(|t| t.id == assistant) {
            printer.update(&turn.text)?;
        }
        printer.finish()?;
        Ok(reply)
    }

    /// Render text notices published since the last prompt.
    fn render_notices(&mut self) {
        for message in self.notices.drain() {
            if matches!(message, Message::Text(_)) {
                let _ = self.renderer.render(&message);
            }
        }
    }

    fn show_status(&self) -> anyhow::Result<()> {
        let state = self.app.tracker.display_state();
        let turns = self.app.chat.conversation().len();
        println!("{}", describe_state(self.app.model_id(), &state));
        match self.app.tracker.snapshot() {
            Some(snapshot) => println!("Registry: {} model(s)", snapshot.models.len()),
            None => println!("Registry: not loaded"),
        }
        println!("Generation: {:?}", self.app.chat.phase());
        println!("Turns: {}", turns);
        Ok(())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        match self.app.tracker.refresh_registry().await {
            Ok(snapshot) => {
                self.renderer.render(&Message::success(format!(
                    "Registry loaded: {} model(s)",
                    snapshot.models.len()
                )))?;
                self.show_status()
            }
            Err(e) => {
                self.renderer.render(&Message::error(e.to_string()))?;
                Ok(())
            }
        }
    }

    fn pause(&self) -> anyhow::Result<()> {
        match self.app.tracker.current_state() {
            ModelState::Downloading { .. } => {
                self.app.tracker.pause_download();
                self.renderer.render(&Message::info("Download paused"))?;
            }
            _ => self
                .renderer
                .render(&Message::warning("No download in progress"))?,
        }
        Ok(())
    }

    async fn download(&self) -> anyhow::Result<()> {
        let tracker = &self.app.tracker;
        if tracker.current_state().is_downloaded() {
            self.renderer
                .render(&Message::info(format!("{} is already downloaded", tracker.model_id())))?;
            return Ok(());
        }

        let mut rx = tracker.subscribe();
        tracker.request_download();
        let spinner = Spinner::new().start(format!("Downloading {}", tracker.model_id()));

        let settled = loop {
            let state = rx.borrow_and_update().clone();
            match state {
                ModelState::Downloading { progress } => spinner.set_progress(Some(progress)),
                ModelState::Downloaded | ModelState::Paused { .. } | ModelState::Error { .. } => {
                    break Some(state)
                }
                _ => {}
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break None;
                    }
                }
                _ = tokio::signal::ctrl_c() => break None,
            }
        };
        spinner.stop().await;

        match settled {
            Some(ModelState::Downloaded) => {
                self.renderer.render(&Message::success(format!(
                    "{} downloaded",
                    tracker.model_id()
                )))?;
                self.app.chat.prepare_session()?;
            }
            Some(state) => self
                .renderer
                .render(&Message::model_state(tracker.model_id(), state))?,
            None => self.renderer.render(&Message::info(
                "Download continues in the background (/pause to stop it)",
            ))?,
        }
        Ok(())
    }
}
