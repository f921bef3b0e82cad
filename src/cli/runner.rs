//! CLI runner for interactive and single-prompt modes.

use std::path::PathBuf;
use std::sync::Arc;

use crate::app::ChatApp;
use crate::cli::render::{describe_state, TerminalRenderer};
use crate::cli::repl::{Repl, Reply};
use crate::config::AppConfig;
use crate::engine::{InferenceEngine, OllamaEngine};
use crate::messaging::Message;

/// Build the engine adapter described by `config`.
pub fn build_engine(config: &AppConfig) -> Arc<dyn InferenceEngine> {
    Arc::new(OllamaEngine::new(config.base_url.clone()).with_api_key(config.api_key.clone()))
}

/// Run a single prompt and exit.
pub async fn run_single_prompt(config: &AppConfig, prompt: &str) -> anyhow::Result<()> {
    let app = ChatApp::start(config, build_engine(config));
    let state = app.startup().await?;
    if !state.is_downloaded() {
        anyhow::bail!("{}", describe_state(app.model_id(), &state));
    }

    let mut repl = Repl::new(app);
    match repl.handle_prompt(prompt).await? {
        Reply::Completed => Ok(()),
        Reply::Failed => anyhow::bail!("generation failed"),
        Reply::Rejected => anyhow::bail!("prompt rejected"),
    }
}

/// Run in interactive mode.
pub async fn run_interactive(config: &AppConfig, history: Option<PathBuf>) -> anyhow::Result<()> {
    print_banner();

    // Subscribe before startup so a failed session load is shown.
    let mut repl = Repl::new(ChatApp::start(config, build_engine(config)));
    let renderer = TerminalRenderer::new();
    // An unreachable engine is not fatal: /refresh retries.
    match repl.app().startup().await {
        Ok(state) => println!("  {}\n", describe_state(repl.app().model_id(), &state)),
        Err(e) => renderer.render(&Message::error(e.to_string()))?,
    }

    if let Some(path) = history {
        repl = repl.with_history(path);
    }
    repl.run().await?;

    Ok(())
}

/// Print the welcome banner.
pub fn print_banner() {
    println!();
    println!(
        "  \x1b[1;36mlocalchat\x1b[0m  \x1b[2mv{}\x1b[0m",
        get_version()
    );
    println!("  \x1b[2mChat with a model running on your machine\x1b[0m");
    println!("  \x1b[2mType \x1b[0m\x1b[1;36m/help\x1b[0m\x1b[2m for commands, or start chatting!\x1b[0m");
    println!();
}

/// Get the application version string.
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Generate the banner text lines without ANSI codes (for testing).
pub fn banner_text_lines() -> Vec<&'static str> {
    vec![
        "localchat",
        "Chat with a model running on your machine",
        "/help",
    ]
}
