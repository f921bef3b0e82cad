//! CLI components.

pub mod commands;
pub mod prompt;
pub mod render;
pub mod repl;
pub mod runner;
pub mod spinner;

pub use commands::{ReplCommand, COMMANDS};
pub use prompt::{create_reedline, ChatPrompt};
pub use render::{StreamPrinter, TerminalRenderer};
pub use repl::Repl;
pub use runner::{run_interactive, run_single_prompt};
pub use spinner::{Spinner, SpinnerHandle};
