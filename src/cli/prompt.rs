//! Reedline prompt, highlighter and completer for the chat REPL.

use std::borrow::Cow;
use std::path::PathBuf;

use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, Emacs, FileBackedHistory, Highlighter, KeyCode, KeyModifiers,
    MenuBuilder, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus, Reedline,
    ReedlineEvent, ReedlineMenu, Span, StyledText, Suggestion,
};
use tracing::warn;

use super::commands::COMMANDS;
use crate::engine::ModelState;

const HISTORY_SIZE: usize = 500;

/// Prompt showing the model and its availability.
pub struct ChatPrompt {
    pub model_name: String,
    pub state: ModelState,
}

impl ChatPrompt {
    pub fn new(model: &str, state: ModelState) -> Self {
        Self {
            model_name: model.to_string(),
            state,
        }
    }
}

impl Prompt for ChatPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        let model = format!("\x1b[1;36m{}\x1b[0m", self.model_name);
        let badge = match &self.state {
            ModelState::Downloaded => return Cow::Owned(model),
            // Full error text goes to /status; keep the prompt short.
            ModelState::Error { .. } => format!("\x1b[31m[{}]\x1b[0m", self.state.label()),
            other => format!("\x1b[2m[{}]\x1b[0m", other),
        };
        Cow::Owned(format!("{} {}", model, badge))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed(" › ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(&self, hs: PromptHistorySearch) -> Cow<'_, str> {
        let prefix = match hs.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!("({}search: {}) ", prefix, hs.term))
    }
}

/// Highlights known slash commands.
#[derive(Clone)]
pub struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled = StyledText::new();

        if line.starts_with('/') {
            let cmd_end = line.find(' ').unwrap_or(line.len());
            let cmd = &line[..cmd_end];
            let style = if COMMANDS.iter().any(|(c, _)| *c == cmd) {
                Style::new().fg(Color::Cyan).bold()
            } else {
                Style::new().fg(Color::Yellow)
            };
            styled.push((style, cmd.to_string()));

            if cmd_end < line.len() {
                styled.push((Style::default(), line[cmd_end..].to_string()));
            }
        } else {
            styled.push((Style::default(), line.to_string()));
        }

        styled
    }
}

/// Completes slash command names.
#[derive(Clone, Default)]
pub struct CommandCompleter;

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if pos > line.len() {
            return Vec::new();
        }
        let input = &line[..pos];
        if !input.starts_with('/') || input.contains(' ') {
            return Vec::new();
        }

        let prefix = input.to_lowercase();
        COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(&prefix))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.to_string(),
                description: Some(desc.to_string()),
                extra: None,
                span: Span::new(0, pos),
                append_whitespace: false,
                style: None,
            })
            .collect()
    }
}

/// Build the line editor, with history when `history` is given.
pub fn create_reedline(history: Option<PathBuf>) -> Reedline {
    let completion_menu = Box::new(
        ColumnarMenu::default()
            .with_name("completion_menu")
            .with_columns(1)
            .with_column_padding(2)
            .with_text_style(Style::new().fg(Color::Default))
            .with_selected_text_style(Style::new().fg(Color::Black).on(Color::Cyan))
            .with_description_text_style(Style::new().fg(Color::DarkGray)),
    );

    let mut keybindings = reedline::default_emacs_keybindings();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::UntilFound(vec![
            ReedlineEvent::Menu("completion_menu".to_string()),
            ReedlineEvent::MenuNext,
        ]),
    );
    keybindings.add_binding(
        KeyModifiers::SHIFT,
        KeyCode::BackTab,
        ReedlineEvent::MenuPrevious,
    );

    let mut editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter))
        .with_menu(ReedlineMenu::EngineCompleter(completion_menu))
        .with_quick_completions(true)
        .with_partial_completions(true)
        .with_highlighter(Box::new(CommandHighlighter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    if let Some(path) = history {
        match FileBackedHistory::with_file(HISTORY_SIZE, path) {
            Ok(h) => editor = editor.with_history(Box::new(h)),
            Err(e) => warn!(error = %e, "history unavailable"),
        }
    }
    editor
}
