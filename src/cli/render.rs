//! Terminal rendering of core messages and streamed replies.

use std::io::{stdout, Write};

use crossterm::{
    style::{Color, Print, ResetColor, SetForegroundColor},
    ExecutableCommand,
};

use crate::chat::GenerationPhase;
use crate::engine::ModelState;
use crate::messaging::{Message, MessageLevel};
use crate::session::SessionPhase;

/// Render style configuration.
#[derive(Debug, Clone)]
pub struct RenderStyle {
    pub info_color: Color,
    pub success_color: Color,
    pub warning_color: Color,
    pub error_color: Color,
    pub status_color: Color,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            info_color: Color::White,
            success_color: Color::Green,
            warning_color: Color::Yellow,
            error_color: Color::Red,
            status_color: Color::DarkGrey,
        }
    }
}

/// Download progress with one decimal, e.g. `42.0%`.
pub fn format_progress(progress: f32) -> String {
    format!("{:.1}%", progress.clamp(0.0, 1.0) * 100.0)
}

/// One status line describing `state` for `model`.
pub fn describe_state(model: &str, state: &ModelState) -> String {
    match state {
        ModelState::Unknown => format!("{}: checking registry", model),
        ModelState::NotDownloaded => format!("{}: not downloaded (use /download)", model),
        ModelState::Downloading { progress } => {
            format!("{}: downloading {}", model, format_progress(*progress))
        }
        ModelState::Paused { progress } => format!(
            "{}: paused at {} (use /download to resume)",
            model,
            format_progress(*progress)
        ),
        ModelState::Downloaded => format!("{}: ready", model),
        ModelState::Error { message } => format!("{}: {}", model, message),
    }
}

/// What to print for a new cumulative reply text.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamDelta<'a> {
    /// Nothing new.
    Unchanged,
    /// Print this suffix.
    Append(&'a str),
    /// Earlier output no longer matches; reprint everything.
    Rewrite(&'a str),
}

/// Compare the printed text with the latest cumulative text.
pub fn stream_delta<'a>(printed: &str, latest: &'a str) -> StreamDelta<'a> {
    if latest == printed {
        StreamDelta::Unchanged
    } else if let Some(rest) = latest.strip_prefix(printed) {
        StreamDelta::Append(rest)
    } else if printed.starts_with(latest) {
        // A shorter resend of text already on screen.
        StreamDelta::Unchanged
    } else {
        StreamDelta::Rewrite(latest)
    }
}

/// Incrementally prints one assistant turn.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    printed: String,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_output(&self) -> bool {
        !self.printed.is_empty()
    }

    /// Print whatever `latest` adds to the screen.
    pub fn update(&mut self, latest: &str) -> std::io::Result<()> {
        let mut out = stdout();
        match stream_delta(&self.printed, latest) {
            StreamDelta::Unchanged => return Ok(()),
            StreamDelta::Append(rest) => {
                out.execute(Print(rest))?;
            }
            StreamDelta::Rewrite(text) => {
                out.execute(Print("\n"))?.execute(Print(text))?;
            }
        }
        out.flush()?;
        if latest.len() > self.printed.len() || !self.printed.starts_with(latest) {
            self.printed = latest.to_string();
        }
        Ok(())
    }

    /// End the reply with a newline.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.has_output() {
            stdout().execute(Print("\n"))?;
        }
        Ok(())
    }
}

/// Terminal renderer for messages.
pub struct TerminalRenderer {
    style: RenderStyle,
}

impl TerminalRenderer {
    /// Create a new renderer.
    pub fn new() -> Self {
        Self {
            style: RenderStyle::default(),
        }
    }

    /// Create with custom style.
    pub fn with_style(style: RenderStyle) -> Self {
        Self { style }
    }

    /// Render a message to the terminal.
    pub fn render(&self, message: &Message) -> std::io::Result<()> {
        match message {
            Message::Text(text) => self.render_text(text.level, &text.text),
            Message::ModelState(m) => {
                let color = match m.state {
                    ModelState::Error { .. } => self.style.error_color,
                    ModelState::Downloaded => self.style.success_color,
                    _ => self.style.status_color,
                };
                self.line(color, "", &describe_state(&m.model_id, &m.state))
            }
            Message::Session(s) => match (s.phase, s.model_id.as_deref()) {
                (SessionPhase::Creating, Some(model)) => {
                    self.line(self.style.status_color, "", &format!("Loading {}...", model))
                }
                _ => Ok(()),
            },
            Message::Generation(g) if g.phase == GenerationPhase::Failed => {
                self.line(self.style.error_color, "✗ ", "Generation failed")
            }
            Message::ConversationCleared => {
                self.line(self.style.success_color, "✓ ", "Conversation cleared")
            }
            // Turn text is streamed by `StreamPrinter`.
            Message::TurnAppended(_) | Message::TurnUpdated(_) | Message::Generation(_) => Ok(()),
        }
    }

    fn render_text(&self, level: MessageLevel, text: &str) -> std::io::Result<()> {
        let color = match level {
            MessageLevel::Info => self.style.info_color,
            MessageLevel::Success => self.style.success_color,
            MessageLevel::Warning => self.style.warning_color,
            MessageLevel::Error => self.style.error_color,
        };

        let prefix = match level {
            MessageLevel::Success => "✓ ",
            MessageLevel::Warning => "⚠ ",
            MessageLevel::Error => "✗ ",
            MessageLevel::Info => "",
        };

        self.line(color, prefix, text)
    }

    fn line(&self, color: Color, prefix: &str, text: &str) -> std::io::Result<()> {
        stdout()
            .execute(SetForegroundColor(color))?
            .execute(Print(prefix))?
            .execute(Print(text))?
            .execute(Print("\n"))?
            .execute(ResetColor)?;
        Ok(())
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Formatting Tests
    // =========================================================================

    #[test]
    fn test_format_progress_one_decimal() {
        assert_eq!(format_progress(0.42), "42.0%");
        assert_eq!(format_progress(0.0), "0.0%");
        assert_eq!(format_progress(1.0), "100.0%");
        assert_eq!(format_progress(0.1234), "12.3%");
    }

    #[test]
    fn test_format_progress_clamps() {
        assert_eq!(format_progress(1.5), "100.0%");
        assert_eq!(format_progress(-0.2), "0.0%");
    }

    #[test]
    fn test_describe_state() {
        assert_eq!(
            describe_state("m", &ModelState::Downloading { progress: 0.4 }),
            "m: downloading 40.0%"
        );
        assert_eq!(describe_state("m", &ModelState::Downloaded), "m: ready");
        assert_eq!(
            describe_state(
                "m",
                &ModelState::Error {
                    message: "offline".into()
                }
            ),
            "m: offline"
        );
        assert!(describe_state("m", &ModelState::NotDownloaded).contains("/download"));
        assert!(describe_state("m", &ModelState::Paused { progress: 0.5 }).contains("50.0%"));
    }

    // =========================================================================
    // Stream Delta Tests
    // =========================================================================

    #[test]
    fn test_delta_appends_suffix() {
        assert_eq!(stream_delta("Hel", "Hello"), StreamDelta::Append("lo"));
        assert_eq!(stream_delta("", "Hi"), StreamDelta::Append("Hi"));
    }

    #[test]
    fn test_delta_duplicate_and_shorter_resend() {
        assert_eq!(stream_delta("Hello", "Hello"), StreamDelta::Unchanged);
        assert_eq!(stream_delta("Hello", "Hell"), StreamDelta::Unchanged);
    }

    #[test]
    fn test_delta_divergent_text_rewrites() {
        assert_eq!(
            stream_delta("Hello", "Error: disk full"),
            StreamDelta::Rewrite("Error: disk full")
        );
    }

    #[test]
    fn test_printer_tracks_longest_prefix() {
        let mut printer = StreamPrinter::new();
        printer.update("Hel").unwrap();
        printer.update("Hello").unwrap();
        printer.update("Hell").unwrap();
        assert_eq!(printer.printed, "Hello");
        assert!(printer.has_output());
    }
}
