//! Slash commands understood by the REPL.

/// All slash commands with descriptions
pub const COMMANDS: &[(&str, &str)] = &[
    ("/cancel", "Stop the reply being generated"),
    ("/clear", "Clear the conversation"),
    ("/download", "Download the model"),
    ("/exit", "Exit"),
    ("/help", "Show help"),
    ("/pause", "Pause the model download"),
    ("/quit", "Exit"),
    ("/refresh", "Reload the model registry"),
    ("/status", "Show model and generation status"),
];

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Status,
    Download,
    Pause,
    Refresh,
    Cancel,
    Clear,
    Quit,
    /// Text to send to the model.
    Prompt(String),
    Unknown(String),
}

impl ReplCommand {
    /// Parse one line of input. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(ReplCommand::Prompt(line.to_string()));
        };

        let cmd = rest.split_whitespace().next().unwrap_or("").to_lowercase();
        let command = match cmd.as_str() {
            "help" | "h" | "?" => ReplCommand::Help,
            "status" | "s" => ReplCommand::Status,
            "download" | "dl" => ReplCommand::Download,
            "pause" => ReplCommand::Pause,
            "refresh" => ReplCommand::Refresh,
            "cancel" => ReplCommand::Cancel,
            "clear" | "new" => ReplCommand::Clear,
            "exit" | "quit" | "q" => ReplCommand::Quit,
            _ => ReplCommand::Unknown(format!("/{}", cmd)),
        };
        Some(command)
    }
}

/// Help text listing every command.
pub fn help_text() -> String {
    let mut out = String::from("Commands:\n");
    for (cmd, desc) in COMMANDS {
        out.push_str(&format!("  {:<12} {}\n", cmd, desc));
    }
    out.push_str("\nAnything else is sent to the model. Ctrl+C stops a reply.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Parsing Tests
    // =========================================================================

    #[test]
    fn test_blank_line_is_none() {
        assert_eq!(ReplCommand::parse(""), None);
        assert_eq!(ReplCommand::parse("   \t"), None);
    }

    #[test]
    fn test_plain_text_is_prompt() {
        assert_eq!(
            ReplCommand::parse("  why is the sky blue?  "),
            Some(ReplCommand::Prompt("why is the sky blue?".into()))
        );
    }

    #[test]
    fn test_commands_and_aliases() {
        let cases = [
            ("/help", ReplCommand::Help),
            ("/?", ReplCommand::Help),
            ("/status", ReplCommand::Status),
            ("/download", ReplCommand::Download),
            ("/dl", ReplCommand::Download),
            ("/pause", ReplCommand::Pause),
            ("/refresh", ReplCommand::Refresh),
            ("/cancel", ReplCommand::Cancel),
            ("/clear", ReplCommand::Clear),
            ("/new", ReplCommand::Clear),
            ("/quit", ReplCommand::Quit),
            ("/exit", ReplCommand::Quit),
            ("/Q", ReplCommand::Quit),
        ];
        for (input, expected) in cases {
            assert_eq!(ReplCommand::parse(input), Some(expected), "input {}", input);
        }
    }

    #[test]
    fn test_trailing_arguments_ignored() {
        assert_eq!(ReplCommand::parse("/status now"), Some(ReplCommand::Status));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            ReplCommand::parse("/frobnicate x"),
            Some(ReplCommand::Unknown("/frobnicate".into()))
        );
    }

    #[test]
    fn test_every_listed_command_parses() {
        for (cmd, _) in COMMANDS {
            let parsed = ReplCommand::parse(cmd).unwrap();
            assert!(
                !matches!(parsed, ReplCommand::Unknown(_) | ReplCommand::Prompt(_)),
                "{} should be a known command",
                cmd
            );
        }
    }

    #[test]
    fn test_commands_sorted() {
        let names: Vec<&str> = COMMANDS.iter().map(|(c, _)| *c).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_help_lists_commands() {
        let help = help_text();
        for (cmd, desc) in COMMANDS {
            assert!(help.contains(cmd));
            assert!(help.contains(desc));
        }
    }
}
