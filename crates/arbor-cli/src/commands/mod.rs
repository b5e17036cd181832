//! Slash commands for interactive mode

mod branch;

pub use branch::{BranchCommand, BranchTarget};

/// Result of parsing a slash command.
///
/// Message positions are the 1-based numbers shown in the transcript,
/// converted to 0-based indices into the visible path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Edit the user message at a position
    Edit { position: usize, text: String },
    /// Regenerate the reply at a position
    Regenerate {
        position: usize,
        directive: Option<String>,
    },
    /// Move between variants at a position
    Branch {
        position: usize,
        target: BranchTarget,
    },
    /// Open another conversation
    Switch(String),
    /// Stop listening to the in-flight reply
    Cancel,
    /// Print the transcript
    Show,
    /// Dismiss the failure notice
    Acknowledge,
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for plain text.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    let command = command.to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "edit" | "e" => match split_position(args) {
            Some((position, text)) if !text.is_empty() => CommandResult::Edit {
                position,
                text: text.to_string(),
            },
            _ => usage("/edit <n> <new text>"),
        },

        "regen" | "r" => match split_position(args) {
            Some((position, directive)) => CommandResult::Regenerate {
                position,
                directive: (!directive.is_empty()).then(|| directive.to_string()),
            },
            None => usage("/regen <n> [directive]"),
        },

        "branch" | "b" => BranchCommand::execute(args),

        "switch" | "s" => {
            if args.is_empty() {
                usage("/switch <conversation id>")
            } else {
                CommandResult::Switch(args.to_string())
            }
        }

        "cancel" | "c" => CommandResult::Cancel,

        "show" => CommandResult::Show,

        "ack" => CommandResult::Acknowledge,

        _ => CommandResult::Unknown(command),
    })
}

/// Split `"<n> rest"` into a 0-based position and the remaining text
pub(crate) fn split_position(args: &str) -> Option<(usize, &str)> {
    let (number, rest) = match args.split_once(char::is_whitespace) {
        Some((number, rest)) => (number, rest.trim()),
        None => (args, ""),
    };
    let position = number.parse::<usize>().ok()?.checked_sub(1)?;
    Some((position, rest))
}

fn usage(form: &str) -> CommandResult {
    CommandResult::Message(format!("Usage: {}", form))
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?            Show this help message
  /edit, /e <n> <text>     Send an edited version of prompt #n
  /regen, /r <n> [note]    Regenerate reply #n, optionally with a directive
  /branch, /b <n> <dir>    Show another variant of message #n (next, prev, or a number)
  /switch, /s <id>         Open another conversation
  /cancel, /c              Stop listening to the reply in progress
  /show                    Print the visible transcript
  /ack                     Dismiss the failure notice
  /quit, /exit, /q         Exit arbor

Anything else is sent as a new message.

Examples:
  /edit 3 What about Rust?
  /regen 4 shorter please
  /branch 4 prev"#
        .to_string()
}
