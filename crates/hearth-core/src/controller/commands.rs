//! Slash commands
//!
//! The command set is closed: input starting with `/` parses into one of
//! these variants or is reported as unknown. Commands run to completion
//! without opening a stream.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::heartbeat::MAX_INTERVAL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    /// Clear the display; history is kept
    Clear,
    Models,
    /// Show or switch the active model
    Model(Option<String>),
    Session(SessionCommand),
    /// Show remembered facts
    Memory,
    Remember(String),
    Forget(String),
    /// Show or change the reply language
    Language(Option<String>),
    Heartbeat(HeartbeatCommand),
    /// Show where the personality files live
    Personality,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    New,
    List,
    Switch(String),
    Delete(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatCommand {
    Status,
    On,
    Off,
    Every(Duration),
}

pub const HELP_TEXT: &str = "\
Commands:
  /help                         Show this help
  /quit, /exit, /bye            Leave the chat
  /clear                        Clear the screen
  /models                       List installed models
  /model [name]                 Show or switch the model
  /session new                  Start a new session
  /session list                 List sessions
  /session switch <id>          Resume a session
  /session delete <id>          Delete a session
  /memory                       Show remembered facts
  /remember <fact>              Remember a fact
  /forget <keyword>             Forget facts containing a keyword
  /language [name]              Show or set the reply language
  /heartbeat [on|off|<every>]   Show or configure check-ins (e.g. 30m, 4h)
  /personality edit             Show where the personality files live
Press Ctrl-C to stop a reply, Ctrl-D to quit.";

fn required(arg: &str, usage: &str) -> Result<String> {
    if arg.is_empty() {
        Err(Error::InvalidInput(format!("usage: {}", usage)))
    } else {
        Ok(arg.to_string())
    }
}

fn optional(arg: &str) -> Option<String> {
    (!arg.is_empty()).then(|| arg.to_string())
}

/// Parse a line of input as a command
///
/// Returns `None` when the line is not a command at all.
pub fn parse_command(input: &str) -> Option<Result<Command>> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "bye" => Ok(Command::Quit),
        "clear" => Ok(Command::Clear),
        "models" => Ok(Command::Models),
        "model" => Ok(Command::Model(optional(args))),
        "session" | "sessions" => parse_session(args).map(Command::Session),
        "memory" => Ok(Command::Memory),
        "remember" => required(args, "/remember <fact>").map(Command::Remember),
        "forget" => required(args, "/forget <keyword>").map(Command::Forget),
        "language" | "lang" => Ok(Command::Language(optional(args))),
        "heartbeat" => parse_heartbeat(args).map(Command::Heartbeat),
        "personality" => match args.to_lowercase().as_str() {
            "edit" => Ok(Command::Personality),
            _ => Err(Error::InvalidInput("usage: /personality edit".to_string())),
        },
        other => Err(Error::InvalidInput(format!(
            "unknown command '/{}'. Type /help for a list.",
            other
        ))),
    };
    Some(command)
}

fn parse_session(args: &str) -> Result<SessionCommand> {
    let (action, target) = match args.split_once(char::is_whitespace) {
        Some((action, target)) => (action, target.trim()),
        None => (args, ""),
    };
    match action.to_lowercase().as_str() {
        "new" => Ok(SessionCommand::New),
        "" | "list" => Ok(SessionCommand::List),
        "switch" | "load" => required(target, "/session switch <id>").map(SessionCommand::Switch),
        "delete" | "rm" => required(target, "/session delete <id>").map(SessionCommand::Delete),
        other => Err(Error::InvalidInput(format!(
            "unknown session action '{}'. Use new, list, switch or delete.",
            other
        ))),
    }
}

fn parse_heartbeat(args: &str) -> Result<HeartbeatCommand> {
    match args.to_lowercase().as_str() {
        "" | "status" => Ok(HeartbeatCommand::Status),
        "on" => Ok(HeartbeatCommand::On),
        "off" => Ok(HeartbeatCommand::Off),
        other => {
            let interval = humantime::parse_duration(other).map_err(|_| {
                Error::InvalidInput(format!(
                    "expected on, off or an interval like 30m, got '{}'",
                    args
                ))
            })?;
            if interval.is_zero() {
                return Err(Error::InvalidInput(
                    "heartbeat interval must be greater than zero".to_string(),
                ));
            }
            if interval > MAX_INTERVAL {
                return Err(Error::InvalidInput(format!(
                    "heartbeat interval must be at most {}",
                    humantime::format_duration(MAX_INTERVAL)
                )));
            }
            Ok(HeartbeatCommand::Every(interval))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Command {
        parse_command(input).expect("is a command").expect("parses")
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert!(parse_command("hello there").is_none());
        assert!(parse_command("what is 1/2?").is_none());
    }

    #[test]
    fn test_names_are_case_insensitive() {
        assert_eq!(parse("/HELP"), Command::Help);
        assert_eq!(parse("  /Quit  "), Command::Quit);
        assert_eq!(parse("/bye"), Command::Quit);
    }

    #[test]
    fn test_args_are_trimmed_remainder() {
        assert_eq!(
            parse("/remember   my cat is called Miso  "),
            Command::Remember("my cat is called Miso".to_string())
        );
        assert_eq!(parse("/model llama3.2"), Command::Model(Some("llama3.2".to_string())));
        assert_eq!(parse("/model"), Command::Model(None));
    }

    #[test]
    fn test_session_actions() {
        assert_eq!(parse("/session new"), Command::Session(SessionCommand::New));
        assert_eq!(parse("/session"), Command::Session(SessionCommand::List));
        assert_eq!(
            parse("/session switch 20260314-150926-k3x9"),
            Command::Session(SessionCommand::Switch("20260314-150926-k3x9".to_string()))
        );
        assert!(parse_command("/session delete").unwrap().is_err());
        assert!(parse_command("/session rename x").unwrap().is_err());
    }

    #[test]
    fn test_heartbeat_arguments() {
        assert_eq!(parse("/heartbeat"), Command::Heartbeat(HeartbeatCommand::Status));
        assert_eq!(parse("/heartbeat OFF"), Command::Heartbeat(HeartbeatCommand::Off));
        assert_eq!(
            parse("/heartbeat 30m"),
            Command::Heartbeat(HeartbeatCommand::Every(Duration::from_secs(1800)))
        );
        assert!(parse_command("/heartbeat often").unwrap().is_err());
        assert!(parse_command("/heartbeat 0s").unwrap().is_err());
        assert!(parse_command("/heartbeat 300000000000y").unwrap().is_err());
        assert_eq!(
            parse("/heartbeat 365days"),
            Command::Heartbeat(HeartbeatCommand::Every(MAX_INTERVAL))
        );
    }

    #[test]
    fn test_missing_required_args() {
        assert!(parse_command("/remember").unwrap().is_err());
        assert!(parse_command("/forget   ").unwrap().is_err());
    }

    #[test]
    fn test_personality_requires_edit() {
        assert_eq!(parse("/personality edit"), Command::Personality);
        assert_eq!(parse("/Personality EDIT"), Command::Personality);
        for input in ["/personality", "/personality show"] {
            let err = parse_command(input).unwrap().unwrap_err();
            assert!(err.to_string().contains("/personality edit"));
        }
        assert!(HELP_TEXT.contains("/personality edit"));
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_command("/fly away").unwrap().unwrap_err();
        assert!(err.to_string().contains("/fly"));
    }
}
