//! REPL command parsing and definitions
//!
//! Handles parsing of dot-commands (.help, .quit, etc.) that drive the engine:
//! resuming suspensions, firing clicks, advancing live loops and navigating.

use anyhow::{anyhow, Context, Result};
use bramble_core::Value;
use indexmap::IndexMap;

/// Available REPL commands
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    /// Show help information
    Help,
    /// Exit the REPL
    Quit,
    /// Toggle quiet mode
    Quiet,
    /// Toggle debug mode
    Debug,
    /// Print the document text
    Show,
    /// Print the document as HTML
    Html,
    /// Resume a suspended render, optionally handing it a value
    Unblock(Option<Value>),
    /// Click a named hook or a link by its text
    Click(String),
    /// Advance live loops by this many milliseconds
    Tick(u64),
    /// Navigate to a passage
    GoTo(String),
    /// Show the frame stack
    Stack,
}

/// Parse a command string into a ReplCommand
pub fn parse_command(input: &str) -> Result<ReplCommand> {
    let trimmed = input.trim();

    let Some(body) = trimmed.strip_prefix('.') else {
        return Err(anyhow!("Commands must start with '.'"));
    };
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    match name {
        "" => Err(anyhow!("Empty command")),
        "help" | "h" => Ok(ReplCommand::Help),
        "quit" | "q" | "exit" => Ok(ReplCommand::Quit),
        "quiet" => Ok(ReplCommand::Quiet),
        "debug" => Ok(ReplCommand::Debug),
        "show" | "text" => Ok(ReplCommand::Show),
        "html" => Ok(ReplCommand::Html),
        "stack" => Ok(ReplCommand::Stack),
        "unblock" | "resume" => {
            if rest.is_empty() {
                return Ok(ReplCommand::Unblock(None));
            }
            let json: serde_json::Value =
                serde_json::from_str(rest).with_context(|| format!("Invalid JSON value: {rest}"))?;
            Ok(ReplCommand::Unblock(Some(value_from_json(&json)?)))
        }
        "click" => {
            if rest.is_empty() {
                return Err(anyhow!("Usage: .click <hook-name or link text>"));
            }
            Ok(ReplCommand::Click(rest.trim_start_matches('?').to_string()))
        }
        "tick" => {
            let millis = rest
                .parse::<u64>()
                .map_err(|_| anyhow!("Usage: .tick <milliseconds>"))?;
            Ok(ReplCommand::Tick(millis))
        }
        "goto" | "go" => {
            if rest.is_empty() {
                return Err(anyhow!("Usage: .goto <passage>"));
            }
            Ok(ReplCommand::GoTo(rest.to_string()))
        }
        other => Err(anyhow!("Unknown command: .{other}")),
    }
}

/// Convert a JSON value typed at the prompt into an engine value
pub fn value_from_json(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => return Err(anyhow!("null has no engine value")),
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            Value::Number(n.as_f64().ok_or_else(|| anyhow!("Number out of range: {n}"))?)
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(value_from_json).collect::<Result<_>>()?)
        }
        serde_json::Value::Object(map) => {
            let mut entries = IndexMap::new();
            for (key, value) in map {
                entries.insert(key.clone(), value_from_json(value)?);
            }
            Value::Datamap(entries)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_help() {
        assert_eq!(parse_command(".help").unwrap(), ReplCommand::Help);
        assert_eq!(parse_command(".h").unwrap(), ReplCommand::Help);
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(parse_command(".quit").unwrap(), ReplCommand::Quit);
        assert_eq!(parse_command(".q").unwrap(), ReplCommand::Quit);
        assert_eq!(parse_command(".exit").unwrap(), ReplCommand::Quit);
    }

    #[test]
    fn test_parse_unblock() {
        assert_eq!(parse_command(".unblock").unwrap(), ReplCommand::Unblock(None));
        assert_eq!(
            parse_command(".unblock \"Ann\"").unwrap(),
            ReplCommand::Unblock(Some(Value::String("Ann".to_string())))
        );
        assert_eq!(
            parse_command(".unblock [1, true]").unwrap(),
            ReplCommand::Unblock(Some(Value::Array(vec![Value::Number(1.0), Value::Boolean(true)])))
        );
        assert!(parse_command(".unblock {oops").is_err());
        assert!(parse_command(".unblock null").is_err());
    }

    #[test]
    fn test_parse_click_and_goto() {
        assert_eq!(parse_command(".click ?door").unwrap(), ReplCommand::Click("door".to_string()));
        assert_eq!(
            parse_command(".click Open the box").unwrap(),
            ReplCommand::Click("Open the box".to_string())
        );
        assert_eq!(parse_command(".goto Hall").unwrap(), ReplCommand::GoTo("Hall".to_string()));
    }

    #[test]
    fn test_parse_tick() {
        assert_eq!(parse_command(".tick 250").unwrap(), ReplCommand::Tick(250));
        assert!(parse_command(".tick soon").is_err());
    }

    #[test]
    fn test_parse_invalid_command() {
        assert!(parse_command(".invalid").is_err());
        assert!(parse_command("help").is_err()); // Missing dot
        assert!(parse_command(".click").is_err()); // Missing argument
        assert!(parse_command(".").is_err());
    }
}
