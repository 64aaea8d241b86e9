// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Slash command grammar.
//!
//! A line beginning with `/` is a command; anything else is a user message.
//! Parsing is pure — execution effects live in the REPL, so every command can
//! be unit-tested as data.

use ikigai_model::{Error, ErrorCode, Result, ThinkingLevel};

/// Result of classifying one submitted input line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Empty,
    /// Plain user message text.
    Message(String),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Fork { model: Option<String>, prompt: Option<String> },
    Model { spec: String },
    Rewind { target: String },
    Mark { label: String },
    Pin { path: String },
    Unpin { path: String },
    Clear,
    Debug { on: bool },
}

/// Names of all recognized commands, in completion order.
pub const COMMAND_NAMES: &[&str] =
    &["clear", "debug", "fork", "mark", "model", "pin", "rewind", "unpin"];

/// Classify an input line.
pub fn parse_line(line: &str) -> Result<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ParsedLine::Empty);
    }
    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(ParsedLine::Message(trimmed.to_string()));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((n, r)) => (n, r.trim()),
        None => (body, ""),
    };

    let command = match name {
        "fork" => {
            let (model, prompt) = parse_fork_args(rest)?;
            Command::Fork { model, prompt }
        }
        "model" => {
            if rest.is_empty() {
                return Err(Error::new(ErrorCode::InvalidArg, "usage: /model MODEL[/LEVEL]"));
            }
            Command::Model { spec: rest.to_string() }
        }
        "rewind" => {
            if rest.is_empty() {
                return Err(Error::new(ErrorCode::InvalidArg, "usage: /rewind LABEL|N"));
            }
            Command::Rewind { target: rest.to_string() }
        }
        "mark" => {
            if rest.is_empty() {
                return Err(Error::new(ErrorCode::InvalidArg, "usage: /mark LABEL"));
            }
            Command::Mark { label: rest.to_string() }
        }
        "pin" => {
            if rest.is_empty() {
                return Err(Error::new(ErrorCode::InvalidArg, "usage: /pin PATH"));
            }
            Command::Pin { path: rest.to_string() }
        }
        "unpin" => {
            if rest.is_empty() {
                return Err(Error::new(ErrorCode::InvalidArg, "usage: /unpin PATH"));
            }
            Command::Unpin { path: rest.to_string() }
        }
        "clear" => Command::Clear,
        "debug" => match rest {
            "on" => Command::Debug { on: true },
            "off" => Command::Debug { on: false },
            _ => return Err(Error::new(ErrorCode::InvalidArg, "usage: /debug on|off")),
        },
        other => {
            return Err(Error::new(ErrorCode::InvalidArg, format!("Unknown command '/{other}'")))
        }
    };
    Ok(ParsedLine::Command(command))
}

/// Parse `/fork` arguments: an optional `--model MODEL[/LEVEL]` flag and an
/// optional quoted prompt, in either order.
///
/// Anything unquoted other than the flag is malformed: the prompt must be
/// quoted so a model spec can never be mistaken for message text.
pub fn parse_fork_args(input: &str) -> Result<(Option<String>, Option<String>)> {
    let mut model: Option<String> = None;
    let mut prompt: Option<String> = None;

    let mut rest = input.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("--model") {
            if !after.starts_with(char::is_whitespace) && !after.is_empty() {
                return Err(fork_usage_error());
            }
            let after = after.trim_start();
            let end = after
                .find(|c: char| c.is_whitespace() || c == '"')
                .unwrap_or(after.len());
            if end == 0 {
                return Err(Error::new(ErrorCode::InvalidArg, "--model requires an argument"));
            }
            model = Some(after[..end].to_string());
            rest = after[end..].trim_start();
        } else if let Some(after) = rest.strip_prefix('"') {
            let Some(close) = after.find('"') else {
                return Err(Error::new(ErrorCode::InvalidArg, "Unterminated quoted string"));
            };
            prompt = Some(after[..close].to_string());
            rest = after[close + 1..].trim_start();
        } else {
            return Err(fork_usage_error());
        }
    }
    Ok((model, prompt))
}

fn fork_usage_error() -> Error {
    Error::new(
        ErrorCode::InvalidArg,
        "Error: Prompt must be quoted (usage: /fork \"prompt\") or use --model flag",
    )
}

/// Split a `MODEL[/LEVEL]` spec on the first `/`.
pub fn parse_model_spec(spec: &str) -> Result<(String, Option<ThinkingLevel>)> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::new(ErrorCode::InvalidArg, "model specification is empty"));
    }
    match spec.split_once('/') {
        Some((model, level)) => {
            if model.is_empty() {
                return Err(Error::new(ErrorCode::InvalidArg, "model specification is empty"));
            }
            Ok((model.to_string(), Some(ThinkingLevel::parse(level)?)))
        }
        None => Ok((spec.to_string(), None)),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
