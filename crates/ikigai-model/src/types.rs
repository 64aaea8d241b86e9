// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorCode, Result};

// ─── Thinking level ───────────────────────────────────────────────────────────

/// Provider-agnostic reasoning knob, ordered from "no extra thinking" upward.
///
/// Each provider maps a level onto its own vocabulary (see [`crate::registry`]):
/// OpenAI reasoning models take a `reasoning.effort` string, Gemini 2.5 takes a
/// token budget, Gemini 3+ takes a `thinkingLevel` string, and Anthropic takes
/// a `budget_tokens` block.  The user-facing spelling is `none|low|med|high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    None,
    Low,
    Med,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }

    /// Parse the user-facing spelling.  Anything else is `InvalidArg`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "med" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(Error::new(
                ErrorCode::InvalidArg,
                format!("Invalid thinking level '{other}' (must be: none, low, med, high)"),
            )),
        }
    }

    /// Index into per-model effort tables (NONE/LOW/MED/HIGH order).
    pub fn index(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Med => 2,
            Self::High => 3,
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Roles and content blocks ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tagged content block inside a message.
///
/// `ToolCall::arguments` is always the raw JSON string as streamed by the
/// provider — it is never parsed into a tree at this layer, so partial
/// fragments can be concatenated during streaming without re-serialisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        /// Opaque provider token echoed back on the next request so the
        /// provider can verify reasoning continuity.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Opaque blob a provider emits instead of plaintext thinking.
    RedactedThinking {
        data: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded argument object (kept as a string, never parsed here).
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Which roles may carry this block: tool results only in TOOL/USER
    /// messages, tool calls and thinking only in ASSISTANT ones.
    fn allowed_for(&self, role: Role) -> bool {
        match self {
            Self::Text { .. } => true,
            Self::Thinking { .. } | Self::RedactedThinking { .. } | Self::ToolCall { .. } => {
                role == Role::Assistant
            }
            Self::ToolResult { .. } => matches!(role, Role::Tool | Role::User),
        }
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// One message in a conversation log.  Content blocks are immutable once the
/// message has been appended to an agent log; corrections append new messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
    /// Opaque provider-specific payload (e.g. Google `thought_signature`)
    /// echoed back verbatim by the serializers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![ContentBlock::text(text)],
            provider_metadata: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![ContentBlock::text(text)],
            provider_metadata: None,
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            blocks: vec![ContentBlock::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
                is_error,
            }],
            provider_metadata: None,
        }
    }

    /// Check the role/block invariants.  Returns `InvalidArg` on violation.
    pub fn validate(&self) -> Result<()> {
        for b in &self.blocks {
            if !b.allowed_for(self.role) {
                return Err(Error::new(
                    ErrorCode::InvalidArg,
                    format!("content block not allowed for role {:?}", self.role),
                ));
            }
        }
        Ok(())
    }

    /// Plain text of the message when it consists of exactly one text block.
    pub fn as_text(&self) -> Option<&str> {
        match self.blocks.as_slice() {
            [ContentBlock::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// Concatenation of all text blocks (used for journaling and display).
    pub fn joined_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolCall { id, name, arguments } => {
                Some((id.as_str(), name.as_str(), arguments.as_str()))
            }
            _ => None,
        })
    }
}

// ─── Tools ────────────────────────────────────────────────────────────────────

/// A tool made available to the model.  The parameter schema is a JSON string
/// passed through to the provider verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object, as a raw JSON string.
    pub schema: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

impl ToolChoice {
    /// Decode a numeric wire value.  Unknown values default to `Auto`.
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::None,
            2 => Self::Required,
            _ => Self::Auto,
        }
    }
}

// ─── Request ──────────────────────────────────────────────────────────────────

/// A provider-agnostic completion request.
///
/// The request owns deep copies of everything it references: `add_message`
/// clones the message so the request's lifetime is decoupled from the agent
/// log it came from (the log may be rewound while this request streams).
/// Once handed to a serializer the request is only ever borrowed immutably.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub thinking_level: ThinkingLevel,
    pub max_output_tokens: Option<u32>,
}

impl Request {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn set_system(&mut self, prompt: impl Into<String>) -> Result<()> {
        self.system_prompt = Some(prompt.into());
        Ok(())
    }

    /// Deep-copy `message` into the request after checking its invariants.
    pub fn add_message(&mut self, message: &Message) -> Result<()> {
        message.validate()?;
        self.messages.push(message.clone());
        Ok(())
    }

    pub fn add_tool(&mut self, tool: ToolSpec) -> Result<()> {
        if tool.name.is_empty() {
            return Err(Error::new(ErrorCode::InvalidArg, "tool name must not be empty"));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn set_thinking(&mut self, level: ThinkingLevel) -> Result<()> {
        self.thinking_level = level;
        Ok(())
    }
}

// ─── Response ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    #[default]
    Unknown,
}

/// Token accounting for one turn.  Fields that a provider does not report
/// stay zero; only integer-typed wire fields are ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thinking_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Merge non-zero fields from `other` (later chunks win).
    pub fn merge(&mut self, other: &Usage) {
        if other.input_tokens != 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens != 0 {
            self.output_tokens = other.output_tokens;
        }
        if other.thinking_tokens != 0 {
            self.thinking_tokens = other.thinking_tokens;
        }
        if other.cached_tokens != 0 {
            self.cached_tokens = other.cached_tokens;
        }
        if other.total_tokens != 0 {
            self.total_tokens = other.total_tokens;
        }
    }
}

/// A fully assembled provider response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub model: String,
    pub blocks: Vec<ContentBlock>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub provider_data: Option<Value>,
}

impl Response {
    /// Convert into an assistant message for the agent log.
    pub fn into_message(self) -> Message {
        Message {
            role: Role::Assistant,
            blocks: self.blocks,
            provider_metadata: self.provider_data,
        }
    }
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// Incremental events emitted by a [`crate::stream::StreamContext`] to its
/// sink while a response streams in.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// First parseable chunk arrived.
    Started,
    Text(String),
    Thinking(String),
    ToolCallDelta {
        id: String,
        fragment: String,
    },
    FinishReason(FinishReason),
    Usage(Usage),
    /// Fatal stream error.  Always followed by `Done`.
    Error(Error),
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
