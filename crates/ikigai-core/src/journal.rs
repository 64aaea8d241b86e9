// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Journal sink: append-only record of commands and messages.
//!
//! The store itself (SQLite in the full deployment) lives outside the core;
//! this module defines the contract the core writes through.

use serde_json::Value;

/// Record kinds.  The conversation subset reconstructs the message log; the
/// rest are metadata events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    System,
    User,
    Assistant,
    ToolCall,
    ToolResult,
    Tool,
    Clear,
    Mark,
    Rewind,
    AgentKilled,
    Interrupted,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Tool => "tool",
            Self::Clear => "clear",
            Self::Mark => "mark",
            Self::Rewind => "rewind",
            Self::AgentKilled => "agent_killed",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool_call" => Some(Self::ToolCall),
            "tool_result" => Some(Self::ToolResult),
            "tool" => Some(Self::Tool),
            "clear" => Some(Self::Clear),
            "mark" => Some(Self::Mark),
            "rewind" => Some(Self::Rewind),
            "agent_killed" => Some(Self::AgentKilled),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }

    pub fn is_conversation(self) -> bool {
        matches!(
            self,
            Self::System | Self::User | Self::Assistant | Self::ToolCall | Self::ToolResult | Self::Tool
        )
    }
}

/// Total predicate over an optional kind string: `None` and unknown strings
/// are not conversation kinds.
pub fn is_conversation_kind(kind: Option<&str>) -> bool {
    kind.and_then(RecordKind::parse).map(RecordKind::is_conversation).unwrap_or(false)
}

/// Append-only journal consumed by the core.
pub trait Journal {
    fn append(
        &mut self,
        session_id: &str,
        agent_id: &str,
        kind: RecordKind,
        content: &str,
        metadata: Option<&Value>,
    );
}

/// Discards everything.  Used in tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn append(&mut self, _: &str, _: &str, _: RecordKind, _: &str, _: Option<&Value>) {}
}

/// In-memory journal for tests and debugging.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    pub records: Vec<(String, String, RecordKind, String)>,
}

impl Journal for MemoryJournal {
    fn append(
        &mut self,
        session_id: &str,
        agent_id: &str,
        kind: RecordKind,
        content: &str,
        _metadata: Option<&Value>,
    ) {
        self.records
            .push((session_id.to_string(), agent_id.to_string(), kind, content.to_string()));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
