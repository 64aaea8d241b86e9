// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-agent conversation state.
//!
//! Each agent owns an append-only log of entries: conversation messages plus
//! in-band metadata records (`clear` era boundaries, `interrupted` markers).
//! Entries are never mutated; rewind truncates, everything else appends.
//! Agents form a tree: a forked child references its parent's log up to the
//! fork point instead of copying it.

use ikigai_model::{Message, ProviderKind, ThinkingLevel};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One entry in an agent log, identified by a session-wide monotonic id.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: u64,
    pub record: LogRecord,
}

#[derive(Debug, Clone)]
pub enum LogRecord {
    Message(Message),
    /// Era boundary: requests omit everything before it.
    Clear,
    /// The in-flight stream was cancelled here.
    Interrupted,
}

/// A named position in the log.  Invalidated (not removed) when a rewind
/// truncates past it; the journal keeps the historical record.
#[derive(Debug, Clone)]
pub struct Mark {
    pub label: String,
    pub message_id: u64,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryState {
    pub attempt: u32,
}

#[derive(Debug)]
pub struct AgentContext {
    pub id: String,
    pub parent_id: Option<String>,
    /// Last parent entry visible to this agent.
    pub fork_message_id: Option<u64>,
    pub created_at: i64,
    pub provider: ProviderKind,
    pub model: String,
    pub thinking_level: ThinkingLevel,
    pub entries: Vec<LogEntry>,
    pub marks: Vec<Mark>,
    /// Ordered set of pinned paths injected into the system prompt.
    pub pins: Vec<String>,
    /// At most one in-flight stream per agent.
    pub in_flight: bool,
    pub retry: Option<RetryState>,
}

impl AgentContext {
    /// Primordial agent at the root of the tree.
    pub fn root(provider: ProviderKind, model: impl Into<String>, thinking: ThinkingLevel) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: None,
            fork_message_id: None,
            created_at: now_ms(),
            provider,
            model: model.into(),
            thinking_level: thinking,
            entries: Vec::new(),
            marks: Vec::new(),
            pins: Vec::new(),
            in_flight: false,
            retry: None,
        }
    }

    /// Fork a child at the parent's current tail.  Provider binding is a deep
    /// copy; the conversation prefix is referenced via `fork_message_id`, not
    /// copied.
    pub fn fork_from(parent: &AgentContext) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: Some(parent.id.clone()),
            fork_message_id: parent.entries.last().map(|e| e.id),
            created_at: now_ms(),
            provider: parent.provider,
            model: parent.model.clone(),
            thinking_level: parent.thinking_level,
            entries: Vec::new(),
            marks: Vec::new(),
            pins: Vec::new(),
            in_flight: false,
            retry: None,
        }
    }

    pub fn push_message(&mut self, id: u64, message: Message) {
        self.entries.push(LogEntry { id, record: LogRecord::Message(message) });
    }

    pub fn push_clear(&mut self, id: u64) {
        self.entries.push(LogEntry { id, record: LogRecord::Clear });
    }

    pub fn push_interrupted(&mut self, id: u64) {
        self.entries.push(LogEntry { id, record: LogRecord::Interrupted });
    }

    /// Id of the last message entry, if any.
    pub fn last_message_id(&self) -> Option<u64> {
        self.entries.iter().rev().find_map(|e| match e.record {
            LogRecord::Message(_) => Some(e.id),
            _ => None,
        })
    }

    /// Add (or move) a mark pointing at the last message.
    pub fn add_mark(&mut self, label: &str) -> Option<u64> {
        let id = self.last_message_id()?;
        if let Some(existing) = self.marks.iter_mut().find(|m| m.label == label) {
            existing.message_id = id;
            existing.valid = true;
        } else {
            self.marks.push(Mark { label: label.to_string(), message_id: id, valid: true });
        }
        Some(id)
    }

    pub fn mark(&self, label: &str) -> Option<&Mark> {
        self.marks.iter().find(|m| m.label == label && m.valid)
    }

    /// Labels of currently valid marks, in creation order.
    pub fn mark_labels(&self) -> Vec<&str> {
        self.marks.iter().filter(|m| m.valid).map(|m| m.label.as_str()).collect()
    }

    /// Truncate the log so `message_id` is the last entry; marks past it are
    /// invalidated.  Returns false when the id is not in this agent's log.
    pub fn rewind_to(&mut self, message_id: u64) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == message_id) else {
            return false;
        };
        self.entries.truncate(pos + 1);
        for m in &mut self.marks {
            if m.message_id > message_id {
                m.valid = false;
            }
        }
        true
    }

    /// Id of the `n`-th most recent user message (1-based).
    pub fn nth_recent_user_message(&self, n: usize) -> Option<u64> {
        if n == 0 {
            return None;
        }
        self.entries
            .iter()
            .rev()
            .filter_map(|e| match &e.record {
                LogRecord::Message(m) if m.role == ikigai_model::Role::User => Some(e.id),
                _ => None,
            })
            .nth(n - 1)
    }

    /// Append `path` to the pin set unless already present.  Returns false on
    /// duplicates.
    pub fn pin(&mut self, path: &str) -> bool {
        if self.pins.iter().any(|p| p == path) {
            return false;
        }
        self.pins.push(path.to_string());
        true
    }

    /// Remove `path` from the pin set.  Returns false when absent.
    pub fn unpin(&mut self, path: &str) -> bool {
        let before = self.pins.len();
        self.pins.retain(|p| p != path);
        self.pins.len() != before
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
