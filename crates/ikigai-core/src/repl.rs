// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! REPL orchestration: the agent tree, command dispatch, request building,
//! and stream-completion bookkeeping.
//!
//! The REPL owns state and returns effects; it performs no I/O besides the
//! journal and display sinks handed into each call.  The event loop drives it.

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, warn};

use ikigai_model::{
    registry, ContentBlock, Error, ErrorCode, Message, Request, Response, Result, ToolSpec,
};

use crate::agent::{AgentContext, LogRecord, RetryState};
use crate::commands::{parse_line, parse_model_spec, Command, ParsedLine};
use crate::events::{DisplayEvent, DisplaySink};
use crate::journal::{Journal, RecordKind};

/// What the event loop should do after a submitted line was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplEffect {
    None,
    /// Dispatch a completion request for this agent.
    Submit { agent_id: String },
    /// Toggle verbose logging.
    SetDebug(bool),
}

pub struct ReplState {
    pub session_id: String,
    agents: HashMap<String, AgentContext>,
    active: String,
    next_message_id: u64,
    pub system_prompt: Option<String>,
    pub debug: bool,
}

impl ReplState {
    pub fn new(root: AgentContext) -> Self {
        let active = root.id.clone();
        let mut agents = HashMap::new();
        agents.insert(active.clone(), root);
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            agents,
            active,
            next_message_id: 0,
            system_prompt: None,
            debug: false,
        }
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_message_id += 1;
        self.next_message_id
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    pub fn agent(&self, id: &str) -> Option<&AgentContext> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut AgentContext> {
        self.agents.get_mut(id)
    }

    pub fn active_agent(&self) -> &AgentContext {
        &self.agents[&self.active]
    }

    pub fn active_agent_mut(&mut self) -> &mut AgentContext {
        self.agents.get_mut(&self.active).expect("active agent exists")
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// Messages visible to a request for `agent_id`: the parent-chain prefix
    /// up to each fork point, then the agent's own entries, cut at the last
    /// `clear` era boundary.
    pub fn visible_messages(&self, agent_id: &str) -> Vec<Message> {
        let mut chain: Vec<(&AgentContext, Option<u64>)> = Vec::new();
        let mut cursor = self.agents.get(agent_id);
        let mut limit: Option<u64> = None;
        while let Some(agent) = cursor {
            chain.push((agent, limit));
            limit = agent.fork_message_id;
            cursor = agent.parent_id.as_deref().and_then(|p| self.agents.get(p));
        }
        chain.reverse();

        let mut messages: Vec<Message> = Vec::new();
        for (agent, limit) in chain {
            for entry in &agent.entries {
                if limit.is_some_and(|l| entry.id > l) {
                    break;
                }
                match &entry.record {
                    LogRecord::Message(m) => messages.push(m.clone()),
                    // An era boundary hides everything before it, including
                    // any inherited prefix.
                    LogRecord::Clear => messages.clear(),
                    LogRecord::Interrupted => {}
                }
            }
        }
        messages
    }

    // ── Request building ──────────────────────────────────────────────────────

    /// Build the provider request for `agent_id` from its visible history,
    /// pins, and thinking level.
    pub fn build_request(&self, agent_id: &str, tools: &[ToolSpec]) -> Result<Request> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| Error::new(ErrorCode::InvalidArg, "unknown agent"))?;

        let mut req = Request::new(agent.model.clone());
        req.set_thinking(agent.thinking_level)?;

        let system = self.compose_system_prompt(agent);
        if !system.is_empty() {
            req.set_system(system)?;
        }
        for m in self.visible_messages(agent_id) {
            req.add_message(&m)?;
        }
        for t in tools {
            req.add_tool(t.clone())?;
        }
        Ok(req)
    }

    fn compose_system_prompt(&self, agent: &AgentContext) -> String {
        let mut out = self.system_prompt.clone().unwrap_or_default();
        for path in &agent.pins {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(&format!("<pinned path=\"{path}\">\n{contents}\n</pinned>"));
                }
                Err(e) => warn!(path, error = %e, "pinned file unreadable; skipped"),
            }
        }
        out
    }

    // ── Input handling ────────────────────────────────────────────────────────

    /// Handle one submitted input line: either queue a user message for the
    /// active agent or execute a command.
    pub fn handle_line(
        &mut self,
        line: &str,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        match parse_line(line)? {
            ParsedLine::Empty => Ok(ReplEffect::None),
            ParsedLine::Message(text) => self.submit_user(&text, journal),
            ParsedLine::Command(cmd) => self.execute(cmd, journal, sink),
        }
    }

    /// Append a user message and request dispatch.  Refused while a stream is
    /// in flight for the agent or a retry is waiting to fire — both count as
    /// the agent's one outstanding turn.
    pub fn submit_user(&mut self, text: &str, journal: &mut dyn Journal) -> Result<ReplEffect> {
        let agent = self.active_agent();
        if agent.in_flight || agent.retry.is_some() {
            return Err(Error::new(
                ErrorCode::InvalidArg,
                "agent is busy; interrupt it first (Ctrl-C)",
            ));
        }
        let id = self.alloc_id();
        let session = self.session_id.clone();
        let agent = self.active_agent_mut();
        agent.push_message(id, Message::user(text));
        let agent_id = agent.id.clone();
        journal.append(&session, &agent_id, RecordKind::User, text, None);
        Ok(ReplEffect::Submit { agent_id })
    }

    fn execute(
        &mut self,
        cmd: Command,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        match cmd {
            Command::Fork { model, prompt } => self.cmd_fork(model, prompt, journal, sink),
            Command::Model { spec } => self.cmd_model(&spec, sink),
            Command::Rewind { target } => self.cmd_rewind(&target, journal, sink),
            Command::Mark { label } => self.cmd_mark(&label, journal, sink),
            Command::Pin { path } => self.cmd_pin(&path, true, sink),
            Command::Unpin { path } => self.cmd_pin(&path, false, sink),
            Command::Clear => self.cmd_clear(journal, sink),
            Command::Debug { on } => {
                self.debug = on;
                self.status(sink, format!("debug {}", if on { "on" } else { "off" }));
                Ok(ReplEffect::SetDebug(on))
            }
        }
    }

    fn cmd_fork(
        &mut self,
        model: Option<String>,
        prompt: Option<String>,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        let mut child = AgentContext::fork_from(self.active_agent());
        if let Some(spec) = model {
            apply_model_override(&mut child, &spec)?;
        }
        let child_id = child.id.clone();
        self.agents.insert(child_id.clone(), child);
        self.active = child_id.clone();
        self.status(sink, format!("forked agent {child_id}"));

        match prompt {
            Some(text) if !text.is_empty() => self.submit_user(&text, journal),
            _ => Ok(ReplEffect::None),
        }
    }

    fn cmd_model(&mut self, spec: &str, sink: &mut dyn DisplaySink) -> Result<ReplEffect> {
        let agent = self.agents.get_mut(&self.active).expect("active agent exists");
        apply_model_override(agent, spec)?;
        let msg = format!(
            "model set to {} ({}, thinking {})",
            agent.model,
            agent.provider,
            agent.thinking_level
        );
        self.status(sink, msg);
        Ok(ReplEffect::None)
    }

    fn cmd_rewind(
        &mut self,
        target: &str,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        let session = self.session_id.clone();
        let agent = self.agents.get_mut(&self.active).expect("active agent exists");
        let message_id = match agent.mark(target) {
            Some(mark) => mark.message_id,
            None => match target.parse::<usize>() {
                Ok(n) => agent.nth_recent_user_message(n).ok_or_else(|| {
                    Error::new(ErrorCode::InvalidArg, format!("no {n} user messages to rewind"))
                })?,
                Err(_) => {
                    return Err(Error::new(
                        ErrorCode::NotFound,
                        format!("no mark named '{target}'"),
                    ))
                }
            },
        };
        if !agent.rewind_to(message_id) {
            return Err(Error::new(ErrorCode::NotFound, "rewind target not in this agent's log"));
        }
        let agent_id = agent.id.clone();
        journal.append(
            &session,
            &agent_id,
            RecordKind::Rewind,
            target,
            Some(&json!({ "message_id": message_id })),
        );
        self.status(sink, format!("rewound to message {message_id}"));
        Ok(ReplEffect::None)
    }

    fn cmd_mark(
        &mut self,
        label: &str,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        let session = self.session_id.clone();
        let agent = self.agents.get_mut(&self.active).expect("active agent exists");
        let Some(message_id) = agent.add_mark(label) else {
            return Err(Error::new(ErrorCode::InvalidArg, "nothing to mark yet"));
        };
        let agent_id = agent.id.clone();
        journal.append(
            &session,
            &agent_id,
            RecordKind::Mark,
            label,
            Some(&json!({ "message_id": message_id })),
        );
        self.status(sink, format!("mark '{label}' at message {message_id}"));
        Ok(ReplEffect::None)
    }

    fn cmd_pin(
        &mut self,
        path: &str,
        add: bool,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        let agent = self.agents.get_mut(&self.active).expect("active agent exists");
        let changed = if add { agent.pin(path) } else { agent.unpin(path) };
        if !changed {
            return Err(Error::new(
                ErrorCode::InvalidArg,
                if add { format!("'{path}' is already pinned") } else { format!("'{path}' is not pinned") },
            ));
        }
        self.status(sink, format!("{} {path}", if add { "pinned" } else { "unpinned" }));
        Ok(ReplEffect::None)
    }

    fn cmd_clear(
        &mut self,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) -> Result<ReplEffect> {
        let id = self.alloc_id();
        let session = self.session_id.clone();
        let agent = self.agents.get_mut(&self.active).expect("active agent exists");
        agent.push_clear(id);
        let agent_id = agent.id.clone();
        journal.append(&session, &agent_id, RecordKind::Clear, "", None);
        self.status(sink, "context cleared".to_string());
        Ok(ReplEffect::None)
    }

    fn status(&self, sink: &mut dyn DisplaySink, message: String) {
        sink.emit(DisplayEvent::Status { agent_id: self.active.clone(), message });
    }

    // ── Stream lifecycle ──────────────────────────────────────────────────────

    /// Mark the agent's stream slot occupied.  Fails when already streaming.
    pub fn begin_stream(&mut self, agent_id: &str) -> Result<()> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::new(ErrorCode::InvalidArg, "unknown agent"))?;
        if agent.in_flight {
            return Err(Error::new(ErrorCode::InvalidArg, "stream already in flight"));
        }
        agent.in_flight = true;
        Ok(())
    }

    /// Record a completed response: append the assistant message, journal the
    /// conversation records, free the slot.
    pub fn finish_stream(
        &mut self,
        agent_id: &str,
        response: Response,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) {
        let id = self.alloc_id();
        let session = self.session_id.clone();
        let Some(agent) = self.agents.get_mut(agent_id) else { return };
        agent.in_flight = false;
        agent.retry = None;

        let usage = response.usage;
        let message = response.into_message();
        let text = message.joined_text();
        for block in &message.blocks {
            if let ContentBlock::ToolCall { id: call_id, name, arguments } = block {
                journal.append(
                    &session,
                    agent_id,
                    RecordKind::ToolCall,
                    arguments,
                    Some(&json!({ "call_id": call_id, "name": name })),
                );
            }
        }
        if !text.is_empty() {
            journal.append(&session, agent_id, RecordKind::Assistant, &text, None);
        }
        agent.push_message(id, message);
        sink.emit(DisplayEvent::TurnComplete { agent_id: agent_id.to_string(), usage });
    }

    /// Record a tool result message after a tool process finished.
    pub fn append_tool_result(
        &mut self,
        agent_id: &str,
        call_id: &str,
        content: &str,
        is_error: bool,
        journal: &mut dyn Journal,
    ) {
        let id = self.alloc_id();
        let session = self.session_id.clone();
        let Some(agent) = self.agents.get_mut(agent_id) else { return };
        agent.push_message(id, Message::tool_result(call_id, content, is_error));
        journal.append(
            &session,
            agent_id,
            RecordKind::ToolResult,
            content,
            Some(&json!({ "call_id": call_id, "is_error": is_error })),
        );
    }

    /// Cancel the agent's in-flight work: free the slot, drop any retry, and
    /// record the interruption.
    pub fn interrupt(
        &mut self,
        agent_id: &str,
        journal: &mut dyn Journal,
        sink: &mut dyn DisplaySink,
    ) {
        let id = self.alloc_id();
        let session = self.session_id.clone();
        let Some(agent) = self.agents.get_mut(agent_id) else { return };
        if !agent.in_flight && agent.retry.is_none() {
            return;
        }
        agent.in_flight = false;
        agent.retry = None;
        agent.push_interrupted(id);
        journal.append(&session, agent_id, RecordKind::Interrupted, "", None);
        sink.emit(DisplayEvent::Interrupted { agent_id: agent_id.to_string() });
    }

    /// Drop any retry state without touching the log (used when a fresh
    /// dispatch supersedes a scheduled retry).
    pub fn clear_retry(&mut self, agent_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.retry = None;
        }
    }

    /// Bump the retry counter; returns the attempt number (0-based) to feed
    /// the retry policy.
    pub fn bump_retry(&mut self, agent_id: &str) -> u32 {
        let Some(agent) = self.agents.get_mut(agent_id) else { return 0 };
        let state = agent.retry.get_or_insert(RetryState::default());
        let attempt = state.attempt;
        state.attempt += 1;
        agent.in_flight = false;
        attempt
    }

    /// Surface a terminal error for the agent and free its slot.
    pub fn fail_stream(&mut self, agent_id: &str, err: &Error, sink: &mut dyn DisplaySink) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.in_flight = false;
            agent.retry = None;
            let provider = agent.provider.name();
            sink.emit(DisplayEvent::Error {
                agent_id: agent_id.to_string(),
                message: err.user_message(provider),
            });
        }
        debug!(agent_id, error = %err, "stream failed");
    }
}

/// Parse `MODEL[/LEVEL]`, infer the provider, validate the level, and apply
/// everything to `agent`.
pub fn apply_model_override(agent: &mut AgentContext, spec: &str) -> Result<()> {
    let (model, level) = parse_model_spec(spec)?;
    let provider = registry::infer_provider(&model)
        .ok_or_else(|| Error::new(ErrorCode::InvalidArg, format!("Unknown model '{model}'")))?;
    if let Some(level) = level {
        registry::validate_thinking(&model, level)?;
        agent.thinking_level = level;
    }
    agent.provider = provider;
    agent.model = model;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
