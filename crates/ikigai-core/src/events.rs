// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Display events: the core never paints the terminal, it emits these.
//! The renderer process/layer consumes them in order, per agent.

use std::time::Duration;

use ikigai_model::Usage;

#[derive(Debug, Clone)]
pub enum DisplayEvent {
    /// Streamed answer text for an agent.
    Text { agent_id: String, chunk: String },
    /// Streamed reasoning text (collapsed by default in the UI).
    Thinking { agent_id: String, chunk: String },
    ToolCallStarted { agent_id: String, call_id: String, name: String },
    ToolCallFinished { agent_id: String, call_id: String, output: String, is_error: bool },
    /// The agent's turn finished; usage for the turn.
    TurnComplete { agent_id: String, usage: Usage },
    /// A user-visible error line (already formatted via the taxonomy).
    Error { agent_id: String, message: String },
    /// The in-flight stream was cancelled by the user.
    Interrupted { agent_id: String },
    RetryScheduled { agent_id: String, delay: Duration, attempt: u32 },
    /// Informational line (command feedback, agent switches…).
    Status { agent_id: String, message: String },
    /// Scroll the transcript view.
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    /// Input line redraw hint: current buffer and completion hint, if any.
    InputLine { buffer: String, completion: Option<String> },
}

/// Receiver for display events.  Must not block; backpressure is handled by
/// the transport (the loop only reads sockets when ready).
pub trait DisplaySink {
    fn emit(&mut self, event: DisplayEvent);
}

/// Collects events; used by tests.
#[derive(Debug, Default)]
pub struct CollectDisplay {
    pub events: Vec<DisplayEvent>,
}

impl DisplaySink for CollectDisplay {
    fn emit(&mut self, event: DisplayEvent) {
        self.events.push(event);
    }
}

/// Writes compact lines to stderr via tracing; the default sink when no
/// renderer is attached.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn emit(&mut self, event: DisplayEvent) {
        tracing::info!(?event, "display");
    }
}
