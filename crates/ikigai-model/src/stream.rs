// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming pipeline: one [`StreamContext`] per outbound request.
//!
//! The context drives the SSE framer, strips the `data: ` prefix, treats the
//! literal `[DONE]` as end-of-stream, parses each payload as JSON, and routes
//! it to the provider-specific delta handler.  Deltas are both emitted to the
//! caller's sink and accumulated into content blocks, so re-streaming the same
//! bytes into a fresh context reproduces the identical [`Response`].
//!
//! Malformed or unexpected JSON shapes are ignored for that event — a stream
//! must never crash on partial or novel provider output.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::registry::ApiFlavor;
use crate::types::{ContentBlock, FinishReason, Response, StreamEvent, Usage};
use crate::{anthropic, google, openai_chat, openai_responses, sse::SseFramer};

// ─── Sink ─────────────────────────────────────────────────────────────────────

/// Receiver for incremental stream events.  Must not block.
pub trait StreamSink {
    fn on_event(&mut self, event: StreamEvent);
}

impl<F: FnMut(StreamEvent)> StreamSink for F {
    fn on_event(&mut self, event: StreamEvent) {
        self(event)
    }
}

/// Sink that simply collects events (used by tests and the event loop's
/// buffering path).
#[derive(Debug, Default)]
pub struct CollectSink {
    pub events: Vec<StreamEvent>,
}

impl StreamSink for CollectSink {
    fn on_event(&mut self, event: StreamEvent) {
        self.events.push(event);
    }
}

// ─── Finish-reason normalization ──────────────────────────────────────────────

/// Map a provider finish/stop reason string onto the internal enum.
/// Comparison is case-insensitive (Google reports `STOP`, `MAX_TOKENS`, …).
pub fn normalize_finish_reason(raw: &str) -> FinishReason {
    match raw.to_ascii_lowercase().as_str() {
        "stop" | "end_turn" => FinishReason::Stop,
        "length" | "max_tokens" => FinishReason::Length,
        "tool_calls" | "tool_use" => FinishReason::ToolCalls,
        "content_filter" | "safety" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

// ─── Response assembly ────────────────────────────────────────────────────────

/// Accumulates streamed deltas into ordered content blocks plus usage and
/// finish reason.  Blocks open lazily and stay addressable: text and thinking
/// each have at most one open block; tool calls are keyed by their wire index.
#[derive(Debug)]
pub struct ResponseAssembler {
    model: String,
    blocks: Vec<ContentBlock>,
    text_idx: Option<usize>,
    thinking_idx: Option<usize>,
    tool_idx: BTreeMap<u32, usize>,
    usage: Usage,
    finish: FinishReason,
    provider_data: Option<Value>,
}

impl ResponseAssembler {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            blocks: Vec::new(),
            text_idx: None,
            thinking_idx: None,
            tool_idx: BTreeMap::new(),
            usage: Usage::default(),
            finish: FinishReason::Unknown,
            provider_data: None,
        }
    }

    pub fn push_text(&mut self, chunk: &str) -> Option<StreamEvent> {
        if chunk.is_empty() {
            return None;
        }
        let idx = match self.text_idx {
            Some(i) => i,
            None => {
                self.blocks.push(ContentBlock::Text { text: String::new() });
                let i = self.blocks.len() - 1;
                self.text_idx = Some(i);
                i
            }
        };
        if let ContentBlock::Text { text } = &mut self.blocks[idx] {
            text.push_str(chunk);
        }
        Some(StreamEvent::Text(chunk.to_string()))
    }

    pub fn push_thinking(&mut self, chunk: &str) -> Option<StreamEvent> {
        if chunk.is_empty() {
            return None;
        }
        let idx = self.ensure_thinking_block();
        if let ContentBlock::Thinking { text, .. } = &mut self.blocks[idx] {
            text.push_str(chunk);
        }
        Some(StreamEvent::Thinking(chunk.to_string()))
    }

    /// Record the provider's reasoning signature on the open thinking block.
    /// Never emitted as an event; it is echoed back on the next request.
    pub fn set_thinking_signature(&mut self, sig: &str) {
        if sig.is_empty() {
            return;
        }
        let idx = self.ensure_thinking_block();
        if let ContentBlock::Thinking { signature, .. } = &mut self.blocks[idx] {
            match signature {
                Some(existing) => existing.push_str(sig),
                None => *signature = Some(sig.to_string()),
            }
        }
    }

    fn ensure_thinking_block(&mut self) -> usize {
        match self.thinking_idx {
            Some(i) => i,
            None => {
                self.blocks
                    .push(ContentBlock::Thinking { text: String::new(), signature: None });
                let i = self.blocks.len() - 1;
                self.thinking_idx = Some(i);
                i
            }
        }
    }

    pub fn push_redacted_thinking(&mut self, data: &str) {
        self.blocks.push(ContentBlock::RedactedThinking { data: data.to_string() });
    }

    /// First sight of a tool call at `index`: create the block and record
    /// `id` and `name` once.
    pub fn tool_start(&mut self, index: u32, id: &str, name: &str) -> StreamEvent {
        let idx = self.ensure_tool_block(index);
        if let ContentBlock::ToolCall { id: bid, name: bname, .. } = &mut self.blocks[idx] {
            if bid.is_empty() && !id.is_empty() {
                *bid = id.to_string();
            }
            if bname.is_empty() && !name.is_empty() {
                *bname = name.to_string();
            }
        }
        StreamEvent::ToolCallDelta { id: self.tool_id(index), fragment: String::new() }
    }

    /// Append an arguments fragment for the call at `index`, creating the
    /// block on first sight.
    pub fn tool_args(&mut self, index: u32, fragment: &str) -> Option<StreamEvent> {
        if fragment.is_empty() {
            return None;
        }
        let idx = self.ensure_tool_block(index);
        if let ContentBlock::ToolCall { arguments, .. } = &mut self.blocks[idx] {
            arguments.push_str(fragment);
        }
        Some(StreamEvent::ToolCallDelta {
            id: self.tool_id(index),
            fragment: fragment.to_string(),
        })
    }

    fn ensure_tool_block(&mut self, index: u32) -> usize {
        if let Some(&idx) = self.tool_idx.get(&index) {
            return idx;
        }
        self.blocks.push(ContentBlock::ToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        let idx = self.blocks.len() - 1;
        self.tool_idx.insert(index, idx);
        idx
    }

    fn tool_id(&self, index: u32) -> String {
        self.tool_idx
            .get(&index)
            .and_then(|&i| match &self.blocks[i] {
                ContentBlock::ToolCall { id, .. } => Some(id.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn set_finish(&mut self, reason: FinishReason) -> StreamEvent {
        self.finish = reason;
        StreamEvent::FinishReason(reason)
    }

    pub fn record_usage(&mut self, usage: Usage) -> StreamEvent {
        self.usage.merge(&usage);
        StreamEvent::Usage(self.usage)
    }

    pub fn set_provider_data(&mut self, key: &str, value: Value) {
        let data = self.provider_data.get_or_insert_with(|| Value::Object(Default::default()));
        if let Some(map) = data.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn finish_reason(&self) -> FinishReason {
        self.finish
    }

    pub fn into_response(self) -> Response {
        Response {
            model: self.model,
            blocks: self.blocks,
            usage: self.usage,
            finish_reason: self.finish,
            provider_data: self.provider_data,
        }
    }
}

// ─── Stream context ───────────────────────────────────────────────────────────

/// Per-request streaming state: framer + assembler + provider dispatch.
pub struct StreamContext {
    flavor: ApiFlavor,
    framer: SseFramer,
    asm: ResponseAssembler,
    started: bool,
    done: bool,
}

impl StreamContext {
    pub fn new(flavor: ApiFlavor, model: impl Into<String>) -> Self {
        Self {
            flavor,
            framer: SseFramer::new(),
            asm: ResponseAssembler::new(model),
            started: false,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw HTTP body bytes; complete SSE events are parsed and their
    /// deltas forwarded to `sink`.
    pub fn feed(&mut self, bytes: &[u8], sink: &mut dyn StreamSink) {
        self.framer.feed(bytes);
        while let Some(event) = self.framer.take_event() {
            if self.done {
                break;
            }
            self.dispatch_event(&event, sink);
        }
    }

    /// Terminate the stream with a transport-level failure.  The sink still
    /// receives `Done` so the caller can clean up uniformly.
    pub fn fail(&mut self, err: Error, sink: &mut dyn StreamSink) {
        if self.done {
            return;
        }
        self.asm.set_finish(FinishReason::Error);
        sink.on_event(StreamEvent::Error(err));
        self.done = true;
        sink.on_event(StreamEvent::Done);
    }

    /// Consume the context and return the assembled response.
    pub fn into_response(self) -> Response {
        self.asm.into_response()
    }

    fn dispatch_event(&mut self, raw: &[u8], sink: &mut dyn StreamSink) {
        // An SSE event may carry `event:` / `id:` lines; only `data:` matters.
        let text = String::from_utf8_lossy(raw);
        for line in text.lines() {
            let Some(payload) = line.strip_prefix("data:") else { continue };
            let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();
            if payload.is_empty() {
                continue;
            }
            if payload == "[DONE]" {
                self.done = true;
                sink.on_event(StreamEvent::Done);
                return;
            }
            let v: Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "ignoring unparseable stream payload");
                    continue;
                }
            };
            if !v.is_object() {
                continue;
            }
            if !self.started {
                self.started = true;
                sink.on_event(StreamEvent::Started);
            }

            let mut out: Vec<StreamEvent> = Vec::new();
            match self.flavor {
                ApiFlavor::AnthropicMessages => anthropic::handle_chunk(&v, &mut self.asm, &mut out),
                ApiFlavor::OpenAiChat => openai_chat::handle_chunk(&v, &mut self.asm, &mut out),
                ApiFlavor::OpenAiResponses => {
                    openai_responses::handle_chunk(&v, &mut self.asm, &mut out)
                }
                ApiFlavor::GoogleGenerate => google::handle_chunk(&v, &mut self.asm, &mut out),
            }

            for ev in out {
                match ev {
                    StreamEvent::Error(err) => {
                        sink.on_event(StreamEvent::Error(err));
                        self.done = true;
                        sink.on_event(StreamEvent::Done);
                        return;
                    }
                    StreamEvent::Done => {
                        self.done = true;
                        sink.on_event(StreamEvent::Done);
                        return;
                    }
                    other => sink.on_event(other),
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
