// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Chat Completions adapter.
//!
//! `POST {base}/v1/chat/completions` with `Authorization: Bearer`.  SSE chunks
//! carry deltas in `choices[0].delta`; the terminal chunk has `finish_reason`,
//! usage arrives in its own chunk when `stream_options.include_usage` is set,
//! and the stream ends with `data: [DONE]`.

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, ErrorCode, Result};
use crate::registry::validate_thinking;
use crate::stream::{normalize_finish_reason, ResponseAssembler};
use crate::types::{ContentBlock, Request, Role, StreamEvent, ToolChoice, Usage};

// ─── Request serialization ────────────────────────────────────────────────────

pub fn serialize(req: &Request, stream: bool) -> Result<String> {
    if req.model.is_empty() {
        return Err(Error::new(ErrorCode::InvalidArg, "request model is missing"));
    }
    // Chat models have no reasoning parameter; any non-minimum level is a
    // caller error rather than something to silently drop.
    validate_thinking(&req.model, req.thinking_level)?;

    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = &req.system_prompt {
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }
    }
    for m in &req.messages {
        append_message(&mut messages, m);
    }

    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "stream": stream,
    });
    if stream {
        body["stream_options"] = json!({ "include_usage": true });
    }
    if let Some(max) = req.max_output_tokens {
        body["max_completion_tokens"] = json!(max);
    }

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                Ok(json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": parse_schema(&t.schema)?,
                    }
                }))
            })
            .collect::<Result<_>>()?;
        body["tools"] = json!(tools);
        body["tool_choice"] = json!(tool_choice_str(req.tool_choice));
    }

    serde_json::to_string(&body)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("request serialization failed: {e}")))
}

/// Append one internal message as wire message(s).
///
/// Text blocks concatenate into a single `content` string.  Tool calls
/// coalesce into the assistant message's `tool_calls` array.  Tool results
/// become their own `role: tool` messages.  Thinking blocks never travel to
/// this API (reasoning is not an input on Chat Completions).
fn append_message(out: &mut Vec<Value>, m: &crate::types::Message) {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut text = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut tool_results: Vec<Value> = Vec::new();

    for b in &m.blocks {
        match b {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            ContentBlock::ToolCall { id, name, arguments } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments },
            })),
            ContentBlock::ToolResult { tool_call_id, content, .. } => tool_results.push(json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            })),
        }
    }

    if !tool_calls.is_empty() {
        let mut msg = json!({ "role": "assistant", "tool_calls": tool_calls });
        if !text.is_empty() {
            msg["content"] = json!(text);
        }
        out.push(msg);
    } else if !text.is_empty() || tool_results.is_empty() {
        out.push(json!({ "role": role, "content": text }));
    }
    out.extend(tool_results);
}

fn tool_choice_str(choice: ToolChoice) -> &'static str {
    match choice {
        ToolChoice::Auto => "auto",
        ToolChoice::None => "none",
        ToolChoice::Required => "required",
    }
}

fn parse_schema(schema: &str) -> Result<Value> {
    serde_json::from_str(schema)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("tool schema is not valid JSON: {e}")))
}

pub fn build_url(base: &str, _model: &str, _key: &str, _stream: bool) -> String {
    format!("{}/v1/chat/completions", base.trim_end_matches('/'))
}

pub fn build_headers(key: &str, stream: bool) -> Vec<(String, String)> {
    let mut headers = vec![
        ("authorization".to_string(), format!("Bearer {key}")),
        ("content-type".to_string(), "application/json".to_string()),
    ];
    if stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }
    headers
}

// ─── Stream handling ──────────────────────────────────────────────────────────

pub(crate) fn handle_chunk(v: &Value, asm: &mut ResponseAssembler, out: &mut Vec<StreamEvent>) {
    if let Some(envelope) = v.get("error") {
        out.push(StreamEvent::Error(stream_error(envelope)));
        return;
    }

    // Usage-only chunk, emitted last when stream_options.include_usage is on.
    if let Some(usage) = v.get("usage").filter(|u| u.is_object()) {
        out.push(asm.record_usage(usage_from(usage)));
    }

    let choice = &v["choices"][0];
    if !choice.is_object() {
        return;
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        out.push(asm.set_finish(normalize_finish_reason(reason)));
    }

    let delta = &choice["delta"];
    if !delta.is_object() {
        return;
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0) as u32;
            let id = tc["id"].as_str().unwrap_or("");
            let name = tc["function"]["name"].as_str().unwrap_or("");
            if !id.is_empty() || !name.is_empty() {
                out.push(asm.tool_start(index, id, name));
            }
            if let Some(ev) = asm.tool_args(index, tc["function"]["arguments"].as_str().unwrap_or(""))
            {
                out.push(ev);
            }
        }
    }

    // Reasoning deltas: `reasoning_content` is the common spelling,
    // `reasoning` is used by some gateways.
    let thinking = delta["reasoning_content"]
        .as_str()
        .or_else(|| delta["reasoning"].as_str());
    if let Some(t) = thinking {
        if let Some(ev) = asm.push_thinking(t) {
            out.push(ev);
        }
    }

    if let Some(text) = delta["content"].as_str() {
        if let Some(ev) = asm.push_text(text) {
            out.push(ev);
        }
    }
}

fn usage_from(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        thinking_tokens: usage["completion_tokens_details"]["reasoning_tokens"]
            .as_u64()
            .unwrap_or(0),
        cached_tokens: usage["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    }
}

fn stream_error(envelope: &Value) -> Error {
    match envelope["message"].as_str() {
        Some(msg) => {
            let code = match envelope["type"].as_str().unwrap_or("") {
                "rate_limit_error" => ErrorCode::RateLimit,
                "authentication_error" => ErrorCode::Auth,
                "invalid_request_error" => ErrorCode::InvalidArg,
                "server_error" | "api_error" => ErrorCode::Server,
                other => {
                    if other.is_empty() {
                        warn!("stream error envelope without type");
                    }
                    ErrorCode::Unknown
                }
            };
            Error::new(code, msg)
        }
        None => Error::new(ErrorCode::Parse, "malformed error envelope in stream"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
