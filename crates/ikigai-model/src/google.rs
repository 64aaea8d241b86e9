// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Google Generative Language API adapter.
//!
//! `POST {base}/v1beta/models/{model}:generateContent?key=…` (or
//! `:streamGenerateContent?key=…&alt=sse` when streaming).  Content parts
//! carry `text`, `functionCall`, `functionResponse`, `thought` flags, and a
//! `thoughtSignature` token that must be echoed on the next turn.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::error::{Error, ErrorCode, Result};
use crate::registry::{google_thinking, GoogleThinking};
use crate::stream::{normalize_finish_reason, ResponseAssembler};
use crate::types::{ContentBlock, Request, Role, StreamEvent, ToolChoice, Usage};

/// Provider-metadata key under which an echoed thought signature is stored.
pub const THOUGHT_SIGNATURE_KEY: &str = "thought_signature";

// ─── Request serialization ────────────────────────────────────────────────────

pub fn serialize(req: &Request, _stream: bool) -> Result<String> {
    if req.model.is_empty() {
        return Err(Error::new(ErrorCode::InvalidArg, "request model is missing"));
    }

    // functionResponse parts are matched to calls by function *name*, so map
    // call ids to names up front.
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for m in &req.messages {
        for (id, name, _) in m.tool_calls() {
            call_names.insert(id, name);
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for m in &req.messages {
        if m.role == Role::System {
            continue;
        }
        let role = match m.role {
            Role::Assistant => "model",
            Role::Tool => "function",
            _ => "user",
        };
        let mut parts: Vec<Value> = Vec::new();
        // An echoed thought signature travels as the first part of the turn.
        if let Some(sig) = m
            .provider_metadata
            .as_ref()
            .and_then(|d| d[THOUGHT_SIGNATURE_KEY].as_str())
        {
            parts.push(json!({ "thoughtSignature": sig }));
        }
        for b in &m.blocks {
            parts.push(block_to_part(b, &call_names));
        }
        if parts.is_empty() {
            parts.push(json!({ "text": "" }));
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut generation_config = json!({});
    if let Some(max) = req.max_output_tokens {
        generation_config["maxOutputTokens"] = json!(max);
    }
    match google_thinking(&req.model, req.thinking_level) {
        GoogleThinking::Budget(budget) => {
            generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
        }
        GoogleThinking::Level(level) => {
            generation_config["thinkingConfig"] = json!({ "thinkingLevel": level });
        }
        GoogleThinking::Ignore => {}
    }

    let mut body = json!({ "contents": contents });
    if let Some(system) = &req.system_prompt {
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
    }
    if generation_config.as_object().is_some_and(|m| !m.is_empty()) {
        body["generationConfig"] = generation_config;
    }
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                Ok(json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": parse_schema(&t.schema)?,
                }))
            })
            .collect::<Result<_>>()?;
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
        body["toolConfig"] = json!({
            "functionCallingConfig": { "mode": match req.tool_choice {
                ToolChoice::Auto => "AUTO",
                ToolChoice::None => "NONE",
                ToolChoice::Required => "ANY",
            }}
        });
    }

    serde_json::to_string(&body)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("request serialization failed: {e}")))
}

fn block_to_part(block: &ContentBlock, call_names: &HashMap<&str, &str>) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "text": text }),
        ContentBlock::Thinking { text, .. } => json!({ "text": text, "thought": true }),
        // No plaintext rendition exists; ship the opaque blob as a signature.
        ContentBlock::RedactedThinking { data } => json!({ "thoughtSignature": data }),
        ContentBlock::ToolCall { name, arguments, .. } => json!({
            "functionCall": {
                "name": name,
                "args": serde_json::from_str::<Value>(arguments).unwrap_or(json!({})),
            }
        }),
        ContentBlock::ToolResult { tool_call_id, content, .. } => {
            let name = call_names.get(tool_call_id.as_str()).copied().unwrap_or(tool_call_id);
            json!({
                "functionResponse": {
                    "name": name,
                    "response": { "content": content },
                }
            })
        }
    }
}

fn parse_schema(schema: &str) -> Result<Value> {
    serde_json::from_str(schema)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("tool schema is not valid JSON: {e}")))
}

pub fn build_url(base: &str, model: &str, key: &str, stream: bool) -> String {
    let base = base.trim_end_matches('/');
    if stream {
        format!("{base}/v1beta/models/{model}:streamGenerateContent?key={key}&alt=sse")
    } else {
        format!("{base}/v1beta/models/{model}:generateContent?key={key}")
    }
}

pub fn build_headers(_key: &str, stream: bool) -> Vec<(String, String)> {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
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

    if let Some(meta) = v.get("usageMetadata") {
        out.push(asm.record_usage(usage_from(meta)));
    }

    let candidate = &v["candidates"][0];
    if candidate.is_object() {
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for (i, part) in parts.iter().enumerate() {
                if let Some(sig) = part["thoughtSignature"].as_str() {
                    asm.set_provider_data(THOUGHT_SIGNATURE_KEY, json!(sig));
                }
                if let Some(fc) = part.get("functionCall") {
                    let name = fc["name"].as_str().unwrap_or("");
                    let args = serde_json::to_string(&fc["args"]).unwrap_or_default();
                    // Calls arrive whole; the part index keys parallel calls.
                    out.push(asm.tool_start(i as u32, name, name));
                    if let Some(ev) = asm.tool_args(i as u32, &args) {
                        out.push(ev);
                    }
                    continue;
                }
                if let Some(text) = part["text"].as_str() {
                    let ev = if part["thought"].as_bool() == Some(true) {
                        asm.push_thinking(text)
                    } else {
                        asm.push_text(text)
                    };
                    if let Some(ev) = ev {
                        out.push(ev);
                    }
                }
            }
        }
        if let Some(reason) = candidate["finishReason"].as_str() {
            out.push(asm.set_finish(normalize_finish_reason(reason)));
            out.push(StreamEvent::Done);
        }
    }
}

fn usage_from(meta: &Value) -> Usage {
    Usage {
        input_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0),
        output_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0),
        thinking_tokens: meta["thoughtsTokenCount"].as_u64().unwrap_or(0),
        cached_tokens: meta["cachedContentTokenCount"].as_u64().unwrap_or(0),
        total_tokens: meta["totalTokenCount"].as_u64().unwrap_or(0),
    }
}

fn stream_error(envelope: &Value) -> Error {
    match envelope["message"].as_str() {
        Some(msg) => {
            let code = match envelope["status"].as_str().unwrap_or("") {
                "RESOURCE_EXHAUSTED" => ErrorCode::RateLimit,
                "UNAUTHENTICATED" | "PERMISSION_DENIED" => ErrorCode::Auth,
                "INVALID_ARGUMENT" => ErrorCode::InvalidArg,
                "NOT_FOUND" => ErrorCode::NotFound,
                "INTERNAL" | "UNAVAILABLE" => ErrorCode::Server,
                _ => ErrorCode::Unknown,
            };
            Error::new(code, msg)
        }
        None => Error::new(ErrorCode::Parse, "malformed error envelope in stream"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
