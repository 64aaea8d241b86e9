// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages API adapter.
//!
//! `POST {base}/v1/messages` with `x-api-key` + `anthropic-version` headers.
//! SSE events carry `{type, index, delta}`; thinking deltas include a
//! `signature` that must be echoed back on the next turn.

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, ErrorCode, Result};
use crate::registry::anthropic_thinking_budget;
use crate::stream::{normalize_finish_reason, ResponseAssembler};
use crate::types::{ContentBlock, Request, Role, StreamEvent, ToolChoice, Usage};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ─── Request serialization ────────────────────────────────────────────────────

pub fn serialize(req: &Request, stream: bool) -> Result<String> {
    if req.model.is_empty() {
        return Err(Error::new(ErrorCode::InvalidArg, "request model is missing"));
    }

    let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len());
    for m in &req.messages {
        if m.role == Role::System {
            warn!("system message in conversation list; use the request system prompt");
            continue;
        }
        let role = match m.role {
            Role::Assistant => "assistant",
            // Tool results travel as user content on this API.
            Role::User | Role::Tool => "user",
            Role::System => unreachable!(),
        };
        let content: Vec<Value> = m.blocks.iter().map(block_to_wire).collect();
        messages.push(json!({ "role": role, "content": content }));
    }

    let mut body = json!({
        "model": req.model,
        "max_tokens": req.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": stream,
        "messages": messages,
    });

    if let Some(system) = &req.system_prompt {
        if !system.is_empty() {
            body["system"] = json!(system);
        }
    }

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                Ok(json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": parse_schema(&t.schema)?,
                }))
            })
            .collect::<Result<_>>()?;
        body["tools"] = json!(tools);
        body["tool_choice"] = match req.tool_choice {
            ToolChoice::Auto => json!({ "type": "auto" }),
            ToolChoice::None => json!({ "type": "none" }),
            ToolChoice::Required => json!({ "type": "any" }),
        };
    }

    if let Some(budget) = anthropic_thinking_budget(req.thinking_level) {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }

    serde_json::to_string(&body)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("request serialization failed: {e}")))
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Thinking { text, signature } => {
            let mut v = json!({ "type": "thinking", "thinking": text });
            if let Some(sig) = signature {
                v["signature"] = json!(sig);
            }
            v
        }
        ContentBlock::RedactedThinking { data } => {
            json!({ "type": "redacted_thinking", "data": data })
        }
        ContentBlock::ToolCall { id, name, arguments } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": serde_json::from_str::<Value>(arguments).unwrap_or(json!({})),
        }),
        ContentBlock::ToolResult { tool_call_id, content, is_error } => json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn parse_schema(schema: &str) -> Result<Value> {
    serde_json::from_str(schema)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("tool schema is not valid JSON: {e}")))
}

pub fn build_url(base: &str, _model: &str, _key: &str, _stream: bool) -> String {
    format!("{}/v1/messages", base.trim_end_matches('/'))
}

pub fn build_headers(key: &str, stream: bool) -> Vec<(String, String)> {
    let mut headers = vec![
        ("x-api-key".to_string(), key.to_string()),
        ("anthropic-version".to_string(), API_VERSION.to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ];
    if stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }
    headers
}

// ─── Stream handling ──────────────────────────────────────────────────────────

pub(crate) fn handle_chunk(v: &Value, asm: &mut ResponseAssembler, out: &mut Vec<StreamEvent>) {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                out.push(asm.record_usage(usage_from(usage)));
            }
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            match block["type"].as_str().unwrap_or("") {
                "tool_use" => {
                    let id = block["id"].as_str().unwrap_or("");
                    let name = block["name"].as_str().unwrap_or("");
                    out.push(asm.tool_start(index, id, name));
                }
                "redacted_thinking" => {
                    if let Some(data) = block["data"].as_str() {
                        asm.push_redacted_thinking(data);
                    }
                }
                _ => {}
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    if let Some(ev) = asm.push_text(delta["text"].as_str().unwrap_or("")) {
                        out.push(ev);
                    }
                }
                "thinking_delta" => {
                    if let Some(ev) = asm.push_thinking(delta["thinking"].as_str().unwrap_or("")) {
                        out.push(ev);
                    }
                }
                // Opaque integrity token for the thinking block: recorded for
                // echo-back, never surfaced as readable output.
                "signature_delta" => {
                    asm.set_thinking_signature(delta["signature"].as_str().unwrap_or(""));
                }
                "input_json_delta" => {
                    if let Some(ev) = asm.tool_args(index, delta["partial_json"].as_str().unwrap_or(""))
                    {
                        out.push(ev);
                    }
                }
                _ => {}
            }
        }
        "message_delta" => {
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                out.push(asm.set_finish(normalize_finish_reason(reason)));
            }
            if let Some(usage) = v.get("usage") {
                out.push(asm.record_usage(usage_from(usage)));
            }
        }
        "message_stop" => out.push(StreamEvent::Done),
        "error" => out.push(StreamEvent::Error(stream_error(&v["error"]))),
        // ping and future event types are ignored.
        _ => {}
    }
}

fn usage_from(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
        thinking_tokens: 0,
        cached_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
        total_tokens: 0,
    }
}

fn stream_error(envelope: &Value) -> Error {
    match envelope["message"].as_str() {
        Some(msg) => {
            let code = match envelope["type"].as_str().unwrap_or("") {
                "overloaded_error" | "api_error" => ErrorCode::Server,
                "rate_limit_error" => ErrorCode::RateLimit,
                "authentication_error" | "permission_error" => ErrorCode::Auth,
                "invalid_request_error" => ErrorCode::InvalidArg,
                _ => ErrorCode::Unknown,
            };
            Error::new(code, msg)
        }
        None => Error::new(ErrorCode::Parse, "malformed error envelope in stream"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::CollectSink;
    use crate::stream::StreamSink;
    use crate::types::Message;

    fn body_for(req: &Request) -> Value {
        serde_json::from_str(&serialize(req, true).unwrap()).unwrap()
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn missing_model_is_invalid_arg() {
        let req = Request::default();
        assert_eq!(serialize(&req, false).unwrap_err().code, ErrorCode::InvalidArg);
    }

    #[test]
    fn system_prompt_is_top_level() {
        let mut req = Request::new("claude-sonnet-4-5");
        req.set_system("be helpful").unwrap();
        req.add_message(&Message::user("hi")).unwrap();
        let body = body_for(&req);
        assert_eq!(body["system"], "be helpful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn tool_result_travels_as_user_content() {
        let mut req = Request::new("claude-sonnet-4-5");
        req.add_message(&Message::tool_result("toolu_01", "output", false)).unwrap();
        let body = body_for(&req);
        assert_eq!(body["messages"][0]["role"], "user");
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "toolu_01");
        assert_eq!(block["is_error"], false);
    }

    #[test]
    fn tool_call_becomes_tool_use_with_parsed_input() {
        let mut req = Request::new("claude-sonnet-4-5");
        let msg = Message {
            role: Role::Assistant,
            blocks: vec![ContentBlock::ToolCall {
                id: "toolu_01".into(),
                name: "grep".into(),
                arguments: r#"{"pattern":"x"}"#.into(),
            }],
            provider_metadata: None,
        };
        req.add_message(&msg).unwrap();
        let body = body_for(&req);
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["input"]["pattern"], "x");
    }

    #[test]
    fn thinking_block_echoes_signature() {
        let mut req = Request::new("claude-sonnet-4-5");
        let msg = Message {
            role: Role::Assistant,
            blocks: vec![ContentBlock::Thinking {
                text: "chain".into(),
                signature: Some("EqRk".into()),
            }],
            provider_metadata: None,
        };
        req.add_message(&msg).unwrap();
        let body = body_for(&req);
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "thinking");
        assert_eq!(block["signature"], "EqRk");
    }

    #[test]
    fn thinking_level_adds_budget() {
        let mut req = Request::new("claude-sonnet-4-5");
        req.set_thinking(crate::types::ThinkingLevel::Med).unwrap();
        req.add_message(&Message::user("hi")).unwrap();
        let body = body_for(&req);
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 8192);
    }

    #[test]
    fn thinking_none_omits_block() {
        let mut req = Request::new("claude-sonnet-4-5");
        req.add_message(&Message::user("hi")).unwrap();
        let body = body_for(&req);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn tool_choice_required_maps_to_any() {
        let mut req = Request::new("claude-sonnet-4-5");
        req.tool_choice = ToolChoice::Required;
        req.add_tool(crate::types::ToolSpec {
            name: "grep".into(),
            description: "search".into(),
            schema: r#"{"type":"object"}"#.into(),
        })
        .unwrap();
        req.add_message(&Message::user("hi")).unwrap();
        let body = body_for(&req);
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn invalid_tool_schema_is_parse_error() {
        let mut req = Request::new("claude-sonnet-4-5");
        req.add_tool(crate::types::ToolSpec {
            name: "bad".into(),
            description: String::new(),
            schema: "{not json".into(),
        })
        .unwrap();
        assert_eq!(serialize(&req, false).unwrap_err().code, ErrorCode::Parse);
    }

    #[test]
    fn url_and_headers() {
        assert_eq!(
            build_url("https://api.anthropic.com/", "claude-sonnet-4-5", "k", true),
            "https://api.anthropic.com/v1/messages"
        );
        let headers = build_headers("sk-test", true);
        assert!(headers.contains(&("x-api-key".into(), "sk-test".into())));
        assert!(headers.contains(&("anthropic-version".into(), API_VERSION.into())));
        assert!(headers.iter().any(|(k, _)| k == "accept"));
        assert!(!build_headers("sk-test", false).iter().any(|(k, _)| k == "accept"));
    }

    // ── Stream handling ───────────────────────────────────────────────────────

    fn run(chunks: &[Value]) -> (Vec<StreamEvent>, crate::types::Response) {
        let mut asm = ResponseAssembler::new("claude-sonnet-4-5");
        let mut out = Vec::new();
        for c in chunks {
            handle_chunk(c, &mut asm, &mut out);
        }
        (out, asm.into_response())
    }

    #[test]
    fn text_deltas_assemble() {
        let (events, resp) = run(&[
            json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hel" } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "lo" } }),
            json!({ "type": "message_stop" }),
        ]);
        assert_eq!(resp.blocks, vec![ContentBlock::Text { text: "Hello".into() }]);
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[test]
    fn thinking_with_signature_delta() {
        let (_, resp) = run(&[
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "thinking_delta", "thinking": "Let me think." } }),
            json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "signature_delta", "signature": "EqRkLm" } }),
        ]);
        assert_eq!(
            resp.blocks,
            vec![ContentBlock::Thinking { text: "Let me think.".into(), signature: Some("EqRkLm".into()) }]
        );
    }

    #[test]
    fn tool_use_accumulates_input_json() {
        let (_, resp) = run(&[
            json!({ "type": "content_block_start", "index": 1,
                    "content_block": { "type": "tool_use", "id": "toolu_01", "name": "shell" } }),
            json!({ "type": "content_block_delta", "index": 1,
                    "delta": { "type": "input_json_delta", "partial_json": "{\"cmd\":" } }),
            json!({ "type": "content_block_delta", "index": 1,
                    "delta": { "type": "input_json_delta", "partial_json": "\"ls\"}" } }),
            json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } }),
        ]);
        assert_eq!(resp.finish_reason, crate::types::FinishReason::ToolCalls);
        assert!(matches!(
            &resp.blocks[0],
            ContentBlock::ToolCall { id, name, arguments }
                if id == "toolu_01" && name == "shell" && arguments == "{\"cmd\":\"ls\"}"
        ));
    }

    #[test]
    fn usage_split_across_start_and_delta() {
        let (_, resp) = run(&[
            json!({ "type": "message_start", "message": { "usage": {
                "input_tokens": 42, "cache_read_input_tokens": 10 } } }),
            json!({ "type": "message_delta", "usage": { "output_tokens": 88 } }),
        ]);
        assert_eq!(resp.usage.input_tokens, 42);
        assert_eq!(resp.usage.cached_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 88);
    }

    #[test]
    fn max_tokens_stop_reason_is_length() {
        let (_, resp) = run(&[
            json!({ "type": "message_delta", "delta": { "stop_reason": "max_tokens" } }),
        ]);
        assert_eq!(resp.finish_reason, crate::types::FinishReason::Length);
    }

    #[test]
    fn redacted_thinking_block_is_kept() {
        let (_, resp) = run(&[
            json!({ "type": "content_block_start", "index": 0,
                    "content_block": { "type": "redacted_thinking", "data": "opaque==" } }),
        ]);
        assert_eq!(resp.blocks, vec![ContentBlock::RedactedThinking { data: "opaque==".into() }]);
    }

    #[test]
    fn error_event_maps_category() {
        let mut asm = ResponseAssembler::new("m");
        let mut out = Vec::new();
        handle_chunk(
            &json!({ "type": "error", "error": { "type": "overloaded_error", "message": "busy" } }),
            &mut asm,
            &mut out,
        );
        assert!(matches!(&out[0], StreamEvent::Error(e) if e.code == ErrorCode::Server));
    }

    #[test]
    fn malformed_error_envelope_is_parse() {
        let mut asm = ResponseAssembler::new("m");
        let mut out = Vec::new();
        handle_chunk(&json!({ "type": "error", "error": { "nope": 1 } }), &mut asm, &mut out);
        assert!(matches!(&out[0], StreamEvent::Error(e) if e.code == ErrorCode::Parse));
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let (events, resp) = run(&[json!({ "type": "ping" })]);
        assert!(events.is_empty());
        assert!(resp.blocks.is_empty());
    }

    #[test]
    fn full_stream_through_context() {
        use crate::registry::ApiFlavor;
        use crate::stream::StreamContext;
        let mut ctx = StreamContext::new(ApiFlavor::AnthropicMessages, "claude-sonnet-4-5");
        let mut sink = CollectSink::default();
        let raw = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":5}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hey\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        ctx.feed(raw.as_bytes(), &mut sink);
        assert!(ctx.is_done());
        let resp = ctx.into_response();
        assert_eq!(resp.blocks, vec![ContentBlock::Text { text: "hey".into() }]);
        assert_eq!(resp.usage.input_tokens, 5);
    }

    #[test]
    fn sink_closure_receives_events() {
        let mut count = 0usize;
        {
            let mut sink = |_ev: StreamEvent| count += 1;
            sink.on_event(StreamEvent::Started);
        }
        assert_eq!(count, 1);
    }
}
