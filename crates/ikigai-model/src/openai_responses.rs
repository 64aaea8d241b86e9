// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Responses API adapter (reasoning models: o-series, gpt-5 family).
//!
//! `POST {base}/v1/responses`.  Reasoning happens server-side; the request
//! carries `reasoning.effort` with a per-model vocabulary from the registry,
//! and the input is a typed item list rather than chat messages.  Streaming
//! uses typed events (`response.output_text.delta`,
//! `response.function_call_arguments.delta`, `response.completed`, …).

use serde_json::{json, Value};

use crate::error::{Error, ErrorCode, Result};
use crate::registry::{reasoning_effort, validate_thinking};
use crate::stream::{normalize_finish_reason, ResponseAssembler};
use crate::types::{ContentBlock, FinishReason, Request, Role, StreamEvent, ToolChoice, Usage};

// ─── Request serialization ────────────────────────────────────────────────────

pub fn serialize(req: &Request, stream: bool) -> Result<String> {
    if req.model.is_empty() {
        return Err(Error::new(ErrorCode::InvalidArg, "request model is missing"));
    }
    validate_thinking(&req.model, req.thinking_level)?;

    let mut input: Vec<Value> = Vec::new();
    for m in &req.messages {
        append_item(&mut input, m);
    }

    let mut body = json!({
        "model": req.model,
        "input": input,
        "stream": stream,
    });
    if let Some(system) = &req.system_prompt {
        if !system.is_empty() {
            body["instructions"] = json!(system);
        }
    }
    if let Some(max) = req.max_output_tokens {
        body["max_output_tokens"] = json!(max);
    }
    if let Some(effort) = reasoning_effort(&req.model, req.thinking_level) {
        body["reasoning"] = json!({ "effort": effort });
    }

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                Ok(json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": parse_schema(&t.schema)?,
                }))
            })
            .collect::<Result<_>>()?;
        body["tools"] = json!(tools);
        body["tool_choice"] = json!(match req.tool_choice {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
        });
    }

    serde_json::to_string(&body)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("request serialization failed: {e}")))
}

fn append_item(out: &mut Vec<Value>, m: &crate::types::Message) {
    let mut text = String::new();
    for b in &m.blocks {
        match b {
            ContentBlock::Text { text: t } => text.push_str(t),
            // Reasoning is server-side on this API; local thinking blocks are
            // never sent back.
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            ContentBlock::ToolCall { id, name, arguments } => out.push(json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": arguments,
            })),
            ContentBlock::ToolResult { tool_call_id, content, .. } => out.push(json!({
                "type": "function_call_output",
                "call_id": tool_call_id,
                "output": content,
            })),
        }
    }
    if !text.is_empty() {
        let (role, part_type) = match m.role {
            Role::Assistant => ("assistant", "output_text"),
            _ => ("user", "input_text"),
        };
        out.push(json!({
            "role": role,
            "content": [{ "type": part_type, "text": text }],
        }));
    }
}

fn parse_schema(schema: &str) -> Result<Value> {
    serde_json::from_str(schema)
        .map_err(|e| Error::new(ErrorCode::Parse, format!("tool schema is not valid JSON: {e}")))
}

pub fn build_url(base: &str, _model: &str, _key: &str, _stream: bool) -> String {
    format!("{}/v1/responses", base.trim_end_matches('/'))
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
    match v["type"].as_str().unwrap_or("") {
        "response.output_text.delta" => {
            if let Some(ev) = asm.push_text(v["delta"].as_str().unwrap_or("")) {
                out.push(ev);
            }
        }
        "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
            if let Some(ev) = asm.push_thinking(v["delta"].as_str().unwrap_or("")) {
                out.push(ev);
            }
        }
        "response.output_item.added" => {
            let item = &v["item"];
            if item["type"].as_str() == Some("function_call") {
                let index = v["output_index"].as_u64().unwrap_or(0) as u32;
                let id = item["call_id"].as_str().unwrap_or("");
                let name = item["name"].as_str().unwrap_or("");
                out.push(asm.tool_start(index, id, name));
            }
        }
        "response.function_call_arguments.delta" => {
            let index = v["output_index"].as_u64().unwrap_or(0) as u32;
            if let Some(ev) = asm.tool_args(index, v["delta"].as_str().unwrap_or("")) {
                out.push(ev);
            }
        }
        "response.completed" => {
            if let Some(usage) = v["response"].get("usage") {
                out.push(asm.record_usage(usage_from(usage)));
            }
            let reason = if asm.finish_reason() == FinishReason::Unknown {
                // A completed response that produced function calls finishes
                // with ToolCalls; otherwise it is a clean stop.
                if response_has_function_call(&v["response"]) {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                }
            } else {
                asm.finish_reason()
            };
            out.push(asm.set_finish(reason));
            out.push(StreamEvent::Done);
        }
        "response.incomplete" => {
            if let Some(usage) = v["response"].get("usage") {
                out.push(asm.record_usage(usage_from(usage)));
            }
            let reason = v["response"]["incomplete_details"]["reason"].as_str().unwrap_or("");
            let normalized = if reason == "max_output_tokens" {
                FinishReason::Length
            } else {
                normalize_finish_reason(reason)
            };
            out.push(asm.set_finish(normalized));
            out.push(StreamEvent::Done);
        }
        "response.failed" => {
            let envelope = &v["response"]["error"];
            out.push(StreamEvent::Error(stream_error(envelope)));
        }
        "error" => out.push(StreamEvent::Error(stream_error(v))),
        _ => {}
    }
}

fn response_has_function_call(response: &Value) -> bool {
    response["output"]
        .as_array()
        .is_some_and(|items| items.iter().any(|i| i["type"].as_str() == Some("function_call")))
}

fn usage_from(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
        thinking_tokens: usage["output_tokens_details"]["reasoning_tokens"].as_u64().unwrap_or(0),
        cached_tokens: usage["input_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    }
}

fn stream_error(envelope: &Value) -> Error {
    match envelope["message"].as_str() {
        Some(msg) => {
            let code = match envelope["code"].as_str().unwrap_or("") {
                "rate_limit_exceeded" => ErrorCode::RateLimit,
                "server_error" => ErrorCode::Server,
                "invalid_prompt" => ErrorCode::InvalidArg,
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
    use crate::types::{Message, ThinkingLevel};

    fn body_for(req: &Request) -> Value {
        serde_json::from_str(&serialize(req, true).unwrap()).unwrap()
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn system_prompt_becomes_instructions() {
        let mut req = Request::new("gpt-5");
        req.set_system("careful now").unwrap();
        req.add_message(&Message::user("hi")).unwrap();
        let body = body_for(&req);
        assert_eq!(body["instructions"], "careful now");
        assert_eq!(body["input"][0]["role"], "user");
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
    }

    #[test]
    fn assistant_text_uses_output_text_part() {
        let mut req = Request::new("gpt-5");
        req.add_message(&Message::assistant("earlier answer")).unwrap();
        let body = body_for(&req);
        assert_eq!(body["input"][0]["role"], "assistant");
        assert_eq!(body["input"][0]["content"][0]["type"], "output_text");
    }

    #[test]
    fn tool_calls_become_function_call_items() {
        let mut req = Request::new("gpt-5");
        let msg = Message {
            role: Role::Assistant,
            blocks: vec![ContentBlock::ToolCall {
                id: "call_9".into(),
                name: "grep".into(),
                arguments: r#"{"q":"x"}"#.into(),
            }],
            provider_metadata: None,
        };
        req.add_message(&msg).unwrap();
        req.add_message(&Message::tool_result("call_9", "match", false)).unwrap();
        let body = body_for(&req);
        assert_eq!(body["input"][0]["type"], "function_call");
        assert_eq!(body["input"][0]["call_id"], "call_9");
        assert_eq!(body["input"][1]["type"], "function_call_output");
        assert_eq!(body["input"][1]["output"], "match");
    }

    #[test]
    fn effort_mapping_per_model() {
        let mut req = Request::new("o1");
        req.set_thinking(ThinkingLevel::Med).unwrap();
        assert_eq!(body_for(&req)["reasoning"]["effort"], "medium");

        let mut req = Request::new("gpt-5.2-codex");
        req.set_thinking(ThinkingLevel::High).unwrap();
        assert_eq!(body_for(&req)["reasoning"]["effort"], "xhigh");
    }

    #[test]
    fn gpt5_level_none_omits_reasoning() {
        let req = Request::new("gpt-5");
        assert!(body_for(&req).get("reasoning").is_none());
    }

    #[test]
    fn o_series_level_none_still_sends_low() {
        let req = Request::new("o3-mini");
        assert_eq!(body_for(&req)["reasoning"]["effort"], "low");
    }

    #[test]
    fn responses_tools_are_flat() {
        let mut req = Request::new("gpt-5");
        req.add_tool(crate::types::ToolSpec {
            name: "grep".into(),
            description: "search".into(),
            schema: r#"{"type":"object"}"#.into(),
        })
        .unwrap();
        let body = body_for(&req);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["name"], "grep");
        assert!(body["tools"][0].get("function").is_none());
    }

    #[test]
    fn url_is_responses_endpoint() {
        assert_eq!(build_url("https://api.openai.com", "gpt-5", "k", true),
                   "https://api.openai.com/v1/responses");
    }

    // ── Stream handling ───────────────────────────────────────────────────────

    fn run(chunks: &[Value]) -> (Vec<StreamEvent>, crate::types::Response) {
        let mut asm = ResponseAssembler::new("gpt-5");
        let mut out = Vec::new();
        for c in chunks {
            handle_chunk(c, &mut asm, &mut out);
        }
        (out, asm.into_response())
    }

    #[test]
    fn output_text_deltas_assemble() {
        let (_, resp) = run(&[
            json!({"type":"response.output_text.delta","delta":"Hel"}),
            json!({"type":"response.output_text.delta","delta":"lo"}),
            json!({"type":"response.completed","response":{
                "usage":{"input_tokens":12,"output_tokens":3,"total_tokens":15}}}),
        ]);
        assert_eq!(resp.blocks, vec![ContentBlock::Text { text: "Hello".into() }]);
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn function_call_arguments_accumulate() {
        let (_, resp) = run(&[
            json!({"type":"response.output_item.added","output_index":0,
                   "item":{"type":"function_call","call_id":"call_2","name":"list"}}),
            json!({"type":"response.function_call_arguments.delta","output_index":0,"delta":"{\"dir\":"}),
            json!({"type":"response.function_call_arguments.delta","output_index":0,"delta":"\".\"}"}),
            json!({"type":"response.completed","response":{
                "output":[{"type":"function_call"}]}}),
        ]);
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert!(matches!(&resp.blocks[0],
            ContentBlock::ToolCall { id, name, arguments }
                if id == "call_2" && name == "list" && arguments == "{\"dir\":\".\"}"));
    }

    #[test]
    fn reasoning_deltas_become_thinking() {
        let (_, resp) = run(&[
            json!({"type":"response.reasoning_text.delta","delta":"consider"}),
        ]);
        assert!(matches!(&resp.blocks[0], ContentBlock::Thinking { text, .. } if text == "consider"));
    }

    #[test]
    fn incomplete_due_to_max_tokens_is_length() {
        let (events, resp) = run(&[
            json!({"type":"response.incomplete","response":{
                "incomplete_details":{"reason":"max_output_tokens"}}}),
        ]);
        assert_eq!(resp.finish_reason, FinishReason::Length);
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[test]
    fn reasoning_token_usage_recorded() {
        let (_, resp) = run(&[
            json!({"type":"response.completed","response":{"usage":{
                "input_tokens":10,"output_tokens":50,
                "output_tokens_details":{"reasoning_tokens":40},"total_tokens":60}}}),
        ]);
        assert_eq!(resp.usage.thinking_tokens, 40);
    }

    #[test]
    fn failed_response_is_error() {
        let (events, _) = run(&[
            json!({"type":"response.failed","response":{"error":{
                "code":"server_error","message":"boom"}}}),
        ]);
        assert!(matches!(&events[0], StreamEvent::Error(e) if e.code == ErrorCode::Server));
    }

    #[test]
    fn unknown_event_types_ignored() {
        let (events, _) = run(&[json!({"type":"response.output_text.done","text":"Hello"})]);
        assert!(events.is_empty());
    }
}
