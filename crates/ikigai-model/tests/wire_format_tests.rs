// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Cross-module wire format and streaming invariants.

use ikigai_model::{
    classify_status, handle_error_response, ApiFlavor, CollectSink, ContentBlock, ErrorCode,
    FinishReason, StreamContext, StreamEvent,
};

const CHAT_STREAM: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],",
    "\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2,\"total_tokens\":9}}\n\n",
    "data: [DONE]\n\n",
);

fn run_stream(flavor: ApiFlavor, bytes: &[u8], chunk_size: usize) -> (Vec<StreamEvent>, ikigai_model::Response) {
    let mut ctx = StreamContext::new(flavor, "test-model");
    let mut sink = CollectSink::default();
    for chunk in bytes.chunks(chunk_size.max(1)) {
        ctx.feed(chunk, &mut sink);
    }
    (sink.events, ctx.into_response())
}

fn event_fingerprint(events: &[StreamEvent]) -> Vec<String> {
    events.iter().map(|e| format!("{e:?}")).collect()
}

// ── Invariant: byte-split invariance ─────────────────────────────────────────

#[test]
fn chat_stream_is_split_invariant() {
    let (whole_events, whole_resp) =
        run_stream(ApiFlavor::OpenAiChat, CHAT_STREAM.as_bytes(), usize::MAX);
    for chunk_size in [1, 2, 3, 7, 16, 64] {
        let (events, resp) = run_stream(ApiFlavor::OpenAiChat, CHAT_STREAM.as_bytes(), chunk_size);
        assert_eq!(
            event_fingerprint(&events),
            event_fingerprint(&whole_events),
            "chunk size {chunk_size} changed the event sequence"
        );
        assert_eq!(resp.blocks, whole_resp.blocks);
        assert_eq!(resp.usage, whole_resp.usage);
        assert_eq!(resp.finish_reason, whole_resp.finish_reason);
    }
}

// ── Invariant: re-streaming determinism ──────────────────────────────────────

#[test]
fn re_streaming_reproduces_the_response() {
    let (_, first) = run_stream(ApiFlavor::OpenAiChat, CHAT_STREAM.as_bytes(), 5);
    let (_, second) = run_stream(ApiFlavor::OpenAiChat, CHAT_STREAM.as_bytes(), 11);
    assert_eq!(first.blocks, second.blocks);
    assert_eq!(first.usage, second.usage);
    assert_eq!(first.finish_reason, second.finish_reason);
}

// ── Chat streaming assembly ──────────────────────────────────────────────────

#[test]
fn chat_stream_assembles_text_and_usage() {
    let (events, resp) = run_stream(ApiFlavor::OpenAiChat, CHAT_STREAM.as_bytes(), usize::MAX);
    assert_eq!(resp.blocks, vec![ContentBlock::Text { text: "Hello".into() }]);
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.usage.input_tokens, 7);
    assert_eq!(resp.usage.output_tokens, 2);
    assert_eq!(resp.usage.thinking_tokens, 0);
    assert_eq!(resp.usage.cached_tokens, 0);
    assert_eq!(resp.usage.total_tokens, 9);

    assert!(matches!(events.first(), Some(StreamEvent::Started)));
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Hello");
}

// ── Tool-call accumulation across chunks ─────────────────────────────────────

#[test]
fn chat_stream_accumulates_tool_call() {
    let stream = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",",
        "\"function\":{\"name\":\"file_read\",\"arguments\":\"{\\\"pa\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
        "\"function\":{\"arguments\":\"th\\\":\\\"a.txt\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    );
    let (_, resp) = run_stream(ApiFlavor::OpenAiChat, stream.as_bytes(), 9);
    assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
    assert_eq!(
        resp.blocks,
        vec![ContentBlock::ToolCall {
            id: "call_1".into(),
            name: "file_read".into(),
            arguments: "{\"path\":\"a.txt\"}".into(),
        }]
    );
}

// ── Anthropic stream split invariance ────────────────────────────────────────

#[test]
fn anthropic_stream_is_split_invariant() {
    let stream = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":11}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,",
        "\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,",
        "\"delta\":{\"type\":\"text_delta\",\"text\":\"sure\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},",
        "\"usage\":{\"output_tokens\":4}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    let (whole_events, whole) =
        run_stream(ApiFlavor::AnthropicMessages, stream.as_bytes(), usize::MAX);
    assert_eq!(whole.finish_reason, FinishReason::Stop);
    assert_eq!(whole.usage.input_tokens, 11);
    assert_eq!(whole.usage.output_tokens, 4);
    assert_eq!(whole.blocks.len(), 2);

    for chunk_size in [1, 4, 13] {
        let (events, resp) = run_stream(ApiFlavor::AnthropicMessages, stream.as_bytes(), chunk_size);
        assert_eq!(event_fingerprint(&events), event_fingerprint(&whole_events));
        assert_eq!(resp.blocks, whole.blocks);
    }
}

// ── Invariant: retryability round-trips through error handling ───────────────

#[test]
fn http_statuses_round_trip_to_taxonomy() {
    for status in [500u16, 502, 503] {
        let err = handle_error_response("openai", status, "");
        assert_eq!(err.code, ErrorCode::Server);
        assert!(err.is_retryable());
    }
    let err = handle_error_response("openai", 429, "");
    assert_eq!(err.code, ErrorCode::RateLimit);
    assert!(err.is_retryable());

    assert!(!handle_error_response("openai", 401, "").is_retryable());
    assert_eq!(classify_status(404), ErrorCode::NotFound);
}

// ── Stream error always followed by Done ─────────────────────────────────────

#[test]
fn stream_error_is_followed_by_done() {
    let stream = "data: {\"error\":{\"message\":\"boom\",\"type\":\"server_error\"}}\n\n";
    let (events, _) = run_stream(ApiFlavor::OpenAiChat, stream.as_bytes(), usize::MAX);
    let err_pos = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Error(_)))
        .expect("error event expected");
    assert!(matches!(events[err_pos + 1], StreamEvent::Done));
}
