// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The single-threaded cooperative event loop.
//!
//! One `select!` multiplexes terminal input, every in-flight HTTP stream
//! across all agents, and the earliest timer (retry, wall-clock, chunk
//! inactivity).  There are no threads and no locks; agents interleave at
//! chunk granularity.  Ctrl-C is handled on the input branch, which is polled
//! first (`biased`), so an interrupt always wins over a pending chunk.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_stream::StreamMap;
use tracing::{debug, warn};

use ikigai_config::Credentials;
use ikigai_input::{InputAction, InputParser, ScrollAccumulator, ScrollDecision};
use ikigai_model::{
    provider, Error, ErrorCode, Request, RetryPolicy, StreamContext, StreamEvent, ToolSpec,
};
use ikigai_tools::{ToolEnv, ToolRegistry};

use crate::completion::{complete, Completion};
use crate::events::{DisplayEvent, DisplaySink};
use crate::journal::Journal;
use crate::repl::{ReplEffect, ReplState};

/// Per-request wall-clock limit.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Per-chunk inactivity limit.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

type ByteChunk = Option<reqwest::Result<bytes::Bytes>>;
type ByteStream = Pin<Box<dyn Stream<Item = ByteChunk>>>;
type PendingResponse =
    Pin<Box<dyn std::future::Future<Output = (String, reqwest::Result<reqwest::Response>)>>>;

struct InFlight {
    ctx: StreamContext,
    request: Request,
    started_at: Instant,
    last_chunk: Instant,
}

struct PendingRetry {
    deadline: Instant,
    request: Request,
}

pub struct EventLoop<J: Journal, D: DisplaySink> {
    repl: ReplState,
    journal: J,
    display: D,
    credentials: Credentials,
    tools: ToolRegistry,
    client: reqwest::Client,
    policy: RetryPolicy,

    inflight: HashMap<String, InFlight>,
    streams: StreamMap<String, ByteStream>,
    pending: FuturesUnordered<PendingResponse>,
    retries: HashMap<String, PendingRetry>,

    parser: InputParser,
    scroll: ScrollAccumulator,
    line: String,
    completion: Option<Completion>,
    started: Instant,
    quit: bool,
    /// Invoked when `/debug on|off` runs; the binary hooks this up to a
    /// tracing filter reload handle.
    debug_hook: Option<Box<dyn FnMut(bool)>>,
}

impl<J: Journal, D: DisplaySink> EventLoop<J, D> {
    pub fn new(
        repl: ReplState,
        journal: J,
        display: D,
        credentials: Credentials,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            repl,
            journal,
            display,
            credentials,
            tools,
            client: reqwest::Client::new(),
            policy: RetryPolicy::default(),
            inflight: HashMap::new(),
            streams: StreamMap::new(),
            pending: FuturesUnordered::new(),
            retries: HashMap::new(),
            parser: InputParser::new(),
            scroll: ScrollAccumulator::new(),
            line: String::new(),
            completion: None,
            started: Instant::now(),
            quit: false,
            debug_hook: None,
        }
    }

    pub fn repl(&self) -> &ReplState {
        &self.repl
    }

    /// Install the callback that applies `/debug on|off` to the log filter.
    pub fn set_debug_hook(&mut self, hook: impl FnMut(bool) + 'static) {
        self.debug_hook = Some(Box::new(hook));
    }

    /// Run until EOF on stdin or an idle Ctrl-C.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];

        while !self.quit {
            let deadline = self.next_deadline();
            let has_deadline = deadline.is_some();
            let has_pending = !self.pending.is_empty();
            let has_streams = !self.streams.is_empty();
            tokio::select! {
                biased;

                n = stdin.read(&mut buf) => {
                    match n {
                        Ok(0) | Err(_) => self.quit = true,
                        Ok(n) => self.handle_input(&buf[..n]).await,
                    }
                }

                Some((agent_id, result)) = self.pending.next(), if has_pending => {
                    self.on_response(agent_id, result).await;
                }

                Some((agent_id, chunk)) = self.streams.next(), if has_streams => {
                    self.on_chunk(agent_id, chunk).await;
                }

                _ = sleep_until_opt(deadline), if has_deadline => {
                    self.on_timer().await;
                }
            }
        }
        Ok(())
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    async fn handle_input(&mut self, bytes: &[u8]) {
        let actions = self.parser.feed_all(bytes);
        for action in actions {
            self.handle_action(action).await;
            if self.quit {
                return;
            }
        }
    }

    async fn handle_action(&mut self, action: InputAction) {
        let now_ms = self.started.elapsed().as_millis() as i64;
        match action {
            InputAction::ArrowUp | InputAction::ArrowDown => {
                let up = action == InputAction::ArrowUp;
                match self.scroll.process_arrow(up, now_ms) {
                    ScrollDecision::ScrollUp => self.display.emit(DisplayEvent::ScrollUp),
                    ScrollDecision::ScrollDown => self.display.emit(DisplayEvent::ScrollDown),
                    // Cursor movement is the renderer's concern.
                    ScrollDecision::ArrowUp
                    | ScrollDecision::ArrowDown
                    | ScrollDecision::None => {}
                }
                return;
            }
            _ => self.scroll.process_other(now_ms),
        }

        match action {
            InputAction::CtrlC => self.on_ctrl_c(),
            InputAction::Newline => self.submit_line().await,
            InputAction::Char(c) => {
                self.completion = None;
                self.line.push(c);
            }
            InputAction::InsertNewline => {
                self.completion = None;
                self.line.push('\n');
            }
            InputAction::Backspace => {
                self.completion = None;
                self.line.pop();
            }
            InputAction::Tab => self.cycle_completion(),
            InputAction::Escape => self.completion = None,
            InputAction::ScrollUp => self.display.emit(DisplayEvent::ScrollUp),
            InputAction::ScrollDown => self.display.emit(DisplayEvent::ScrollDown),
            InputAction::PageUp => self.display.emit(DisplayEvent::PageUp),
            InputAction::PageDown => self.display.emit(DisplayEvent::PageDown),
            InputAction::Delete | InputAction::Unknown => {}
            InputAction::ArrowLeft | InputAction::ArrowRight => {}
            InputAction::ArrowUp | InputAction::ArrowDown => unreachable!("handled above"),
        }

        self.display.emit(DisplayEvent::InputLine {
            buffer: self.line.clone(),
            completion: self.completion.as_ref().map(|c| c.current().to_string()),
        });
    }

    /// A pending interrupt cancels the active agent's stream and retry timer
    /// before any further delta is applied.  Quitting requires the whole
    /// process to be idle: a Ctrl-C on an idle agent must not tear down other
    /// agents' still-running streams.
    fn on_ctrl_c(&mut self) {
        let active = self.repl.active_id().to_string();
        let had_stream = self.inflight.remove(&active).is_some();
        self.streams.remove(&active);
        let had_retry = self.retries.remove(&active).is_some();
        if had_stream || had_retry {
            self.repl.interrupt(&active, &mut self.journal, &mut self.display);
        } else if self.inflight.is_empty() && self.retries.is_empty() {
            self.quit = true;
        } else {
            let working = self.inflight.len() + self.retries.len();
            self.display.emit(DisplayEvent::Status {
                agent_id: active,
                message: format!("{working} background agent(s) still working; switch to them to interrupt"),
            });
        }
    }

    fn cycle_completion(&mut self) {
        match &mut self.completion {
            Some(c) => c.next(),
            None => {
                let marks: Vec<String> = self
                    .repl
                    .active_agent()
                    .mark_labels()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                self.completion = complete(&self.line, &marks);
            }
        }
        if let Some(c) = &self.completion {
            self.line = c.apply();
        }
    }

    async fn submit_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        self.completion = None;
        match self.repl.handle_line(&line, &mut self.journal, &mut self.display) {
            Ok(ReplEffect::Submit { agent_id }) => self.dispatch(agent_id, None).await,
            Ok(ReplEffect::SetDebug(on)) => {
                if let Some(hook) = &mut self.debug_hook {
                    hook(on);
                }
                debug!(on, "debug toggled");
            }
            Ok(ReplEffect::None) => {}
            Err(err) => {
                let agent_id = self.repl.active_id().to_string();
                self.display.emit(DisplayEvent::Error { agent_id, message: err.message });
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Serialize and launch a completion request for `agent_id`.  When
    /// `resend` carries a request (retry path), it is reused as-is.
    async fn dispatch(&mut self, agent_id: String, resend: Option<Request>) {
        // A fresh dispatch supersedes any retry still waiting to fire for
        // this agent; a stale timer must never redispatch over the new turn.
        if resend.is_none() {
            if self.retries.remove(&agent_id).is_some() {
                debug!(agent_id = agent_id.as_str(), "pending retry cancelled by new dispatch");
            }
            self.repl.clear_retry(&agent_id);
        }
        let request = match resend {
            Some(r) => Some(r),
            None => match self.build_request(&agent_id) {
                Ok(r) => Some(r),
                Err(err) => {
                    self.repl.fail_stream(&agent_id, &err, &mut self.display);
                    None
                }
            },
        };
        let Some(request) = request else { return };

        if let Err(err) = self.launch(&agent_id, request) {
            self.repl.fail_stream(&agent_id, &err, &mut self.display);
        }
    }

    fn build_request(&self, agent_id: &str) -> ikigai_model::Result<Request> {
        let tools: Vec<ToolSpec> = self
            .tools
            .tools()
            .iter()
            .map(|t| ToolSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                schema: t.schema.clone(),
            })
            .collect();
        self.repl.build_request(agent_id, &tools)
    }

    fn launch(&mut self, agent_id: &str, request: Request) -> ikigai_model::Result<()> {
        let flavor = provider::flavor_for(&request)?;
        let body = provider::serialize(flavor, &request, true)?;

        let agent = self
            .repl
            .agent(agent_id)
            .ok_or_else(|| Error::new(ErrorCode::InvalidArg, "unknown agent"))?;
        let provider_kind = agent.provider;
        let key = self
            .credentials
            .api_key(provider_kind.name(), None)
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::Auth,
                    format!("no API key configured for {provider_kind}"),
                )
            })?;

        let base = provider_kind.default_base_url();
        let url = provider::build_url(flavor, base, &request.model, &key, true);
        let headers = provider::build_headers(flavor, &key, true);

        self.repl.begin_stream(agent_id)?;

        let mut http = self.client.post(&url).body(body);
        for (name, value) in headers {
            http = http.header(name, value);
        }

        let id = agent_id.to_string();
        self.pending.push(Box::pin(async move {
            let result = http.send().await;
            (id, result)
        }));

        let now = Instant::now();
        self.inflight.insert(
            agent_id.to_string(),
            InFlight {
                ctx: StreamContext::new(flavor, request.model.clone()),
                request,
                started_at: now,
                last_chunk: now,
            },
        );
        debug!(agent_id, url, "request dispatched");
        Ok(())
    }

    // ── HTTP response and stream handling ─────────────────────────────────────

    async fn on_response(&mut self, agent_id: String, result: reqwest::Result<reqwest::Response>) {
        // The interrupt may have raced the response.
        if !self.inflight.contains_key(&agent_id) {
            return;
        }
        match result {
            Ok(resp) if resp.status().is_success() => {
                // The body stream terminates with an explicit None so the
                // loop can tell EOF apart from provider-signalled completion.
                let stream: ByteStream = Box::pin(
                    resp.bytes_stream().map(Some).chain(futures::stream::once(async { None })),
                );
                self.streams.insert(agent_id, stream);
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers: Vec<(String, String)> = resp
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| {
                        v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                let body = resp.text().await.unwrap_or_default();
                let provider_name = self.provider_name(&agent_id);
                let err = ikigai_model::handle_error_response(&provider_name, status, &body);
                let request = self.inflight.remove(&agent_id).map(|f| f.request);
                self.maybe_retry_with(&agent_id, err, &headers, request).await;
            }
            Err(e) => {
                let code =
                    if e.is_timeout() { ErrorCode::Timeout } else { ErrorCode::Network };
                let err = Error::new(code, e.to_string());
                let request = self.inflight.remove(&agent_id).map(|f| f.request);
                self.maybe_retry_with(&agent_id, err, &[], request).await;
            }
        }
    }

    async fn on_chunk(&mut self, agent_id: String, chunk: ByteChunk) {
        let Some(flight) = self.inflight.get_mut(&agent_id) else {
            self.streams.remove(&agent_id);
            return;
        };
        let mut collected = ikigai_model::CollectSink::default();
        match chunk {
            Some(Ok(bytes)) => {
                flight.last_chunk = Instant::now();
                flight.ctx.feed(&bytes, &mut collected);
            }
            Some(Err(e)) => {
                flight.ctx.fail(Error::new(ErrorCode::Network, e.to_string()), &mut collected);
            }
            // Transport EOF without a completion signal from the provider.
            None => {
                if !flight.ctx.is_done() {
                    flight.ctx.fail(
                        Error::new(ErrorCode::Network, "stream closed before completion"),
                        &mut collected,
                    );
                }
            }
        }
        self.apply_stream_events(&agent_id, collected.events).await;
    }

    async fn apply_stream_events(&mut self, agent_id: &str, events: Vec<StreamEvent>) {
        let mut failure: Option<Error> = None;
        let mut done = false;
        for event in events {
            match event {
                StreamEvent::Started => {}
                StreamEvent::Text(chunk) => self.display.emit(DisplayEvent::Text {
                    agent_id: agent_id.to_string(),
                    chunk,
                }),
                StreamEvent::Thinking(chunk) => self.display.emit(DisplayEvent::Thinking {
                    agent_id: agent_id.to_string(),
                    chunk,
                }),
                StreamEvent::ToolCallDelta { id, fragment } => {
                    if fragment.is_empty() && !id.is_empty() {
                        self.display.emit(DisplayEvent::ToolCallStarted {
                            agent_id: agent_id.to_string(),
                            call_id: id,
                            name: String::new(),
                        });
                    }
                }
                // Recorded inside the stream context; nothing to paint yet.
                StreamEvent::FinishReason(_) | StreamEvent::Usage(_) => {}
                StreamEvent::Error(err) => failure = Some(err),
                StreamEvent::Done => done = true,
            }
        }
        if done {
            self.finalize_stream(agent_id, failure).await;
        }
    }

    async fn finalize_stream(&mut self, agent_id: &str, failure: Option<Error>) {
        self.streams.remove(agent_id);
        let Some(flight) = self.inflight.remove(agent_id) else { return };

        match failure {
            Some(err) => {
                let InFlight { request, .. } = flight;
                self.maybe_retry_with(agent_id, err, &[], Some(request)).await;
            }
            None => {
                let response = flight.ctx.into_response();
                self.repl.finish_stream(agent_id, response, &mut self.journal, &mut self.display);
                self.run_pending_tool_calls(agent_id).await;
            }
        }
    }

    /// After a turn that requested tools: invoke each call, append results,
    /// and resubmit the conversation.
    async fn run_pending_tool_calls(&mut self, agent_id: &str) {
        let calls: Vec<(String, String, String)> = self
            .repl
            .visible_messages(agent_id)
            .last()
            .map(|m| {
                m.tool_calls()
                    .map(|(id, name, args)| (id.to_string(), name.to_string(), args.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        if calls.is_empty() {
            return;
        }

        let env = ToolEnv {
            agent_id: agent_id.to_string(),
            state_dir: ikigai_config::state_dir().unwrap_or_default(),
        };
        for (call_id, name, arguments) in calls {
            let (content, is_error) = match self.tools.invoke(&name, &arguments, &env).await {
                Ok(outcome) => (outcome.content().to_string(), !outcome.success),
                Err(e) => (format!("tool '{name}' failed: {e}"), true),
            };
            self.repl.append_tool_result(agent_id, &call_id, &content, is_error, &mut self.journal);
            self.display.emit(DisplayEvent::ToolCallFinished {
                agent_id: agent_id.to_string(),
                call_id,
                output: content,
                is_error,
            });
        }
        self.dispatch(agent_id.to_string(), None).await;
    }

    // ── Retry ─────────────────────────────────────────────────────────────────

    async fn maybe_retry(&mut self, agent_id: &str, err: Error, headers: &[(String, String)]) {
        self.maybe_retry_with(agent_id, err, headers, None).await;
    }

    async fn maybe_retry_with(
        &mut self,
        agent_id: &str,
        err: Error,
        headers: &[(String, String)],
        request: Option<Request>,
    ) {
        if !err.is_retryable() {
            self.repl.fail_stream(agent_id, &err, &mut self.display);
            return;
        }
        let attempt = self.repl.bump_retry(agent_id);
        let header_pairs: Vec<(&str, &str)> =
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        match self.policy.next_delay(attempt, header_pairs) {
            Some(delay) => {
                let request = match request {
                    Some(r) => r,
                    None => match self.build_request(agent_id) {
                        Ok(r) => r,
                        Err(build_err) => {
                            self.repl.fail_stream(agent_id, &build_err, &mut self.display);
                            return;
                        }
                    },
                };
                warn!(agent_id, attempt, ?delay, error = %err, "retry scheduled");
                self.display.emit(DisplayEvent::RetryScheduled {
                    agent_id: agent_id.to_string(),
                    delay,
                    attempt,
                });
                self.retries.insert(
                    agent_id.to_string(),
                    PendingRetry { deadline: Instant::now() + delay, request },
                );
            }
            None => self.repl.fail_stream(agent_id, &err, &mut self.display),
        }
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        let retry = self.retries.values().map(|r| r.deadline).min();
        let inflight = self
            .inflight
            .values()
            .map(|f| (f.started_at + REQUEST_TIMEOUT).min(f.last_chunk + CHUNK_TIMEOUT))
            .min();
        match (retry, inflight) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        // Fire due retries.
        let due: Vec<String> = self
            .retries
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for agent_id in due {
            if let Some(retry) = self.retries.remove(&agent_id) {
                self.dispatch(agent_id, Some(retry.request)).await;
            }
        }

        // Enforce wall-clock and inactivity timeouts.
        let expired: Vec<(String, &'static str)> = self
            .inflight
            .iter()
            .filter_map(|(id, f)| {
                if f.started_at + REQUEST_TIMEOUT <= now {
                    Some((id.clone(), "request deadline exceeded"))
                } else if f.last_chunk + CHUNK_TIMEOUT <= now {
                    Some((id.clone(), "no stream activity"))
                } else {
                    None
                }
            })
            .collect();
        for (agent_id, reason) in expired {
            self.streams.remove(&agent_id);
            let request = self.inflight.remove(&agent_id).map(|f| f.request);
            let err = Error::new(ErrorCode::Timeout, reason);
            self.maybe_retry_with(&agent_id, err, &[], request).await;
        }
    }

    fn provider_name(&self, agent_id: &str) -> String {
        self.repl
            .agent(agent_id)
            .map(|a| a.provider.name().to_string())
            .unwrap_or_else(|| "provider".to_string())
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentContext;
    use crate::events::CollectDisplay;
    use crate::journal::MemoryJournal;
    use ikigai_model::{ProviderKind, ThinkingLevel};

    fn make_loop(model: &str) -> EventLoop<MemoryJournal, CollectDisplay> {
        let repl = ReplState::new(AgentContext::root(
            ProviderKind::OpenAi,
            model,
            ThinkingLevel::None,
        ));
        EventLoop::new(
            repl,
            MemoryJournal::default(),
            CollectDisplay::default(),
            Credentials::default(),
            ToolRegistry::default(),
        )
    }

    async fn type_line(ev: &mut EventLoop<MemoryJournal, CollectDisplay>, text: &str) {
        for b in text.bytes() {
            ev.handle_input(&[b]).await;
        }
    }

    // ── Line editing ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn typed_chars_build_the_line() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "hi").await;
        assert_eq!(ev.line, "hi");
        assert!(matches!(
            ev.display.events.last(),
            Some(DisplayEvent::InputLine { buffer, .. }) if buffer == "hi"
        ));
    }

    #[tokio::test]
    async fn backspace_removes_last_char() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "abc").await;
        ev.handle_input(&[0x7F]).await;
        assert_eq!(ev.line, "ab");
    }

    #[tokio::test]
    async fn shift_enter_inserts_literal_newline() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "first").await;
        ev.handle_input(b"\x1B[13;2u").await;
        type_line(&mut ev, "second").await;
        assert_eq!(ev.line, "first\nsecond");
    }

    #[tokio::test]
    async fn tab_completes_and_cycles() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "/debug o").await;
        ev.handle_input(b"\t").await;
        assert_eq!(ev.line, "/debug off");
        ev.handle_input(b"\t").await;
        assert_eq!(ev.line, "/debug on");
        ev.handle_input(b"\t").await;
        assert_eq!(ev.line, "/debug off");
    }

    #[tokio::test]
    async fn typing_cancels_completion() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "/deb").await;
        ev.handle_input(b"\t").await;
        assert_eq!(ev.line, "/debug");
        ev.handle_input(b"x").await;
        assert!(ev.completion.is_none());
    }

    // ── Submission ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn command_line_executes_without_network() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "/mark nothing-yet").await;
        ev.handle_input(b"\r").await;
        // No messages yet → user-visible error, no crash, line cleared.
        assert!(ev.line.is_empty());
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Error { .. })));
    }

    #[tokio::test]
    async fn submit_with_unknown_model_surfaces_error() {
        let mut ev = make_loop("made-up-model");
        type_line(&mut ev, "hello").await;
        ev.handle_input(b"\r").await;
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Error { message, .. } if message.contains("invalid_arg"))));
        // The slot must be free again after the failed dispatch.
        assert!(!ev.repl.active_agent().in_flight);
    }

    #[tokio::test]
    async fn debug_command_toggles_repl_flag() {
        let mut ev = make_loop("gpt-4o");
        type_line(&mut ev, "/debug on").await;
        ev.handle_input(b"\r").await;
        assert!(ev.repl.debug);
    }

    // ── Ctrl-C ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ctrl_c_idle_quits() {
        let mut ev = make_loop("gpt-4o");
        ev.handle_input(&[0x03]).await;
        assert!(ev.quit);
    }

    #[tokio::test]
    async fn ctrl_c_with_background_work_does_not_quit() {
        let mut ev = make_loop("gpt-4o");
        // The active agent is idle, but a forked agent is still streaming.
        let now = Instant::now();
        ev.inflight.insert(
            "background-agent".to_string(),
            InFlight {
                ctx: StreamContext::new(ikigai_model::ApiFlavor::OpenAiChat, "gpt-4o"),
                request: Request::new("gpt-4o"),
                started_at: now,
                last_chunk: now,
            },
        );
        ev.handle_input(&[0x03]).await;
        assert!(!ev.quit, "idle-agent Ctrl-C must not kill background streams");
        assert!(ev.inflight.contains_key("background-agent"));
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Status { message, .. } if message.contains("working"))));
        // Once the background work is gone, Ctrl-C quits as usual.
        ev.inflight.clear();
        ev.handle_input(&[0x03]).await;
        assert!(ev.quit);
    }

    #[tokio::test]
    async fn ctrl_c_cancels_pending_retry_without_quitting() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        ev.retries.insert(
            active.clone(),
            PendingRetry { deadline: Instant::now(), request: Request::new("gpt-4o") },
        );
        ev.repl.bump_retry(&active);
        ev.handle_input(&[0x03]).await;
        assert!(!ev.quit);
        assert!(ev.retries.is_empty());
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Interrupted { .. })));
    }

    // ── Retry scheduling ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn retryable_error_schedules_timer() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        ev.maybe_retry(&active, Error::new(ErrorCode::Server, "HTTP 503"), &[]).await;
        assert!(ev.retries.contains_key(&active));
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::RetryScheduled { attempt: 0, .. })));
        assert!(ev.next_deadline().is_some());
    }

    #[tokio::test]
    async fn retry_honors_rate_limit_headers() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        let headers = vec![("x-ratelimit-reset-tokens".to_string(), "30s".to_string())];
        ev.maybe_retry(&active, Error::new(ErrorCode::RateLimit, "quota"), &headers).await;
        let delay = ev
            .display
            .events
            .iter()
            .find_map(|e| match e {
                DisplayEvent::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .unwrap();
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn resubmission_during_backoff_is_refused() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        ev.maybe_retry(&active, Error::new(ErrorCode::Server, "HTTP 503"), &[]).await;
        assert!(ev.retries.contains_key(&active));

        // A new message while the retry timer is armed must be refused, and
        // the scheduled retry must survive untouched.
        type_line(&mut ev, "try again anyway").await;
        ev.handle_input(b"\r").await;
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Error { message, .. } if message.contains("busy"))));
        assert!(ev.retries.contains_key(&active));
        assert!(ev.repl.active_agent().retry.is_some());
    }

    #[tokio::test]
    async fn fresh_dispatch_cancels_stale_retry() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        ev.retries.insert(
            active.clone(),
            PendingRetry { deadline: Instant::now(), request: Request::new("gpt-4o") },
        );
        ev.repl.bump_retry(&active);

        // Internal fresh dispatch (tool-result resubmission path) supersedes
        // the armed retry so the stale timer can never double-dispatch.
        ev.dispatch(active.clone(), None).await;
        assert!(!ev.retries.contains_key(&active));
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        ev.maybe_retry(&active, Error::new(ErrorCode::Auth, "bad key"), &[]).await;
        assert!(ev.retries.is_empty());
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Error { message, .. } if message.contains("OPENAI_API_KEY"))));
    }

    #[tokio::test]
    async fn attempt_cap_surfaces_error() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        for _ in 0..5 {
            ev.repl.bump_retry(&active);
        }
        ev.maybe_retry(&active, Error::new(ErrorCode::Server, "HTTP 500"), &[]).await;
        assert!(ev.retries.is_empty(), "cap reached: no further retries");
        assert!(ev
            .display
            .events
            .iter()
            .any(|e| matches!(e, DisplayEvent::Error { .. })));
    }

    // ── Stream event application ──────────────────────────────────────────────

    #[tokio::test]
    async fn stream_events_become_display_events() {
        let mut ev = make_loop("gpt-4o");
        let active = ev.repl.active_id().to_string();
        ev.apply_stream_events(
            &active,
            vec![
                StreamEvent::Started,
                StreamEvent::Thinking("mull".into()),
                StreamEvent::Text("answer".into()),
            ],
        )
        .await;
        assert!(matches!(&ev.display.events[0], DisplayEvent::Thinking { chunk, .. } if chunk == "mull"));
        assert!(matches!(&ev.display.events[1], DisplayEvent::Text { chunk, .. } if chunk == "answer"));
    }

    #[tokio::test]
    async fn chunk_for_cancelled_agent_is_dropped() {
        let mut ev = make_loop("gpt-4o");
        // No in-flight entry for this agent: the chunk must be ignored.
        ev.on_chunk("ghost".to_string(), Some(Ok(bytes::Bytes::from_static(b"data: x\n\n"))))
            .await;
        assert!(ev.display.events.is_empty());
    }

    // ── Deadlines ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn idle_loop_has_no_deadline() {
        let ev = make_loop("gpt-4o");
        assert!(ev.next_deadline().is_none());
    }

    #[tokio::test]
    async fn inflight_contributes_inactivity_deadline() {
        let mut ev = make_loop("gpt-4o");
        let now = Instant::now();
        ev.inflight.insert(
            "a1".to_string(),
            InFlight {
                ctx: StreamContext::new(ikigai_model::ApiFlavor::OpenAiChat, "gpt-4o"),
                request: Request::new("gpt-4o"),
                started_at: now,
                last_chunk: now,
            },
        );
        let deadline = ev.next_deadline().unwrap();
        assert!(deadline <= now + CHUNK_TIMEOUT);
    }
}
