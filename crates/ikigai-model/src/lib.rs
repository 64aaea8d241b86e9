// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider abstraction and wire protocol for ikigai.
//!
//! One in-memory request/response model, four wire adapters (Anthropic
//! Messages, OpenAI Chat Completions, OpenAI Responses, Google Generative
//! Language), a byte-level SSE framer with per-provider stream contexts, the
//! shared error taxonomy, and the retry policy.

pub mod error;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod sse;
pub mod stream;
pub mod types;

mod anthropic;
mod google;
mod openai_chat;
mod openai_responses;

pub use error::{
    api_key_env_name, classify_status, handle_error_response, Error, ErrorCode, Result,
};
pub use registry::{ApiFlavor, ProviderKind};
pub use retry::RetryPolicy;
pub use sse::SseFramer;
pub use stream::{normalize_finish_reason, CollectSink, StreamContext, StreamSink};
pub use types::*;

/// Provider-metadata key for Google's echoed thought signature.
pub use google::THOUGHT_SIGNATURE_KEY;
