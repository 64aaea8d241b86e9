// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Flavor dispatch: one entry point per serializer operation.
//!
//! The REPL and event loop never talk to a concrete adapter module; they
//! resolve the [`ApiFlavor`] for the request's model through the registry and
//! call these functions.

use crate::error::{Error, ErrorCode, Result};
use crate::registry::{api_flavor, ApiFlavor};
use crate::types::Request;
use crate::{anthropic, google, openai_chat, openai_responses};

/// Resolve the flavor for a request, failing with `InvalidArg` for a model no
/// provider claims.
pub fn flavor_for(req: &Request) -> Result<ApiFlavor> {
    api_flavor(&req.model).ok_or_else(|| {
        Error::new(ErrorCode::InvalidArg, format!("Unknown model '{}'", req.model))
    })
}

pub fn serialize(flavor: ApiFlavor, req: &Request, stream: bool) -> Result<String> {
    match flavor {
        ApiFlavor::AnthropicMessages => anthropic::serialize(req, stream),
        ApiFlavor::OpenAiChat => openai_chat::serialize(req, stream),
        ApiFlavor::OpenAiResponses => openai_responses::serialize(req, stream),
        ApiFlavor::GoogleGenerate => google::serialize(req, stream),
    }
}

pub fn build_url(flavor: ApiFlavor, base: &str, model: &str, key: &str, stream: bool) -> String {
    match flavor {
        ApiFlavor::AnthropicMessages => anthropic::build_url(base, model, key, stream),
        ApiFlavor::OpenAiChat => openai_chat::build_url(base, model, key, stream),
        ApiFlavor::OpenAiResponses => openai_responses::build_url(base, model, key, stream),
        ApiFlavor::GoogleGenerate => google::build_url(base, model, key, stream),
    }
}

pub fn build_headers(flavor: ApiFlavor, key: &str, stream: bool) -> Vec<(String, String)> {
    match flavor {
        ApiFlavor::AnthropicMessages => anthropic::build_headers(key, stream),
        ApiFlavor::OpenAiChat => openai_chat::build_headers(key, stream),
        ApiFlavor::OpenAiResponses => openai_responses::build_headers(key, stream),
        ApiFlavor::GoogleGenerate => google::build_headers(key, stream),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
