// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider-agnostic error taxonomy.
//!
//! Every provider adapter maps its own failure shapes onto this one set of
//! codes so retry scheduling and user-facing messages never need
//! provider-specific branches at the call site.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Result<T> = std::result::Result<T, Error>;

// ─── Error codes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Credentials missing or invalid.
    Auth,
    /// Malformed request, detected locally or by the server.
    InvalidArg,
    /// Model or resource absent.
    NotFound,
    /// Quota exceeded.
    RateLimit,
    /// 5xx family.
    Server,
    /// No bytes within the provider-specific window.
    Timeout,
    /// Connect / read / DNS failure.
    Network,
    /// Safety refusal from the provider.
    ContentFilter,
    /// JSON or protocol violation in a received payload.
    Parse,
    Unknown,
}

impl ErrorCode {
    /// Pure retryability predicate over the taxonomy table.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Server | Self::Timeout | Self::Network
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::InvalidArg => "invalid_arg",
            Self::NotFound => "not_found",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::ContentFilter => "content_filter",
            Self::Parse => "parse",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Error payload ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    /// Optional provider-specific detail (raw envelope text, header value…).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// One-line user-visible rendition: provider, category, and a suggestion.
    ///
    /// The suggestion is derived from the taxonomy alone so call sites stay
    /// free of conditional logic.
    pub fn user_message(&self, provider: &str) -> String {
        let hint = match self.code {
            ErrorCode::Auth => format!(
                " — check {} or ~/.config/ikigai/credentials.json",
                api_key_env_name(provider)
            ),
            ErrorCode::RateLimit => match &self.detail {
                Some(d) => format!(" — try again in {d}"),
                None => " — try again shortly".to_string(),
            },
            ErrorCode::Server => " — retrying".to_string(),
            ErrorCode::Timeout | ErrorCode::Network => " — retrying".to_string(),
            _ => String::new(),
        };
        format!("{provider} {}: {}{hint}", self.code, self.message)
    }
}

/// Environment variable that carries the API key for `provider`.
pub fn api_key_env_name(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        "google" => "GOOGLE_API_KEY",
        _ => "OPENAI_API_KEY",
    }
}

// ─── HTTP classification ──────────────────────────────────────────────────────

/// Map an HTTP status onto the taxonomy.
pub fn classify_status(status: u16) -> ErrorCode {
    match status {
        401 | 403 => ErrorCode::Auth,
        400 | 422 => ErrorCode::InvalidArg,
        404 => ErrorCode::NotFound,
        429 => ErrorCode::RateLimit,
        500..=599 => ErrorCode::Server,
        _ => ErrorCode::Unknown,
    }
}

/// Classify a non-2xx response, extracting the provider error envelope.
///
/// All four wire APIs nest a human message under `error.message`.  The
/// category comes from the status line first; the envelope `type` can refine
/// it (e.g. Anthropic reports `overloaded_error` with a 529).  Per the
/// robustness contract, a *malformed envelope* — a body that is JSON but whose
/// `error` member carries no message — yields `Parse`; a plain-text body is
/// used as the message verbatim.
pub fn handle_error_response(provider: &str, status: u16, body: &str) -> Error {
    let mut code = classify_status(status);

    let message = match serde_json::from_str::<Value>(body) {
        Ok(v) => match v.get("error") {
            Some(env) => {
                if let Some(t) = env["type"].as_str().or_else(|| env["status"].as_str()) {
                    code = refine_from_envelope_type(t, code);
                }
                match env["message"].as_str() {
                    Some(m) => m.to_string(),
                    None => {
                        return Error::new(
                            ErrorCode::Parse,
                            format!("{provider} returned a malformed error envelope"),
                        )
                        .with_detail(body.to_string());
                    }
                }
            }
            None => format!("HTTP {status}"),
        },
        // Not JSON at all: keep the status classification, quote the body.
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.to_string()
            }
        }
    };

    Error::new(code, message).with_detail(format!("HTTP {status}"))
}

fn refine_from_envelope_type(t: &str, fallback: ErrorCode) -> ErrorCode {
    match t {
        "authentication_error" | "permission_error" | "UNAUTHENTICATED" => ErrorCode::Auth,
        "invalid_request_error" | "INVALID_ARGUMENT" => ErrorCode::InvalidArg,
        "not_found_error" | "NOT_FOUND" => ErrorCode::NotFound,
        "rate_limit_error" | "RESOURCE_EXHAUSTED" => ErrorCode::RateLimit,
        "overloaded_error" | "api_error" | "server_error" | "INTERNAL" | "UNAVAILABLE" => {
            ErrorCode::Server
        }
        _ => fallback,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
