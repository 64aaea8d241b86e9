// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model registry: static metadata for every supported model.
//!
//! This module is the single source of truth for which provider a model id
//! belongs to, which API flavor it speaks (Chat Completions vs Responses vs
//! Messages vs generateContent), and how the provider-agnostic thinking level
//! maps onto that model's reasoning-effort vocabulary.  The table is compiled
//! in; there is no runtime discovery.

use crate::error::{Error, ErrorCode, Result};
use crate::types::ThinkingLevel;

// ─── Providers and flavors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Google,
}

impl ProviderKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com",
            Self::Google => "https://generativelanguage.googleapis.com",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which wire protocol a request for this model is serialized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    AnthropicMessages,
    OpenAiChat,
    OpenAiResponses,
    GoogleGenerate,
}

// ─── Static table ─────────────────────────────────────────────────────────────

/// Metadata describing one registered model.
///
/// `effort` is the OpenAI `reasoning.effort` string per thinking level in
/// NONE/LOW/MED/HIGH order; `None` means "omit the parameter".  A model is a
/// reasoning model iff any slot is `Some`.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: &'static str,
    pub provider: ProviderKind,
    pub flavor: ApiFlavor,
    pub effort: [Option<&'static str>; 4],
}

const O_SERIES: [Option<&'static str>; 4] =
    [Some("low"), Some("low"), Some("medium"), Some("high")];
const GPT5: [Option<&'static str>; 4] = [None, Some("low"), Some("medium"), Some("high")];
const GPT5_PRO: [Option<&'static str>; 4] =
    [Some("high"), Some("high"), Some("high"), Some("high")];
/// Shifted mapping for models that support `xhigh`.
const GPT5_XHIGH: [Option<&'static str>; 4] =
    [Some("low"), Some("medium"), Some("high"), Some("xhigh")];
const NO_REASONING: [Option<&'static str>; 4] = [None, None, None, None];

/// Complete registry of supported models.
pub static MODELS: &[ModelEntry] = &[
    // ── Anthropic ─────────────────────────────────────────────────────────────
    ModelEntry { id: "claude-haiku-4-5", provider: ProviderKind::Anthropic, flavor: ApiFlavor::AnthropicMessages, effort: NO_REASONING },
    ModelEntry { id: "claude-sonnet-4-5", provider: ProviderKind::Anthropic, flavor: ApiFlavor::AnthropicMessages, effort: NO_REASONING },
    ModelEntry { id: "claude-opus-4-5", provider: ProviderKind::Anthropic, flavor: ApiFlavor::AnthropicMessages, effort: NO_REASONING },
    // ── OpenAI chat models ────────────────────────────────────────────────────
    ModelEntry { id: "gpt-3.5-turbo", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiChat, effort: NO_REASONING },
    ModelEntry { id: "gpt-4", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiChat, effort: NO_REASONING },
    ModelEntry { id: "gpt-4-turbo", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiChat, effort: NO_REASONING },
    ModelEntry { id: "gpt-4o", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiChat, effort: NO_REASONING },
    ModelEntry { id: "gpt-4o-mini", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiChat, effort: NO_REASONING },
    // ── o-series reasoning models (Responses API) ─────────────────────────────
    ModelEntry { id: "o1", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: O_SERIES },
    ModelEntry { id: "o1-mini", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: O_SERIES },
    ModelEntry { id: "o1-preview", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: O_SERIES },
    ModelEntry { id: "o3", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: O_SERIES },
    ModelEntry { id: "o3-mini", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: O_SERIES },
    // ── GPT-5 family (Responses API) ──────────────────────────────────────────
    ModelEntry { id: "gpt-5", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5 },
    ModelEntry { id: "gpt-5-mini", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5 },
    ModelEntry { id: "gpt-5-nano", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5 },
    ModelEntry { id: "gpt-5-pro", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5_PRO },
    ModelEntry { id: "gpt-5.1", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5 },
    ModelEntry { id: "gpt-5.1-chat-latest", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5 },
    ModelEntry { id: "gpt-5.1-codex", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5 },
    // gpt-5.2 / gpt-5.3 support `xhigh`; the whole mapping shifts up one step.
    ModelEntry { id: "gpt-5.2", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5_XHIGH },
    ModelEntry { id: "gpt-5.2-chat-latest", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5_XHIGH },
    ModelEntry { id: "gpt-5.2-codex", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5_XHIGH },
    ModelEntry { id: "gpt-5.3-codex", provider: ProviderKind::OpenAi, flavor: ApiFlavor::OpenAiResponses, effort: GPT5_XHIGH },
    // ── Google ────────────────────────────────────────────────────────────────
    ModelEntry { id: "gemini-2.5-flash-lite", provider: ProviderKind::Google, flavor: ApiFlavor::GoogleGenerate, effort: NO_REASONING },
    ModelEntry { id: "gemini-3-flash-preview", provider: ProviderKind::Google, flavor: ApiFlavor::GoogleGenerate, effort: NO_REASONING },
    ModelEntry { id: "gemini-3-pro-preview", provider: ProviderKind::Google, flavor: ApiFlavor::GoogleGenerate, effort: NO_REASONING },
];

/// Look up a model by exact id.
pub fn lookup(model: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|e| e.id == model)
}

/// All registered model ids in declaration order (drives tab completion).
pub fn known_model_ids() -> impl Iterator<Item = &'static str> {
    MODELS.iter().map(|e| e.id)
}

// ─── Provider inference ───────────────────────────────────────────────────────

/// Infer the provider from a model identifier.
///
/// Exact registry entries win; otherwise the id prefix decides (`claude-` →
/// anthropic, `gemini-` → google, `gpt-`/`chatgpt-` or an o-series prefix →
/// openai).  The o-prefix check requires a separator after the digit so that
/// e.g. `o30` is not treated as a reasoning model family.
pub fn infer_provider(model: &str) -> Option<ProviderKind> {
    if let Some(entry) = lookup(model) {
        return Some(entry.provider);
    }
    if model.starts_with("claude-") {
        return Some(ProviderKind::Anthropic);
    }
    if model.starts_with("gemini-") {
        return Some(ProviderKind::Google);
    }
    if model.starts_with("gpt-") || model.starts_with("chatgpt-") || has_o_series_prefix(model) {
        return Some(ProviderKind::OpenAi);
    }
    None
}

fn has_o_series_prefix(model: &str) -> bool {
    let mut bytes = model.bytes();
    if bytes.next() != Some(b'o') {
        return false;
    }
    match bytes.next() {
        Some(b'1') | Some(b'3') | Some(b'4') => {}
        _ => return false,
    }
    matches!(bytes.next(), None | Some(b'-') | Some(b'_'))
}

/// API flavor for a model.  Unknown OpenAI models default to Chat Completions.
pub fn api_flavor(model: &str) -> Option<ApiFlavor> {
    if let Some(entry) = lookup(model) {
        return Some(entry.flavor);
    }
    infer_provider(model).map(|p| match p {
        ProviderKind::Anthropic => ApiFlavor::AnthropicMessages,
        ProviderKind::Google => ApiFlavor::GoogleGenerate,
        ProviderKind::OpenAi => {
            if has_o_series_prefix(model) {
                ApiFlavor::OpenAiResponses
            } else {
                ApiFlavor::OpenAiChat
            }
        }
    })
}

// ─── Reasoning effort ─────────────────────────────────────────────────────────

/// `true` when the model accepts a `reasoning.effort` parameter.
pub fn is_reasoning_model(model: &str) -> bool {
    match lookup(model) {
        Some(entry) => entry.effort.iter().any(|e| e.is_some()),
        None => has_o_series_prefix(model),
    }
}

/// Map a thinking level onto the model's effort vocabulary.
///
/// `None` means the parameter is omitted for that level (gpt-5 base models at
/// level `none`) or the model is not a reasoning model at all.  Unknown
/// o-series models use the o-series mapping.
pub fn reasoning_effort(model: &str, level: ThinkingLevel) -> Option<&'static str> {
    match lookup(model) {
        Some(entry) => entry.effort[level.index()],
        None if has_o_series_prefix(model) => O_SERIES[level.index()],
        None => None,
    }
}

/// Reject thinking levels the model cannot honor.
///
/// Reasoning models accept every level; non-reasoning models accept only
/// `none` and fail with `InvalidArg` otherwise.
pub fn validate_thinking(model: &str, level: ThinkingLevel) -> Result<()> {
    if level == ThinkingLevel::None || is_reasoning_model(model) {
        return Ok(());
    }
    match infer_provider(model) {
        // Anthropic and Google models take thinking config directly.
        Some(ProviderKind::Anthropic) | Some(ProviderKind::Google) => Ok(()),
        _ => Err(Error::new(
            ErrorCode::InvalidArg,
            format!("model '{model}' does not support thinking level '{level}'"),
        )),
    }
}

// ─── Anthropic thinking budgets ───────────────────────────────────────────────

/// Token budget for Anthropic extended thinking; `None` omits the block.
pub fn anthropic_thinking_budget(level: ThinkingLevel) -> Option<u32> {
    match level {
        ThinkingLevel::None => None,
        ThinkingLevel::Low => Some(2048),
        ThinkingLevel::Med => Some(8192),
        ThinkingLevel::High => Some(16384),
    }
}

// ─── Google thinking config ───────────────────────────────────────────────────

/// How a Gemini model expresses the thinking level in `generationConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoogleThinking {
    /// Gemini 2.5: integer `thinkingBudget`.
    Budget(u32),
    /// Gemini 3+: string `thinkingLevel`.
    Level(&'static str),
    /// Gemini 1.x and anything older: no thinking config at all.
    Ignore,
}

pub fn google_thinking(model: &str, level: ThinkingLevel) -> GoogleThinking {
    if model.starts_with("gemini-2.5") {
        let budget = match level {
            ThinkingLevel::None => 0,
            ThinkingLevel::Low => 2048,
            ThinkingLevel::Med => 8192,
            ThinkingLevel::High => 24576,
        };
        return GoogleThinking::Budget(budget);
    }
    if gemini_major_version(model).is_some_and(|v| v >= 3) {
        let s = match level {
            ThinkingLevel::None => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Med => "medium",
            ThinkingLevel::High => "high",
        };
        return GoogleThinking::Level(s);
    }
    GoogleThinking::Ignore
}

fn gemini_major_version(model: &str) -> Option<u32> {
    let rest = model.strip_prefix("gemini-")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
