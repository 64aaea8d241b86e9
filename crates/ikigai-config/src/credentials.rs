// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! API-key discovery.
//!
//! Priority order: explicit CLI value → provider environment variable →
//! `~/.config/ikigai/credentials.json`.  Empty strings count as unset at
//! every layer.  A missing, unreadable, or malformed credentials file yields
//! empty credentials, never a fatal error; overly permissive file modes get a
//! one-time warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

/// Per-provider section of `credentials.json`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderCredentials {
    #[serde(default)]
    api_key: Option<String>,
}

/// Resolved credential store.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Keys set explicitly (CLI flags); highest priority.
    overrides: HashMap<String, String>,
    file_keys: HashMap<String, String>,
}

impl Credentials {
    /// Load from the default location (`~/.config/ikigai/credentials.json`).
    pub fn load() -> Self {
        match default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path.  Every failure mode degrades to empty
    /// credentials so startup can continue on env vars alone.
    pub fn load_from(path: &Path) -> Self {
        check_permissions(path);
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "credentials file not readable");
                return Self::default();
            }
        };
        let parsed: HashMap<String, ProviderCredentials> = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed credentials file ignored");
                return Self::default();
            }
        };
        let file_keys = parsed
            .into_iter()
            .filter_map(|(provider, creds)| {
                let key = creds.api_key?;
                if key.is_empty() {
                    return None;
                }
                Some((provider, key))
            })
            .collect();
        Self { overrides: HashMap::new(), file_keys }
    }

    /// Install an explicit key for `provider` (e.g. from a CLI flag).  An
    /// empty value is ignored.
    pub fn set_override(&mut self, provider: &str, key: &str) {
        if !key.is_empty() {
            self.overrides.insert(provider.to_string(), key.to_string());
        }
    }

    /// Resolve the key for `provider`, honoring the priority order.
    ///
    /// `cli_override` is the value of an explicit flag, if any.
    pub fn api_key(&self, provider: &str, cli_override: Option<&str>) -> Option<String> {
        if let Some(key) = non_empty(cli_override) {
            return Some(key);
        }
        if let Some(key) = self.overrides.get(provider) {
            return Some(key.clone());
        }
        let env_name = env_var_for(provider);
        if let Some(key) = std::env::var(env_name).ok().as_deref().and_then(|k| non_empty(Some(k)))
        {
            return Some(key);
        }
        self.file_keys.get(provider).cloned()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Environment variable carrying the key for `provider`.
pub fn env_var_for(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        "google" => "GOOGLE_API_KEY",
        _ => "OPENAI_API_KEY",
    }
}

/// Default credentials path: `~/.config/ikigai/credentials.json`.
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config/ikigai/credentials.json"))
}

/// Warn (non-fatally) when the file is group- or world-readable.
#[cfg(unix)]
fn check_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:o}"),
                "credentials file is readable by others; expected mode 0600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) {}

// ─── Unit tests ──────────────────────────────────────────────────────────────
