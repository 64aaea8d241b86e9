// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! State-dir and install-layout path resolution.

use std::path::PathBuf;

use anyhow::Context;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "IKIGAI_STATE_DIR";
/// Environment variable carrying the active agent id into tool processes.
pub const AGENT_ID_ENV: &str = "IKIGAI_AGENT_ID";

/// Resolve the state directory: `$IKIGAI_STATE_DIR` when set and non-empty,
/// otherwise `~/.local/state/ikigai`.
pub fn state_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".local/state/ikigai"))
}

/// Directory holding tool executables: `<install>/libexec/ikigai/`, resolved
/// relative to the running binary (`<install>/bin/ikigai`).
pub fn libexec_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the running binary")?;
    let install = exe
        .parent()
        .and_then(|bin| bin.parent())
        .context("binary has no install prefix")?;
    Ok(install.join("libexec/ikigai"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dir_prefers_env() {
        // Process-wide env mutation: run the two cases in one test to avoid
        // interference between parallel tests.
        std::env::set_var(STATE_DIR_ENV, "/tmp/ikigai-test-state");
        assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/ikigai-test-state"));

        std::env::set_var(STATE_DIR_ENV, "");
        let fallback = state_dir().unwrap();
        assert!(fallback.ends_with(".local/state/ikigai"), "{fallback:?}");
        std::env::remove_var(STATE_DIR_ENV);
    }

    #[test]
    fn libexec_dir_is_relative_to_binary() {
        let dir = libexec_dir().unwrap();
        assert!(dir.ends_with("libexec/ikigai"), "{dir:?}");
    }
}
