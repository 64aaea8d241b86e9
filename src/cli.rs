// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::Parser;

/// Interactive terminal client for concurrent LLM agents.
///
/// Most configuration happens at runtime through slash commands (`/model`,
/// `/fork`, `/pin`, …); the flags here only establish the starting state.
#[derive(Parser, Debug)]
#[command(name = "ikigai", version, about)]
pub struct Cli {
    /// Initial model, optionally with a thinking level (MODEL[/LEVEL]).
    #[arg(long, short = 'm', default_value = "claude-sonnet-4-5")]
    pub model: String,

    /// API key for the initial provider; overrides env and credentials file.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Credentials file (default: ~/.config/ikigai/credentials.json).
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// System prompt for the primordial agent.
    #[arg(long)]
    pub system: Option<String>,

    /// State directory (default: $IKIGAI_STATE_DIR or ~/.local/state/ikigai).
    #[arg(long, env = "IKIGAI_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log to stderr instead of the state-dir log file.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
