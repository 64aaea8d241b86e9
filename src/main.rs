// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, reload, Registry};

use cli::Cli;
use ikigai_config::Credentials;
use ikigai_core::{AgentContext, EventLoop, LogDisplay, NullJournal, ReplState};
use ikigai_model::registry;
use ikigai_tools::ToolRegistry;

// The loop is strictly single-threaded cooperative; a current-thread runtime
// makes that explicit and keeps every component free of Send bounds.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_handle = init_logging(&cli)?;

    // Resolve the initial model and provider before touching the network so a
    // typo fails fast with a useful message.
    let (model, level) = ikigai_core::commands::parse_model_spec(&cli.model)
        .map_err(|e| anyhow::anyhow!("{}", e.message))?;
    let Some(provider) = registry::infer_provider(&model) else {
        bail!("unknown model '{model}'; no provider claims it");
    };
    if let Some(level) = level {
        registry::validate_thinking(&model, level)
            .map_err(|e| anyhow::anyhow!("{}", e.message))?;
    }

    let mut credentials = match &cli.credentials {
        Some(path) => Credentials::load_from(path),
        None => Credentials::load(),
    };
    if let Some(key) = &cli.api_key {
        credentials.set_override(provider.name(), key);
    }
    if credentials.api_key(provider.name(), None).is_none() {
        bail!(
            "no API key for {provider}; set {} or add it to the credentials file",
            ikigai_config::env_var_for(provider.name())
        );
    }

    let state_dir = match &cli.state_dir {
        Some(dir) => dir.clone(),
        None => ikigai_config::state_dir()?,
    };
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;

    let libexec = ikigai_config::libexec_dir().unwrap_or_default();
    let tools = ToolRegistry::discover(&libexec).await;
    tracing::info!(count = tools.tools().len(), "tools registered");

    let root = AgentContext::root(provider, model, level.unwrap_or_default());
    let mut repl = ReplState::new(root);
    repl.system_prompt = cli.system.clone();

    let mut event_loop = EventLoop::new(repl, NullJournal, LogDisplay, credentials, tools);
    event_loop.set_debug_hook(move |on| {
        let directive = if on { "debug" } else { "info" };
        if let Err(e) = log_handle.reload(EnvFilter::new(directive)) {
            eprintln!("failed to adjust log level: {e}");
        }
    });
    event_loop.run().await
}

/// Set up tracing and return the reload handle `/debug` drives.
fn init_logging(cli: &Cli) -> anyhow::Result<reload::Handle<EnvFilter, Registry>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);

    if cli.verbose {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(handle);
    }

    // Writing to stderr would corrupt the terminal display; log to a file
    // under the state dir instead.
    let dir = match &cli.state_dir {
        Some(d) => d.clone(),
        None => ikigai_config::state_dir()?,
    };
    std::fs::create_dir_all(&dir).ok();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("ikigai.log"))
        .context("opening log file")?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(false).with_writer(file))
        .init();
    Ok(handle)
}
