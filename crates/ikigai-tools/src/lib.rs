// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool invocation: spawn standalone executables, pipe JSON over stdio.
//!
//! Tools live in `<install>/libexec/ikigai/` as independent programs.  Each
//! prints its JSON schema when invoked with `--schema`; that is how it gets
//! registered at startup.  At call time the tool is spawned with no
//! arguments, receives the JSON argument object on stdin, and writes a result
//! object to stdout.  The exit code is advisory: the `success` field
//! dominates.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment passed to every tool process.
#[derive(Debug, Clone, Default)]
pub struct ToolEnv {
    pub agent_id: String,
    pub state_dir: PathBuf,
}

/// A registered tool: name, description, and its parameter schema (verbatim
/// JSON, forwarded to providers untouched).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub schema: String,
}

/// Result object a tool writes to stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    /// Side-channel event for the host (display hints etc.).
    #[serde(default, rename = "_event")]
    pub event: Option<Value>,
}

impl ToolOutcome {
    /// Content string for the tool_result block.
    pub fn content(&self) -> &str {
        if self.success {
            self.output.as_deref().unwrap_or("")
        } else {
            self.error.as_deref().unwrap_or("tool failed")
        }
    }
}

/// Discovered tools from a libexec directory.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    dir: PathBuf,
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Scan `dir`, running each executable with `--schema` and registering
    /// every one that prints a parseable schema object.  A missing directory
    /// yields an empty registry.
    pub async fn discover(dir: &Path) -> Self {
        let mut tools = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "no tool directory");
                return Self { dir: dir.to_path_buf(), tools };
            }
        };
        let mut paths: Vec<PathBuf> =
            entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()).collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            match query_schema(&path).await {
                Ok(def) => {
                    debug!(tool = %name, "registered tool");
                    tools.push(ToolDefinition { name, ..def });
                }
                Err(e) => warn!(tool = %name, error = %e, "tool schema query failed; skipped"),
            }
        }
        Self { dir: dir.to_path_buf(), tools }
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Invoke `name` with the given JSON argument string.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &str,
        env: &ToolEnv,
    ) -> anyhow::Result<ToolOutcome> {
        if self.get(name).is_none() {
            bail!("unknown tool '{name}'");
        }
        invoke_executable(&self.dir.join(name), arguments, env).await
    }
}

async fn query_schema(path: &Path) -> anyhow::Result<ToolDefinition> {
    let output = Command::new(path)
        .arg("--schema")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawning {} --schema", path.display()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let v: Value = serde_json::from_str(stdout.trim()).context("schema output is not JSON")?;
    let description = v["description"].as_str().unwrap_or("").to_string();
    let parameters = v.get("parameters").cloned().unwrap_or_else(|| v.clone());
    Ok(ToolDefinition {
        name: String::new(),
        description,
        schema: serde_json::to_string(&parameters)?,
    })
}

/// Spawn a tool executable, write the argument object to stdin, and parse the
/// result object from stdout.
pub async fn invoke_executable(
    path: &Path,
    arguments: &str,
    env: &ToolEnv,
) -> anyhow::Result<ToolOutcome> {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env(ikigai_config::AGENT_ID_ENV, &env.agent_id)
        .env(ikigai_config::STATE_DIR_ENV, &env.state_dir)
        .spawn()
        .with_context(|| format!("spawning tool {}", path.display()))?;

    {
        let mut stdin = child.stdin.take().context("tool stdin unavailable")?;
        stdin.write_all(arguments.as_bytes()).await.context("writing tool arguments")?;
        // Dropping stdin closes the pipe so the tool sees EOF.
    }

    let output = child.wait_with_output().await.context("waiting for tool")?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    match serde_json::from_str::<ToolOutcome>(stdout.trim()) {
        Ok(outcome) => {
            if !output.status.success() && outcome.success {
                // Exit code is advisory; note the mismatch and trust `success`.
                debug!(status = ?output.status, "tool exited non-zero but reported success");
            }
            Ok(outcome)
        }
        Err(e) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "tool wrote unparseable output ({e}); stderr: {}",
                stderr.trim()
            );
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
