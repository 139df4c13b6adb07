// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{enforce_output_ceiling, SideEffect, Tool};

const OUTPUT_CEILING_TOKENS: usize = 8_000;

/// Runs a command under `sh -c`, capturing stdout and stderr.
///
/// The child process is killed when the cancellation token trips, so an
/// interrupted run never leaves a stray subprocess behind.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout and stderr. \
         Non-zero exit codes are reported in the output. \
         Output above the size ceiling is rejected; pipe through head/tail \
         or redirect to a file for large results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::ReadWrite
    }

    fn timeout_override(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(self.timeout_secs))
    }

    async fn execute(&self, args: Value, cancel: CancellationToken) -> anyhow::Result<String> {
        let command = args["command"].as_str().unwrap_or("");
        let workdir = args["workdir"].as_str();
        debug!(cmd = %command, "shell tool");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // kill_on_drop reaps the child when the future is dropped.
                return Ok("Error: command cancelled".into());
            }
            out = cmd.output() => out,
        };

        let output = match output {
            Ok(o) => o,
            Err(e) => return Ok(format!("Error: failed to spawn command: {e}")),
        };

        let mut content = String::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            content.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&stderr);
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            content = format!("[exit {code}]\n{content}");
        }
        if content.is_empty() {
            content = format!("[exit {}]", output.status.code().unwrap_or(0));
        }

        Ok(enforce_output_ceiling(
            content,
            OUTPUT_CEILING_TOKENS,
            "Pipe through head/tail or redirect to a file, then read selectively.",
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
