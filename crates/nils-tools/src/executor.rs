// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{validate_args, ToolCall, ToolCallResult, ToolErrorKind, ToolRegistry};

/// Resolves tool calls against the registry and runs them with the full
/// dispatch contract: argument validation, per-tool or global timeout,
/// cooperative cancellation, and panic containment.  Failures come back as
/// typed [`ToolCallResult`]s; nothing propagates to the caller.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolCallResult {
        let started = Instant::now();

        let Some(tool) = self.registry.get(&call.name) else {
            return ToolCallResult::error(
                call,
                ToolErrorKind::UnknownTool,
                format!("no tool named '{}'", call.name),
                started.elapsed(),
            );
        };

        if let Err(message) = validate_args(&tool.parameters_schema(), &call.args) {
            return ToolCallResult::error(
                call,
                ToolErrorKind::InvalidArguments,
                message,
                started.elapsed(),
            );
        }

        let limit = tool.timeout_override().unwrap_or(self.default_timeout);
        debug!(tool = %call.name, call_id = %call.id, timeout_secs = limit.as_secs(), "dispatching tool");

        // Run the tool body in its own task so a panic is contained as a
        // JoinError instead of unwinding through the loop.  The child token
        // lets the tool observe cancellation at its own await points.
        let child_cancel = cancel.child_token();
        let args = call.args.clone();
        let handle = tokio::spawn(async move { tool.execute(args, child_cancel).await });
        let abort_handle = handle.abort_handle();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort_handle.abort();
                return ToolCallResult::cancelled(call, started.elapsed());
            }
            joined = tokio::time::timeout(limit, handle) => joined,
        };

        match outcome {
            Err(_elapsed) => ToolCallResult::timeout(call, limit, started.elapsed()),
            Ok(Err(join_err)) => {
                warn!(tool = %call.name, error = %join_err, "tool task failed");
                let message = if join_err.is_panic() {
                    format!("tool '{}' panicked", call.name)
                } else {
                    format!("tool '{}' was aborted", call.name)
                };
                ToolCallResult::error(call, ToolErrorKind::ToolCrashed, message, started.elapsed())
            }
            Ok(Ok(Err(tool_err))) => ToolCallResult::error(
                call,
                ToolErrorKind::ToolCrashed,
                tool_err.to_string(),
                started.elapsed(),
            ),
            Ok(Ok(Ok(content))) => {
                if cancel.is_cancelled() {
                    // The token tripped while the tool was finishing; the
                    // caller is unwinding and must not commit this result.
                    return ToolCallResult::cancelled(call, started.elapsed());
                }
                ToolCallResult::ok(call, content, started.elapsed())
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
