// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
///
/// Mirrors `nils_model::ToolCallRequest` but keeps this crate independent
/// from the model crate.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier issued by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Side-effect class a tool declares at registration.
///
/// `explore_context` sub-agents are restricted to `ReadOnly` tools; the
/// class is advisory beyond that filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    ReadWrite,
    Network,
    SpawnsSubAgent,
}

/// Executor-level classification of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Tool name not present in the registry.
    UnknownTool,
    /// Arguments did not match the tool's declared schema.
    InvalidArguments,
    /// The tool body returned an error or panicked.
    ToolCrashed,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::ToolCrashed => "tool_crashed",
        }
    }
}

/// Outcome status of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Ok,
    Error(ToolErrorKind),
    Timeout,
    Cancelled,
}

impl ToolStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, ToolStatus::Ok)
    }
}

/// The result of dispatching one tool call through the executor.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    /// Payload on success; failure description otherwise.
    pub content: String,
    pub duration: Duration,
}

impl ToolCallResult {
    pub fn ok(call: &ToolCall, content: impl Into<String>, duration: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Ok,
            content: content.into(),
            duration,
        }
    }

    pub fn error(
        call: &ToolCall,
        kind: ToolErrorKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Error(kind),
            content: message.into(),
            duration,
        }
    }

    pub fn timeout(call: &ToolCall, limit: Duration, duration: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Timeout,
            content: format!("execution exceeded the {}s timeout", limit.as_secs()),
            duration,
        }
    }

    pub fn cancelled(call: &ToolCall, duration: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Cancelled,
            content: "execution was cancelled".into(),
            duration,
        }
    }

    /// The text appended to the conversation as the tool turn.  Failures are
    /// rendered as `Error:` text naming the failure kind so the model can
    /// recover; they are never thrown.
    pub fn text_for_model(&self) -> String {
        match self.status {
            ToolStatus::Ok => self.content.clone(),
            ToolStatus::Error(kind) => {
                format!("Error: {} ({})", self.content, kind.as_str())
            }
            ToolStatus::Timeout => format!("Error: {} (timeout)", self.content),
            ToolStatus::Cancelled => format!("Error: {} (cancelled)", self.content),
        }
    }
}

/// Trait every tool must implement.
///
/// `execute` returns its payload as plain text.  Model-recoverable
/// failures (bad path, oversized output, …) are returned as `Ok` text
/// starting with `Error:`; an `Err` is treated by the executor as a tool
/// crash.  Long-running tools should watch `cancel` at their await points.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    fn side_effect(&self) -> SideEffect;
    /// Per-tool timeout; `None` uses the executor's global default.
    fn timeout_override(&self) -> Option<Duration> {
        None
    }
    async fn execute(&self, args: Value, cancel: CancellationToken) -> anyhow::Result<String>;
}

/// Shared output-size discipline for tool payloads.
///
/// The executor never truncates; a tool whose output would exceed
/// `ceiling_tokens` (4 chars ≈ 1 token) returns this `Error:` text instead,
/// with `hint` telling the model how to narrow the request.
pub fn enforce_output_ceiling(content: String, ceiling_tokens: usize, hint: &str) -> String {
    let ceiling_chars = ceiling_tokens * 4;
    if content.len() <= ceiling_chars {
        return content;
    }
    format!(
        "Error: output is {} characters, above the ~{} token ceiling. {}",
        content.len(),
        ceiling_tokens,
        hint
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
