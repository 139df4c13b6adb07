// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use nils_tools::ToolCall;

/// Events emitted by the agent while working a task.  Consumers (the CLI's
/// verbose printer, tests) subscribe via the channel handed to the agent;
/// dropping the receiver silently discards them.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A new inner-loop run began for this task.
    TaskStarted { task: String },
    /// The model produced a reasoning block (never re-sent to the model).
    Reasoning(String),
    /// A complete assistant text response.
    AssistantText(String),
    /// The model requested a tool call.
    ToolCallStarted(ToolCall),
    /// A tool call finished.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        ok: bool,
    },
    /// Provider-reported usage for one completion.
    TokenUsage { input: u64, output: u64 },
    /// The outer loop judged an inner-loop result.
    VerifierVerdict {
        iteration: u32,
        complete: bool,
        reason: String,
    },
    /// The run was cancelled and unwound.
    Aborted,
    /// The agent finished processing the current task or turn.
    TurnComplete,
}
