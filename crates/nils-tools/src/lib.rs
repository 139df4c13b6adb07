// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod executor;
mod registry;
mod tool;
mod validate;

pub use executor::ToolExecutor;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{
    enforce_output_ceiling, SideEffect, Tool, ToolCall, ToolCallResult, ToolErrorKind, ToolStatus,
};
pub use validate::validate_args;

pub use builtin::calculate::CalculateTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell::ShellTool;
