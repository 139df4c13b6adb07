// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "nils",
    version,
    about = "An autonomous LLM agent runtime with a verified task loop"
)]
pub struct Cli {
    /// Run a single task and exit, printing the final result to stdout
    #[arg(short = 't', long, value_name = "TEXT")]
    pub task: Option<String>,

    /// Override the active model for this run
    #[arg(long, value_name = "ID")]
    pub model: Option<String>,

    /// Resume a saved session by UUID prefix; without a value, the most
    /// recently updated session is resumed
    #[arg(long, value_name = "ID", num_args = 0..=1, default_missing_value = "latest")]
    pub resume: Option<String>,

    /// Write verbose logs to the runtime log directory
    #[arg(long)]
    pub verbose: bool,

    /// Explicit config file path (default: config in the runtime directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Single-task (headless) mode?  Interactive otherwise.
    pub fn is_headless(&self) -> bool {
        self.task.is_some()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
