// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod paths;
mod schema;

pub use loader::{load, parse};
pub use paths::{logs_dir, runtime_dir, sessions_dir};
pub use schema::{CompressionStrategy, RuntimeConfig};
