// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use nils_model::ModelError;

/// Loop-level fatals.  Tool failures never become one of these: they are
/// appended to the conversation as tool results and the loop continues.
/// Only cancellation and post-retry provider failures unwind the run.
#[derive(Debug, thiserror::Error)]
pub enum RunFatal {
    #[error("task cancelled")]
    Cancelled,
    #[error("rate limit retries exhausted")]
    RateLimitExhausted,
    #[error("model call failed: {0}")]
    Model(ModelError),
}

impl From<ModelError> for RunFatal {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Cancelled => RunFatal::Cancelled,
            ModelError::RateLimited { .. } => RunFatal::RateLimitExhausted,
            other => RunFatal::Model(other),
        }
    }
}

impl RunFatal {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunFatal::Cancelled)
    }
}
