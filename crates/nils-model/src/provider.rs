// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{CompletionRequest, CompletionResponse, ModelError};

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users and the pricing table.
    fn model_name(&self) -> &str;

    /// Send a completion request and await the whole response.
    ///
    /// Implementations report quota exhaustion as
    /// [`ModelError::RateLimited`] so the retry layer can back off; every
    /// other failure is terminal for the call.
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelError>;
}
