// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{CompletionRequest, CompletionResponse, ModelError, Role};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.as_deref())
            .unwrap_or("[no input]");
        Ok(CompletionResponse::text(format!("MOCK: {reply}")))
    }
}

/// A pre-scripted provider.  Each `complete` call pops the next response
/// from the front of the queue, so tests can specify exact call sequences
/// — including tool calls and rate-limit errors — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Result<CompletionResponse, ModelError>>>,
    /// The last `CompletionRequest` seen, for request-shape assertions.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Result<CompletionResponse, ModelError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider that answers every call with the same text.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![Ok(CompletionResponse::text(r))])
    }

    /// Convenience: a tool call on the first round, text on the second.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Ok(CompletionResponse::tool_call(tool_id, tool_name, arguments)),
            Ok(CompletionResponse::text(final_text)),
        ])
    }

    /// Append another scripted response.
    pub fn push(&self, response: Result<CompletionResponse, ModelError>) {
        self.scripts.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);
        match self.scripts.lock().unwrap().pop_front() {
            Some(r) => r,
            // Default fallback when all scripts are consumed.
            None => Ok(CompletionResponse::text("[no more scripts]")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
