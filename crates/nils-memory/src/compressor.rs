// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::Utc;

use nils_config::CompressionStrategy;
use nils_model::{CompletionRequest, Message, ModelError, ModelProvider, Role};

use crate::session::CompressedSummary;

const COMPRESSION_SYSTEM_PROMPT: &str =
    "You are a context compression assistant. Summarise the conversation \
     excerpt you are given into a concise, information-dense text. Preserve \
     decisions made, facts discovered, open sub-goals, and tool results that \
     may still matter. The summary will replace the original messages.";

const SELECTIVE_PREAMBLE: &str =
    "The following messages are important and their facts must be carried \
     into the summary verbatim (quote exact values, paths, and error text):";

/// Output cap for the summary call; the compression exists to shrink
/// context, so the reply is bounded regardless of input size.
const MAX_SUMMARY_TOKENS: u32 = 1024;

/// Why a compression attempt produced no summary.  The caller keeps the
/// original messages in either case.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("compression model call failed: {0}")]
    Model(#[from] ModelError),
    #[error("compression model returned an empty summary")]
    EmptySummary,
}

/// LLM-driven summarisation of old conversation turns.
pub struct Compressor {
    provider: Arc<dyn ModelProvider>,
    strategy: CompressionStrategy,
}

impl Compressor {
    pub fn new(provider: Arc<dyn ModelProvider>, strategy: CompressionStrategy) -> Self {
        Self { provider, strategy }
    }

    pub fn strategy(&self) -> CompressionStrategy {
        self.strategy
    }

    /// Compress `old_messages` into a single summary, folding in the prior
    /// summary when one exists.  Uses no tools and a bounded output cap.
    pub async fn compress(
        &self,
        old_messages: &[Message],
        prior: Option<&CompressedSummary>,
    ) -> Result<CompressedSummary, CompressError> {
        let original_tokens: usize = old_messages.iter().map(Message::approx_tokens).sum();
        let original_tokens =
            original_tokens + prior.map(|s| s.compressed_tokens).unwrap_or(0);
        let original_message_count = old_messages.len();

        if self.strategy == CompressionStrategy::Deletion {
            // Zero-cost path: no model call, deterministic notice.
            let summary_text = format!(
                "[{original_message_count} earlier messages were dropped to free \
                 context space. Earlier decisions may be missing; ask the user to \
                 restate anything important.]"
            );
            let compressed_tokens = summary_text.len() / 4;
            return Ok(CompressedSummary {
                summary_text,
                original_message_count,
                original_tokens,
                compressed_tokens,
                strategy: self.strategy.to_string(),
                created_at: Utc::now(),
            });
        }

        let prompt = self.build_prompt(old_messages, prior);
        let req = CompletionRequest {
            messages: vec![Message::system(COMPRESSION_SYSTEM_PROMPT), Message::user(prompt)],
            tools: Vec::new(),
            max_tokens: Some(MAX_SUMMARY_TOKENS),
            temperature: None,
        };

        let response = self.provider.complete(req).await?;
        let summary_text = response.content.unwrap_or_default();
        if summary_text.trim().is_empty() {
            return Err(CompressError::EmptySummary);
        }

        let compressed_tokens = (summary_text.len() / 4).max(1);
        Ok(CompressedSummary {
            summary_text,
            original_message_count,
            original_tokens,
            compressed_tokens,
            strategy: self.strategy.to_string(),
            created_at: Utc::now(),
        })
    }

    fn build_prompt(&self, old_messages: &[Message], prior: Option<&CompressedSummary>) -> String {
        let mut prompt = String::new();
        if let Some(p) = prior {
            prompt.push_str("Summary of even earlier conversation:\n");
            prompt.push_str(&p.summary_text);
            prompt.push_str("\n\n---\n\n");
        }

        match self.strategy {
            CompressionStrategy::Selective => {
                let (important, rest): (Vec<&Message>, Vec<&Message>) =
                    old_messages.iter().partition(|m| is_important(m));
                if !important.is_empty() {
                    prompt.push_str(SELECTIVE_PREAMBLE);
                    prompt.push('\n');
                    prompt.push_str(&serialize_history(important.iter().copied()));
                    prompt.push_str("\n\n---\n\n");
                }
                prompt.push_str("Summarise the remaining conversation:\n");
                prompt.push_str(&serialize_history(rest.iter().copied()));
            }
            _ => {
                prompt.push_str("Conversation to summarise:\n");
                prompt.push_str(&serialize_history(old_messages.iter()));
            }
        }
        prompt
    }
}

/// Messages whose exact content must survive compression: tool exchanges,
/// error-bearing results, and the user's own directives.
fn is_important(message: &Message) -> bool {
    if message.has_tool_calls() || message.role == Role::Tool || message.role == Role::User {
        return true;
    }
    message
        .content
        .as_deref()
        .map(|c| c.starts_with("Error:"))
        .unwrap_or(false)
}

/// Serialise messages into plain text for the compression prompt.
fn serialize_history<'a>(messages: impl Iterator<Item = &'a Message>) -> String {
    messages
        .map(|m| {
            let role = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            let mut text = m.content.clone().unwrap_or_default();
            for tc in &m.tool_calls {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!("[tool_call: {}({})]", tc.name, tc.arguments));
            }
            if let Some(name) = &m.tool_name {
                text = format!("[{name} result] {text}");
            }
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
