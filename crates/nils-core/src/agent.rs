// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use nils_config::RuntimeConfig;
use nils_memory::MemoryManager;
use nils_model::{
    complete_with_retry, CompletionRequest, Message, ModelProvider, RetryPolicy, ToolSchema,
};
use nils_tools::{ToolCall, ToolExecutor, ToolStatus};

use crate::{events::AgentEvent, fatal::RunFatal};

/// User-scoped options merged into every model request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// The inner Think–Act–Observe loop.
///
/// Each iteration asks the memory manager for context, calls the model
/// (with retry), and either returns the model's text or dispatches its
/// tool calls serially in declared order before iterating again.
pub struct Agent {
    provider: Arc<dyn ModelProvider>,
    executor: Arc<ToolExecutor>,
    memory: MemoryManager,
    config: Arc<RuntimeConfig>,
    retry: RetryPolicy,
    options: RequestOptions,
    events: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        executor: Arc<ToolExecutor>,
        memory: MemoryManager,
        config: Arc<RuntimeConfig>,
        options: RequestOptions,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.retry_max_attempts,
            initial_delay: std::time::Duration::from_secs_f64(config.retry_initial_delay_secs),
            max_delay: std::time::Duration::from_secs_f64(config.retry_max_delay_secs),
            base: 2.0,
        };
        Self {
            provider,
            executor,
            memory,
            config,
            retry,
            options,
            events,
            cancel,
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Append the task as a user turn and run the loop to completion.
    pub async fn run_task(&self, task: &str) -> Result<String, RunFatal> {
        let _ = self
            .events
            .send(AgentEvent::TaskStarted {
                task: task.to_string(),
            })
            .await;
        self.memory.add_message(Message::user(task), None).await;
        self.run_loop().await
    }

    /// Re-enter the loop on the existing conversation (outer-loop feedback
    /// rounds, resumed sessions).
    pub async fn resume_loop(&self) -> Result<String, RunFatal> {
        self.run_loop().await
    }

    async fn run_loop(&self) -> Result<String, RunFatal> {
        let schemas = self.tool_schemas();
        self.memory.set_tool_schemas(&schemas).await;

        for iteration in 1..=self.config.max_iterations {
            if self.cancel.is_cancelled() {
                let _ = self.events.send(AgentEvent::Aborted).await;
                return Err(RunFatal::Cancelled);
            }

            let req = CompletionRequest {
                messages: self.memory.get_context_for_llm().await,
                tools: schemas.clone(),
                max_tokens: self.options.max_tokens,
                temperature: self.options.temperature,
            };
            debug!(iteration, messages = req.messages.len(), "model call");

            let response =
                complete_with_retry(self.provider.as_ref(), req, &self.retry, &self.cancel)
                    .await?;
            self.memory
                .record_usage(response.usage.input_tokens, response.usage.output_tokens)
                .await;
            let _ = self
                .events
                .send(AgentEvent::TokenUsage {
                    input: response.usage.input_tokens,
                    output: response.usage.output_tokens,
                })
                .await;
            if let Some(reasoning) = &response.reasoning {
                let _ = self
                    .events
                    .send(AgentEvent::Reasoning(reasoning.clone()))
                    .await;
            }

            if response.tool_calls.is_empty() {
                // A response with neither text nor tool calls terminates the
                // loop with an empty result.
                let text = response.content.unwrap_or_default();
                if !text.is_empty() {
                    let mut turn = Message::assistant(&text);
                    turn.reasoning = response.reasoning;
                    self.memory.add_message(turn, None).await;
                    let _ = self.events.send(AgentEvent::AssistantText(text.clone())).await;
                }
                let _ = self.events.send(AgentEvent::TurnComplete).await;
                return Ok(text);
            }

            // Commit the assistant turn, then answer every call in declared
            // order before the next model call.
            let mut turn =
                Message::assistant_with_calls(response.content.clone(), response.tool_calls.clone());
            turn.reasoning = response.reasoning.clone();
            self.memory.add_message(turn, None).await;

            for tc in &response.tool_calls {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    args: tc.arguments.clone(),
                };
                let _ = self.events.send(AgentEvent::ToolCallStarted(call.clone())).await;

                let result = self.executor.execute(&call, &self.cancel).await;
                if result.status == ToolStatus::Cancelled {
                    // Unwind without committing the partial exchange; the
                    // controller rolls the tail back.
                    let _ = self.events.send(AgentEvent::Aborted).await;
                    return Err(RunFatal::Cancelled);
                }

                let text = result.text_for_model();
                let _ = self
                    .events
                    .send(AgentEvent::ToolCallFinished {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        output: text.clone(),
                        ok: result.status.is_ok(),
                    })
                    .await;
                self.memory
                    .add_message(Message::tool_result(&call.id, &call.name, text), None)
                    .await;
            }
        }

        let marker = format!(
            "Error: max iterations reached ({}) without a final answer",
            self.config.max_iterations
        );
        let _ = self.events.send(AgentEvent::TurnComplete).await;
        Ok(marker)
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.executor
            .registry()
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }
}
