// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nils_config::RuntimeConfig;
use nils_memory::MemoryManager;
use nils_model::{Message, ModelProvider};
use nils_tools::{ToolExecutor, ToolRegistry};

use crate::{
    agent::{Agent, RequestOptions},
    events::AgentEvent,
    fatal::RunFatal,
    verifier::Verifier,
};

/// Session lifecycle owner for one task or interactive run.
///
/// The controller owns the root cancellation token and hands child tokens
/// to the inner loop, the tool executor, and every sub-agent.  After any
/// unwind it applies the interrupt-safety invariant: a trailing assistant
/// turn with unanswered tool calls is rolled back before the final save,
/// so the next emitted context is well-formed.  At the task boundary it
/// produces either a result string or a typed fatal, never both.
pub struct RuntimeController {
    config: Arc<RuntimeConfig>,
    provider: Arc<dyn ModelProvider>,
    executor: Arc<ToolExecutor>,
    memory: MemoryManager,
    verifier: Arc<dyn Verifier>,
    options: RequestOptions,
    events: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl RuntimeController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RuntimeConfig>,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        memory: MemoryManager,
        verifier: Arc<dyn Verifier>,
        options: RequestOptions,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        let executor = Arc::new(ToolExecutor::new(
            registry,
            Duration::from_secs(config.tool_timeout_secs),
        ));
        Self {
            config,
            provider,
            executor,
            memory,
            verifier,
            options,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Root token; a keyboard interrupt handler trips it from outside.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    fn agent(&self) -> Agent {
        Agent::new(
            self.provider.clone(),
            self.executor.clone(),
            self.memory.clone(),
            self.config.clone(),
            self.options.clone(),
            self.events.clone(),
            self.cancel.clone(),
        )
    }

    /// Single-task mode: inner loop plus the bounded outer verification
    /// loop.  The final outer iteration returns its result unconditionally;
    /// earlier iterations consult the verifier and, on an incomplete
    /// verdict, inject its reason as corrective feedback and re-enter the
    /// inner loop.
    pub async fn run_verified_task(&self, task: &str) -> Result<String, RunFatal> {
        let agent = self.agent();
        let max_outer = self.config.ralph_loop_max_iterations.max(1);

        for outer in 1..=max_outer {
            let attempt = if outer == 1 {
                agent.run_task(task).await
            } else {
                agent.resume_loop().await
            };
            let text = match attempt {
                Ok(text) => text,
                Err(fatal) => return self.unwind(fatal).await,
            };

            if outer == max_outer {
                info!(outer, "outer loop exhausted, returning result as-is");
                return self.finish(text).await;
            }

            let verdict = self.verifier.verify(task, &text, outer).await;
            let _ = self
                .events
                .send(AgentEvent::VerifierVerdict {
                    iteration: outer,
                    complete: verdict.complete,
                    reason: verdict.reason.clone(),
                })
                .await;
            if verdict.complete {
                return self.finish(text).await;
            }

            info!(outer, reason = %verdict.reason, "verifier judged incomplete, re-running");
            self.memory
                .add_message(
                    Message::user(format!(
                        "The result does not satisfy the task yet: {}. \
                         Address this and produce a complete answer.",
                        verdict.reason
                    )),
                    None,
                )
                .await;
        }
        unreachable!("loop returns within max_outer iterations")
    }

    /// Interactive mode: one inner-loop run, no verification.
    pub async fn run_interactive_turn(&self, input: &str) -> Result<String, RunFatal> {
        match self.agent().run_task(input).await {
            Ok(text) => self.finish(text).await,
            Err(fatal) => self.unwind(fatal).await,
        }
    }

    async fn finish(&self, text: String) -> Result<String, RunFatal> {
        // Persistence failures are non-fatal; the warning is logged inside.
        let _ = self.memory.save().await;
        Ok(text)
    }

    async fn unwind(&self, fatal: RunFatal) -> Result<String, RunFatal> {
        if self.memory.rollback_incomplete_exchange().await {
            info!("rolled back partial tool exchange after unwind");
        }
        let _ = self.memory.save().await;
        Err(fatal)
    }
}
