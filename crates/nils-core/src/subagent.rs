// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent spawning: bounded child loops exposed to the model as the
//! `explore_context` and `parallel_execute` tools.
//!
//! Children share the parent's model provider and base tool set but never
//! its buffer: context inheritance is by snapshot.  Depth is capped at
//! [`MAX_DEPTH`] and live children at a global semaphore; both caps fail
//! fast with an `Error:` text before any work starts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use nils_config::RuntimeConfig;
use nils_memory::{MemoryManager, Session};
use nils_model::{Message, ModelProvider, Role};
use nils_tools::{SideEffect, Tool, ToolExecutor, ToolRegistry};

use crate::{
    agent::{Agent, RequestOptions},
    prompts::sub_agent_prompt,
};

/// Root agent is depth 0; a spawn at depth `MAX_DEPTH` is refused.
pub const MAX_DEPTH: usize = 2;

/// Concurrency cap for one `explore_context` call.
const EXPLORE_CONCURRENCY: usize = 3;

/// Ceiling on one child's final answer; the parent context is the scarce
/// resource the children exist to protect.
const CHILD_OUTPUT_CEILING_CHARS: usize = 8_000;

/// Default iteration cap for a child loop, far below the root's.
const CHILD_MAX_ITERATIONS: u32 = 25;

/// Factory for bounded child loops.  One spawner instance exists per
/// nesting level; `at_depth` derives the next level sharing the same
/// provider, base registry, and live-children semaphore.
pub struct SubAgentSpawner {
    provider: Arc<dyn ModelProvider>,
    /// Host tools only; the sub-agent tools are layered on per child.
    base_registry: Arc<ToolRegistry>,
    config: Arc<RuntimeConfig>,
    live: Arc<Semaphore>,
    depth: usize,
}

impl SubAgentSpawner {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        base_registry: Arc<ToolRegistry>,
        config: Arc<RuntimeConfig>,
    ) -> Arc<Self> {
        let live = Arc::new(Semaphore::new(config.subagent_max_live));
        Arc::new(Self {
            provider,
            base_registry,
            config,
            live,
            depth: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn at_depth(self: &Arc<Self>, depth: usize) -> Arc<Self> {
        Arc::new(Self {
            provider: self.provider.clone(),
            base_registry: self.base_registry.clone(),
            config: self.config.clone(),
            live: self.live.clone(),
            depth,
        })
    }

    /// `Err` when a spawn from this level would exceed the depth cap.
    fn check_depth(&self) -> Result<(), String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!(
                "Error: maximum sub-agent depth ({MAX_DEPTH}) reached (max_depth)"
            ));
        }
        Ok(())
    }

    /// Run one child loop to completion and return its final answer.
    ///
    /// The child gets a fresh memory seeded from `snapshot` (when context
    /// inheritance was requested), the given registry plus a nested
    /// `explore_context` when the depth cap still allows one, and a child
    /// cancellation token.  Errors come back as `Err(text)` so the caller
    /// can report partial failures alongside successes.
    #[allow(clippy::too_many_arguments)]
    async fn run_child(
        self: &Arc<Self>,
        task: &str,
        role_hint: Option<&str>,
        read_only: bool,
        registry: ToolRegistry,
        explore_filter: Option<HashSet<String>>,
        snapshot: Option<Vec<Message>>,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        // The live cap is checked before any work; a saturated pool is an
        // immediate, reportable failure rather than a queue.
        let Ok(_permit) = self.live.try_acquire() else {
            return Err(format!(
                "Error: maximum live sub-agents ({}) reached (max_agents)",
                self.config.subagent_max_live
            ));
        };
        debug!(depth = self.depth + 1, task, "spawning sub-agent");

        let mut child_config = (*self.config).clone();
        child_config.max_iterations = max_iterations;
        let child_config = Arc::new(child_config);

        let memory = match snapshot {
            Some(messages) => {
                let mut seed = Session::new();
                seed.messages = messages
                    .into_iter()
                    .filter(|m| m.role != Role::System)
                    .collect();
                MemoryManager::from_session(seed, child_config.clone(), self.provider.clone(), None)
            }
            None => MemoryManager::new(child_config.clone(), self.provider.clone(), None),
        };
        memory
            .set_system_prompt(sub_agent_prompt(role_hint, read_only))
            .await;

        let mut registry = registry;
        let child_depth = self.depth + 1;
        if child_depth < MAX_DEPTH {
            registry.register(ExploreContextTool::with_filter(
                self.at_depth(child_depth),
                memory.clone(),
                explore_filter,
            ));
        }

        let executor = Arc::new(ToolExecutor::new(
            Arc::new(registry),
            Duration::from_secs(self.config.tool_timeout_secs),
        ));
        // Child events have no subscriber; dropping the receiver up front
        // makes every send fail fast instead of filling the channel.
        let (events, rx) = mpsc::channel(64);
        drop(rx);
        let agent = Agent::new(
            self.provider.clone(),
            executor,
            memory,
            child_config,
            RequestOptions::default(),
            events,
            cancel.child_token(),
        );

        match agent.run_task(task).await {
            Ok(text) => Ok(clip_child_output(text)),
            Err(fatal) => Err(format!("Error: sub-agent failed: {fatal}")),
        }
    }

    /// Tool set for an `explore_context` child: the read-only subset of
    /// the base tools, further narrowed by the model's filter.
    fn read_only_registry(&self, filter: Option<&HashSet<String>>) -> ToolRegistry {
        let mut allowed = self.base_registry.read_only_names();
        if let Some(f) = filter {
            allowed.retain(|name| f.contains(name));
        }
        self.base_registry.filtered(&allowed)
    }

    /// Tool set for a `parallel_execute` child: everything except
    /// `parallel_execute` itself (no recursion).
    fn full_registry(&self) -> ToolRegistry {
        let all: HashSet<String> = self.base_registry.names().into_iter().collect();
        self.base_registry.filtered(&all)
    }
}

fn clip_child_output(text: String) -> String {
    if text.len() <= CHILD_OUTPUT_CEILING_CHARS {
        return text;
    }
    let cut = text[..CHILD_OUTPUT_CEILING_CHARS]
        .rfind('\n')
        .unwrap_or(CHILD_OUTPUT_CEILING_CHARS);
    format!(
        "{}\n[... {} bytes of sub-agent output omitted ...]",
        &text[..cut],
        text.len() - cut
    )
}

/// Wave concurrency cap shared by both tools.
fn wave_permits(config: &RuntimeConfig) -> usize {
    EXPLORE_CONCURRENCY.min(config.subagent_max_concurrent).max(1)
}

// ─── explore_context ──────────────────────────────────────────────────────────

/// Runs up to three read-only exploration tasks in parallel and returns
/// their labeled results.
pub struct ExploreContextTool {
    spawner: Arc<SubAgentSpawner>,
    parent_memory: MemoryManager,
    /// Filter inherited from the spawning level; nested explorations can
    /// narrow the tool set further but never widen it.
    inherited_filter: Option<HashSet<String>>,
}

impl ExploreContextTool {
    pub fn new(spawner: Arc<SubAgentSpawner>, parent_memory: MemoryManager) -> Self {
        Self {
            spawner,
            parent_memory,
            inherited_filter: None,
        }
    }

    fn with_filter(
        spawner: Arc<SubAgentSpawner>,
        parent_memory: MemoryManager,
        inherited_filter: Option<HashSet<String>>,
    ) -> Self {
        Self {
            spawner,
            parent_memory,
            inherited_filter,
        }
    }
}

#[async_trait]
impl Tool for ExploreContextTool {
    fn name(&self) -> &str {
        "explore_context"
    }

    fn description(&self) -> &str {
        "Run up to 3 read-only exploration tasks in parallel, each handled \
         by an independent sub-agent. Use this to gather context (search, \
         read, summarize) without growing your own conversation. Returns one \
         labeled result block per task; failed tasks are reported alongside \
         successful ones."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Independent exploration tasks, run concurrently (max 3 at a time)"
                },
                "tool_filter": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict children to these read-only tools (optional)"
                },
                "include_context": {
                    "type": "boolean",
                    "description": "Give children a snapshot of the current conversation (default false)"
                }
            },
            "required": ["tasks"],
            "additionalProperties": false
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::SpawnsSubAgent
    }

    async fn execute(&self, args: Value, cancel: CancellationToken) -> anyhow::Result<String> {
        let tasks: Vec<String> = args["tasks"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if tasks.is_empty() {
            return Ok("Error: 'tasks' must contain at least one task".into());
        }
        if let Err(text) = self.spawner.check_depth() {
            return Ok(text);
        }

        let mut filter: Option<HashSet<String>> = args["tool_filter"].as_array().map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        });
        // Intersect with the filter this level was itself spawned under.
        if let Some(inherited) = &self.inherited_filter {
            filter = Some(match filter {
                Some(f) => f.intersection(inherited).cloned().collect(),
                None => inherited.clone(),
            });
        }

        let snapshot = if args["include_context"].as_bool().unwrap_or(false) {
            Some(self.parent_memory.get_context_for_llm().await)
        } else {
            None
        };

        let wave = Arc::new(Semaphore::new(wave_permits(&self.spawner.config)));
        let futures = tasks.iter().map(|task| {
            let spawner = self.spawner.clone();
            let registry = spawner.read_only_registry(filter.as_ref());
            let filter = filter.clone();
            let snapshot = snapshot.clone();
            let wave = wave.clone();
            let cancel = cancel.clone();
            async move {
                let _permit = wave.acquire().await;
                spawner
                    .run_child(
                        task,
                        None,
                        true,
                        registry,
                        filter,
                        snapshot,
                        CHILD_MAX_ITERATIONS,
                        &cancel,
                    )
                    .await
            }
        });
        let results = join_all(futures).await;

        let mut blocks = Vec::with_capacity(tasks.len());
        for (i, (task, result)) in tasks.iter().zip(results).enumerate() {
            let block = match result {
                Ok(text) => format!("### Task {} (ok): {task}\n{text}", i + 1),
                Err(text) => format!("### Task {} (error): {task}\n{text}", i + 1),
            };
            blocks.push(block);
        }
        Ok(blocks.join("\n\n"))
    }
}

// ─── parallel_execute ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DagTask {
    id: String,
    task: String,
    role: Option<String>,
    depends_on: Vec<String>,
}

#[derive(Debug, Clone)]
enum DagOutcome {
    Ok(String),
    Error(String),
    Skipped,
}

/// Runs a DAG of subtasks in topological waves, each wave's tasks
/// concurrently.  Children get the full tool set minus `parallel_execute`.
pub struct ParallelExecuteTool {
    spawner: Arc<SubAgentSpawner>,
    parent_memory: MemoryManager,
}

impl ParallelExecuteTool {
    pub fn new(spawner: Arc<SubAgentSpawner>, parent_memory: MemoryManager) -> Self {
        Self {
            spawner,
            parent_memory,
        }
    }
}

#[async_trait]
impl Tool for ParallelExecuteTool {
    fn name(&self) -> &str {
        "parallel_execute"
    }

    fn description(&self) -> &str {
        "Execute a set of subtasks with explicit dependencies. Independent \
         subtasks run concurrently; a subtask starts only after all of its \
         dependencies succeeded, and is skipped when any dependency failed. \
         Returns one labeled block per subtask with its status."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "Subtasks forming a dependency DAG",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "description": "Unique subtask id" },
                            "task": { "type": "string", "description": "What the subtask should do" },
                            "role": { "type": "string", "description": "Optional role hint for the sub-agent" },
                            "depends_on": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Ids of subtasks that must succeed first"
                            }
                        },
                        "required": ["id", "task"]
                    }
                },
                "include_context": {
                    "type": "boolean",
                    "description": "Give children a snapshot of the current conversation (default false)"
                }
            },
            "required": ["tasks"],
            "additionalProperties": false
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::SpawnsSubAgent
    }

    async fn execute(&self, args: Value, cancel: CancellationToken) -> anyhow::Result<String> {
        let tasks = match parse_dag(&args) {
            Ok(t) => t,
            Err(text) => return Ok(text),
        };
        if let Err(text) = self.spawner.check_depth() {
            return Ok(text);
        }
        // Cycle detection runs before any task starts.
        if let Err(cycle) = check_acyclic(&tasks) {
            return Ok(format!(
                "Error: dependency cycle involving tasks: {} (dependency_cycle)",
                cycle.join(", ")
            ));
        }

        let snapshot = if args["include_context"].as_bool().unwrap_or(false) {
            Some(self.parent_memory.get_context_for_llm().await)
        } else {
            None
        };

        let mut outcomes: HashMap<String, DagOutcome> = HashMap::new();
        let wave_cap = wave_permits(&self.spawner.config);

        // Topological waves: run every task whose dependencies all
        // succeeded; skip tasks with a failed or skipped dependency; repeat
        // until nothing is pending.
        loop {
            let mut ready: Vec<&DagTask> = Vec::new();
            let mut made_progress = false;
            for t in &tasks {
                if outcomes.contains_key(&t.id) {
                    continue;
                }
                let dep_states: Vec<Option<&DagOutcome>> =
                    t.depends_on.iter().map(|d| outcomes.get(d)).collect();
                if dep_states
                    .iter()
                    .any(|s| matches!(s, Some(DagOutcome::Error(_)) | Some(DagOutcome::Skipped)))
                {
                    outcomes.insert(t.id.clone(), DagOutcome::Skipped);
                    made_progress = true;
                } else if dep_states.iter().all(|s| matches!(s, Some(DagOutcome::Ok(_)))) {
                    ready.push(t);
                }
            }
            if ready.is_empty() {
                if made_progress {
                    continue;
                }
                break;
            }

            let wave = Arc::new(Semaphore::new(wave_cap));
            let futures = ready.iter().map(|t| {
                let spawner = self.spawner.clone();
                let registry = spawner.full_registry();
                let snapshot = snapshot.clone();
                let wave = wave.clone();
                let cancel = cancel.clone();
                async move {
                    let _permit = wave.acquire().await;
                    let result = spawner
                        .run_child(
                            &t.task,
                            t.role.as_deref(),
                            false,
                            registry,
                            None,
                            snapshot,
                            CHILD_MAX_ITERATIONS,
                            &cancel,
                        )
                        .await;
                    (t.id.clone(), result)
                }
            });
            // Wave barrier: the next wave starts only when every task of
            // this one has finished.
            for (id, result) in join_all(futures).await {
                let outcome = match result {
                    // A child that answers with an `Error:` text failed its
                    // subtask even though the loop itself survived.
                    Ok(text) if text.starts_with("Error:") => DagOutcome::Error(text),
                    Ok(text) => DagOutcome::Ok(text),
                    Err(text) => DagOutcome::Error(text),
                };
                outcomes.insert(id, outcome);
            }
        }

        // Report in declared order, successes and failures alike.
        let blocks: Vec<String> = tasks
            .iter()
            .map(|t| match outcomes.get(&t.id) {
                Some(DagOutcome::Ok(text)) => format!("### {} (ok)\n{text}", t.id),
                Some(DagOutcome::Error(text)) => format!("### {} (error)\n{text}", t.id),
                Some(DagOutcome::Skipped) | None => {
                    format!("### {} (skipped)\ndependency did not succeed", t.id)
                }
            })
            .collect();
        Ok(blocks.join("\n\n"))
    }
}

fn parse_dag(args: &Value) -> Result<Vec<DagTask>, String> {
    let Some(raw) = args["tasks"].as_array() else {
        return Err("Error: 'tasks' must be an array of subtasks".into());
    };
    if raw.is_empty() {
        return Err("Error: 'tasks' must contain at least one subtask".into());
    }
    let mut tasks = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();
    for item in raw {
        let id = item["id"].as_str().unwrap_or("").to_string();
        let task = item["task"].as_str().unwrap_or("").to_string();
        if id.is_empty() || task.is_empty() {
            return Err("Error: every subtask needs a non-empty 'id' and 'task'".into());
        }
        if !seen.insert(id.clone()) {
            return Err(format!("Error: duplicate subtask id '{id}'"));
        }
        let depends_on: Vec<String> = item["depends_on"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        tasks.push(DagTask {
            id,
            task,
            role: item["role"].as_str().map(str::to_string),
            depends_on,
        });
    }
    for t in &tasks {
        for dep in &t.depends_on {
            if !tasks.iter().any(|o| &o.id == dep) {
                return Err(format!(
                    "Error: subtask '{}' depends on unknown id '{dep}'",
                    t.id
                ));
            }
        }
    }
    Ok(tasks)
}

/// Kahn's algorithm; `Err` carries the ids participating in a cycle,
/// sorted for a stable message.
fn check_acyclic(tasks: &[DagTask]) -> Result<(), Vec<String>> {
    let mut indegree: HashMap<&str, usize> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.len()))
        .collect();
    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut processed = 0;
    while let Some(id) = queue.pop() {
        processed += 1;
        for t in tasks {
            if t.depends_on.iter().any(|d| d == id) {
                let d = indegree.get_mut(t.id.as_str()).expect("known id");
                *d -= 1;
                if *d == 0 {
                    queue.push(&t.id);
                }
            }
        }
    }
    if processed == tasks.len() {
        return Ok(());
    }
    let mut cycle: Vec<String> = indegree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(id, _)| id.to_string())
        .collect();
    cycle.sort();
    Err(cycle)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
