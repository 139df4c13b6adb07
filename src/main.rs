// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use nils_config::RuntimeConfig;
use nils_core::{
    system_prompt, AgentEvent, ExploreContextTool, LlmVerifier, ParallelExecuteTool,
    RequestOptions, RuntimeController, SubAgentSpawner,
};
use nils_memory::{MemoryManager, SessionStore, StoreError};
use nils_model::{MockProvider, ModelProvider, OpenAiCompatProvider};
use nils_tools::{CalculateTool, ReadFileTool, ShellTool, ToolRegistry};

const EXIT_OK: i32 = 0;
const EXIT_CANCELLED: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_RUNTIME: i32 = 3;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("warning: could not initialise logging: {e}");
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(RunError::Usage(message)) => {
            eprintln!("error: {message}");
            EXIT_USAGE
        }
        Err(RunError::Fatal(message)) => {
            eprintln!("error: {message}");
            EXIT_RUNTIME
        }
    };
    std::process::exit(code);
}

enum RunError {
    /// Bad invocation (unknown session, ambiguous prefix, broken config).
    Usage(String),
    /// Unrecoverable runtime failure.
    Fatal(String),
}

async fn run(cli: Cli) -> Result<i32, RunError> {
    let mut config = nils_config::load(cli.config.as_deref())
        .map_err(|e| RunError::Usage(format!("{e:#}")))?;
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    let config = Arc::new(config);

    let provider = build_provider(&config);
    let model_name = provider.model_name().to_string();
    let store = SessionStore::default_location();

    let memory = match &cli.resume {
        Some(selector) => {
            let session = resolve_session(&store, selector).map_err(|e| match e {
                StoreError::NotFound(_) | StoreError::AmbiguousPrefix(_) => {
                    RunError::Usage(e.to_string())
                }
                other => RunError::Fatal(other.to_string()),
            })?;
            eprintln!(
                "resuming session {} ({} messages)",
                session.id,
                session.messages.len()
            );
            MemoryManager::from_session(
                session,
                config.clone(),
                provider.clone(),
                Some(SessionStore::default_location()),
            )
        }
        None => MemoryManager::new(config.clone(), provider.clone(), Some(store)),
    };
    memory.set_system_prompt(system_prompt()).await;

    let registry = build_registry(&config, provider.clone(), &memory);
    let verifier = Arc::new(LlmVerifier::new(provider.clone()));
    let (events, events_rx) = mpsc::channel(256);

    let controller = RuntimeController::new(
        config,
        provider,
        registry,
        memory,
        verifier,
        RequestOptions::default(),
        events,
    );

    // A keyboard interrupt trips the root token; everything below the
    // controller unwinds cooperatively.
    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, unwinding...");
            cancel.cancel();
        }
    });

    let headless = cli.is_headless();
    spawn_event_printer(events_rx, cli.verbose || !headless);

    match cli.task {
        Some(task) => run_single_task(&controller, &task).await,
        None => run_interactive(&controller, &model_name).await,
    }
}

async fn run_single_task(controller: &RuntimeController, task: &str) -> Result<i32, RunError> {
    match controller.run_verified_task(task).await {
        Ok(result) => {
            println!("{result}");
            Ok(EXIT_OK)
        }
        Err(fatal) if fatal.is_cancelled() => Ok(EXIT_CANCELLED),
        Err(fatal) => Err(RunError::Fatal(fatal.to_string())),
    }
}

// ── Interactive mode ──────────────────────────────────────────────────────────

const HELP: &str = "\
Slash commands:
  /help            show this help
  /clear           drop the conversation (keeps the session id)
  /stats           token, cost, and compression statistics
  /resume [id]     switch to a saved session (prefix or latest)
  /model           show the active model
  /compact         force a compression pass
  /exit            quit
Multi-line input: end a line with \\ to continue on the next one.";

async fn run_interactive(
    controller: &RuntimeController,
    model_name: &str,
) -> Result<i32, RunError> {
    let mut editor = rustyline::DefaultEditor::new()
        .map_err(|e| RunError::Fatal(format!("cannot open terminal: {e}")))?;
    eprintln!("nils interactive mode — /help for commands, /exit to quit");

    loop {
        let line = match read_input(&mut editor) {
            InputOutcome::Line(line) => line,
            InputOutcome::Interrupted => continue,
            InputOutcome::Eof => return Ok(EXIT_OK),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            match handle_slash_command(controller, model_name, command).await {
                SlashOutcome::Continue => continue,
                SlashOutcome::Exit => return Ok(EXIT_OK),
            }
        }

        match controller.run_interactive_turn(input).await {
            Ok(result) => println!("{result}"),
            Err(fatal) if fatal.is_cancelled() => return Ok(EXIT_CANCELLED),
            Err(fatal) => return Err(RunError::Fatal(fatal.to_string())),
        }
    }
}

enum InputOutcome {
    Line(String),
    Interrupted,
    Eof,
}

/// Read one logical input; a trailing backslash continues on the next line.
fn read_input(editor: &mut rustyline::DefaultEditor) -> InputOutcome {
    let mut buffer = String::new();
    let mut prompt = "nils> ";
    loop {
        match editor.readline(prompt) {
            Ok(line) => {
                if let Some(stripped) = line.strip_suffix('\\') {
                    buffer.push_str(stripped);
                    buffer.push('\n');
                    prompt = "...> ";
                    continue;
                }
                buffer.push_str(&line);
                let _ = editor.add_history_entry(&buffer);
                return InputOutcome::Line(buffer);
            }
            Err(rustyline::error::ReadlineError::Interrupted) => return InputOutcome::Interrupted,
            Err(_) => return InputOutcome::Eof,
        }
    }
}

enum SlashOutcome {
    Continue,
    Exit,
}

async fn handle_slash_command(
    controller: &RuntimeController,
    model_name: &str,
    command: &str,
) -> SlashOutcome {
    let (name, arg) = match command.split_once(' ') {
        Some((n, a)) => (n, Some(a.trim())),
        None => (command, None),
    };
    match name {
        "help" => eprintln!("{HELP}"),
        "clear" => {
            controller.memory().clear().await;
            eprintln!("conversation cleared");
        }
        "stats" => {
            let stats = controller.memory().stats().await;
            eprintln!(
                "messages: {} | context tokens: {} | input: {} | output: {} | \
                 cost: ${:.4} | compressions: {} (saved {} tokens)",
                stats.buffered_messages,
                stats.context_tokens,
                stats.total_input_tokens,
                stats.total_output_tokens,
                stats.total_cost_usd,
                stats.compression_count,
                stats.compression_savings_tokens,
            );
        }
        "resume" => {
            let selector = arg.filter(|a| !a.is_empty()).unwrap_or("latest");
            match resolve_session(&SessionStore::default_location(), selector) {
                Ok(session) => {
                    eprintln!(
                        "resumed session {} ({} messages)",
                        session.id,
                        session.messages.len()
                    );
                    controller.memory().adopt_session(session).await;
                }
                Err(e) => eprintln!("cannot resume: {e}"),
            }
        }
        "model" => {
            eprintln!("active model: {model_name} (use --model to change for the next run)");
        }
        "compact" => {
            controller.memory().force_compress().await;
            let stats = controller.memory().stats().await;
            eprintln!(
                "compacted: {} messages buffered, {} compressions total",
                stats.buffered_messages, stats.compression_count
            );
        }
        "exit" | "quit" => return SlashOutcome::Exit,
        other => eprintln!("unknown command: /{other} (try /help)"),
    }
    SlashOutcome::Continue
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn build_provider(config: &RuntimeConfig) -> Arc<dyn ModelProvider> {
    if config.model.starts_with("mock") {
        return Arc::new(MockProvider);
    }
    let api_key = std::env::var(&config.api_key_env).ok();
    if api_key.is_none() {
        // Local OpenAI-compatible servers accept keyless requests; hosted
        // providers will reject them with a clear 401.
        tracing::warn!(env = %config.api_key_env, "API key variable not set");
    }
    Arc::new(OpenAiCompatProvider::new(
        &config.base_url,
        api_key,
        config.model.clone(),
    ))
}

fn build_registry(
    config: &Arc<RuntimeConfig>,
    provider: Arc<dyn ModelProvider>,
    memory: &MemoryManager,
) -> Arc<ToolRegistry> {
    let mut base = ToolRegistry::new();
    base.register(CalculateTool);
    base.register(ReadFileTool);
    base.register(ShellTool {
        timeout_secs: config.tool_timeout_secs,
    });
    let base = Arc::new(base);

    let spawner = SubAgentSpawner::new(provider, base.clone(), config.clone());
    let mut full = ToolRegistry::new();
    for name in base.names() {
        if let Some(tool) = base.get(&name) {
            full.register_arc(tool);
        }
    }
    full.register(ExploreContextTool::new(spawner.clone(), memory.clone()));
    full.register(ParallelExecuteTool::new(spawner, memory.clone()));
    Arc::new(full)
}

fn resolve_session(
    store: &SessionStore,
    selector: &str,
) -> Result<nils_memory::Session, StoreError> {
    if selector == "latest" {
        store.latest()
    } else {
        store.find_by_prefix(selector)
    }
}

/// Print tool progress to stderr.  `chatty` is on for interactive runs and
/// verbose headless runs; otherwise events are drained silently.
fn spawn_event_printer(mut rx: mpsc::Receiver<AgentEvent>, chatty: bool) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !chatty {
                continue;
            }
            match event {
                AgentEvent::ToolCallStarted(call) => {
                    eprintln!("→ {} {}", call.name, call.args);
                }
                AgentEvent::ToolCallFinished { tool_name, ok, .. } => {
                    eprintln!("← {tool_name} {}", if ok { "ok" } else { "error" });
                }
                AgentEvent::VerifierVerdict {
                    iteration,
                    complete,
                    reason,
                } => {
                    if complete {
                        eprintln!("✓ verifier accepted the result (round {iteration})");
                    } else {
                        eprintln!("↻ verifier: {reason} (round {iteration})");
                    }
                }
                _ => {}
            }
        }
    });
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    if verbose {
        let dir = nils_config::logs_dir();
        std::fs::create_dir_all(&dir).context("creating log directory")?;
        let path = dir.join(format!(
            "nils-{}.log",
            chrono::Local::now().format("%Y-%m-%d_%H%M%S")
        ));
        let file = std::fs::File::create(&path).context("creating log file")?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
        eprintln!("verbose logs: {}", path.display());
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
