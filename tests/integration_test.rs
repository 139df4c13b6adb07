// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests wiring the runtime together the way the binary does:
/// config → provider → registry → memory → controller.
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use nils_config::RuntimeConfig;
use nils_core::{
    RequestOptions, RuntimeController, ScriptedVerifier, Verdict,
};
use nils_memory::{MemoryManager, Session, SessionStore, StoreError};
use nils_model::{CompletionResponse, Message, ModelProvider, Role, ScriptedProvider};
use nils_tools::{CalculateTool, ToolRegistry};

fn controller(
    provider: Arc<dyn ModelProvider>,
    verdicts: Vec<Verdict>,
    config: RuntimeConfig,
) -> RuntimeController {
    let config = Arc::new(config);
    let memory = MemoryManager::new(config.clone(), provider.clone(), None);
    let mut registry = ToolRegistry::new();
    registry.register(CalculateTool);
    let (events, _rx) = mpsc::channel(256);
    drop(_rx);
    RuntimeController::new(
        config,
        provider,
        Arc::new(registry),
        memory,
        Arc::new(ScriptedVerifier::new(verdicts)),
        RequestOptions::default(),
        events,
    )
}

// ── Single-task flow (E1 through the controller) ──────────────────────────────

#[tokio::test]
async fn verified_task_with_tool_call_round_trip() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        "call_1",
        "calculate",
        json!({"expression": "123 * 456"}),
        "56088",
    ));
    let c = controller(provider, vec![], RuntimeConfig::default());
    let result = c
        .run_verified_task("Compute 123 * 456 and return only the number.")
        .await
        .unwrap();
    assert_eq!(result, "56088");
}

#[tokio::test]
async fn verifier_rejection_drives_a_second_attempt() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(CompletionResponse::text("I computed something")),
        Ok(CompletionResponse::text("56088")),
    ]));
    let c = controller(
        provider,
        vec![Verdict::incomplete("only the number was asked for")],
        RuntimeConfig::default(),
    );
    let result = c.run_verified_task("return only the number").await.unwrap();
    assert_eq!(result, "56088");
}

// ── Session persistence (E4, properties 3 & 4) ────────────────────────────────

fn session_with_id(prefix_byte_hex: &str, text: &str) -> Session {
    let mut s = Session::new();
    // Force a recognisable UUID prefix, keep the rest random.
    let tail = &s.id.simple().to_string()[8..];
    s.id = Uuid::parse_str(&format!("{prefix_byte_hex}{tail}")).unwrap();
    s.messages.push(Message::user(text));
    s
}

#[test]
fn resume_by_prefix_selects_the_right_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let a = session_with_id("a1b2c3d4", "session a");
    let b = session_with_id("c3d4e5f6", "session b");
    store.save(&a).unwrap();
    store.save(&b).unwrap();

    let found = store.find_by_prefix("a1b2").unwrap();
    assert_eq!(found.id, a.id);
    assert_eq!(found.messages[0].content.as_deref(), Some("session a"));
}

#[test]
fn resume_with_shared_prefix_is_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    store.save(&session_with_id("a1b2c3d4", "one")).unwrap();
    store.save(&session_with_id("a1ffffff", "two")).unwrap();
    assert!(matches!(
        store.find_by_prefix("a1"),
        Err(StoreError::AmbiguousPrefix(_))
    ));
}

#[test]
fn save_load_round_trip_is_lossless_except_updated_at() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let mut s = session_with_id("a1b2c3d4", "hello");
    s.system_messages.push(Message::system("prompt"));
    s.stats.total_input_tokens = 123;
    s.stats.total_output_tokens = 45;
    s.stats.total_cost_usd = 0.5;
    s.stats.compression_count = 2;
    store.save(&s).unwrap();

    let loaded = store.load(s.id).unwrap();
    assert_eq!(loaded.id, s.id);
    assert_eq!(loaded.created_at, s.created_at);
    assert_eq!(loaded.system_messages.len(), 1);
    assert_eq!(loaded.messages.len(), 1);
    assert_eq!(loaded.stats, s.stats);
}

// ── Resume continues the conversation (E4 end-to-end) ─────────────────────────

#[tokio::test]
async fn resumed_session_carries_prior_context_into_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(RuntimeConfig::default());

    // First run: one exchange, saved.
    let provider: Arc<dyn ModelProvider> =
        Arc::new(ScriptedProvider::always_text("noted, it is blue"));
    let memory = MemoryManager::new(
        config.clone(),
        provider.clone(),
        Some(SessionStore::new(dir.path())),
    );
    memory
        .add_message(Message::user("my favourite colour is blue"), None)
        .await;
    memory
        .add_message(Message::assistant("noted, it is blue"), None)
        .await;
    memory.record_usage(30, 10).await;
    memory.save().await.unwrap();
    let id = memory.session_id().await;

    // Second run: resume by prefix and check the provider sees history.
    let store = SessionStore::new(dir.path());
    let session = store.find_by_prefix(&id.to_string()[..8]).unwrap();
    let provider2 = Arc::new(ScriptedProvider::always_text("blue, as you told me"));
    let resumed = MemoryManager::from_session(
        session,
        config.clone(),
        provider2.clone(),
        Some(SessionStore::new(dir.path())),
    );
    // Totals carried over and stay monotonic across the resume boundary.
    assert_eq!(resumed.stats().await.total_input_tokens, 30);

    let registry = Arc::new(ToolRegistry::new());
    let (events, rx) = mpsc::channel(64);
    drop(rx);
    let controller = RuntimeController::new(
        config,
        provider2.clone(),
        registry,
        resumed,
        Arc::new(ScriptedVerifier::new(vec![])),
        RequestOptions::default(),
        events,
    );
    let answer = controller
        .run_interactive_turn("what is my favourite colour?")
        .await
        .unwrap();
    assert_eq!(answer, "blue, as you told me");

    let seen = provider2.last_request.lock().unwrap().clone().unwrap();
    let texts: Vec<&str> = seen
        .messages
        .iter()
        .filter_map(|m| m.content.as_deref())
        .collect();
    assert!(
        texts.iter().any(|t| t.contains("favourite colour is blue")),
        "prior turns must be in the resumed context"
    );
}

// ── Token monotonicity across a session lifetime (property 9) ─────────────────

#[tokio::test]
async fn token_totals_never_decrease() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(CompletionResponse {
            content: Some("one".into()),
            usage: nils_model::Usage {
                input_tokens: 10,
                output_tokens: 2,
            },
            ..Default::default()
        }),
        Ok(CompletionResponse {
            content: Some("two".into()),
            usage: nils_model::Usage {
                input_tokens: 25,
                output_tokens: 3,
            },
            ..Default::default()
        }),
    ]));
    let c = controller(provider, vec![], RuntimeConfig::default());

    c.run_interactive_turn("first").await.unwrap();
    let after_first = c.memory().stats().await;
    c.run_interactive_turn("second").await.unwrap();
    let after_second = c.memory().stats().await;

    assert!(after_first.total_input_tokens <= after_second.total_input_tokens);
    assert!(after_first.total_output_tokens <= after_second.total_output_tokens);
    assert_eq!(after_second.total_input_tokens, 35);
    assert_eq!(after_second.total_output_tokens, 5);
}

// ── Context shape after mixed turns (property 1 at the top level) ─────────────

#[tokio::test]
async fn context_stays_well_formed_across_turns() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(CompletionResponse::tool_call(
            "call_1",
            "calculate",
            json!({"expression": "2 + 2"}),
        )),
        Ok(CompletionResponse::text("4")),
        Ok(CompletionResponse::text("you asked for 2 + 2")),
    ]));
    let c = controller(provider, vec![], RuntimeConfig::default());
    c.run_interactive_turn("add 2 and 2").await.unwrap();
    c.run_interactive_turn("what did I ask?").await.unwrap();

    let context = c.memory().get_context_for_llm().await;
    let mut i = 0;
    while i < context.len() {
        let m = &context[i];
        if m.has_tool_calls() {
            for (k, tc) in m.tool_calls.iter().enumerate() {
                let result = &context[i + 1 + k];
                assert_eq!(result.role, Role::Tool);
                assert_eq!(result.tool_call_id.as_deref(), Some(tc.id.as_str()));
            }
            i += 1 + m.tool_calls.len();
        } else {
            i += 1;
        }
    }
}
