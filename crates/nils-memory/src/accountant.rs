// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use sha2::{Digest, Sha256};

use nils_model::{pricing, Message, ToolSchema};

/// Token and cost bookkeeping for one session.
///
/// Counts are cheap deterministic estimates (4 chars ≈ 1 token) that exist
/// to drive compression and display, not billing-grade accuracy.  The same
/// hash input always yields the same count within a process; no network
/// calls are made.
pub struct TokenAccountant {
    model: String,
    count_cache: HashMap<String, usize>,
    schema_cache: HashMap<String, usize>,
    total_input: u64,
    total_output: u64,
    cost_usd: f64,
}

impl TokenAccountant {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            count_cache: HashMap::new(),
            schema_cache: HashMap::new(),
            total_input: 0,
            total_output: 0,
            cost_usd: 0.0,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Estimated tokens for one message, cached by a content hash over
    /// role + content + tool calls + tool linkage.
    pub fn count(&mut self, message: &Message) -> usize {
        let key = message_key(message);
        if let Some(&tokens) = self.count_cache.get(&key) {
            return tokens;
        }
        let tokens = message.approx_tokens();
        self.count_cache.insert(key, tokens);
        tokens
    }

    /// Overhead of sending the given tool schemas with every request.
    ///
    /// Measured as the size difference between a probe message with and
    /// without the serialized schemas attached; computed once per tool-set
    /// fingerprint.
    pub fn count_tool_schemas(&mut self, schemas: &[ToolSchema]) -> usize {
        if schemas.is_empty() {
            return 0;
        }
        let serialized: String = schemas
            .iter()
            .map(|s| format!("{}{}{}", s.name, s.description, s.parameters))
            .collect();
        let fingerprint = hex_digest(&serialized);
        if let Some(&tokens) = self.schema_cache.get(&fingerprint) {
            return tokens;
        }

        let probe = Message::user("probe");
        let bare = probe.approx_tokens();
        let with_schemas =
            Message::user(format!("probe{serialized}")).approx_tokens();
        let tokens = with_schemas.saturating_sub(bare);
        self.schema_cache.insert(fingerprint, tokens);
        tokens
    }

    /// Accumulate provider-reported usage and its dollar cost.
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64) {
        self.total_input += input_tokens;
        self.total_output += output_tokens;
        self.cost_usd += pricing::cost_usd(&self.model, input_tokens, output_tokens);
    }

    /// Restore totals from persisted stats (resume path).
    pub fn restore(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.total_input = input_tokens;
        self.total_output = output_tokens;
        self.cost_usd = cost_usd;
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost_usd
    }

    /// Clear caches and totals.
    pub fn reset(&mut self) {
        self.count_cache.clear();
        self.schema_cache.clear();
        self.total_input = 0;
        self.total_output = 0;
        self.cost_usd = 0.0;
    }
}

fn message_key(message: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update([message.role as u8]);
    hasher.update(message.content.as_deref().unwrap_or(""));
    for tc in &message.tool_calls {
        hasher.update(&tc.name);
        hasher.update(tc.arguments.to_string());
    }
    hasher.update(message.tool_call_id.as_deref().unwrap_or(""));
    hasher.update(message.tool_name.as_deref().unwrap_or(""));
    hex::encode(hasher.finalize())
}

fn hex_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text);
    hex::encode(hasher.finalize())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn count_matches_message_estimate() {
        let mut a = TokenAccountant::new("mock-model");
        let m = Message::user("12345678");
        assert_eq!(a.count(&m), 2);
    }

    #[test]
    fn count_is_stable_for_identical_content() {
        let mut a = TokenAccountant::new("mock-model");
        let m1 = Message::user("hello world");
        let m2 = Message::user("hello world");
        assert_eq!(a.count(&m1), a.count(&m2));
    }

    #[test]
    fn different_roles_hash_differently() {
        let mut a = TokenAccountant::new("mock-model");
        let user = Message::user("x");
        let assistant = Message::assistant("x");
        a.count(&user);
        a.count(&assistant);
        assert_eq!(a.count_cache.len(), 2, "role must be part of the key");
    }

    #[test]
    fn tool_call_arguments_affect_the_key() {
        let mut a = TokenAccountant::new("mock-model");
        let m1 = Message::assistant_with_calls(
            None,
            vec![nils_model::ToolCallRequest {
                id: "c".into(),
                name: "shell".into(),
                arguments: json!({"command": "ls"}),
            }],
        );
        let m2 = Message::assistant_with_calls(
            None,
            vec![nils_model::ToolCallRequest {
                id: "c".into(),
                name: "shell".into(),
                arguments: json!({"command": "pwd"}),
            }],
        );
        a.count(&m1);
        a.count(&m2);
        assert_eq!(a.count_cache.len(), 2);
    }

    #[test]
    fn schema_overhead_is_positive_and_cached() {
        let mut a = TokenAccountant::new("mock-model");
        let schemas = vec![ToolSchema {
            name: "shell".into(),
            description: "run a command in the shell, capturing output".into(),
            parameters: json!({"type": "object", "properties": {"command": {"type": "string"}}}),
        }];
        let first = a.count_tool_schemas(&schemas);
        assert!(first > 0);
        assert_eq!(a.count_tool_schemas(&schemas), first);
        assert_eq!(a.schema_cache.len(), 1);
    }

    #[test]
    fn empty_schema_set_has_no_overhead() {
        let mut a = TokenAccountant::new("mock-model");
        assert_eq!(a.count_tool_schemas(&[]), 0);
    }

    #[test]
    fn record_accumulates_monotonically() {
        let mut a = TokenAccountant::new("gpt-4o");
        a.record(100, 50);
        a.record(200, 10);
        assert_eq!(a.total_input_tokens(), 300);
        assert_eq!(a.total_output_tokens(), 60);
        assert!(a.total_cost_usd() > 0.0);
    }

    #[test]
    fn mock_model_costs_nothing() {
        let mut a = TokenAccountant::new("mock-model");
        a.record(1_000_000, 1_000_000);
        assert_eq!(a.total_cost_usd(), 0.0);
    }

    #[test]
    fn unknown_model_uses_default_rate() {
        let mut a = TokenAccountant::new("mystery-13b");
        a.record(1_000_000, 0);
        assert!((a.total_cost_usd() - pricing::DEFAULT_RATE.input_per_mtok).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_totals_and_caches() {
        let mut a = TokenAccountant::new("gpt-4o");
        a.count(&Message::user("hello"));
        a.record(10, 10);
        a.reset();
        assert_eq!(a.total_input_tokens(), 0);
        assert_eq!(a.total_output_tokens(), 0);
        assert_eq!(a.total_cost_usd(), 0.0);
        assert!(a.count_cache.is_empty());
    }

    #[test]
    fn restore_sets_totals_for_resume() {
        let mut a = TokenAccountant::new("gpt-4o");
        a.restore(500, 100, 0.25);
        assert_eq!(a.total_input_tokens(), 500);
        assert_eq!(a.total_output_tokens(), 100);
        assert!((a.total_cost_usd() - 0.25).abs() < 1e-12);
    }
}
