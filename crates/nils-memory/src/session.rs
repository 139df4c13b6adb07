// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use nils_model::Message;
use uuid::Uuid;

/// Denormalized per-session counters.  Token totals only ever grow;
/// `compression_count` tracks how many times the prefix was rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub compression_count: u32,
}

/// The single synthetic assistant summary standing in for compressed-away
/// history.  A new compression rewrites it, using the previous summary as
/// input, so a session never holds more than one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedSummary {
    pub summary_text: String,
    pub original_message_count: usize,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    #[serde(default)]
    pub strategy: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CompressedSummary {
    /// Render as the assistant message injected between the system messages
    /// and the buffered tail.
    pub fn as_message(&self) -> Message {
        Message::assistant(format!(
            "[Conversation summary — {} earlier messages]\n{}",
            self.original_message_count, self.summary_text
        ))
    }

    /// Tokens saved by this compression.
    pub fn savings(&self) -> usize {
        self.original_tokens.saturating_sub(self.compressed_tokens)
    }
}

/// Persisted state of one run.  This is the storage shape; live message
/// ownership is in the memory manager, which snapshots into a `Session`
/// on save and is reconstructed from one on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub system_messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<CompressedSummary>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stats: SessionStats,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
            system_messages: Vec::new(),
            summary: None,
            messages: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Storage directory name: `YYYY-MM-DD_<uuid[:8]>`.
    pub fn dir_name(&self) -> String {
        format!(
            "{}_{}",
            self.created_at.format("%Y-%m-%d"),
            &self.id.simple().to_string()[..8]
        )
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
