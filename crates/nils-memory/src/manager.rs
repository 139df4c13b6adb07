// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use nils_config::RuntimeConfig;
use nils_model::{Message, ModelProvider, Role, ToolSchema};

use crate::{
    accountant::TokenAccountant,
    buffer::ShortTermBuffer,
    compressor::Compressor,
    session::{CompressedSummary, Session, SessionStats},
    store::{SessionStore, StoreError},
};

/// Point-in-time memory statistics for display and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStats {
    pub buffered_messages: usize,
    pub context_tokens: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub compression_count: u32,
    pub compression_savings_tokens: usize,
}

struct MemoryInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
    system_messages: Vec<Message>,
    summary: Option<CompressedSummary>,
    buffer: ShortTermBuffer,
    accountant: TokenAccountant,
    schema_overhead: usize,
    stats: SessionStats,
    compression_savings: usize,
}

impl MemoryInner {
    /// Tokens the next request would carry: system messages, summary,
    /// buffered turns, and the tool-schema overhead.
    fn context_tokens(&self) -> usize {
        let system: usize = self.system_messages.iter().map(message_tokens).sum();
        let summary = self.summary.as_ref().map(|s| s.compressed_tokens).unwrap_or(0);
        let buffered: usize = self.buffer.all().iter().map(message_tokens).sum();
        system + summary + buffered + self.schema_overhead
    }
}

fn message_tokens(m: &Message) -> usize {
    m.token_count.unwrap_or_else(|| m.approx_tokens())
}

/// Owner of all conversation state for one session.
///
/// The only mutation entry points are `add_message`, `record_usage`,
/// `set_tool_schemas`, and the rollback/clear operations; all of them
/// serialize on one write-lock, so sub-agents publishing into the same
/// session cannot interleave.  Reads (`get_context_for_llm`, `stats`) take
/// the same lock and observe consistent state.
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<Mutex<MemoryInner>>,
    compressor: Arc<Compressor>,
    store: Option<Arc<SessionStore>>,
    config: Arc<RuntimeConfig>,
}

impl MemoryManager {
    pub fn new(
        config: Arc<RuntimeConfig>,
        provider: Arc<dyn ModelProvider>,
        store: Option<SessionStore>,
    ) -> Self {
        let inner = MemoryInner {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
            system_messages: Vec::new(),
            summary: None,
            buffer: ShortTermBuffer::new(
                config.memory_short_term_size,
                config.effective_min_size(),
            ),
            accountant: TokenAccountant::new(provider.model_name()),
            schema_overhead: 0,
            stats: SessionStats::default(),
            compression_savings: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            compressor: Arc::new(Compressor::new(provider, config.compression_strategy)),
            store: store.map(Arc::new),
            config,
        }
    }

    /// Rebuild a manager from a persisted session.
    ///
    /// Totals resume from the stored stats, and any partial tool exchange
    /// left by an interrupted run is rolled back so the first emitted
    /// context is well-formed.
    pub fn from_session(
        session: Session,
        config: Arc<RuntimeConfig>,
        provider: Arc<dyn ModelProvider>,
        store: Option<SessionStore>,
    ) -> Self {
        let manager = Self::new(config, provider, store);
        {
            let mut inner = manager.inner.try_lock().expect("fresh manager is uncontended");
            install_session(&mut inner, session);
        }
        manager
    }

    pub async fn session_id(&self) -> Uuid {
        self.inner.lock().await.id
    }

    /// Swap the live state for a persisted session (`/resume` mid-run).
    ///
    /// Every clone of this manager shares the swapped state, so the loop
    /// and the sub-agent tools all continue on the adopted session.  An
    /// interrupted trailing exchange is rolled back exactly as on
    /// construction from a session.
    pub async fn adopt_session(&self, session: Session) {
        let mut inner = self.inner.lock().await;
        install_session(&mut inner, session);
    }

    pub async fn set_system_prompt(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.system_messages = vec![Message::system(text)];
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.metadata.insert(key.into(), value.into());
    }

    /// Append one message.
    ///
    /// `actual_tokens` overrides the estimate when the provider reported a
    /// real count for this turn.  When the running context total exceeds
    /// the compression threshold and the buffer is over its window, the
    /// older prefix is compressed; a compression failure keeps the
    /// originals and only logs a warning — the append itself always
    /// succeeds.
    pub async fn add_message(&self, message: Message, actual_tokens: Option<usize>) {
        let mut inner = self.inner.lock().await;
        let mut message = message;
        let tokens = actual_tokens.unwrap_or_else(|| inner.accountant.count(&message));
        message.token_count = Some(tokens);
        inner.buffer.append(message);

        if !self.config.memory_enabled {
            return;
        }
        if inner.context_tokens() > self.config.memory_compression_threshold
            && inner.buffer.count() > self.config.memory_short_term_size
        {
            self.compress_locked(&mut inner, None).await;
        }
    }

    /// Force a compression pass regardless of thresholds (`/compact`).
    /// Retains only the minimum floor of recent messages.
    pub async fn force_compress(&self) {
        let mut inner = self.inner.lock().await;
        let keep = self.config.effective_min_size();
        self.compress_locked(&mut inner, Some(keep)).await;
    }

    /// Compress the older prefix, retaining a tail of
    /// `clamp(round(len × ratio), effective_min, short_term_size)` messages
    /// (or `keep_override`).  The split never severs an assistant-turn /
    /// tool-result pair: it moves backward until the first retained message
    /// starts a clean exchange.
    async fn compress_locked(&self, inner: &mut MemoryInner, keep_override: Option<usize>) {
        let len = inner.buffer.count();
        let keep = keep_override.unwrap_or_else(|| {
            let target = (len as f64 * self.config.memory_compression_ratio).round() as usize;
            target.clamp(
                self.config.effective_min_size(),
                self.config.memory_short_term_size,
            )
        });
        let mut n = len.saturating_sub(keep);
        while n > 0 {
            let splits_pair = inner
                .buffer
                .all()
                .get(n)
                .map(|m| m.role == Role::Tool)
                .unwrap_or(false)
                || inner.buffer.all()[n - 1].has_tool_calls();
            if !splits_pair {
                break;
            }
            n -= 1;
        }
        if n == 0 {
            return;
        }

        let drained = inner.buffer.drain_prefix(n);
        if drained.is_empty() {
            return;
        }
        match self.compressor.compress(&drained, inner.summary.as_ref()).await {
            Ok(summary) => {
                inner.compression_savings += summary.savings();
                inner.stats.compression_count += 1;
                inner.summary = Some(summary);
            }
            Err(e) => {
                warn!(error = %e, "compression failed, keeping original messages");
                inner.buffer.restore_prefix(drained);
            }
        }
    }

    /// The ordered context for the next model call: system messages, the
    /// summary as a synthetic assistant turn, then the buffered tail.
    ///
    /// The returned sequence always ends at an assistant turn without
    /// pending tool calls or at a complete tool exchange; a trailing
    /// partial exchange is excluded from the view.
    pub async fn get_context_for_llm(&self) -> Vec<Message> {
        let inner = self.inner.lock().await;
        let mut context = inner.system_messages.clone();
        if let Some(summary) = &inner.summary {
            context.push(summary.as_message());
        }
        context.extend_from_slice(inner.buffer.all());
        trim_incomplete_tail(&mut context);
        context
    }

    /// Destructively remove a trailing assistant turn whose tool calls are
    /// not fully answered, together with its partial tool turns.  Returns
    /// `true` when something was rolled back.
    pub async fn rollback_incomplete_exchange(&self) -> bool {
        let mut inner = self.inner.lock().await;
        rollback_tail(&mut inner.buffer)
    }

    /// Record the tool schemas sent with every request so context totals
    /// include their overhead.
    pub async fn set_tool_schemas(&self, schemas: &[ToolSchema]) {
        let mut inner = self.inner.lock().await;
        inner.schema_overhead = inner.accountant.count_tool_schemas(schemas);
    }

    /// Accumulate provider-reported usage into the session totals.
    pub async fn record_usage(&self, input_tokens: u64, output_tokens: u64) {
        let mut inner = self.inner.lock().await;
        inner.accountant.record(input_tokens, output_tokens);
        inner.stats.total_input_tokens = inner.accountant.total_input_tokens();
        inner.stats.total_output_tokens = inner.accountant.total_output_tokens();
        inner.stats.total_cost_usd = inner.accountant.total_cost_usd();
    }

    /// Persist a snapshot through the session store.  Failures are
    /// non-fatal for the in-memory run: they are logged and returned, and
    /// the caller keeps going.
    pub async fn save(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        if let Err(e) = store.save(&snapshot) {
            warn!(error = %e, "session save failed, continuing in memory");
            return Err(e);
        }
        Ok(())
    }

    /// Current state as a persistable session.
    pub async fn snapshot(&self) -> Session {
        let inner = self.inner.lock().await;
        Session {
            id: inner.id,
            created_at: inner.created_at,
            updated_at: Utc::now(),
            metadata: inner.metadata.clone(),
            system_messages: inner.system_messages.clone(),
            summary: inner.summary.clone(),
            messages: inner.buffer.all().to_vec(),
            stats: inner.stats.clone(),
        }
    }

    pub async fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock().await;
        MemoryStats {
            buffered_messages: inner.buffer.count(),
            context_tokens: inner.context_tokens(),
            total_input_tokens: inner.stats.total_input_tokens,
            total_output_tokens: inner.stats.total_output_tokens,
            total_cost_usd: inner.stats.total_cost_usd,
            compression_count: inner.stats.compression_count,
            compression_savings_tokens: inner.compression_savings,
        }
    }

    /// Drop the conversation (buffer and summary) but keep the session
    /// identity and its monotonic token totals.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.buffer.clear();
        inner.summary = None;
    }
}

/// Replace the live state with a persisted session, restoring totals and
/// rolling back any interrupted trailing exchange.
fn install_session(inner: &mut MemoryInner, session: Session) {
    inner.id = session.id;
    inner.created_at = session.created_at;
    inner.metadata = session.metadata;
    inner.system_messages = session.system_messages;
    inner.summary = session.summary;
    inner.buffer.replace(session.messages);
    inner.accountant.restore(
        session.stats.total_input_tokens,
        session.stats.total_output_tokens,
        session.stats.total_cost_usd,
    );
    inner.stats = session.stats;
    inner.compression_savings = 0;
    rollback_tail(&mut inner.buffer);
}

/// View-level variant of the rollback: truncate `messages` at a trailing
/// assistant turn whose tool calls are not all answered.
fn trim_incomplete_tail(messages: &mut Vec<Message>) {
    if let Some(cut) = incomplete_tail_start(messages) {
        messages.truncate(cut);
    }
}

fn rollback_tail(buffer: &mut ShortTermBuffer) -> bool {
    if let Some(cut) = incomplete_tail_start(buffer.all()) {
        buffer.truncate(cut);
        return true;
    }
    false
}

/// Index of the last assistant turn with unanswered tool calls, or `None`
/// when the sequence is well-formed.
fn incomplete_tail_start(messages: &[Message]) -> Option<usize> {
    let last_call_idx = messages.iter().rposition(Message::has_tool_calls)?;
    let expected = messages[last_call_idx].tool_calls.len();
    let answered = messages[last_call_idx + 1..]
        .iter()
        .take_while(|m| m.role == Role::Tool)
        .count();
    (answered < expected).then_some(last_call_idx)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
