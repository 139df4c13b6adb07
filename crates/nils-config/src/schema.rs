// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::Serialize;

/// How the compressor treats the older portion of the conversation when the
/// token budget is exceeded.
///
/// `SlidingWindow` (default) summarises everything older than the retained
/// tail.  `Selective` quotes important messages (tool exchanges, errors,
/// user directives) verbatim into the compression prompt and summarises the
/// rest.  `Deletion` drops the older portion behind a deterministic notice
/// without spending a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    #[default]
    SlidingWindow,
    Selective,
    Deletion,
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionStrategy::SlidingWindow => write!(f, "sliding_window"),
            CompressionStrategy::Selective => write!(f, "selective"),
            CompressionStrategy::Deletion => write!(f, "deletion"),
        }
    }
}

impl std::str::FromStr for CompressionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sliding_window" => Ok(CompressionStrategy::SlidingWindow),
            "selective" => Ok(CompressionStrategy::Selective),
            "deletion" => Ok(CompressionStrategy::Deletion),
            other => Err(format!("unknown compression strategy: {other}")),
        }
    }
}

/// Immutable runtime configuration, loaded once at process start.
///
/// The on-disk format is a plain `KEY=VALUE` file (`config` in the runtime
/// directory); see [`crate::load`].  Unknown keys are ignored with a warning,
/// malformed values keep their default.  Per-run mutable state never lives
/// here.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    /// Maximum inner-loop iterations before the run is stopped with an
    /// explicit marker result.
    pub max_iterations: u32,
    /// Global tool execution timeout in seconds; individual tools may
    /// override it downward or upward.
    pub tool_timeout_secs: u64,
    /// Maximum outer verification-loop iterations for single-task runs.
    pub ralph_loop_max_iterations: u32,
    /// Master switch for the memory subsystem.  When off, the buffer grows
    /// unbounded and compression never triggers.
    pub memory_enabled: bool,
    /// Cumulative token total above which compression of the older prefix
    /// is considered.
    pub memory_compression_threshold: usize,
    /// Maximum buffered message count before compression is considered.
    pub memory_short_term_size: usize,
    /// Floor of messages always preserved verbatim, even under pressure.
    pub memory_short_term_min_size: usize,
    /// Fraction of the buffer retained verbatim after a compression pass.
    pub memory_compression_ratio: f64,
    /// Compression strategy for the older prefix.
    pub compression_strategy: CompressionStrategy,
    /// Maximum model-call attempts when the provider signals a rate limit.
    pub retry_max_attempts: u32,
    /// Initial retry backoff delay in seconds.
    pub retry_initial_delay_secs: f64,
    /// Upper bound on the retry backoff delay in seconds.
    pub retry_max_delay_secs: f64,
    /// Default model identifier; `--model` overrides it per run.
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Concurrency cap for one `explore_context` / `parallel_execute` wave.
    pub subagent_max_concurrent: usize,
    /// Global cap on live sub-agents for a task.
    pub subagent_max_live: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tool_timeout_secs: 600,
            ralph_loop_max_iterations: 3,
            memory_enabled: true,
            memory_compression_threshold: 60_000,
            memory_short_term_size: 100,
            memory_short_term_min_size: 6,
            memory_compression_ratio: 0.3,
            compression_strategy: CompressionStrategy::SlidingWindow,
            retry_max_attempts: 3,
            retry_initial_delay_secs: 1.0,
            retry_max_delay_secs: 30.0,
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            subagent_max_concurrent: 3,
            subagent_max_live: 8,
        }
    }
}

impl RuntimeConfig {
    /// Effective floor of buffered messages: the configured minimum can
    /// never exceed the configured window.
    pub fn effective_min_size(&self) -> usize {
        self.memory_short_term_min_size
            .min(self.memory_short_term_size)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_iterations_is_1000() {
        assert_eq!(RuntimeConfig::default().max_iterations, 1000);
    }

    #[test]
    fn default_tool_timeout_is_600s() {
        assert_eq!(RuntimeConfig::default().tool_timeout_secs, 600);
    }

    #[test]
    fn default_ralph_loop_is_bounded_at_3() {
        assert_eq!(RuntimeConfig::default().ralph_loop_max_iterations, 3);
    }

    #[test]
    fn default_memory_enabled() {
        assert!(RuntimeConfig::default().memory_enabled);
    }

    #[test]
    fn default_memory_thresholds() {
        let c = RuntimeConfig::default();
        assert_eq!(c.memory_compression_threshold, 60_000);
        assert_eq!(c.memory_short_term_size, 100);
        assert_eq!(c.memory_short_term_min_size, 6);
        assert!((c.memory_compression_ratio - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn default_retry_policy() {
        let c = RuntimeConfig::default();
        assert_eq!(c.retry_max_attempts, 3);
        assert!(c.retry_initial_delay_secs > 0.0);
        assert!(c.retry_max_delay_secs >= c.retry_initial_delay_secs);
    }

    #[test]
    fn effective_min_never_exceeds_window() {
        let mut c = RuntimeConfig::default();
        c.memory_short_term_size = 4;
        c.memory_short_term_min_size = 6;
        assert_eq!(c.effective_min_size(), 4);
    }

    #[test]
    fn effective_min_is_min_size_when_window_is_larger() {
        let c = RuntimeConfig::default();
        assert_eq!(c.effective_min_size(), 6);
    }

    #[test]
    fn strategy_parses_all_variants() {
        assert_eq!(
            "sliding_window".parse::<CompressionStrategy>().unwrap(),
            CompressionStrategy::SlidingWindow
        );
        assert_eq!(
            "selective".parse::<CompressionStrategy>().unwrap(),
            CompressionStrategy::Selective
        );
        assert_eq!(
            "deletion".parse::<CompressionStrategy>().unwrap(),
            CompressionStrategy::Deletion
        );
    }

    #[test]
    fn strategy_rejects_unknown() {
        assert!("magic".parse::<CompressionStrategy>().is_err());
    }

    #[test]
    fn strategy_display_round_trips() {
        for s in [
            CompressionStrategy::SlidingWindow,
            CompressionStrategy::Selective,
            CompressionStrategy::Deletion,
        ] {
            assert_eq!(s.to_string().parse::<CompressionStrategy>().unwrap(), s);
        }
    }
}
