// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Failure modes of a model completion call.
///
/// `RateLimited` is the only retryable variant; the retry layer backs off
/// and re-issues the request, and surfaces it unchanged once attempts are
/// exhausted.  `Cancelled` is produced when the caller's cancellation token
/// trips while a call (or a backoff sleep) is in flight.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("rate limited by provider")]
    RateLimited {
        /// Provider-suggested wait, when the response carried one.
        retry_after: Option<Duration>,
    },
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("model call timed out")]
    Timeout,
    #[error("model call cancelled")]
    Cancelled,
    #[error("provider response was malformed: {0}")]
    Malformed(String),
}

impl ModelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ModelError::Cancelled)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_detected() {
        let e = ModelError::RateLimited { retry_after: None };
        assert!(e.is_rate_limited());
        assert!(!e.is_cancelled());
    }

    #[test]
    fn cancelled_is_detected() {
        assert!(ModelError::Cancelled.is_cancelled());
    }

    #[test]
    fn display_mentions_status_for_api_errors() {
        let e = ModelError::Api {
            status: 500,
            message: "boom".into(),
        };
        let s = e.to_string();
        assert!(s.contains("500"));
        assert!(s.contains("boom"));
    }
}
