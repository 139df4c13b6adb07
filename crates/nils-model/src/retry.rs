// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{CompletionRequest, CompletionResponse, ModelError, ModelProvider};

/// Backoff policy for rate-limited completion calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Exponential growth base between attempts.
    pub base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Jittered delay before re-issuing attempt number `attempt` (0-based):
    /// `min(initial · base^attempt, max) × uniform(0.75, 1.25)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64() * self.base.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Issue a completion, retrying on rate limits with jittered exponential
/// backoff.  Both the call and the backoff sleep race against `cancel`;
/// a trip unwinds promptly with [`ModelError::Cancelled`] and no further
/// attempt is made.
pub async fn complete_with_retry(
    provider: &dyn ModelProvider,
    req: CompletionRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<CompletionResponse, ModelError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            r = provider.complete(req.clone()) => r,
        };

        match result {
            Err(ModelError::RateLimited { retry_after }) if attempt + 1 < attempts => {
                let delay = retry_after.unwrap_or_else(|| policy.delay_for_attempt(attempt));
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off before retry"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            other => return other,
        }
    }
    unreachable!("retry loop always returns within max_attempts iterations")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
