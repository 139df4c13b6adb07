// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use nils_model::{CompletionRequest, Message, ModelProvider};

use crate::prompts::verifier_system_prompt;

/// Output cap for the verdict call; the verifier judges, it does not write.
const MAX_VERDICT_TOKENS: u32 = 256;

/// The verifier's judgement of one inner-loop result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub complete: bool,
    pub reason: String,
}

impl Verdict {
    pub fn complete() -> Self {
        Self {
            complete: true,
            reason: String::new(),
        }
    }

    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self {
            complete: false,
            reason: reason.into(),
        }
    }
}

/// Judges whether an inner-loop result satisfies the task.
///
/// Implementations see the task and the result only, not the transcript.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, task: &str, result: &str, iteration: u32) -> Verdict;
}

/// Default verifier: one tool-free model call against the same provider,
/// instructed to judge strictly without re-doing the work.
pub struct LlmVerifier {
    provider: Arc<dyn ModelProvider>,
}

impl LlmVerifier {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    async fn verify(&self, task: &str, result: &str, iteration: u32) -> Verdict {
        let user = format!(
            "Task:\n{task}\n\nAgent result (attempt {iteration}):\n{result}\n\n\
             Is the task satisfied?"
        );
        let req = CompletionRequest {
            messages: vec![Message::system(verifier_system_prompt()), Message::user(user)],
            tools: Vec::new(),
            max_tokens: Some(MAX_VERDICT_TOKENS),
            temperature: Some(0.0),
        };
        match self.provider.complete(req).await {
            Ok(response) => parse_verdict(response.content.as_deref().unwrap_or("")),
            Err(e) => {
                // A broken verifier must not fail the task or spin the
                // outer loop; accept the result and say why.
                warn!(error = %e, "verifier call failed, accepting result");
                Verdict::complete()
            }
        }
    }
}

/// Parse the verdict JSON leniently: the object may be embedded in prose.
/// Unparseable output accepts the result rather than forcing a rerun.
fn parse_verdict(text: &str) -> Verdict {
    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            warn!("verifier emitted no JSON object, accepting result");
            return Verdict::complete();
        }
    };
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(v) => Verdict {
            complete: v["complete"].as_bool().unwrap_or(true),
            reason: v["reason"].as_str().unwrap_or("").to_string(),
        },
        Err(e) => {
            warn!(error = %e, "unparseable verifier verdict, accepting result");
            Verdict::complete()
        }
    }
}

/// Test verifier that replays a queue of verdicts; when the queue runs dry
/// it keeps answering "complete".
pub struct ScriptedVerifier {
    verdicts: Mutex<VecDeque<Verdict>>,
}

impl ScriptedVerifier {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
        }
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, _task: &str, _result: &str, _iteration: u32) -> Verdict {
        self.verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Verdict::complete)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use nils_model::{CompletionResponse, ModelError, ScriptedProvider};

    #[test]
    fn parse_plain_json_verdict() {
        let v = parse_verdict(r#"{"complete": false, "reason": "missing the number"}"#);
        assert!(!v.complete);
        assert_eq!(v.reason, "missing the number");
    }

    #[test]
    fn parse_json_embedded_in_prose() {
        let v = parse_verdict("Here is my judgement: {\"complete\": true, \"reason\": \"done\"} ok");
        assert!(v.complete);
    }

    #[test]
    fn unparseable_verdict_accepts_result() {
        assert!(parse_verdict("I think it looks fine").complete);
        assert!(parse_verdict("{broken json").complete);
    }

    #[tokio::test]
    async fn llm_verifier_sees_task_and_result_only() {
        let provider = Arc::new(ScriptedProvider::always_text(
            r#"{"complete": true, "reason": "ok"}"#,
        ));
        let verifier = LlmVerifier::new(provider.clone());
        let v = verifier.verify("compute 2+2", "4", 1).await;
        assert!(v.complete);

        let req = provider.last_request.lock().unwrap().clone().unwrap();
        assert!(req.tools.is_empty(), "verifier must not get tools");
        assert_eq!(req.max_tokens, Some(MAX_VERDICT_TOKENS));
        let prompt = req.messages[1].content.as_deref().unwrap();
        assert!(prompt.contains("compute 2+2"));
        assert!(prompt.contains("attempt 1"));
    }

    #[tokio::test]
    async fn llm_verifier_failure_accepts_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ModelError::Network(
            "down".into(),
        ))]));
        let verifier = LlmVerifier::new(provider);
        assert!(verifier.verify("t", "r", 1).await.complete);
    }

    #[tokio::test]
    async fn llm_verifier_incomplete_carries_reason() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(CompletionResponse::text(
            r#"{"complete": false, "reason": "the file was never written"}"#,
        ))]));
        let verifier = LlmVerifier::new(provider);
        let v = verifier.verify("write a file", "done!", 1).await;
        assert!(!v.complete);
        assert!(v.reason.contains("never written"));
    }

    #[tokio::test]
    async fn scripted_verifier_replays_then_accepts() {
        let verifier = ScriptedVerifier::new(vec![Verdict::incomplete("try again")]);
        assert!(!verifier.verify("t", "r", 1).await.complete);
        assert!(verifier.verify("t", "r", 2).await.complete);
    }
}
