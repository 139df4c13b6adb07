// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Thin adapter for OpenAI-compatible chat-completions endpoints.
//!
//! One POST per completion; the response is awaited whole.  This single
//! wire format covers hosted OpenAI, OpenRouter, and the llama.cpp family
//! of local servers, which is the full provider surface of this runtime.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    CompletionRequest, CompletionResponse, Message, ModelError, ModelProvider, Role,
    ToolCallRequest, Usage,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    chat_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiCompatProvider {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`; the
    /// `/chat/completions` path is appended here.
    pub fn new(base_url: &str, api_key: Option<String>, model: impl Into<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            chat_url: format!("{base}/chat/completions"),
            api_key,
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": build_wire_messages(&req.messages),
            "stream": false,
        });
        if let Some(mt) = req.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(mt);
        }
        if let Some(t) = req.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let body = self.build_body(&req);
        let mut request = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ModelError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        parse_completion(&value)
    }
}

// ─── Wire mapping ─────────────────────────────────────────────────────────────

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Map runtime messages to the chat-completions wire shape.  Tool-call
/// arguments go out as JSON-encoded strings; reasoning is never re-sent.
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let mut obj = json!({ "role": "assistant", "tool_calls": calls });
                if let Some(content) = &m.content {
                    obj["content"] = json!(content);
                }
                obj
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
                "content": m.content.as_deref().unwrap_or(""),
            }),
            _ => json!({
                "role": role_str(m.role),
                "content": m.content.as_deref().unwrap_or(""),
            }),
        })
        .collect()
}

fn parse_completion(value: &Value) -> Result<CompletionResponse, ModelError> {
    let message = &value["choices"][0]["message"];
    if message.is_null() {
        return Err(ModelError::Malformed(
            "response has no choices[0].message".into(),
        ));
    }

    let content = message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let reasoning = message["reasoning_content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, call) in calls.iter().enumerate() {
            let name = call["function"]["name"].as_str().unwrap_or("").to_string();
            if name.is_empty() {
                warn!("dropping tool call with empty name from provider response");
                continue;
            }
            let id = match call["id"].as_str() {
                Some(id) if !id.is_empty() => id.to_string(),
                // A missing id would orphan the tool result on the next turn.
                _ => format!("call_synthetic_{i}"),
            };
            let raw_args = call["function"]["arguments"].as_str().unwrap_or("");
            let arguments = parse_tool_arguments(&name, &id, raw_args);
            tool_calls.push(ToolCallRequest {
                id,
                name,
                arguments,
            });
        }
    }

    let usage = Usage {
        input_tokens: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: value["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(CompletionResponse {
        content,
        tool_calls,
        reasoning,
        usage,
    })
}

/// Resolve tool-call arguments to a JSON object.
///
/// Empty arguments become `{}` (the tool schema validator will report any
/// missing fields).  Invalid JSON goes through [`repair_json_arguments`]
/// first; only when every repair fails is `{}` substituted, so the call
/// can still be dispatched and answered instead of corrupting the
/// conversation history sent back on the next turn.
fn parse_tool_arguments(tool: &str, call_id: &str, raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(parse_err) => match repair_json_arguments(raw) {
            Some(v) => {
                warn!(tool, call_id, "repaired invalid JSON tool arguments");
                v
            }
            None => {
                warn!(
                    tool,
                    call_id,
                    error = %parse_err,
                    "unparseable tool arguments, substituting {{}}"
                );
                json!({})
            }
        },
    }
}

/// Attempt to repair common JSON syntax slips in model-emitted arguments.
///
/// Handled in order:
/// - invalid escape sequences inside string values (e.g. `\c`, `\p`);
/// - a missing comma between key-value pairs (`"value"key2": ...`);
/// - a truncated tail (unclosed string and/or missing final brace).
///
/// Returns `None` when no repair produces valid JSON.
fn repair_json_arguments(raw: &str) -> Option<Value> {
    let escaped = escape_invalid_sequences(raw);
    if let Ok(v) = serde_json::from_str(&escaped) {
        return Some(v);
    }

    // Missing comma: `"key1"key2":` — re-insert the separator and the
    // dropped opening quote.
    {
        let comma_fixed = regex::Regex::new(r#""([^"]+)"([a-zA-Z_][a-zA-Z0-9_]*)":\s*"#)
            .unwrap()
            .replace_all(&escaped, r#""$1", "$2": "#);
        if let Ok(v) = serde_json::from_str(&comma_fixed) {
            return Some(v);
        }
    }

    // Truncated output: close an open string, then the object.
    if !escaped.trim_end().ends_with('}') {
        let mut completed = escaped;
        if completed.chars().filter(|&c| c == '"').count() % 2 == 1 {
            completed.push('"');
        }
        completed.push('}');
        if let Ok(v) = serde_json::from_str(&completed) {
            return Some(v);
        }
    }
    None
}

/// Walk a JSON string and double the backslash of any escape sequence that
/// is not a valid JSON escape (`"`, `\`, `/`, `b`, `f`, `n`, `r`, `t`, `u`),
/// so `{"path":"C:\projects"}` parses instead of erroring on `\p`.
fn escape_invalid_sequences(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len() + 16);
    let mut chars = raw.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_url_appends_path() {
        let p = OpenAiCompatProvider::new("https://api.example.com/v1", None, "m");
        assert_eq!(p.chat_url, "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn base_url_trailing_slash_stripped() {
        let p = OpenAiCompatProvider::new("https://api.example.com/v1/", None, "m");
        assert_eq!(p.chat_url, "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn body_contains_model_and_no_stream() {
        let p = OpenAiCompatProvider::new("http://x/v1", None, "test-model");
        let body = p.build_body(&CompletionRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        });
        assert_eq!(body["model"], json!("test-model"));
        assert_eq!(body["stream"], json!(false));
        assert!(body.get("tools").is_none(), "no tools key without tools");
    }

    #[test]
    fn body_includes_tools_when_present() {
        let p = OpenAiCompatProvider::new("http://x/v1", None, "m");
        let body = p.build_body(&CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: vec![crate::ToolSchema {
                name: "calculate".into(),
                description: "math".into(),
                parameters: json!({"type": "object"}),
            }],
            ..Default::default()
        });
        assert_eq!(body["tools"][0]["function"]["name"], json!("calculate"));
        assert_eq!(body["tool_choice"], json!("auto"));
    }

    #[test]
    fn wire_assistant_tool_calls_encode_arguments_as_string() {
        let msgs = vec![Message::assistant_with_calls(
            None,
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "shell".into(),
                arguments: json!({"command": "ls"}),
            }],
        )];
        let wire = build_wire_messages(&msgs);
        let args = wire[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert!(args.contains("\"command\""));
    }

    #[test]
    fn wire_tool_turn_carries_call_id() {
        let msgs = vec![Message::tool_result("call_7", "shell", "out")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], json!("tool"));
        assert_eq!(wire[0]["tool_call_id"], json!("call_7"));
    }

    #[test]
    fn wire_never_contains_reasoning() {
        let mut m = Message::assistant("answer");
        m.reasoning = Some("secret thoughts".into());
        let wire = build_wire_messages(&[m]);
        assert!(!wire[0].to_string().contains("secret thoughts"));
    }

    #[test]
    fn parse_text_completion() {
        let v = json!({
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.content.as_deref(), Some("hello"));
        assert!(r.tool_calls.is_empty());
        assert_eq!(r.usage.input_tokens, 12);
        assert_eq!(r.usage.output_tokens, 3);
    }

    #[test]
    fn parse_tool_call_completion() {
        let v = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "calculate", "arguments": "{\"expression\":\"2+2\"}"}
                }]
            }}],
        });
        let r = parse_completion(&v).unwrap();
        assert!(r.content.is_none());
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].name, "calculate");
        assert_eq!(r.tool_calls[0].arguments["expression"], json!("2+2"));
    }

    #[test]
    fn parse_substitutes_empty_object_for_hopeless_arguments() {
        let v = json!({
            "choices": [{"message": {
                "tool_calls": [{
                    "id": "c1",
                    "function": {"name": "shell", "arguments": "{not json"}
                }]
            }}],
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.tool_calls[0].arguments, json!({}));
    }

    // -- argument repair --

    #[test]
    fn repair_fixes_invalid_escape_sequences() {
        // `\p` and `\c` are not valid JSON escapes; `\n` would be and must
        // be left alone (covered by valid_escapes_survive_the_escape_walk).
        let v = repair_json_arguments(r#"{"path": "C:\projects\code"}"#).unwrap();
        assert_eq!(v["path"], json!("C:\\projects\\code"));
    }

    #[test]
    fn repair_inserts_missing_comma_between_pairs() {
        // The model dropped `, "` between the first value and the next key.
        let v = repair_json_arguments(r#"{"command": "ls"workdir": "/tmp"}"#).unwrap();
        assert_eq!(v["command"], json!("ls"));
        assert_eq!(v["workdir"], json!("/tmp"));
    }

    #[test]
    fn repair_closes_truncated_string_and_brace() {
        let v = repair_json_arguments(r#"{"expression": "123 * 45"#).unwrap();
        assert_eq!(v["expression"], json!("123 * 45"));
    }

    #[test]
    fn repair_closes_missing_brace_only() {
        let v = repair_json_arguments(r#"{"expression": "1 + 1""#).unwrap();
        assert_eq!(v["expression"], json!("1 + 1"));
    }

    #[test]
    fn repair_gives_up_on_garbage() {
        assert!(repair_json_arguments("{not json").is_none());
        assert!(repair_json_arguments("][").is_none());
    }

    #[test]
    fn repaired_arguments_flow_through_parse_completion() {
        let v = json!({
            "choices": [{"message": {
                "tool_calls": [{
                    "id": "c1",
                    "function": {
                        "name": "read_file",
                        "arguments": "{\"path\": \"src\\main.rs\"}"
                    }
                }]
            }}],
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.tool_calls[0].arguments["path"], json!("src\\main.rs"));
    }

    #[test]
    fn valid_escapes_survive_the_escape_walk() {
        let raw = r#"{"text": "line1\nline2\t\"quoted\""}"#;
        assert_eq!(escape_invalid_sequences(raw), raw);
    }

    #[test]
    fn parse_synthesises_missing_call_id() {
        let v = json!({
            "choices": [{"message": {
                "tool_calls": [{"function": {"name": "shell", "arguments": "{}"}}]
            }}],
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.tool_calls[0].id, "call_synthetic_0");
    }

    #[test]
    fn parse_drops_nameless_tool_calls() {
        let v = json!({
            "choices": [{"message": {
                "tool_calls": [{"id": "c1", "function": {"arguments": "{}"}}]
            }}],
        });
        let r = parse_completion(&v).unwrap();
        assert!(r.tool_calls.is_empty());
    }

    #[test]
    fn parse_rejects_choiceless_response() {
        let v = json!({"error": {"message": "nope"}});
        assert!(matches!(
            parse_completion(&v),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn parse_extracts_reasoning_content() {
        let v = json!({
            "choices": [{"message": {
                "content": "answer",
                "reasoning_content": "step by step"
            }}],
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.reasoning.as_deref(), Some("step by step"));
    }
}
