use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Opaque identifier issued by the model (forwarded verbatim on results).
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub arguments: serde_json::Value,
}

/// A single turn in the conversation.
///
/// The struct mirrors the persisted session shape exactly: assistant turns
/// may carry `tool_calls` (and then `content` may be absent); tool turns
/// carry `tool_call_id` plus the tool `name` linking back to the requesting
/// assistant turn.  `reasoning` is the model's private chain-of-thought and
/// is never sent back on subsequent requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "name")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Cached token estimate; recomputed by the accountant when content
    /// changes.  Never persisted.
    #[serde(skip)]
    pub token_count: Option<usize>,
}

impl Message {
    fn base(role: Role) -> Self {
        Self {
            role,
            content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            reasoning: None,
            token_count: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::base(Role::System)
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::base(Role::User)
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::base(Role::Assistant)
        }
    }

    /// Assistant turn carrying tool calls; `content` may be `None` when the
    /// model emitted only calls.
    pub fn assistant_with_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content,
            tool_calls: calls,
            ..Self::base(Role::Assistant)
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::base(Role::Tool)
        }
    }

    /// Character weight used by the 4-chars-per-token estimate: content plus
    /// tool-call names/arguments plus tool linkage fields.  Reasoning is
    /// excluded because it is never re-sent.
    pub fn content_chars(&self) -> usize {
        let mut chars = self.content.as_deref().map(str::len).unwrap_or(0);
        for tc in &self.tool_calls {
            chars += tc.name.len() + tc.arguments.to_string().len();
        }
        chars += self.tool_call_id.as_deref().map(str::len).unwrap_or(0);
        chars += self.tool_name.as_deref().map(str::len).unwrap_or(0);
        chars
    }

    /// Approximate token count: chars / 4 with a floor of 1.
    pub fn approx_tokens(&self) -> usize {
        (self.content_chars() / 4).max(1)
    }

    /// True for an assistant turn that still expects tool results.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

// ─── Requests & responses ─────────────────────────────────────────────────────

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.  Responses are awaited whole; there is
/// no streaming variant.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Token usage reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A whole model response: final text, any tool calls, optional reasoning.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub reasoning: Option<String>,
    pub usage: Usage,
}

impl CompletionResponse {
    /// Convenience for mocks and tests: a plain text reply.
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            content: Some(reply.into()),
            ..Default::default()
        }
    }

    /// Convenience: a response consisting of a single tool call.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
            ..Default::default()
        }
    }

    /// True when the model produced neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.content.as_deref().unwrap_or("").is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
