//! Wire types for the Chat Completions request/response surface.
//!
//! `ChatMessage` and `ChatCompletionRequest` preserve any field this gateway
//! does not model explicitly (`tool_calls`, `tool_call_id`, `name`, vendor
//! extensions, ...) via `#[serde(flatten)]` into a `serde_json::Map`, the same
//! pattern `grafbase-nexus`'s `protocol::unknown_fields::UnknownFields` uses
//! to round-trip protocol fields it does not model as first-class Rust
//! fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user turn.
    User,
    /// Model turn, possibly carrying `tool_calls`.
    Assistant,
    /// Tool result turn, carries `tool_call_id` in `extra`.
    Tool,
}

/// A single chat message. `content` is modeled explicitly because every
/// workflow stage reads or rewrites it; everything else (`tool_calls`,
/// `tool_call_id`, `name`, ...) is preserved verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The message's role.
    pub role: Role,
    /// Textual content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Any other field present on the message (`tool_calls`, `tool_call_id`, `name`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Build a plain system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            extra: Map::new(),
        }
    }

    /// Build a plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            extra: Map::new(),
        }
    }

    /// Tool calls carried by an assistant message, if shaped as an array.
    pub fn tool_calls(&self) -> Option<&Vec<Value>> {
        self.extra.get("tool_calls").and_then(Value::as_array)
    }

    /// Content as a string, defaulting to the empty string.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// One OpenAI-shaped tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call identifier, echoed back by the client on the tool's result turn.
    pub id: String,
    /// Always `"function"`; intentionally not mutable by the adapter patch engine.
    pub r#type: String,
    /// The function invocation.
    pub function: FunctionCall,
}

/// A function invocation within a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// JSON-object literal, as a string (OpenAI's wire convention).
    pub arguments: String,
}

/// Token usage for one upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt sent upstream.
    #[serde(default)]
    pub prompt_tokens: i64,
    /// Tokens in the completion received from upstream.
    #[serde(default)]
    pub completion_tokens: i64,
    /// Total tokens, independently reported by the upstream (not always `prompt + completion`).
    #[serde(default)]
    pub total_tokens: i64,
}

impl TokenUsage {
    /// Field-by-field sum of two usage records.
    pub fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }

    /// This usage with every field clamped to be non-negative.
    pub fn clamped(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.max(0),
            completion_tokens: self.completion_tokens.max(0),
            total_tokens: self.total_tokens.max(0),
        }
    }
}

/// The normalized result of one upstream chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResult {
    /// Assistant text content, possibly empty when `tool_calls` carries the turn.
    pub content: String,
    /// Token usage reported by the upstream, defaulting to zero fields when absent.
    pub usage: TokenUsage,
    /// Tool calls requested by the assistant, if any. Never `Some(vec![])`.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The upstream's finish reason, verbatim (normalization happens at the response builder).
    pub finish_reason: String,
}

impl UpstreamResult {
    /// True when this result is a usable assistant turn: non-empty content, or at least one tool call.
    pub fn is_non_empty(&self) -> bool {
        !self.content.is_empty() || self.tool_calls.is_some()
    }
}
