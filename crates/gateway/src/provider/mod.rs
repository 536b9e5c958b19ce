//! Upstream gateway trait and the shared helpers its implementations use.
//!
//! Grounded on `examples/original_source/src/adapter_critic/upstream.py`'s
//! `UpstreamGateway` protocol and `http_gateway.py`'s response-shape
//! validation helpers, which `openai.rs`/`vertex.rs`/`routing.rs` each build on.

mod http_client;
mod openai;
mod routing;
mod vertex;

pub use openai::OpenAiCompatibleGateway;
pub use routing::RoutingGateway;
pub use vertex::VertexAnthropicGateway;

pub(crate) use http_client::http_client;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::messages::{ChatMessage, UpstreamResult};

/// An upstream chat-completion backend.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    /// Send `messages` to `model` at `base_url` and return a normalized result.
    async fn complete(
        &self,
        model: &str,
        base_url: &str,
        messages: &[ChatMessage],
        api_key_env: Option<&str>,
        request_options: &IndexMap<String, Value>,
    ) -> Result<UpstreamResult, UpstreamError>;
}

/// An upstream responded with a body that does not conform to the expected shape.
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream response format error reason={reason} status_code={status_code} model={model} base_url={base_url} message_count={message_count} payload={payload_preview}")]
pub struct UpstreamResponseFormatError {
    /// Short machine-oriented description of what was wrong with the response.
    pub reason: String,
    /// The model that was requested.
    pub model: String,
    /// The base URL (or resolved endpoint, for providers that rewrite it) that was called.
    pub base_url: String,
    /// Number of messages sent in the request.
    pub message_count: usize,
    /// HTTP status code the upstream returned.
    pub status_code: u16,
    /// Truncated preview of the offending response body, for logging.
    pub payload_preview: String,
}

/// Everything that can go wrong calling an upstream, beyond a plain [`UpstreamResponseFormatError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The response body did not conform to the expected shape.
    #[error(transparent)]
    Format(#[from] UpstreamResponseFormatError),
    /// A network-level failure, timeout, or non-2xx status without a decodable error body.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Render a value as a JSON string truncated to at most `max_chars`, suffixed with `...` when
/// truncated. `max_chars = 0` disables truncation.
pub(crate) fn payload_preview(value: &Value, max_chars: usize) -> String {
    let serialized = serde_json::to_string(value).unwrap_or_else(|_| value.to_string());
    if max_chars == 0 || serialized.chars().count() <= max_chars {
        return serialized;
    }
    format!("{}...", serialized.chars().take(max_chars).collect::<String>())
}

/// True when `content`/`tool_calls` are both shaped like "nothing was returned" (`null` or an
/// empty array) rather than some other malformed shape that deserves a hard failure.
pub(crate) fn is_empty_assistant_edge_case(content_value: Option<&Value>, tool_calls_value: Option<&Value>) -> bool {
    let content_is_empty_shape = match content_value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    };
    let tool_calls_is_empty_shape = match tool_calls_value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    };
    content_is_empty_shape && tool_calls_is_empty_shape
}

/// One detected malformed-tool-call issue, logged (not rejected) before a request is sent
/// upstream — the upstream, not this gateway, decides whether to accept it.
#[derive(Debug, Clone)]
pub(crate) struct MalformedToolCallIssue {
    pub message_index: usize,
    pub issue: &'static str,
}

/// Scan outbound assistant messages for tool-call shapes that would not round-trip through an
/// OpenAI-compatible upstream, for a pre-flight warning log.
pub(crate) fn malformed_tool_call_issues(messages: &[ChatMessage]) -> Vec<MalformedToolCallIssue> {
    let mut issues = Vec::new();

    for (message_index, message) in messages.iter().enumerate() {
        let Some(tool_calls) = message.extra.get("tool_calls") else {
            continue;
        };
        let Some(tool_calls) = tool_calls.as_array() else {
            issues.push(MalformedToolCallIssue {
                message_index,
                issue: "assistant tool_calls is not a list",
            });
            continue;
        };

        for tool_call in tool_calls {
            let Some(tool_call) = tool_call.as_object() else {
                issues.push(MalformedToolCallIssue {
                    message_index,
                    issue: "tool_call entry is not an object",
                });
                continue;
            };
            let Some(function) = tool_call.get("function").and_then(Value::as_object) else {
                issues.push(MalformedToolCallIssue {
                    message_index,
                    issue: "tool_call.function is not an object",
                });
                continue;
            };
            if !matches!(function.get("arguments"), Some(Value::String(_))) {
                issues.push(MalformedToolCallIssue {
                    message_index,
                    issue: "tool_call.function.arguments must be a string",
                });
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preview_truncates_long_payloads() {
        let value = json!({"text": "x".repeat(500)});
        let preview = payload_preview(&value, 20);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), 23);
    }

    #[test]
    fn preview_zero_disables_truncation() {
        let value = json!({"text": "x".repeat(500)});
        let preview = payload_preview(&value, 0);
        assert!(!preview.ends_with("..."));
    }

    #[test]
    fn empty_assistant_edge_case_detects_null_and_empty_array() {
        assert!(is_empty_assistant_edge_case(None, None));
        assert!(is_empty_assistant_edge_case(Some(&Value::Null), Some(&json!([]))));
        assert!(!is_empty_assistant_edge_case(Some(&json!("hi")), None));
    }

    #[test]
    fn malformed_tool_call_detects_non_string_arguments() {
        let message = ChatMessage {
            role: crate::messages::Role::Assistant,
            content: None,
            extra: serde_json::from_value(json!({
                "tool_calls": [{"id": "1", "type": "function", "function": {"name": "f", "arguments": 5}}]
            }))
            .unwrap(),
        };
        let issues = malformed_tool_call_issues(std::slice::from_ref(&message));
        assert_eq!(issues.len(), 1);
    }
}
