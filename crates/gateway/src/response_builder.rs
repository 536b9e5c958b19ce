//! Assembly of the final Chat Completions response body.
//!
//! Grounded on `examples/original_source/src/adapter_critic/response_builder.py`.

use config::Mode;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::messages::ToolCall;
use crate::usage::TokenBreakdown;

/// Everything the response builder needs beyond the request's own `model` field.
pub struct ResponseInputs<'a> {
    /// The served-model name, echoed back verbatim as `model`.
    pub model: &'a str,
    /// The resolved workflow mode, surfaced under `adapter_critic.mode`.
    pub mode: Mode,
    /// The final assistant text.
    pub final_text: &'a str,
    /// Final tool calls, if any (never an empty `Vec`).
    pub final_tool_calls: Option<&'a [ToolCall]>,
    /// The normalized `finish_reason`.
    pub finish_reason: &'a str,
    /// Named intermediate artifacts, stable per mode.
    pub intermediate: &'a IndexMap<String, String>,
    /// Per-stage and total token usage.
    pub tokens: &'a TokenBreakdown,
}

/// Build the full OpenAI-compatible response body, extended with `adapter_critic`.
///
/// `id` and `created` are supplied by the caller rather than generated here, keeping this
/// function pure and independently testable.
pub fn build_response(id: String, created: i64, inputs: &ResponseInputs<'_>) -> Value {
    let mut message = json!({
        "role": "assistant",
        "content": inputs.final_text,
    });
    if let Some(tool_calls) = inputs.final_tool_calls {
        if !tool_calls.is_empty() {
            message["tool_calls"] = serde_json::to_value(tool_calls).expect("tool_calls always serializes");
        }
    }

    json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": inputs.model,
        "choices": [
            {
                "index": 0,
                "message": message,
                "finish_reason": inputs.finish_reason,
            }
        ],
        "usage": inputs.tokens.total,
        "adapter_critic": {
            "mode": inputs.mode,
            "intermediate": inputs.intermediate,
            "tokens": {
                "stages": inputs.tokens.stages,
                "total": inputs.tokens.total,
            },
        },
    })
}

/// Generate a response id in the `chatcmpl-<uuid-hex>` shape OpenAI clients expect.
pub fn generate_response_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
