//! Tool-call shape validation and finish-reason normalization shared by every workflow.
//!
//! Grounded on the candidate-validation rules in `spec.md` §4.5 (Adapter workflow) and the
//! finish-reason derivation in §4.6, themselves modeled on the shape checks already performed
//! inline by `examples/original_source/src/adapter_critic/http_gateway.py`.

use crate::messages::ToolCall;

/// True when every tool call in `tool_calls` has a non-empty `function.name`, `type == "function"`,
/// and `function.arguments` that parses as a JSON object.
pub fn tool_calls_are_well_shaped(tool_calls: &[ToolCall]) -> bool {
    tool_calls.iter().all(|call| {
        call.r#type == "function"
            && !call.function.name.is_empty()
            && serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                .map(|value| value.is_object())
                .unwrap_or(false)
    })
}

/// Derive the response-level `finish_reason`: `"tool_calls"` whenever tool calls are present,
/// otherwise the upstream's own finish reason (only `"length"`/`"content_filter"` survive
/// unchanged — anything else normalizes to `"stop"`).
pub fn infer_finish_reason(tool_calls: Option<&[ToolCall]>, upstream_finish_reason: &str) -> String {
    if tool_calls.is_some_and(|calls| !calls.is_empty()) {
        return "tool_calls".to_string();
    }
    match upstream_finish_reason {
        "length" | "content_filter" => upstream_finish_reason.to_string(),
        _ => "stop".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::FunctionCall;

    fn tool_call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: "do_thing".to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn well_shaped_tool_calls_pass() {
        assert!(tool_calls_are_well_shaped(&[tool_call(r#"{"a":1}"#)]));
    }

    #[test]
    fn non_object_arguments_fail() {
        assert!(!tool_calls_are_well_shaped(&[tool_call("[1,2,3]")]));
    }

    #[test]
    fn unparsable_arguments_fail() {
        assert!(!tool_calls_are_well_shaped(&[tool_call("not json")]));
    }

    #[test]
    fn finish_reason_prefers_tool_calls() {
        let calls = vec![tool_call(r#"{}"#)];
        assert_eq!(infer_finish_reason(Some(&calls), "stop"), "tool_calls");
    }

    #[test]
    fn finish_reason_preserves_length_and_content_filter() {
        assert_eq!(infer_finish_reason(None, "length"), "length");
        assert_eq!(infer_finish_reason(None, "content_filter"), "content_filter");
    }

    #[test]
    fn finish_reason_normalizes_unknown_to_stop() {
        assert_eq!(infer_finish_reason(None, "anything_else"), "stop");
    }
}
