//! The draft payload envelope and the constrained JSON-Patch dialect used to
//! apply an adapter model's edits to it.
//!
//! Grounded in spirit on `examples/original_source/src/adapter_critic/edits.py`'s
//! `apply_adapter_output` (a `regex`-based SEARCH/REPLACE block engine), but the
//! dialect itself is the newer JSON-Patch replace-only scheme this gateway
//! exposes to adapter models via a strict `response_format` schema instead.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::messages::{FunctionCall, ToolCall};

/// Everything that can go wrong turning an adapter's JSON output into a patched draft.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EditError {
    /// The adapter output was not valid JSON, or didn't match the decision schema.
    #[error("malformed adapter output: {0}")]
    MalformedOutput(String),
    /// `decision = "lgtm"` carried a non-empty `patches` array.
    #[error("lgtm decision must not carry patches")]
    LgtmWithPatches,
    /// `decision = "patch"` carried an empty `patches` array.
    #[error("patch decision must carry at least one patch")]
    EmptyPatchList,
    /// A patch's `op` was not `"replace"`.
    #[error("unsupported patch op: {0}")]
    UnsupportedOp(String),
    /// A patch's `path` did not match the whitelist.
    #[error("unsupported patch path: {0}")]
    UnsupportedPath(String),
    /// A `/tool_calls/<index>/...` patch targeted an index beyond the current array.
    #[error("tool call index out of range: {0}")]
    IndexOutOfRange(usize),
    /// A `/tool_calls/...` patch was applied but no `tool_calls` array exists to index into.
    #[error("no tool_calls array to patch")]
    MissingToolCalls,
    /// The replacement value for `/tool_calls/<index>/function/arguments` was not valid JSON.
    #[error("replacement arguments value does not parse as JSON")]
    InvalidArgumentsValue,
    /// After patching, `content` was not a string.
    #[error("patched content must be a string")]
    ContentNotString,
    /// After patching, `tool_calls` was neither null nor a list of objects.
    #[error("patched tool_calls must be null or a list of objects")]
    ToolCallsNotListOfObjects,
}

/// The adapter's decoded JSON response.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdapterResponse {
    decision: String,
    #[serde(default)]
    patches: Vec<RawPatch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatch {
    op: String,
    path: String,
    value: Value,
}

/// One of the four whitelisted patch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchTarget {
    Content,
    ToolCalls,
    ToolCallFunctionName(usize),
    ToolCallFunctionArguments(usize),
}

fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn classify_path(path: &str) -> Option<PatchTarget> {
    let rest = path.strip_prefix('/')?;
    let segments: Vec<String> = rest.split('/').map(unescape_pointer_token).collect();

    match segments.as_slice() {
        [first] if first == "content" => Some(PatchTarget::Content),
        [first] if first == "tool_calls" => Some(PatchTarget::ToolCalls),
        [first, index, third, fourth] if first == "tool_calls" && third == "function" => {
            let index: usize = index.parse().ok()?;
            match fourth.as_str() {
                "name" => Some(PatchTarget::ToolCallFunctionName(index)),
                "arguments" => Some(PatchTarget::ToolCallFunctionArguments(index)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Parse and validate an adapter model's raw JSON output against the decision schema.
fn parse_adapter_response(adapter_output: &str) -> Result<AdapterResponse, EditError> {
    let response: AdapterResponse =
        serde_json::from_str(adapter_output).map_err(|err| EditError::MalformedOutput(err.to_string()))?;

    match response.decision.as_str() {
        "lgtm" => {
            if !response.patches.is_empty() {
                return Err(EditError::LgtmWithPatches);
            }
        }
        "patch" => {
            if response.patches.is_empty() {
                return Err(EditError::EmptyPatchList);
            }
        }
        other => return Err(EditError::MalformedOutput(format!("unknown decision: {other}"))),
    }

    Ok(response)
}

fn tool_calls_to_value(tool_calls: Option<&[ToolCall]>) -> Value {
    match tool_calls {
        None => Value::Null,
        Some(calls) => {
            Value::Array(calls.iter().map(|call| serde_json::to_value(call).expect("ToolCall always serializes")).collect())
        }
    }
}

fn apply_one_patch(content: &mut Value, tool_calls: &mut Value, target: PatchTarget, value: Value) -> Result<(), EditError> {
    match target {
        PatchTarget::Content => {
            *content = value;
        }
        PatchTarget::ToolCalls => {
            *tool_calls = value;
        }
        PatchTarget::ToolCallFunctionName(index) => {
            let function = function_object_mut(tool_calls, index)?;
            if !function.contains_key("name") {
                return Err(EditError::MissingToolCalls);
            }
            function.insert("name".to_string(), value);
        }
        PatchTarget::ToolCallFunctionArguments(index) => {
            let Value::String(arguments) = &value else {
                return Err(EditError::InvalidArgumentsValue);
            };
            if serde_json::from_str::<Value>(arguments).is_err() {
                return Err(EditError::InvalidArgumentsValue);
            }
            let function = function_object_mut(tool_calls, index)?;
            if !function.contains_key("arguments") {
                return Err(EditError::MissingToolCalls);
            }
            function.insert("arguments".to_string(), value);
        }
    }
    Ok(())
}

fn function_object_mut(tool_calls: &mut Value, index: usize) -> Result<&mut serde_json::Map<String, Value>, EditError> {
    let array = tool_calls.as_array_mut().ok_or(EditError::MissingToolCalls)?;
    let item = array.get_mut(index).ok_or(EditError::IndexOutOfRange(index))?;
    item.as_object_mut()
        .and_then(|object| object.get_mut("function"))
        .and_then(Value::as_object_mut)
        .ok_or(EditError::MissingToolCalls)
}

/// Build a [`ToolCall`] from a working-document entry without enforcing the full OpenAI tool-call
/// shape — that stricter check (non-empty name, arguments parsing as a JSON object, ...) is the
/// candidate-validation step each workflow runs on the finalized draft, not this engine's job.
fn lenient_tool_call_from_object(object: &serde_json::Map<String, Value>) -> ToolCall {
    let id = object.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    let r#type = object.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
    let function = object.get("function").and_then(Value::as_object);
    ToolCall {
        id,
        r#type,
        function: FunctionCall {
            name: function.and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or_default().to_string(),
            arguments: function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
    }
}

fn finalize_draft(content: Value, tool_calls: Value) -> Result<(String, Option<Vec<ToolCall>>), EditError> {
    let Value::String(content) = content else {
        return Err(EditError::ContentNotString);
    };

    let tool_calls = match tool_calls {
        Value::Null => None,
        Value::Array(items) => {
            if items.is_empty() {
                None
            } else {
                let mut calls = Vec::with_capacity(items.len());
                for item in items {
                    let object = item.as_object().ok_or(EditError::ToolCallsNotListOfObjects)?;
                    calls.push(lenient_tool_call_from_object(object));
                }
                Some(calls)
            }
        }
        _ => return Err(EditError::ToolCallsNotListOfObjects),
    };

    Ok((content, tool_calls))
}

/// Apply an adapter model's raw JSON output to the current draft, producing a new one.
///
/// Returns the unchanged draft on `"lgtm"`. Any schema or whitelist violation is reported as an
/// [`EditError`]; the caller (the Adapter workflow) treats that as a rejected candidate.
pub fn apply_adapter_output(
    content: &str,
    tool_calls: Option<&[ToolCall]>,
    adapter_output: &str,
) -> Result<(String, Option<Vec<ToolCall>>), EditError> {
    let response = parse_adapter_response(adapter_output)?;

    if response.decision == "lgtm" {
        return Ok((content.to_string(), tool_calls.map(<[ToolCall]>::to_vec)));
    }

    let mut working_content = Value::String(content.to_string());
    let mut working_tool_calls = tool_calls_to_value(tool_calls);

    for patch in response.patches {
        if patch.op != "replace" {
            return Err(EditError::UnsupportedOp(patch.op));
        }
        let target = classify_path(&patch.path).ok_or_else(|| EditError::UnsupportedPath(patch.path.clone()))?;
        apply_one_patch(&mut working_content, &mut working_tool_calls, target, patch.value)?;
    }

    finalize_draft(working_content, working_tool_calls)
}

fn draft_payload_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<ADAPTER_DRAFT_CONTENT>\n(.*?)\n</ADAPTER_DRAFT_CONTENT>\n<ADAPTER_DRAFT_TOOL_CALLS>\n(.*?)\n</ADAPTER_DRAFT_TOOL_CALLS>",
        )
        .expect("static draft payload regex is valid")
    })
}

/// Render the draft payload envelope embedded in adapter/critic user messages.
pub fn render_draft_payload(content: &str, tool_calls: Option<&[ToolCall]>) -> String {
    let tool_calls_value = tool_calls.map_or_else(|| Value::Array(Vec::new()), |calls| tool_calls_to_value(Some(calls)));
    let tool_calls_json = serde_json::to_string_pretty(&tool_calls_value).expect("tool_calls always serializes");

    format!(
        "<ADAPTER_DRAFT_CONTENT>\n{content}\n</ADAPTER_DRAFT_CONTENT>\n<ADAPTER_DRAFT_TOOL_CALLS>\n{tool_calls_json}\n</ADAPTER_DRAFT_TOOL_CALLS>"
    )
}

/// Parse a rendered draft payload back into its `(content, tool_calls)` parts. Only used by
/// tests to confirm the envelope round-trips; workflow code always carries the structured draft
/// alongside the rendered text rather than re-parsing it.
pub fn parse_draft_payload(payload: &str) -> Option<(String, Value)> {
    let captures = draft_payload_regex().captures(payload)?;
    let content = captures.get(1)?.as_str().to_string();
    let tool_calls = serde_json::from_str(captures.get(2)?.as_str()).ok()?;
    Some((content, tool_calls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool_call() -> ToolCall {
        ToolCall {
            id: "call_cancel".to_string(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: "cancel_reservation".to_string(),
                arguments: r#"{"reservation_id":"WRONG"}"#.to_string(),
            },
        }
    }

    #[test]
    fn lgtm_returns_draft_unchanged() {
        let (content, tool_calls) = apply_adapter_output("Hello world", None, r#"{"decision":"lgtm"}"#).unwrap();
        assert_eq!(content, "Hello world");
        assert!(tool_calls.is_none());
    }

    #[test]
    fn lgtm_with_patches_is_rejected() {
        let err = apply_adapter_output(
            "Hello world",
            None,
            r#"{"decision":"lgtm","patches":[{"op":"replace","path":"/content","value":"x"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, EditError::LgtmWithPatches);
    }

    #[test]
    fn patch_replaces_content() {
        let (content, _) = apply_adapter_output(
            "Hello wrld",
            None,
            r#"{"decision":"patch","patches":[{"op":"replace","path":"/content","value":"Hello world"}]}"#,
        )
        .unwrap();
        assert_eq!(content, "Hello world");
    }

    #[test]
    fn patch_replaces_tool_call_arguments() {
        let tool_calls = vec![sample_tool_call()];
        let (_, new_tool_calls) = apply_adapter_output(
            "",
            Some(&tool_calls),
            r#"{"decision":"patch","patches":[{"op":"replace","path":"/tool_calls/0/function/arguments","value":"{\"reservation_id\":\"EHGLP3\"}"}]}"#,
        )
        .unwrap();
        let new_tool_calls = new_tool_calls.unwrap();
        assert_eq!(new_tool_calls[0].function.arguments, r#"{"reservation_id":"EHGLP3"}"#);
        assert_eq!(new_tool_calls[0].id, "call_cancel", "id must stay untouched");
    }

    #[test]
    fn unsupported_path_is_rejected() {
        let err = apply_adapter_output(
            "hi",
            None,
            r#"{"decision":"patch","patches":[{"op":"replace","path":"/role","value":"user"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, EditError::UnsupportedPath("/role".to_string()));
    }

    #[test]
    fn unsupported_op_is_rejected() {
        let err = apply_adapter_output(
            "hi",
            None,
            r#"{"decision":"patch","patches":[{"op":"add","path":"/content","value":"x"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, EditError::UnsupportedOp("add".to_string()));
    }

    #[test]
    fn out_of_range_tool_call_index_is_rejected() {
        let tool_calls = vec![sample_tool_call()];
        let err = apply_adapter_output(
            "",
            Some(&tool_calls),
            r#"{"decision":"patch","patches":[{"op":"replace","path":"/tool_calls/5/function/name","value":"x"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, EditError::IndexOutOfRange(5));
    }

    #[test]
    fn patching_tool_calls_when_none_exist_is_rejected() {
        let err = apply_adapter_output(
            "",
            None,
            r#"{"decision":"patch","patches":[{"op":"replace","path":"/tool_calls/0/function/name","value":"x"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, EditError::MissingToolCalls);
    }

    #[test]
    fn empty_patch_list_is_rejected() {
        let err = apply_adapter_output("hi", None, r#"{"decision":"patch","patches":[]}"#).unwrap_err();
        assert_eq!(err, EditError::EmptyPatchList);
    }

    #[test]
    fn draft_payload_round_trips() {
        let tool_calls = vec![sample_tool_call()];
        let rendered = render_draft_payload("hello", Some(&tool_calls));
        let (content, tool_calls_value) = parse_draft_payload(&rendered).unwrap();
        assert_eq!(content, "hello");
        assert_eq!(tool_calls_value[0]["function"]["name"], "cancel_reservation");
    }

    #[test]
    fn draft_payload_with_no_tool_calls_renders_empty_array() {
        let rendered = render_draft_payload("hello", None);
        assert!(rendered.contains("<ADAPTER_DRAFT_TOOL_CALLS>\n[]\n</ADAPTER_DRAFT_TOOL_CALLS>"));
    }
}
