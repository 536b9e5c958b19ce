//! The Adapter workflow: an api draft, reviewed (and optionally patched) by an
//! adapter model, with a bounded retry loop and fallback to the original draft.
//!
//! Grounded on `examples/original_source/src/adapter_critic/workflows/adapter.py`.

use indexmap::IndexMap;
use serde_json::Value;

use super::{require_stage_target, WorkflowOutput};
use crate::edits::apply_adapter_output;
use crate::error::Result;
use crate::messages::{ChatMessage, ToolCall, TokenUsage};
use crate::prompts;
use crate::provider::UpstreamGateway;
use crate::response_shape::{infer_finish_reason, tool_calls_are_well_shaped};
use crate::runtime::RuntimeConfig;

fn tool_choice_requires_call(request_options: &IndexMap<String, Value>) -> bool {
    match request_options.get("tool_choice") {
        Some(Value::String(s)) if s == "required" => true,
        Some(Value::Object(object)) => object.get("type").and_then(Value::as_str) == Some("function"),
        _ => false,
    }
}

pub(super) async fn run(
    runtime: &RuntimeConfig,
    messages: &[ChatMessage],
    gateway: &dyn UpstreamGateway,
    request_options: &IndexMap<String, Value>,
) -> Result<WorkflowOutput> {
    let adapter_target = require_stage_target(&runtime.adapter, "adapter")?;

    let api_draft = gateway
        .complete(
            &runtime.api.model,
            &runtime.api.base_url,
            messages,
            runtime.api.api_key_env.as_deref(),
            request_options,
        )
        .await?;

    let mut stage_usage = IndexMap::new();
    stage_usage.insert("api".to_string(), api_draft.usage);

    let adapter_system_prompt = runtime.adapter_system_prompt.as_deref().unwrap_or(prompts::ADAPTER_SYSTEM_PROMPT);
    let adapter_messages = prompts::build_adapter_messages(
        messages,
        &api_draft.content,
        api_draft.tool_calls.as_deref(),
        adapter_system_prompt,
        request_options,
    );

    let mut adapter_call_options = IndexMap::new();
    adapter_call_options.insert("response_format".to_string(), prompts::adapter_response_format());

    let requires_tool_call = tool_choice_requires_call(request_options);
    let max_attempts = runtime.max_adapter_retries + 1;

    let mut adapter_usage_total = TokenUsage::default();
    let mut last_adapter_output = String::new();
    let mut rejection_reason: Option<String> = None;
    let mut accepted: Option<(String, Option<Vec<ToolCall>>)> = None;

    for _attempt in 1..=max_attempts {
        let adapter_result = gateway
            .complete(
                &adapter_target.model,
                &adapter_target.base_url,
                &adapter_messages,
                adapter_target.api_key_env.as_deref(),
                &adapter_call_options,
            )
            .await?;
        adapter_usage_total = adapter_usage_total.add(adapter_result.usage);
        last_adapter_output = adapter_result.content.clone();

        let candidate = match apply_adapter_output(&api_draft.content, api_draft.tool_calls.as_deref(), &adapter_result.content) {
            Ok(candidate) => candidate,
            Err(err) => {
                rejection_reason = Some(err.to_string());
                continue;
            }
        };

        let (candidate_content, candidate_tool_calls) = candidate;

        if let Some(tool_calls) = &candidate_tool_calls {
            if !tool_calls_are_well_shaped(tool_calls) {
                rejection_reason = Some("candidate tool_calls do not match the OpenAI tool-call shape".to_string());
                continue;
            }
        }

        if candidate_content.is_empty() && candidate_tool_calls.is_none() {
            rejection_reason = Some("candidate has empty content and no tool calls".to_string());
            continue;
        }

        if requires_tool_call && candidate_tool_calls.as_ref().map_or(true, Vec::is_empty) {
            rejection_reason = Some("tool_choice requires a tool call but candidate has none".to_string());
            continue;
        }

        accepted = Some((candidate_content, candidate_tool_calls));
        break;
    }

    stage_usage.insert("adapter".to_string(), adapter_usage_total);

    let mut intermediate = IndexMap::new();
    intermediate.insert("api_draft".to_string(), api_draft.content.clone());
    intermediate.insert("adapter".to_string(), last_adapter_output);

    let (final_text, final_tool_calls) = match accepted {
        Some((content, tool_calls)) => (content, tool_calls),
        None => {
            if let Some(reason) = &rejection_reason {
                intermediate.insert("adapter_rejection_reason".to_string(), reason.clone());
            }
            (api_draft.content.clone(), api_draft.tool_calls.clone())
        }
    };

    if let Some(tool_calls) = &api_draft.tool_calls {
        intermediate.insert(
            "api_draft_tool_calls".to_string(),
            serde_json::to_string(tool_calls).expect("tool_calls always serializes"),
        );
    }
    intermediate.insert("final".to_string(), final_text.clone());

    let finish_reason = infer_finish_reason(final_tool_calls.as_deref(), &api_draft.finish_reason);

    Ok(WorkflowOutput {
        final_text,
        intermediate,
        stage_usage,
        final_tool_calls,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use config::{Mode, StageTarget};

    use super::*;
    use crate::workflows::test_support::{ok, ScriptedGateway};

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            mode: Mode::Adapter,
            api: StageTarget {
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: None,
            },
            adapter: Some(StageTarget {
                model: "gpt-4o".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: None,
            }),
            critic: None,
            advisor: None,
            max_adapter_retries: 1,
            adapter_system_prompt: None,
            critic_system_prompt: None,
            advisor_system_prompt: None,
        }
    }

    #[tokio::test]
    async fn lgtm_decision_passes_the_draft_through() {
        let gateway = ScriptedGateway::new(vec![ok("Hello wrold"), ok(r#"{"decision":"lgtm"}"#)]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow succeeds");

        assert_eq!(output.final_text, "Hello wrold");
        assert!(!output.intermediate.contains_key("adapter_rejection_reason"));
    }

    #[tokio::test]
    async fn patch_decision_replaces_draft_content() {
        let gateway = ScriptedGateway::new(vec![
            ok("Hello wrold"),
            ok(r#"{"decision":"patch","patches":[{"op":"replace","path":"/content","value":"Hello world"}]}"#),
        ]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow succeeds");

        assert_eq!(output.final_text, "Hello world");
    }

    #[tokio::test]
    async fn malformed_adapter_output_retries_then_falls_back_to_draft() {
        let gateway = ScriptedGateway::new(vec![ok("Hello wrold"), ok("not json"), ok("still not json")]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow falls back rather than failing");

        assert_eq!(output.final_text, "Hello wrold");
        assert!(output.intermediate.get("adapter_rejection_reason").is_some());
    }

    #[tokio::test]
    async fn required_tool_call_rejects_a_candidate_with_no_tool_calls() {
        let mut request_options = IndexMap::new();
        request_options.insert("tool_choice".to_string(), Value::String("required".to_string()));

        let gateway = ScriptedGateway::new(vec![
            ok("Hello wrold"),
            ok(r#"{"decision":"patch","patches":[{"op":"replace","path":"/content","value":"Hello world"}]}"#),
            ok(r#"{"decision":"patch","patches":[{"op":"replace","path":"/content","value":"Hello world again"}]}"#),
        ]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &request_options)
            .await
            .expect("workflow falls back rather than failing");

        assert_eq!(output.final_text, "Hello wrold", "falls back to the draft, which also has no tool calls");
        assert!(output
            .intermediate
            .get("adapter_rejection_reason")
            .unwrap()
            .contains("tool_choice requires a tool call"));
    }
}
