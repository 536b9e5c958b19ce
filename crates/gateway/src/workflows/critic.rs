//! The Critic workflow: an api draft, critiqued by a critic model, then redone
//! with the critique folded in, with a bounded retry-then-fallback final pass.
//!
//! Grounded on `examples/original_source/src/adapter_critic/workflows/critic.py`.

use indexmap::IndexMap;
use serde_json::Value;

use super::{require_stage_target, WorkflowOutput};
use crate::error::Result;
use crate::messages::{ChatMessage, Role, TokenUsage, UpstreamResult};
use crate::prompts;
use crate::provider::{UpstreamError, UpstreamGateway};
use crate::response_shape::infer_finish_reason;
use crate::runtime::RuntimeConfig;

const FINAL_PASS_ATTEMPTS: u32 = 2;

fn first_system_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .find(|message| message.role == Role::System)
        .map(|message| message.content_str().to_string())
        .unwrap_or_default()
}

pub(super) async fn run(
    runtime: &RuntimeConfig,
    messages: &[ChatMessage],
    gateway: &dyn UpstreamGateway,
    request_options: &IndexMap<String, Value>,
) -> Result<WorkflowOutput> {
    let critic_target = require_stage_target(&runtime.critic, "critic")?;

    let api_draft = gateway
        .complete(
            &runtime.api.model,
            &runtime.api.base_url,
            messages,
            runtime.api.api_key_env.as_deref(),
            request_options,
        )
        .await?;

    let critic_system_prompt = runtime.critic_system_prompt.as_deref().unwrap_or(prompts::CRITIC_SYSTEM_PROMPT);
    let critic_messages = prompts::build_critic_messages(
        messages,
        &first_system_prompt(messages),
        &api_draft.content,
        api_draft.tool_calls.as_deref(),
        critic_system_prompt,
        request_options,
    );

    let critic_feedback = gateway
        .complete(
            &critic_target.model,
            &critic_target.base_url,
            &critic_messages,
            critic_target.api_key_env.as_deref(),
            &IndexMap::new(),
        )
        .await?;

    let second_pass_messages = prompts::build_critic_second_pass_messages(
        messages,
        &api_draft.content,
        api_draft.tool_calls.as_deref(),
        &critic_feedback.content,
    );

    let mut final_response: Option<UpstreamResult> = None;
    let mut final_fallback_reason: Option<String> = None;

    for attempt in 1..=FINAL_PASS_ATTEMPTS {
        match gateway
            .complete(
                &runtime.api.model,
                &runtime.api.base_url,
                &second_pass_messages,
                runtime.api.api_key_env.as_deref(),
                request_options,
            )
            .await
        {
            Ok(result) => {
                final_response = Some(result);
                break;
            }
            Err(err) => {
                log::warn!(
                    "critic final pass attempt failed model={} base_url={} attempt={attempt}/{FINAL_PASS_ATTEMPTS} error={err}",
                    runtime.api.model,
                    runtime.api.base_url,
                );
                if attempt == FINAL_PASS_ATTEMPTS {
                    let error_kind = match err {
                        UpstreamError::Format(_) => "UpstreamResponseFormatError",
                        UpstreamError::Transport(_) => "TransportError",
                    };
                    final_fallback_reason =
                        Some(format!("api_final failed after {FINAL_PASS_ATTEMPTS} attempts: {error_kind}: {err}"));
                }
            }
        }
    }

    let (final_text, final_tool_calls, upstream_finish_reason, api_final_usage) = match &final_response {
        Some(result) => (
            result.content.clone(),
            result.tool_calls.clone(),
            result.finish_reason.clone(),
            result.usage,
        ),
        None => (
            api_draft.content.clone(),
            api_draft.tool_calls.clone(),
            api_draft.finish_reason.clone(),
            TokenUsage::default(),
        ),
    };

    let mut intermediate = IndexMap::new();
    intermediate.insert("api_draft".to_string(), api_draft.content.clone());
    intermediate.insert("critic".to_string(), critic_feedback.content.clone());
    intermediate.insert("final".to_string(), final_text.clone());
    if let Some(tool_calls) = &api_draft.tool_calls {
        intermediate.insert(
            "api_draft_tool_calls".to_string(),
            serde_json::to_string(tool_calls).expect("tool_calls always serializes"),
        );
    }
    if let Some(reason) = final_fallback_reason {
        intermediate.insert("final_fallback_reason".to_string(), reason);
    }

    let mut stage_usage = IndexMap::new();
    stage_usage.insert("api_draft".to_string(), api_draft.usage);
    stage_usage.insert("critic".to_string(), critic_feedback.usage);
    stage_usage.insert("api_final".to_string(), api_final_usage);

    let finish_reason = infer_finish_reason(final_tool_calls.as_deref(), &upstream_finish_reason);

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
    use crate::provider::UpstreamResponseFormatError;
    use crate::workflows::test_support::{ok, ScriptedGateway};

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            mode: Mode::Critic,
            api: StageTarget {
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: None,
            },
            adapter: None,
            critic: Some(StageTarget {
                model: "gpt-4o-nano".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: None,
            }),
            advisor: None,
            max_adapter_retries: 0,
            adapter_system_prompt: None,
            critic_system_prompt: None,
            advisor_system_prompt: None,
        }
    }

    fn transport_error() -> Result<UpstreamResult, UpstreamError> {
        Err(UpstreamError::Transport("connection reset".to_string()))
    }

    #[tokio::test]
    async fn succeeds_on_first_final_pass() {
        let gateway = ScriptedGateway::new(vec![ok("draft"), ok("feedback"), ok("revised")]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow succeeds");

        assert_eq!(output.final_text, "revised");
        assert_eq!(output.intermediate.get("api_draft").unwrap(), "draft");
        assert_eq!(output.intermediate.get("critic").unwrap(), "feedback");
        assert_eq!(output.intermediate.get("final").unwrap(), "revised");
        assert!(!output.intermediate.contains_key("final_fallback_reason"));
        assert!(output.stage_usage.contains_key("api_draft"));
        assert!(output.stage_usage.contains_key("critic"));
        assert!(output.stage_usage.contains_key("api_final"));
    }

    #[tokio::test]
    async fn retries_final_pass_once_before_succeeding() {
        let gateway = ScriptedGateway::new(vec![ok("draft"), ok("feedback"), transport_error(), ok("revised")]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow succeeds after one retry");

        assert_eq!(output.final_text, "revised");
        assert!(!output.intermediate.contains_key("final_fallback_reason"));
    }

    #[tokio::test]
    async fn falls_back_to_draft_after_exhausting_final_pass_attempts() {
        let gateway = ScriptedGateway::new(vec![ok("draft"), ok("feedback"), transport_error(), transport_error()]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow falls back rather than failing");

        assert_eq!(output.final_text, "draft");
        let reason = output.intermediate.get("final_fallback_reason").expect("fallback reason recorded");
        assert!(reason.contains("api_final failed after 2 attempts"));
        assert!(reason.contains("TransportError"));
        assert_eq!(output.stage_usage.get("api_final").unwrap(), &TokenUsage::default());
    }

    #[tokio::test]
    async fn format_error_fallback_reason_names_the_format_variant() {
        let format_error = UpstreamResponseFormatError {
            reason: "missing choices".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            message_count: 1,
            status_code: 200,
            payload_preview: "{}".to_string(),
        };
        let gateway = ScriptedGateway::new(vec![
            ok("draft"),
            ok("feedback"),
            Err(UpstreamError::Format(format_error.clone())),
            Err(UpstreamError::Format(format_error)),
        ]);
        let output = run(&runtime(), &[ChatMessage::user("hi")], &gateway, &IndexMap::new())
            .await
            .expect("workflow falls back rather than failing");

        let reason = output.intermediate.get("final_fallback_reason").expect("fallback reason recorded");
        assert!(reason.contains("UpstreamResponseFormatError"));
    }
}
