//! The Advisor workflow: an advisor model contributes guidance that is folded
//! into the conversation, then the api model answers with that guidance in hand.
//!
//! Grounded on `examples/original_source/src/adapter_critic/workflows/advisor.py`.

use indexmap::IndexMap;
use serde_json::Value;

use super::{require_stage_target, WorkflowOutput};
use crate::error::Result;
use crate::messages::ChatMessage;
use crate::prompts;
use crate::provider::UpstreamGateway;
use crate::runtime::RuntimeConfig;

pub(super) async fn run(
    runtime: &RuntimeConfig,
    messages: &[ChatMessage],
    gateway: &dyn UpstreamGateway,
    request_options: &IndexMap<String, Value>,
) -> Result<WorkflowOutput> {
    let advisor_target = require_stage_target(&runtime.advisor, "advisor")?;

    let advisor_system_prompt = runtime.advisor_system_prompt.as_deref().unwrap_or(prompts::ADVISOR_SYSTEM_PROMPT);
    let advisor_messages = prompts::build_advisor_messages(messages, advisor_system_prompt, request_options);

    let advisor_feedback = gateway
        .complete(
            &advisor_target.model,
            &advisor_target.base_url,
            &advisor_messages,
            advisor_target.api_key_env.as_deref(),
            &IndexMap::new(),
        )
        .await?;

    let api_messages = prompts::append_advisor_guidance_to_last_user_message(messages, &advisor_feedback.content);

    let api_response = gateway
        .complete(
            &runtime.api.model,
            &runtime.api.base_url,
            &api_messages,
            runtime.api.api_key_env.as_deref(),
            request_options,
        )
        .await?;

    let mut intermediate = IndexMap::new();
    intermediate.insert("advisor".to_string(), advisor_feedback.content.clone());
    intermediate.insert("final".to_string(), api_response.content.clone());

    let mut stage_usage = IndexMap::new();
    stage_usage.insert("advisor".to_string(), advisor_feedback.usage);
    stage_usage.insert("api".to_string(), api_response.usage);

    Ok(WorkflowOutput {
        final_text: api_response.content,
        intermediate,
        stage_usage,
        final_tool_calls: api_response.tool_calls,
        finish_reason: api_response.finish_reason,
    })
}
