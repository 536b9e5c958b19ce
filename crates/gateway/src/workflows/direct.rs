//! The Direct workflow: a single upstream call, forwarded unchanged.
//!
//! Grounded on `examples/original_source/src/adapter_critic/workflows/direct.py`.

use indexmap::IndexMap;
use serde_json::Value;

use super::WorkflowOutput;
use crate::error::Result;
use crate::messages::ChatMessage;
use crate::provider::UpstreamGateway;
use crate::runtime::RuntimeConfig;

pub(super) async fn run(
    runtime: &RuntimeConfig,
    messages: &[ChatMessage],
    gateway: &dyn UpstreamGateway,
    request_options: &IndexMap<String, Value>,
) -> Result<WorkflowOutput> {
    let result = gateway
        .complete(
            &runtime.api.model,
            &runtime.api.base_url,
            messages,
            runtime.api.api_key_env.as_deref(),
            request_options,
        )
        .await?;

    let mut intermediate = IndexMap::new();
    intermediate.insert("api".to_string(), result.content.clone());

    let mut stage_usage = IndexMap::new();
    stage_usage.insert("api".to_string(), result.usage);

    Ok(WorkflowOutput {
        final_text: result.content,
        intermediate,
        stage_usage,
        final_tool_calls: result.tool_calls,
        finish_reason: result.finish_reason,
    })
}
