//! The four workflow state machines and their dispatcher.
//!
//! Grounded on `examples/original_source/src/adapter_critic/dispatcher.py` and the
//! per-mode modules alongside it (`workflows/direct.py`, `adapter.py`, `critic.py`,
//! `advisor.py`).

mod adapter;
mod advisor;
mod critic;
mod direct;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::messages::{ChatMessage, ToolCall, TokenUsage};
use crate::provider::UpstreamGateway;
use crate::runtime::RuntimeConfig;

/// The result of running one workflow to completion.
#[derive(Debug, Clone)]
pub struct WorkflowOutput {
    /// The final assistant text.
    pub final_text: String,
    /// Named intermediate artifacts (draft text, critique, rejection reasons, ...), stable per
    /// mode per `spec.md` §3.
    pub intermediate: IndexMap<String, String>,
    /// Token usage keyed by stage name, stable per mode per `spec.md` §3.
    pub stage_usage: IndexMap<String, TokenUsage>,
    /// Final tool calls, if any.
    pub final_tool_calls: Option<Vec<ToolCall>>,
    /// Finish reason, already normalized by the workflow that produced it. Adapter and Critic
    /// derive it via `response_shape::infer_finish_reason` from the accepted candidate; Direct
    /// and Advisor pass the upstream api-stage call's finish reason through verbatim.
    pub finish_reason: String,
}

/// Run the workflow named by `runtime.mode` to completion.
pub async fn dispatch(
    runtime: &RuntimeConfig,
    messages: &[ChatMessage],
    gateway: &dyn UpstreamGateway,
    request_options: &IndexMap<String, Value>,
) -> Result<WorkflowOutput> {
    match runtime.mode {
        config::Mode::Direct => direct::run(runtime, messages, gateway, request_options).await,
        config::Mode::Adapter => adapter::run(runtime, messages, gateway, request_options).await,
        config::Mode::Critic => critic::run(runtime, messages, gateway, request_options).await,
        config::Mode::Advisor => advisor::run(runtime, messages, gateway, request_options).await,
    }
}

fn require_stage_target<'a>(stage: &'a Option<config::StageTarget>, stage_name: &str) -> Result<&'a config::StageTarget> {
    stage.as_ref().ok_or_else(|| {
        GatewayError::Internal(format!(
            "runtime config resolved mode requiring the {stage_name} stage but no target was resolved"
        ))
    })
}

/// A scripted [`UpstreamGateway`] double for workflow tests: returns queued results in call
/// order, oblivious to which stage is calling.
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use indexmap::IndexMap;
    use serde_json::Value;

    use super::ChatMessage;
    use crate::messages::UpstreamResult;
    use crate::provider::{UpstreamError, UpstreamGateway};

    pub(crate) struct ScriptedGateway {
        responses: Mutex<VecDeque<Result<UpstreamResult, UpstreamError>>>,
    }

    impl ScriptedGateway {
        pub(crate) fn new(responses: Vec<Result<UpstreamResult, UpstreamError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl UpstreamGateway for ScriptedGateway {
        async fn complete(
            &self,
            _model: &str,
            _base_url: &str,
            _messages: &[ChatMessage],
            _api_key_env: Option<&str>,
            _request_options: &IndexMap<String, Value>,
        ) -> Result<UpstreamResult, UpstreamError> {
            self.responses
                .lock()
                .expect("mutex not poisoned")
                .pop_front()
                .expect("ScriptedGateway received more calls than scripted responses")
        }
    }

    pub(crate) fn ok(content: &str) -> Result<UpstreamResult, UpstreamError> {
        Ok(UpstreamResult {
            content: content.to_string(),
            usage: Default::default(),
            tool_calls: None,
            finish_reason: "stop".to_string(),
        })
    }
}
