//! Dispatches an upstream call to the OpenAI-compatible or Vertex Anthropic
//! gateway based on the target's shape.
//!
//! Grounded on `examples/original_source/src/adapter_critic/routing_gateway.py`.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::messages::{ChatMessage, UpstreamResult};

use super::vertex::is_vertex_anthropic_target;
use super::{UpstreamError, UpstreamGateway};

/// Routes each call to either an OpenAI-compatible or a Vertex Anthropic upstream gateway.
pub struct RoutingGateway {
    openai_gateway: Box<dyn UpstreamGateway>,
    vertex_gateway: Box<dyn UpstreamGateway>,
}

impl RoutingGateway {
    /// Build a router over the two concrete upstream gateways.
    pub fn new(openai_gateway: Box<dyn UpstreamGateway>, vertex_gateway: Box<dyn UpstreamGateway>) -> Self {
        Self {
            openai_gateway,
            vertex_gateway,
        }
    }
}

#[async_trait]
impl UpstreamGateway for RoutingGateway {
    async fn complete(
        &self,
        model: &str,
        base_url: &str,
        messages: &[ChatMessage],
        api_key_env: Option<&str>,
        request_options: &IndexMap<String, Value>,
    ) -> Result<UpstreamResult, UpstreamError> {
        let gateway = if is_vertex_anthropic_target(model, base_url) {
            &self.vertex_gateway
        } else {
            &self.openai_gateway
        };

        gateway.complete(model, base_url, messages, api_key_env, request_options).await
    }
}
