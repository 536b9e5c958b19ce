//! Vertex AI upstream gateway for Anthropic (Claude) models.
//!
//! Grounded on `examples/original_source/src/adapter_critic/vertex_gateway.py`'s
//! `VertexAICompatibleHttpGateway`: endpoint resolution, the OpenAI-to-Anthropic
//! message mapping, and response parsing. Authentication is simplified from the
//! original's `gcloud auth print-access-token` subprocess call to a bearer token
//! read from an environment variable (see `DESIGN.md`).

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::messages::{ChatMessage, FunctionCall, Role, ToolCall, TokenUsage, UpstreamResult};

use super::{http_client, payload_preview, UpstreamError, UpstreamGateway, UpstreamResponseFormatError};

const DEFAULT_MAX_TOKENS: i64 = 8192;

/// Name of the environment variable this gateway reads its bearer token from.
pub const VERTEX_ACCESS_TOKEN_ENV: &str = "VERTEX_ACCESS_TOKEN";

/// True when `model`/`base_url` identify a Vertex AI Anthropic (Claude) deployment, per the
/// same heuristic as `is_vertex_anthropic_target` in the grounding source.
pub fn is_vertex_anthropic_target(model: &str, base_url: &str) -> bool {
    let normalized_base_url = base_url.to_lowercase();
    if !normalized_base_url.contains("aiplatform.googleapis.com") {
        return false;
    }
    if normalized_base_url.contains("/publishers/anthropic/models/") {
        return true;
    }
    if !normalized_base_url.contains("/projects/") || !normalized_base_url.contains("/locations/") {
        return false;
    }
    if normalized_base_url.contains("/endpoints/openapi") {
        return false;
    }
    let normalized_model = model.to_lowercase();
    normalized_model.starts_with("anthropic/") || normalized_model.contains("claude")
}

fn normalize_model_name(model: &str) -> &str {
    model.strip_prefix("anthropic/").unwrap_or(model)
}

fn resolve_endpoint(model: &str, base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let lowered = trimmed.to_lowercase();

    if let Some(prefix) = lowered.strip_suffix(":streamrawpredict") {
        return format!("{}:rawPredict", &trimmed[..prefix.len()]);
    }
    if lowered.ends_with(":rawpredict") {
        return trimmed.to_string();
    }
    if lowered.contains("/publishers/anthropic/models/") {
        return format!("{trimmed}:rawPredict");
    }

    format!("{trimmed}/publishers/anthropic/models/{}:rawPredict", normalize_model_name(model))
}

fn extract_system_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|message| message.role == Role::System)
        .filter_map(|message| message.content.as_deref())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn message_to_vertex_content(message: &ChatMessage) -> Result<Option<Value>, String> {
    match message.role {
        Role::System => Ok(None),
        Role::User => Ok(Some(json!({"role": "user", "content": message.content_str()}))),
        Role::Assistant => {
            let mut content_blocks = Vec::new();
            if !message.content_str().is_empty() {
                content_blocks.push(json!({"type": "text", "text": message.content_str()}));
            }

            if let Some(tool_calls) = message.tool_calls() {
                for tool_call in tool_calls {
                    let id = tool_call.get("id").and_then(Value::as_str).ok_or("assistant tool_call id must be a string")?;
                    let function = tool_call
                        .get("function")
                        .and_then(Value::as_object)
                        .ok_or("assistant tool_call function must be an object")?;
                    let name = function
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or("assistant tool_call function.name must be a string")?;
                    let arguments = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .ok_or("assistant tool_call function.arguments must be a string")?;
                    let parsed_arguments: Value = serde_json::from_str(arguments)
                        .map_err(|_| "assistant tool_call function.arguments must decode to JSON")?;
                    if !parsed_arguments.is_object() {
                        return Err("assistant tool_call function.arguments must decode to an object".to_string());
                    }
                    content_blocks.push(json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": parsed_arguments,
                    }));
                }
            }

            if content_blocks.is_empty() {
                Ok(Some(json!({"role": "assistant", "content": ""})))
            } else {
                Ok(Some(json!({"role": "assistant", "content": content_blocks})))
            }
        }
        Role::Tool => {
            let tool_call_id = message
                .extra
                .get("tool_call_id")
                .and_then(Value::as_str)
                .ok_or("tool role message requires tool_call_id")?;
            Ok(Some(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": message.content_str(),
                }],
            })))
        }
    }
}

fn map_tools(tools_value: &Value) -> Option<Vec<Value>> {
    let tools = tools_value.as_array()?;
    let mapped: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            let function = tool.as_object()?.get("function")?.as_object()?;
            let name = function.get("name")?.as_str()?;
            let mut mapped = Map::new();
            mapped.insert("name".to_string(), Value::String(name.to_string()));
            if let Some(description) = function.get("description").and_then(Value::as_str) {
                mapped.insert("description".to_string(), Value::String(description.to_string()));
            }
            let input_schema = function
                .get("parameters")
                .filter(|value| value.is_object())
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
            mapped.insert("input_schema".to_string(), input_schema);
            Some(Value::Object(mapped))
        })
        .collect();
    if mapped.is_empty() {
        None
    } else {
        Some(mapped)
    }
}

fn map_tool_choice(tool_choice_value: &Value) -> Option<Value> {
    match tool_choice_value {
        Value::String(s) if s == "auto" => Some(json!({"type": "auto"})),
        Value::String(s) if s == "required" => Some(json!({"type": "any"})),
        Value::Object(object) if object.get("type").and_then(Value::as_str) == Some("function") => {
            let name = object.get("function")?.as_object()?.get("name")?.as_str()?;
            Some(json!({"type": "tool", "name": name}))
        }
        _ => None,
    }
}

fn map_request_options(request_options: &IndexMap<String, Value>) -> Map<String, Value> {
    let mut mapped = Map::new();

    if let Some(max_tokens) = request_options.get("max_tokens").and_then(Value::as_i64) {
        if max_tokens > 0 {
            mapped.insert("max_tokens".to_string(), json!(max_tokens));
        }
    }
    if let Some(temperature) = request_options.get("temperature").and_then(Value::as_f64) {
        mapped.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request_options.get("top_p").and_then(Value::as_f64) {
        mapped.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(top_k) = request_options.get("top_k").and_then(Value::as_i64) {
        mapped.insert("top_k".to_string(), json!(top_k));
    }
    if let Some(stop) = request_options.get("stop") {
        let stop_sequences = match stop {
            Value::String(s) => Some(vec![Value::String(s.clone())]),
            Value::Array(items) if items.iter().all(Value::is_string) => Some(items.clone()),
            _ => None,
        };
        if let Some(stop_sequences) = stop_sequences {
            mapped.insert("stop_sequences".to_string(), Value::Array(stop_sequences));
        }
    }
    if let Some(tools) = request_options.get("tools").and_then(map_tools) {
        mapped.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(tool_choice) = request_options.get("tool_choice").and_then(map_tool_choice) {
        mapped.insert("tool_choice".to_string(), tool_choice);
    }

    mapped
}

fn map_finish_reason(stop_reason: Option<&str>) -> String {
    match stop_reason {
        Some("tool_use") => "tool_calls".to_string(),
        Some("max_tokens") => "length".to_string(),
        _ => "stop".to_string(),
    }
}

fn map_usage(usage: Option<&Value>) -> TokenUsage {
    let usage = usage.and_then(Value::as_object);
    let prompt_tokens = usage
        .and_then(|u| u.get("input_tokens").or_else(|| u.get("prompt_tokens")))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion_tokens = usage
        .and_then(|u| u.get("output_tokens").or_else(|| u.get("completion_tokens")))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let total_tokens = usage
        .and_then(|u| u.get("total_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(prompt_tokens + completion_tokens);

    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

/// Talks to a Vertex AI Anthropic (Claude) `rawPredict` endpoint.
pub struct VertexAnthropicGateway;

impl Default for VertexAnthropicGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexAnthropicGateway {
    /// Build a gateway that reads its bearer token from [`VERTEX_ACCESS_TOKEN_ENV`].
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamGateway for VertexAnthropicGateway {
    async fn complete(
        &self,
        model: &str,
        base_url: &str,
        messages: &[ChatMessage],
        _api_key_env: Option<&str>,
        request_options: &IndexMap<String, Value>,
    ) -> Result<UpstreamResult, UpstreamError> {
        let endpoint = resolve_endpoint(model, base_url);
        let access_token = std::env::var(VERTEX_ACCESS_TOKEN_ENV)
            .map_err(|_| UpstreamError::Transport(format!("{VERTEX_ACCESS_TOKEN_ENV} is not set")))?;

        let mut anthropic_messages = Vec::with_capacity(messages.len());
        for message in messages {
            match message_to_vertex_content(message) {
                Ok(Some(value)) => anthropic_messages.push(value),
                Ok(None) => {}
                Err(reason) => {
                    return Err(UpstreamError::Format(UpstreamResponseFormatError {
                        reason,
                        model: model.to_string(),
                        base_url: endpoint,
                        message_count: messages.len(),
                        status_code: 0,
                        payload_preview: String::new(),
                    }));
                }
            }
        }

        let mapped_request_options = map_request_options(request_options);
        let max_tokens = mapped_request_options
            .get("max_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut payload = Map::new();
        payload.insert("anthropic_version".to_string(), Value::String("vertex-2023-10-16".to_string()));
        payload.insert("messages".to_string(), Value::Array(anthropic_messages));
        payload.insert("max_tokens".to_string(), json!(max_tokens));

        let system_prompt = extract_system_prompt(messages);
        if !system_prompt.is_empty() {
            payload.insert("system".to_string(), Value::String(system_prompt));
        }
        for (key, value) in mapped_request_options {
            if key != "max_tokens" {
                payload.insert(key, value);
            }
        }
        let payload = Value::Object(payload);

        log::debug!(
            "vertex anthropic request model={model} endpoint={endpoint} message_count={}",
            messages.len()
        );

        let response = http_client::http_client()
            .post(&endpoint)
            .bearer_auth(&access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(format!("request to {endpoint} failed: {err}")))?;

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(UpstreamError::Transport(format!(
                "vertex endpoint {endpoint} returned status {status_code}"
            )));
        }

        let data: Value = response.json().await.map_err(|err| {
            UpstreamError::Format(UpstreamResponseFormatError {
                reason: format!("vertex anthropic response body is not valid JSON: {err}"),
                model: model.to_string(),
                base_url: endpoint.clone(),
                message_count: messages.len(),
                status_code,
                payload_preview: String::new(),
            })
        })?;

        let format_error = |reason: &str, body: &Value| {
            UpstreamError::Format(UpstreamResponseFormatError {
                reason: reason.to_string(),
                model: model.to_string(),
                base_url: endpoint.clone(),
                message_count: messages.len(),
                status_code,
                payload_preview: payload_preview(body, 400),
            })
        };

        let Some(data_object) = data.as_object() else {
            return Err(format_error("vertex anthropic response body is not a JSON object", &data));
        };

        let mut content_parts = Vec::new();
        let mut tool_calls = Vec::new();

        match data_object.get("content") {
            Some(Value::String(s)) => content_parts.push(s.clone()),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    let Some(block_object) = block.as_object() else {
                        return Err(format_error("vertex anthropic content block is not an object", &data));
                    };
                    match block_object.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block_object.get("text").and_then(Value::as_str) {
                                content_parts.push(text.to_string());
                            }
                        }
                        Some("tool_use") => {
                            let id = block_object
                                .get("id")
                                .and_then(Value::as_str)
                                .ok_or_else(|| format_error("vertex anthropic tool_use block id is not a string", &data))?;
                            let name = block_object
                                .get("name")
                                .and_then(Value::as_str)
                                .ok_or_else(|| format_error("vertex anthropic tool_use block name is not a string", &data))?;
                            let input = block_object
                                .get("input")
                                .filter(|value| value.is_object())
                                .ok_or_else(|| format_error("vertex anthropic tool_use block input is not an object", &data))?;
                            tool_calls.push(ToolCall {
                                id: id.to_string(),
                                r#type: "function".to_string(),
                                function: FunctionCall {
                                    name: name.to_string(),
                                    arguments: serde_json::to_string(input).expect("object always serializes"),
                                },
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        let content = content_parts.join("");
        let normalized_tool_calls = if tool_calls.is_empty() { None } else { Some(tool_calls) };

        if content.is_empty() && normalized_tool_calls.is_none() {
            return Err(format_error("assistant message has empty content and no tool calls", &data));
        }

        let finish_reason = map_finish_reason(data_object.get("stop_reason").and_then(Value::as_str));
        let usage = map_usage(data_object.get("usage"));

        log::debug!(
            "vertex anthropic parsed model={model} endpoint={endpoint} content_len={} tool_calls_count={} finish_reason={finish_reason}",
            content.len(),
            normalized_tool_calls.as_ref().map_or(0, Vec::len),
        );

        Ok(UpstreamResult {
            content,
            usage,
            tool_calls: normalized_tool_calls,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_publisher_path_target() {
        assert!(is_vertex_anthropic_target(
            "claude-3-5-sonnet",
            "https://us-east5-aiplatform.googleapis.com/v1/projects/p/locations/us-east5/publishers/anthropic/models/claude-3-5-sonnet"
        ));
    }

    #[test]
    fn rejects_openapi_endpoint_target() {
        assert!(!is_vertex_anthropic_target(
            "gpt-4o",
            "https://us-east5-aiplatform.googleapis.com/v1/projects/p/locations/us-east5/endpoints/openapi"
        ));
    }

    #[test]
    fn rejects_non_vertex_host() {
        assert!(!is_vertex_anthropic_target("claude-3-5-sonnet", "https://api.anthropic.com/v1"));
    }

    #[test]
    fn resolves_rawpredict_endpoint_from_publisher_path() {
        let endpoint = resolve_endpoint(
            "anthropic/claude-3-5-sonnet",
            "https://us-east5-aiplatform.googleapis.com/v1/projects/p/locations/us-east5/publishers/anthropic/models/claude-3-5-sonnet",
        );
        assert!(endpoint.ends_with(":rawPredict"));
    }

    #[test]
    fn finish_reason_maps_tool_use() {
        assert_eq!(map_finish_reason(Some("tool_use")), "tool_calls");
        assert_eq!(map_finish_reason(Some("end_turn")), "stop");
    }
}
