//! OpenAI-compatible HTTP upstream gateway.
//!
//! Grounded on `examples/original_source/src/adapter_critic/http_gateway.py`'s
//! `OpenAICompatibleHttpGateway`: request assembly, strict response-shape
//! validation, and the empty-assistant-payload retry-once-then-accept rule.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::messages::{ChatMessage, FunctionCall, ToolCall, TokenUsage, UpstreamResult};

use super::{
    http_client, is_empty_assistant_edge_case, malformed_tool_call_issues, payload_preview, UpstreamError,
    UpstreamGateway, UpstreamResponseFormatError,
};

const MAX_EMPTY_ASSISTANT_ATTEMPTS: u32 = 2;

/// Talks to any upstream exposing an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatibleGateway {
    api_key: Option<String>,
    default_api_key_env: Option<String>,
}

impl OpenAiCompatibleGateway {
    /// Build a gateway. `default_api_key_env` names the environment variable consulted when
    /// a stage target doesn't set its own `api_key_env`; pass `None` to disable the fallback.
    pub fn new(default_api_key_env: impl Into<Option<String>>) -> Self {
        Self {
            api_key: None,
            default_api_key_env: default_api_key_env.into(),
        }
    }

    /// Override the resolved API key unconditionally (primarily for tests).
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn resolve_api_key(&self, api_key_env: Option<&str>) -> Option<String> {
        if let Some(api_key) = &self.api_key {
            if !api_key.is_empty() {
                return Some(api_key.clone());
            }
        }

        let key_env = api_key_env.or(self.default_api_key_env.as_deref())?;
        if key_env.is_empty() {
            return None;
        }
        std::env::var(key_env).ok()
    }
}

fn format_error(
    reason: &str,
    model: &str,
    base_url: &str,
    message_count: usize,
    status_code: u16,
    response_body: &Value,
) -> UpstreamResponseFormatError {
    UpstreamResponseFormatError {
        reason: reason.to_string(),
        model: model.to_string(),
        base_url: base_url.to_string(),
        message_count,
        status_code,
        payload_preview: payload_preview(response_body, 400),
    }
}

#[async_trait]
impl UpstreamGateway for OpenAiCompatibleGateway {
    async fn complete(
        &self,
        model: &str,
        base_url: &str,
        messages: &[ChatMessage],
        api_key_env: Option<&str>,
        request_options: &IndexMap<String, Value>,
    ) -> Result<UpstreamResult, UpstreamError> {
        let resolved_api_key = self.resolve_api_key(api_key_env);

        let message_values: Vec<Value> = messages
            .iter()
            .map(|message| serde_json::to_value(message).expect("ChatMessage always serializes"))
            .collect();

        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::String(model.to_string()));
        payload.insert("messages".to_string(), Value::Array(message_values));
        for (key, value) in request_options {
            if key != "model" && key != "messages" {
                payload.insert(key.clone(), value.clone());
            }
        }
        let payload = Value::Object(payload);

        let issues = malformed_tool_call_issues(messages);
        if !issues.is_empty() {
            log::warn!(
                "detected malformed assistant tool calls before upstream request model={model} base_url={base_url} issues_count={}",
                issues.len()
            );
        }

        log::debug!(
            "upstream request model={model} base_url={base_url} message_count={}",
            messages.len()
        );

        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));

        for attempt in 1..=MAX_EMPTY_ASSISTANT_ATTEMPTS {
            let mut request = http_client::http_client().post(&endpoint).json(&payload);
            if let Some(api_key) = &resolved_api_key {
                if !api_key.is_empty() {
                    request = request.bearer_auth(api_key);
                }
            }

            let response = request
                .send()
                .await
                .map_err(|err| UpstreamError::Transport(format!("request to {endpoint} failed: {err}")))?;

            let status_code = response.status().as_u16();
            if !response.status().is_success() {
                return Err(UpstreamError::Transport(format!(
                    "upstream {endpoint} returned status {status_code}"
                )));
            }

            let data: Value = response.json().await.map_err(|err| {
                UpstreamError::Format(format_error(
                    &format!("response body is not valid JSON: {err}"),
                    model,
                    base_url,
                    messages.len(),
                    status_code,
                    &Value::Null,
                ))
            })?;

            let Some(data_object) = data.as_object() else {
                return Err(UpstreamError::Format(format_error(
                    "response body is not a JSON object",
                    model,
                    base_url,
                    messages.len(),
                    status_code,
                    &data,
                )));
            };

            let choices = data_object.get("choices").and_then(Value::as_array);
            let Some(first_choice) = choices.and_then(|choices| choices.first()) else {
                return Err(UpstreamError::Format(format_error(
                    "response missing non-empty choices",
                    model,
                    base_url,
                    messages.len(),
                    status_code,
                    &data,
                )));
            };

            let Some(first_choice_object) = first_choice.as_object() else {
                return Err(UpstreamError::Format(format_error(
                    "choices[0] is not an object",
                    model,
                    base_url,
                    messages.len(),
                    status_code,
                    &data,
                )));
            };

            let Some(message) = first_choice_object.get("message").and_then(Value::as_object) else {
                return Err(UpstreamError::Format(format_error(
                    "choices[0].message is not an object",
                    model,
                    base_url,
                    messages.len(),
                    status_code,
                    &data,
                )));
            };

            let tool_calls_value = message.get("tool_calls");
            let tool_calls = match tool_calls_value {
                None | Some(Value::Null) => None,
                Some(Value::Array(items)) => {
                    if items.iter().all(Value::is_object) {
                        if items.is_empty() {
                            None
                        } else {
                            Some(parse_tool_calls(items, model, base_url, messages.len(), status_code, &data)?)
                        }
                    } else {
                        return Err(UpstreamError::Format(format_error(
                            "choices[0].message.tool_calls is not a list of objects",
                            model,
                            base_url,
                            messages.len(),
                            status_code,
                            &data,
                        )));
                    }
                }
                Some(_) => {
                    return Err(UpstreamError::Format(format_error(
                        "choices[0].message.tool_calls is not a list of objects",
                        model,
                        base_url,
                        messages.len(),
                        status_code,
                        &data,
                    )));
                }
            };

            let usage = data_object.get("usage").and_then(Value::as_object);
            let content_value = message.get("content");
            let content = match content_value {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|part| part.as_object()?.get("text")?.as_str())
                    .collect::<Vec<_>>()
                    .join(""),
                _ => String::new(),
            };

            if content.is_empty() && tool_calls.is_none() {
                if is_empty_assistant_edge_case(content_value, tool_calls_value) {
                    if attempt < MAX_EMPTY_ASSISTANT_ATTEMPTS {
                        log::warn!(
                            "empty assistant payload without tool calls; retrying upstream request model={model} base_url={base_url} attempt={attempt}/{MAX_EMPTY_ASSISTANT_ATTEMPTS}"
                        );
                        continue;
                    }
                    log::warn!(
                        "empty assistant payload without tool calls persisted after retry; accepting empty content model={model} base_url={base_url}"
                    );
                } else {
                    return Err(UpstreamError::Format(format_error(
                        "assistant message has empty content and no tool calls",
                        model,
                        base_url,
                        messages.len(),
                        status_code,
                        &data,
                    )));
                }
            }

            let finish_reason = first_choice_object
                .get("finish_reason")
                .and_then(Value::as_str)
                .unwrap_or("stop")
                .to_string();

            let token_usage = TokenUsage {
                prompt_tokens: usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_i64).unwrap_or(0),
                completion_tokens: usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_i64).unwrap_or(0),
                total_tokens: usage.and_then(|u| u.get("total_tokens")).and_then(Value::as_i64).unwrap_or(0),
            };

            log::debug!(
                "upstream parsed model={model} content_len={} tool_calls_count={} finish_reason={finish_reason}",
                content.len(),
                tool_calls.as_ref().map_or(0, Vec::len),
            );

            return Ok(UpstreamResult {
                content,
                usage: token_usage,
                tool_calls,
                finish_reason,
            });
        }

        unreachable!("max empty-assistant attempts exhausted without returning or erroring")
    }
}

fn parse_tool_calls(
    items: &[Value],
    model: &str,
    base_url: &str,
    message_count: usize,
    status_code: u16,
    data: &Value,
) -> Result<Vec<ToolCall>, UpstreamResponseFormatError> {
    let mut tool_calls = Vec::with_capacity(items.len());
    for item in items {
        let object = item.as_object().expect("caller already checked is_object");
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let function = object.get("function").and_then(Value::as_object).ok_or_else(|| {
            format_error(
                "choices[0].message.tool_calls[*].function is not an object",
                model,
                base_url,
                message_count,
                status_code,
                data,
            )
        })?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let arguments = function.get("arguments").and_then(Value::as_str).ok_or_else(|| {
            format_error(
                "choices[0].message.tool_calls[*].function.arguments is not a string",
                model,
                base_url,
                message_count,
                status_code,
                data,
            )
        })?;
        serde_json::from_str::<Value>(arguments).map_err(|_| {
            format_error(
                "choices[0].message.tool_calls[*].function.arguments is not valid JSON",
                model,
                base_url,
                message_count,
                status_code,
                data,
            )
        })?;
        tool_calls.push(ToolCall {
            id,
            r#type: "function".to_string(),
            function: FunctionCall {
                name,
                arguments: arguments.to_string(),
            },
        });
    }
    Ok(tool_calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_explicit_api_key_over_env() {
        let gateway = OpenAiCompatibleGateway::new(None).with_api_key("explicit-key");
        assert_eq!(gateway.resolve_api_key(Some("SOME_ENV")), Some("explicit-key".to_string()));
    }

    #[test]
    fn falls_back_to_default_env_when_stage_env_absent() {
        std::env::set_var("OPENAI_COMPATIBLE_TEST_KEY", "env-key");
        let gateway = OpenAiCompatibleGateway::new(Some("OPENAI_COMPATIBLE_TEST_KEY".to_string()));
        assert_eq!(gateway.resolve_api_key(None), Some("env-key".to_string()));
        std::env::remove_var("OPENAI_COMPATIBLE_TEST_KEY");
    }

    #[test]
    fn no_api_key_available_resolves_to_none() {
        let gateway = OpenAiCompatibleGateway::new(None);
        assert_eq!(gateway.resolve_api_key(None), None);
    }
}
