//! Incoming request parsing and per-request override extraction.
//!
//! Grounded on `examples/original_source/src/adapter_critic/contracts.py`'s
//! `ParsedRequest`/`parse_request_payload`, extended with the `advisor`
//! stage and `max_adapter_retries` that `spec.md` adds on top of that
//! snapshot.

use config::Mode;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::messages::ChatMessage;

/// Per-request overrides carried under `x_adapter_critic`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterCriticOverrides {
    /// Overrides the served model's default workflow mode.
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Overrides the `api` stage model name.
    #[serde(default)]
    pub api_model: Option<String>,
    /// Overrides the `api` stage base URL.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Overrides the `adapter` stage model name.
    #[serde(default)]
    pub adapter_model: Option<String>,
    /// Overrides the `adapter` stage base URL.
    #[serde(default)]
    pub adapter_base_url: Option<String>,
    /// Overrides the `critic` stage model name.
    #[serde(default)]
    pub critic_model: Option<String>,
    /// Overrides the `critic` stage base URL.
    #[serde(default)]
    pub critic_base_url: Option<String>,
    /// Overrides the `advisor` stage model name.
    #[serde(default)]
    pub advisor_model: Option<String>,
    /// Overrides the `advisor` stage base URL.
    #[serde(default)]
    pub advisor_base_url: Option<String>,
    /// Overrides the number of adapter retries beyond the first attempt. Defaults to 0.
    #[serde(default)]
    pub max_adapter_retries: Option<u32>,
}

/// A Chat Completions request with every non-`model`/`messages`/`x_adapter_critic`
/// top-level key preserved verbatim in `request_options`.
#[derive(Debug, Clone)]
pub struct ChatCompletionRequest {
    /// The served model name the client asked for.
    pub model: String,
    /// Ordered conversation turns.
    pub messages: Vec<ChatMessage>,
    /// Every other top-level request field (`tools`, `tool_choice`, `temperature`, ...),
    /// forwarded verbatim to upstream calls where tool parity matters.
    pub request_options: IndexMap<String, Value>,
}

#[derive(Deserialize)]
struct RawRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    x_adapter_critic: Option<Value>,
    #[serde(flatten)]
    rest: IndexMap<String, Value>,
}

/// The result of parsing an incoming request body.
pub struct ParsedRequest {
    /// The parsed request, with `request_options` already separated out.
    pub request: ChatCompletionRequest,
    /// Resolved per-request overrides (empty when none were supplied).
    pub overrides: AdapterCriticOverrides,
}

/// Parse a raw JSON request body into a [`ParsedRequest`].
///
/// `x_adapter_critic` is read first from the top level, else from
/// `extra_body.x_adapter_critic`; top level always wins. Unknown fields in
/// either location fail with [`GatewayError::Validation`].
pub fn parse_request_payload(body: &[u8]) -> Result<ParsedRequest> {
    let raw: RawRequest =
        serde_json::from_slice(body).map_err(|err| GatewayError::Validation(format!("invalid request body: {err}")))?;

    let override_value = raw.x_adapter_critic.clone().or_else(|| {
        raw.rest
            .get("extra_body")
            .and_then(|extra_body| extra_body.get("x_adapter_critic"))
            .cloned()
    });

    let overrides = match override_value {
        Some(value) => serde_json::from_value(value)
            .map_err(|err| GatewayError::Validation(format!("invalid x_adapter_critic overrides: {err}")))?,
        None => AdapterCriticOverrides::default(),
    };

    Ok(ParsedRequest {
        request: ChatCompletionRequest {
            model: raw.model,
            messages: raw.messages,
            request_options: raw.rest,
        },
        overrides,
    })
}
