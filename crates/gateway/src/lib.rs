//! Library entrypoint: wires request parsing, runtime resolution, workflow
//! dispatch, and response assembly into an axum [`Router`].
//!
//! Grounded on `examples/grafbase-nexus/crates/llm/src/proxy/anthropic.rs`'s
//! `Arc`-wrapped shared-state pattern.

#![deny(missing_docs)]

mod edits;
mod error;
mod health;
mod messages;
mod prompts;
mod provider;
mod request;
mod response_builder;
mod response_shape;
mod runtime;
mod usage;
mod workflows;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use config::AppConfig;

pub use error::{GatewayError, Result};
pub use health::DEFAULT_API_KEY_ENV;
pub use messages::{ChatMessage, FunctionCall, TokenUsage, ToolCall};
pub use provider::{OpenAiCompatibleGateway, RoutingGateway, UpstreamGateway, VertexAnthropicGateway};
pub use request::{AdapterCriticOverrides, ChatCompletionRequest};

use response_builder::{build_response, generate_response_id, ResponseInputs};

/// Shared, cheaply-cloned server state: immutable config plus the shared upstream gateway.
#[derive(Clone)]
struct AppState(Arc<AppStateInner>);

struct AppStateInner {
    config: AppConfig,
    gateway: Box<dyn UpstreamGateway>,
}

impl std::ops::Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Build the default [`UpstreamGateway`]: a [`RoutingGateway`] over an
/// [`OpenAiCompatibleGateway`] (using [`DEFAULT_API_KEY_ENV`] as its fallback
/// environment variable) and a [`VertexAnthropicGateway`].
pub fn default_gateway() -> Box<dyn UpstreamGateway> {
    Box::new(RoutingGateway::new(
        Box::new(OpenAiCompatibleGateway::new(Some(DEFAULT_API_KEY_ENV.to_string()))),
        Box::new(VertexAnthropicGateway::new()),
    ))
}

/// Build the axum [`Router`] serving `POST /v1/chat/completions` and `GET /healthz`.
pub fn router(config: AppConfig, gateway: Box<dyn UpstreamGateway>) -> Router {
    let state = AppState(Arc::new(AppStateInner { config, gateway }));

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>> {
    let parsed = request::parse_request_payload(&body)?;

    let runtime_config = runtime::resolve_runtime_config(&state.config, &parsed.request.model, &parsed.overrides)?;

    let output = workflows::dispatch(
        &runtime_config,
        &parsed.request.messages,
        state.gateway.as_ref(),
        &parsed.request.request_options,
    )
    .await?;

    let tokens = usage::aggregate_usage(output.stage_usage);

    let response = build_response(
        generate_response_id(),
        unix_timestamp(),
        &ResponseInputs {
            model: &parsed.request.model,
            mode: runtime_config.mode,
            final_text: &output.final_text,
            final_tool_calls: output.final_tool_calls.as_deref(),
            finish_reason: &output.finish_reason,
            intermediate: &output.intermediate,
            tokens: &tokens,
        },
    );

    Ok(Json(response))
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let report = health::run_healthcheck_default(&state.config).await;
    let status = if report.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report))
}

fn unix_timestamp() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|duration| duration.as_secs() as i64).unwrap_or(0)
}
