//! Resolution of a served model's static configuration plus per-request
//! overrides into a concrete [`RuntimeConfig`].
//!
//! Grounded on `examples/original_source/src/adapter_critic/config.py`'s
//! `resolve_runtime_config`, extended with the `advisor` stage.

use config::{AppConfig, Mode, ServedModelConfig, StageTarget};

use crate::error::{GatewayError, Result};
use crate::request::AdapterCriticOverrides;

/// The fully resolved configuration driving one request's workflow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// The workflow to run.
    pub mode: Mode,
    /// The primary upstream target.
    pub api: StageTarget,
    /// The adapter-stage target, present iff `mode == Adapter`.
    pub adapter: Option<StageTarget>,
    /// The critic-stage target, present iff `mode == Critic`.
    pub critic: Option<StageTarget>,
    /// The advisor-stage target, present iff `mode == Advisor`.
    pub advisor: Option<StageTarget>,
    /// Number of additional adapter attempts beyond the first. Defaults to 0.
    pub max_adapter_retries: u32,
    /// Adapter system prompt: config override, else the built-in default.
    pub adapter_system_prompt: Option<String>,
    /// Critic system prompt: config override, else the built-in default.
    pub critic_system_prompt: Option<String>,
    /// Advisor system prompt: config override, else the built-in default.
    pub advisor_system_prompt: Option<String>,
}

/// Resolve a served model name plus per-request overrides into a [`RuntimeConfig`].
///
/// Resolution order per stage:
/// 1. If the request supplies *both* `{stage}_model` and `{stage}_base_url`, use them.
/// 2. Else if the request supplies neither, use the configured `served_models.<name>.{stage}`
///    target; if that is also absent, fall back to the `api` target.
/// 3. A request supplying exactly one of the pair is rejected — partial overrides are
///    ambiguous and are not silently completed from config.
pub fn resolve_runtime_config(
    config: &AppConfig,
    served_model_name: &str,
    overrides: &AdapterCriticOverrides,
) -> Result<RuntimeConfig> {
    let served = config.served_models.get(served_model_name).ok_or_else(|| {
        GatewayError::Routing(format!("unknown model \"{served_model_name}\""))
    })?;

    let mode = overrides.mode.unwrap_or(served.mode);

    let api = resolve_stage(
        "api",
        Some(&served.api),
        overrides.api_model.as_deref(),
        overrides.api_base_url.as_deref(),
    )?
    .expect("api stage target is always present on a validated ServedModelConfig");

    let adapter = resolve_required_stage(
        mode == Mode::Adapter,
        "adapter",
        served,
        overrides.adapter_model.as_deref(),
        overrides.adapter_base_url.as_deref(),
        &api,
    )?;
    let critic = resolve_required_stage(
        mode == Mode::Critic,
        "critic",
        served,
        overrides.critic_model.as_deref(),
        overrides.critic_base_url.as_deref(),
        &api,
    )?;
    let advisor = resolve_required_stage(
        mode == Mode::Advisor,
        "advisor",
        served,
        overrides.advisor_model.as_deref(),
        overrides.advisor_base_url.as_deref(),
        &api,
    )?;

    Ok(RuntimeConfig {
        mode,
        api,
        adapter,
        critic,
        advisor,
        max_adapter_retries: overrides.max_adapter_retries.unwrap_or(0),
        adapter_system_prompt: served.adapter_system_prompt.clone(),
        critic_system_prompt: served.critic_system_prompt.clone(),
        advisor_system_prompt: served.advisor_system_prompt.clone(),
    })
}

/// Resolve a stage target needed only when `required` is true, falling back to `api` when
/// neither an override nor a configured target is present.
fn resolve_required_stage(
    required: bool,
    stage_name: &str,
    served: &ServedModelConfig,
    override_model: Option<&str>,
    override_base_url: Option<&str>,
    api: &StageTarget,
) -> Result<Option<StageTarget>> {
    if !required {
        return Ok(None);
    }

    let configured = match stage_name {
        "adapter" => served.adapter.as_ref(),
        "critic" => served.critic.as_ref(),
        "advisor" => served.advisor.as_ref(),
        _ => unreachable!("resolve_required_stage called with unknown stage name"),
    };

    let resolved = resolve_stage(stage_name, configured, override_model, override_base_url)?
        .unwrap_or_else(|| api.clone());

    Ok(Some(resolved))
}

/// Merge a configured stage target with a request-level override pair.
///
/// Returns `Ok(None)` when both the override and the configured target are absent, letting
/// the caller decide on a fallback.
fn resolve_stage(
    stage_name: &str,
    configured: Option<&StageTarget>,
    override_model: Option<&str>,
    override_base_url: Option<&str>,
) -> Result<Option<StageTarget>> {
    match (override_model, override_base_url) {
        (Some(model), Some(base_url)) => Ok(Some(StageTarget {
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key_env: configured.and_then(|stage| stage.api_key_env.clone()),
        })),
        (None, None) => Ok(configured.cloned()),
        _ => Err(GatewayError::Routing(format!(
            "{stage_name}_model and {stage_name}_base_url must be overridden together"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn config() -> AppConfig {
        toml::from_str(indoc! {r#"
            [served_models.assistant]
            mode = "adapter"
            api = { model = "gpt-4o-mini", base_url = "https://api.openai.com/v1" }
            adapter = { model = "gpt-4o", base_url = "https://api.openai.com/v1" }
        "#})
        .expect("valid config")
    }

    #[test]
    fn resolves_configured_adapter_stage() {
        let config = config();
        let runtime = resolve_runtime_config(&config, "assistant", &AdapterCriticOverrides::default())
            .expect("resolves");
        assert_eq!(runtime.mode, Mode::Adapter);
        assert_eq!(runtime.adapter.unwrap().model, "gpt-4o");
    }

    #[test]
    fn falls_back_to_api_when_stage_unconfigured() {
        let config = config();
        let overrides = AdapterCriticOverrides {
            mode: Some(Mode::Critic),
            ..Default::default()
        };
        let runtime = resolve_runtime_config(&config, "assistant", &overrides).expect("resolves");
        assert_eq!(runtime.critic.unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn rejects_partial_stage_override() {
        let config = config();
        let overrides = AdapterCriticOverrides {
            adapter_model: Some("custom-model".to_string()),
            ..Default::default()
        };
        let error = resolve_runtime_config(&config, "assistant", &overrides).expect_err("partial override rejected");
        assert!(matches!(error, GatewayError::Routing(_)));
    }

    #[test]
    fn unknown_model_is_routing_error() {
        let config = config();
        let error = resolve_runtime_config(&config, "missing", &AdapterCriticOverrides::default())
            .expect_err("unknown model rejected");
        assert!(matches!(error, GatewayError::Routing(_)));
    }

    #[test]
    fn full_stage_override_wins_over_config() {
        let config = config();
        let overrides = AdapterCriticOverrides {
            adapter_model: Some("override-model".to_string()),
            adapter_base_url: Some("https://override.example/v1".to_string()),
            ..Default::default()
        };
        let runtime = resolve_runtime_config(&config, "assistant", &overrides).expect("resolves");
        let adapter = runtime.adapter.unwrap();
        assert_eq!(adapter.model, "override-model");
        assert_eq!(adapter.base_url, "https://override.example/v1");
    }
}
