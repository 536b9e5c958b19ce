//! Static configuration for the adapter/critic gateway.
//!
//! This crate maps the `served_models.toml` configuration file onto typed
//! structures. It knows nothing about HTTP, upstream calls, or per-request
//! overrides — those live in the `gateway` crate, which resolves a
//! [`ServedModelConfig`] plus request-level overrides into a runtime target.

#![deny(missing_docs)]

mod loader;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use loader::load;

/// Routing mode for a served model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A single upstream call, response forwarded unchanged.
    Direct,
    /// An upstream call whose draft is reviewed and optionally patched by an adapter model.
    Adapter,
    /// An upstream call whose draft is critiqued, then redone with the critique folded in.
    Critic,
    /// A planning pass from an advisor model, injected into the user turn before the api call.
    Advisor,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Adapter => "adapter",
            Self::Critic => "critic",
            Self::Advisor => "advisor",
        };
        f.write_str(s)
    }
}

/// A single upstream target: a model name at a base URL, with an optional
/// environment variable naming its API key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageTarget {
    /// Upstream model identifier, forwarded verbatim in the request body.
    #[serde(default)]
    pub model: String,
    /// Base URL of the upstream, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token for this stage.
    ///
    /// Falls back to the gateway's default env name (e.g. `OPENAI_API_KEY`) when absent.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl StageTarget {
    /// A stage target is complete iff both `model` and `base_url` are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.model.is_empty() && !self.base_url.is_empty()
    }
}

/// Configuration for a single served model name, as exposed to clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServedModelConfig {
    /// Default workflow mode for this served model; overridable per-request.
    pub mode: Mode,
    /// The primary upstream target, always required.
    pub api: StageTarget,
    /// Adapter-stage target, required (directly or via fallback to `api`) when `mode = adapter`.
    #[serde(default)]
    pub adapter: Option<StageTarget>,
    /// Critic-stage target, required (directly or via fallback to `api`) when `mode = critic`.
    #[serde(default)]
    pub critic: Option<StageTarget>,
    /// Advisor-stage target, required (directly or via fallback to `api`) when `mode = advisor`.
    #[serde(default)]
    pub advisor: Option<StageTarget>,
    /// Override for the built-in adapter system prompt.
    #[serde(default)]
    pub adapter_system_prompt: Option<String>,
    /// Override for the built-in critic system prompt.
    #[serde(default)]
    pub critic_system_prompt: Option<String>,
    /// Override for the built-in advisor system prompt.
    #[serde(default)]
    pub advisor_system_prompt: Option<String>,
}

/// Top-level configuration: a mapping from served-model name to its configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Served models, keyed by the name clients pass as `model` in their request.
    #[serde(default)]
    pub served_models: IndexMap<String, ServedModelConfig>,
}

impl AppConfig {
    /// Checks that every configured stage target is either absent or complete.
    ///
    /// TOML deserialization already guarantees `api` is present for each served
    /// model; this additionally rejects a target with an empty `model` or
    /// `base_url` string, which `#[serde(default)]` alone would let through.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, served) in &self.served_models {
            if !served.api.is_complete() {
                anyhow::bail!("served_models.{name}.api must set both model and base_url");
            }
            for (stage_name, stage) in [
                ("adapter", &served.adapter),
                ("critic", &served.critic),
                ("advisor", &served.advisor),
            ] {
                if let Some(stage) = stage {
                    if !stage.is_complete() {
                        anyhow::bail!("served_models.{name}.{stage_name} must set both model and base_url");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_debug_snapshot;

    use super::*;

    #[test]
    fn parses_minimal_direct_model() {
        let config: AppConfig = toml::from_str(indoc! {r#"
            [served_models.assistant]
            mode = "direct"
            api = { model = "gpt-4o-mini", base_url = "https://api.openai.com/v1" }
        "#})
        .expect("valid config");

        assert_debug_snapshot!(config, @r#"
        AppConfig {
            served_models: {
                "assistant": ServedModelConfig {
                    mode: Direct,
                    api: StageTarget {
                        model: "gpt-4o-mini",
                        base_url: "https://api.openai.com/v1",
                        api_key_env: None,
                    },
                    adapter: None,
                    critic: None,
                    advisor: None,
                    adapter_system_prompt: None,
                    critic_system_prompt: None,
                    advisor_system_prompt: None,
                },
            },
        }
        "#);
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let error = toml::from_str::<AppConfig>(indoc! {r#"
            mystery_key = true
        "#})
        .expect_err("unknown key should fail");

        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validate_rejects_incomplete_stage_target() {
        let config: AppConfig = toml::from_str(indoc! {r#"
            [served_models.assistant]
            mode = "adapter"
            api = { model = "gpt-4o-mini", base_url = "https://api.openai.com/v1" }
            adapter = { model = "", base_url = "https://api.openai.com/v1" }
        "#})
        .expect("valid config");

        let error = config.validate().expect_err("incomplete adapter target should fail");
        assert!(error.to_string().contains("adapter"));
    }
}
