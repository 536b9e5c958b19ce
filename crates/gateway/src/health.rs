//! `/healthz` probing: checks that every unique upstream target configured
//! across served models is reachable and serves the model it claims to.
//!
//! Grounded on `examples/original_source/src/adapter_critic/health.py`.

use std::time::{Duration, Instant};

use config::{AppConfig, StageTarget};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::provider::http_client;

/// Environment variable consulted when a stage target sets no `api_key_env` of its own.
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A deduplicated upstream target to probe, annotated with every `served_model.stage` that uses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    /// Upstream model identifier.
    pub model: String,
    /// Base URL, with any trailing slash stripped.
    pub base_url: String,
    /// Name of the environment variable holding this target's bearer token, if configured.
    pub api_key_env: Option<String>,
    /// Every `served_model.stage` name using this exact `(base_url, model, api_key_env)` tuple.
    pub used_by: Vec<String>,
}

fn target_key(target: &StageTarget) -> (String, String, Option<String>) {
    (target.base_url.trim_end_matches('/').to_string(), target.model.clone(), target.api_key_env.clone())
}

/// Collect every unique upstream target referenced by `config`'s served models, across all four
/// stage kinds, each annotated with the `served_model.stage` names that use it.
pub fn collect_health_targets(config: &AppConfig) -> Vec<HealthTarget> {
    let mut by_key: indexmap::IndexMap<(String, String, Option<String>), HealthTarget> = indexmap::IndexMap::new();

    for (served_model_name, served) in &config.served_models {
        for (stage_name, stage) in [
            ("api", Some(&served.api)),
            ("adapter", served.adapter.as_ref()),
            ("critic", served.critic.as_ref()),
            ("advisor", served.advisor.as_ref()),
        ] {
            let Some(stage) = stage else { continue };
            let used_by = format!("{served_model_name}.{stage_name}");
            let key = target_key(stage);

            by_key
                .entry(key)
                .and_modify(|target| target.used_by.push(used_by.clone()))
                .or_insert_with(|| HealthTarget {
                    model: stage.model.clone(),
                    base_url: stage.base_url.trim_end_matches('/').to_string(),
                    api_key_env: stage.api_key_env.clone(),
                    used_by: vec![used_by],
                });
        }
    }

    let mut targets: Vec<HealthTarget> = by_key.into_values().collect();
    for target in &mut targets {
        target.used_by.sort();
    }
    targets
}

fn resolve_api_key(api_key_env: Option<&str>) -> Option<String> {
    let key_env = api_key_env.filter(|env| !env.is_empty()).unwrap_or(DEFAULT_API_KEY_ENV);
    std::env::var(key_env).ok()
}

/// The outcome of probing one [`HealthTarget`].
#[derive(Debug, Clone, Serialize)]
pub struct TargetHealth {
    /// The probed model.
    pub model: String,
    /// The probed base URL.
    pub base_url: String,
    /// The environment variable consulted for this target's bearer token, if any.
    pub api_key_env: Option<String>,
    /// Every `served_model.stage` name using this target.
    pub used_by: Vec<String>,
    /// Whether the probe succeeded.
    pub ok: bool,
    /// HTTP status code returned, `0` if the request never completed.
    pub status_code: u16,
    /// Failure description, present iff `ok` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent probing this target.
    pub duration_ms: u64,
}

async fn check_target(target: &HealthTarget, timeout: Duration) -> TargetHealth {
    let started = Instant::now();
    let endpoint = format!("{}/models", target.base_url);

    let mut request = http_client().get(&endpoint).timeout(timeout).header("Content-Type", "application/json");
    if let Some(api_key) = resolve_api_key(target.api_key_env.as_deref()) {
        if !api_key.is_empty() {
            request = request.bearer_auth(api_key);
        }
    }

    let failure = |error: String, status_code: u16, duration_ms: u64| TargetHealth {
        model: target.model.clone(),
        base_url: target.base_url.clone(),
        api_key_env: target.api_key_env.clone(),
        used_by: target.used_by.clone(),
        ok: false,
        status_code,
        error: Some(error),
        duration_ms,
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return failure(format!("{endpoint} request failed: {err}"), 0, started.elapsed().as_millis() as u64),
    };

    let status_code = response.status().as_u16();
    let duration_ms = started.elapsed().as_millis() as u64;
    if !response.status().is_success() {
        return failure(format!("/models returned status {status_code}"), status_code, duration_ms);
    }

    let payload: Value = match response.json().await {
        Ok(payload) => payload,
        Err(err) => return failure(format!("/models response is not valid JSON: {err}"), status_code, duration_ms),
    };

    let Some(data) = payload.as_object().and_then(|object| object.get("data")).and_then(Value::as_array) else {
        return failure("/models response missing data list".to_string(), status_code, duration_ms);
    };

    let model_found = data.iter().any(|item| {
        item.as_object()
            .is_some_and(|object| object.get("id").and_then(Value::as_str) == Some(target.model.as_str()) ||
                object.get("root").and_then(Value::as_str) == Some(target.model.as_str()))
    });
    if !model_found {
        return failure("configured model not found in /models".to_string(), status_code, duration_ms);
    }

    TargetHealth {
        model: target.model.clone(),
        base_url: target.base_url.clone(),
        api_key_env: target.api_key_env.clone(),
        used_by: target.used_by.clone(),
        ok: true,
        status_code,
        error: None,
        duration_ms,
    }
}

/// Overall health-check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `"ok"` when every target is healthy, else `"degraded"`.
    pub status: &'static str,
    /// Number of targets checked.
    pub checked: usize,
    /// Number of targets that were healthy.
    pub healthy: usize,
    /// Wall-clock time spent on the whole check.
    pub duration_ms: u64,
    /// Per-target results.
    pub targets: Vec<TargetHealth>,
}

impl HealthReport {
    /// `true` when every target was healthy; the caller uses this to pick `200` vs `503`.
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Probe every unique upstream target configured across `config`'s served models.
pub async fn run_healthcheck(config: &AppConfig, timeout: Duration) -> HealthReport {
    let started = Instant::now();
    let targets = collect_health_targets(config);

    let results = join_all(targets.iter().map(|target| check_target(target, timeout))).await;

    let healthy = results.iter().filter(|result| result.ok).count();
    let checked = results.len();

    HealthReport {
        status: if healthy == checked { "ok" } else { "degraded" },
        checked,
        healthy,
        duration_ms: started.elapsed().as_millis() as u64,
        targets: results,
    }
}

/// Convenience wrapper using the default 5-second per-target timeout.
pub async fn run_healthcheck_default(config: &AppConfig) -> HealthReport {
    run_healthcheck(config, DEFAULT_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn config() -> AppConfig {
        toml::from_str(indoc! {r#"
            [served_models.assistant]
            mode = "adapter"
            api = { model = "gpt-4o-mini", base_url = "https://api.openai.com/v1/" }
            adapter = { model = "gpt-4o-mini", base_url = "https://api.openai.com/v1" }

            [served_models.other]
            mode = "direct"
            api = { model = "gpt-4o-mini", base_url = "https://api.openai.com/v1" }
        "#})
        .expect("valid config")
    }

    #[test]
    fn dedupes_identical_targets_across_served_models_and_stages() {
        let targets = collect_health_targets(&config());
        assert_eq!(targets.len(), 1, "trailing-slash variant must dedupe with the non-slash one");
        assert_eq!(targets[0].used_by, vec!["assistant.adapter", "assistant.api", "other.api"]);
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let targets = collect_health_targets(&config());
        assert_eq!(targets[0].base_url, "https://api.openai.com/v1");
    }
}
