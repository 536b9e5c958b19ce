use std::path::Path;

use crate::AppConfig;

/// Load and validate configuration from a TOML file path.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<AppConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read config file {}: {err}", path.display()))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|err| anyhow::anyhow!("failed to parse config file {}: {err}", path.display()))?;

    config.validate()?;

    log::debug!(
        "loaded configuration from {} with {} served model(s)",
        path.display(),
        config.served_models.len()
    );

    Ok(config)
}
