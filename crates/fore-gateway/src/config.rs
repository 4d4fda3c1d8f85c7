use anyhow::{Context, Result};
use std::path::PathBuf;

use fore_types::config::ForemanConfig;

/// Returns the Foreman home directory (~/.foreman/)
pub fn foreman_home() -> PathBuf {
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".foreman")
}

/// Returns the path to the config file (~/.foreman/config.toml)
pub fn config_path() -> PathBuf {
    foreman_home().join("config.toml")
}

/// Load config from disk, creating the default if it doesn't exist.
pub fn load_config() -> Result<ForemanConfig> {
    let path = config_path();

    if !path.exists() {
        let home = foreman_home();
        std::fs::create_dir_all(&home)
            .with_context(|| format!("Failed to create {}", home.display()))?;

        let default = ForemanConfig::default();
        let toml_str = toml::to_string_pretty(&default)
            .context("Failed to serialize default config")?;
        std::fs::write(&path, &toml_str)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        return Ok(default);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: ForemanConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(config)
}

/// Save config to disk, overwriting the existing file.
pub fn save_config(config: &ForemanConfig) -> Result<()> {
    let path = config_path();
    let toml_str = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(&path, toml_str)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}
