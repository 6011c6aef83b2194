//! Configuration IO helpers.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use claimchain_util::{expand_tilde, interpolate_string};
use dirs_next::config_dir;

use crate::config::{ClaimchainConfig, ConfigError, validate_config};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "CLAIMCHAIN_CONFIG_PATH";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("claimchain")
        .join("config.json")
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<ClaimchainConfig, ConfigError> {
    let path = default_config_path();
    load_config_from_path(&path)
}

/// Loads configuration from a specific path; a missing file yields defaults.
pub fn load_config_from_path(path: &Path) -> Result<ClaimchainConfig, ConfigError> {
    if !path.exists() {
        return Ok(ClaimchainConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let mut config: ClaimchainConfig = serde_json::from_str(&content)?;
    interpolate_config(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn interpolate_config(config: &mut ClaimchainConfig) -> Result<(), ConfigError> {
    if let Some(webhook) = &config.notifications.slack_webhook_url {
        config.notifications.slack_webhook_url = Some(interpolate_string(webhook)?);
    }
    if let Some(api_base) = &config.cluster.api_base {
        config.cluster.api_base = Some(interpolate_string(api_base)?);
    }
    Ok(())
}
