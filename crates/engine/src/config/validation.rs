//! Configuration validation.

use tracing::debug;
use url::Url;

use crate::config::{ClaimchainConfig, ConfigError};

/// Validate the entire configuration.
pub fn validate_config(config: &ClaimchainConfig) -> Result<(), ConfigError> {
    config.polling.resolve()?;

    for (field, value) in [
        ("cluster.claimGroup", &config.cluster.claim_group),
        ("cluster.claimVersion", &config.cluster.claim_version),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: field.to_string(),
                message: "must not be empty".to_string(),
            });
        }
    }

    if let Some(api_base) = &config.cluster.api_base {
        validate_http_url("cluster.apiBase", api_base)?;
    }
    if let Some(webhook) = &config.notifications.slack_webhook_url {
        validate_http_url("notifications.slackWebhookUrl", webhook)?;
    }

    if config.terminal_reasons.iter().any(|reason| reason.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            field: "terminalReasons".to_string(),
            message: "reasons must not be empty".to_string(),
        });
    }

    debug!("Validated claimchain configuration");
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value).map_err(|error| ConfigError::Invalid {
        field: field.to_string(),
        message: error.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field: field.to_string(),
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(())
}
