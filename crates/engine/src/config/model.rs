//! Data models for engine configuration.

use claimchain_types::ClaimKind;
use claimchain_util::{DurationParseError, InterpolationError, parse_duration};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cleanup::CleanupPolicy;
use crate::poller::{PollPolicies, PollPolicy};

pub const DEFAULT_CLAIM_GROUP: &str = "platform.claimchain.io";
pub const DEFAULT_CLAIM_VERSION: &str = "v1alpha1";

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ClaimchainConfig {
    pub cluster: ClusterConfig,
    pub polling: PollingConfig,
    /// NotReady reasons that fail a stage without waiting for the timeout.
    pub terminal_reasons: Vec<String>,
    pub cleanup: CleanupPolicy,
    pub notifications: NotificationConfig,
}

/// Where claims live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ClusterConfig {
    /// API server base URL; `CLAIMCHAIN_API_BASE` takes precedence.
    pub api_base: Option<String>,
    pub claim_group: String,
    pub claim_version: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            claim_group: DEFAULT_CLAIM_GROUP.to_string(),
            claim_version: DEFAULT_CLAIM_VERSION.to_string(),
        }
    }
}

/// Interval and timeout written as duration literals (`15s`, `10m`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PollSettings {
    pub interval: String,
    pub timeout: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: "15s".to_string(),
            timeout: "600s".to_string(),
        }
    }
}

/// Per-stage override; unset fields fall back to `polling.default`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StagePollOverride {
    pub interval: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PollingConfig {
    pub default: PollSettings,
    pub vcluster: StagePollOverride,
    pub app_container: StagePollOverride,
    pub microservice: StagePollOverride,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default: PollSettings::default(),
            vcluster: StagePollOverride {
                interval: None,
                timeout: Some("1200s".to_string()),
            },
            app_container: StagePollOverride::default(),
            microservice: StagePollOverride::default(),
        }
    }
}

impl PollingConfig {
    /// Parses every stage's effective policy.
    pub fn resolve(&self) -> Result<PollPolicies, ConfigError> {
        Ok(PollPolicies {
            vcluster: self.stage_policy(ClaimKind::VCluster)?,
            app_container: self.stage_policy(ClaimKind::AppContainer)?,
            microservice: self.stage_policy(ClaimKind::Microservice)?,
        })
    }

    fn stage_policy(&self, kind: ClaimKind) -> Result<PollPolicy, ConfigError> {
        let (key, stage) = match kind {
            ClaimKind::VCluster => ("vcluster", &self.vcluster),
            ClaimKind::AppContainer => ("appContainer", &self.app_container),
            ClaimKind::Microservice => ("microservice", &self.microservice),
        };
        let interval = match &stage.interval {
            Some(raw) => parse_field(&format!("polling.{}.interval", key), raw)?,
            None => parse_field("polling.default.interval", &self.default.interval)?,
        };
        let timeout = match &stage.timeout {
            Some(raw) => parse_field(&format!("polling.{}.timeout", key), raw)?,
            None => parse_field("polling.default.timeout", &self.default.timeout)?,
        };
        if interval.is_zero() || timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: format!("polling.{}", key),
                message: "interval and timeout must be positive".to_string(),
            });
        }
        if interval > timeout {
            return Err(ConfigError::Invalid {
                field: format!("polling.{}", key),
                message: "interval must not exceed timeout".to_string(),
            });
        }
        Ok(PollPolicy::new(interval, timeout))
    }
}

fn parse_field(field: &str, raw: &str) -> Result<std::time::Duration, ConfigError> {
    parse_duration(raw).map_err(|source| ConfigError::Duration {
        field: field.to_string(),
        source,
    })
}

/// Notification delivery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct NotificationConfig {
    /// Incoming webhook URL; `${env:NAME}` placeholders are expanded on load.
    pub slack_webhook_url: Option<String>,
    pub channel: Option<String>,
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Interpolation error: {0}")]
    Interpolation(#[from] InterpolationError),

    #[error("Invalid duration for '{field}': {source}")]
    Duration {
        field: String,
        #[source]
        source: DurationParseError,
    },

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },
}
