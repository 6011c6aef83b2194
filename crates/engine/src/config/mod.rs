//! Configuration management for the provisioning engine.
//! This module handles parsing, validation, and interpolation of the
//! ~/.config/claimchain/config.json configuration file.

mod io;
mod model;
mod validation;

pub use io::{CONFIG_PATH_ENV, default_config_path, load_config, load_config_from_path};
pub use model::{ClaimchainConfig, ClusterConfig, ConfigError, NotificationConfig, PollSettings, PollingConfig, StagePollOverride};
pub use validation::validate_config;
