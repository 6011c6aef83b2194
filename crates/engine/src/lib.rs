//! # Claimchain Engine
//!
//! The engine turns a declarative provisioning contract into an ordered chain
//! of cluster claims (`VCluster → AppContainer → Microservice`), waits for a
//! reconciler to mark each one ready, and threads the outputs of earlier
//! stages into later ones.
//!
//! ## Usage
//!
//! ```rust
//! use claimchain_engine::parse_contract_file;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let contract_path = temp_dir.path().join("order-api.yaml");
//! std::fs::write(&contract_path, r#"
//! resource-name: order-api
//! resource-type: microservice
//! namespace: default
//! requesting-user: alice
//! description: Order API
//! parameters:
//!   language: python
//! "#)?;
//!
//! let raw = parse_contract_file(&contract_path)?;
//! assert_eq!(raw.resource_name.as_deref(), Some("order-api"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`resolve`**: derives repository, cluster, and container names
//! - **`claims`**: the [`ClaimClient`] seam plus cluster and in-memory clients
//! - **`poller`**: deadline-bounded readiness polling
//! - **`stages`**: the fixed stage chain and the claim each stage builds
//! - **`orchestrator`**: drives a run, records state, and notifies
//! - **`cleanup`**: compensating deletes after failure or cancellation
//! - **`notify`**: notification sinks
//! - **`config`**: on-disk engine configuration

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use claimchain_api::{ClaimApi, KubeClient};
use claimchain_types::RawContract;

pub mod claims;
pub mod cleanup;
pub mod config;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod resolve;
pub mod stages;

pub use claims::{ClaimClient, ClaimError, ClaimHandle, InMemoryClaimClient, KubeClaimClient};
pub use cleanup::{CancelCleanup, CleanupPolicy, cleanup_targets, run_cleanup};
pub use config::{ClaimchainConfig, ConfigError, load_config, load_config_from_path};
pub use notify::{FanoutSink, NotificationSink, NotifyError, RecordingSink, SlackSink, TracingSink};
pub use orchestrator::{ClaimObservation, Orchestrator, OrchestratorSettings, ProvisionError};
pub use poller::{PollPolicies, PollPolicy, ReadinessError, ReadinessPoller};
pub use resolve::{ResolvedNames, resolve_names};
pub use stages::{Stage, StageError, stages_for};

/// Loads a contract file. JSON is accepted as a subset of YAML.
pub fn parse_contract_file(file_path: impl AsRef<Path>) -> Result<RawContract> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read contract file: {}", file_path.display()))?;
    let content_string = String::from_utf8_lossy(&file_content);
    parse_contract_str(&content_string).with_context(|| format!("Invalid contract document: {}", file_path.display()))
}

pub fn parse_contract_str(content: &str) -> Result<RawContract> {
    if content.trim().is_empty() {
        anyhow::bail!("contract document is empty");
    }
    serde_yaml::from_str(content).context("expected a mapping with resource-name, resource-type, and parameter tiers")
}

/// Sink for `config`: tracing always, plus Slack when a webhook is configured.
pub fn notification_sink_from_config(config: &ClaimchainConfig) -> Result<Arc<dyn NotificationSink>> {
    let mut fanout = FanoutSink::new(vec![Arc::new(TracingSink)]);
    if let Some(webhook_url) = &config.notifications.slack_webhook_url {
        let slack = SlackSink::new(webhook_url.clone(), config.notifications.channel.clone()).context("Failed to build Slack sink")?;
        fanout.push(Arc::new(slack));
    }
    Ok(Arc::new(fanout))
}

/// Cluster-backed claim client for `config`.
pub fn claim_client_from_config(config: &ClaimchainConfig) -> Result<Arc<dyn ClaimClient>> {
    let kube = KubeClient::from_env(config.cluster.api_base.as_deref())?;
    let api = ClaimApi::new(config.cluster.claim_group.clone(), config.cluster.claim_version.clone());
    Ok(Arc::new(KubeClaimClient::new(kube, api)))
}
