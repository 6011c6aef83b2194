//! Stage chain driver.
//!
//! The [`Orchestrator`] validates a contract, resolves names, and then walks
//! the fixed stage list for the resource type. Each stage moves through
//! `Validating → Creating → WaitingReady → Succeeded`; a stage whose claim
//! already exists skips `Creating`. The first failure stops the chain, runs
//! the cleanup handler, and emits exactly one failure notification carrying
//! the full execution state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use claimchain_types::{
    ClaimKind, ClaimRef, CleanupOutcome, CleanupRecord, EndpointsSummary, NotificationEvent, NotificationType, ParameterContract,
    RawContract, Readiness, RunFailure, RunStatus, StageResult, StageStatus, ValidationError, WorkflowExecutionState, validate_contract,
};
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::claims::{ClaimClient, ClaimError, spec_matches};
use crate::cleanup::{CleanupPolicy, run_cleanup};
use crate::config::{ClaimchainConfig, ConfigError};
use crate::notify::NotificationSink;
use crate::poller::{PollPolicies, ReadinessError, ReadinessPoller};
use crate::resolve::{ResolvedNames, resolve_names};
use crate::stages::{Stage, StageContext, StageError, seed_outputs, stages_for, terminal_kind};

/// Stage name reported for contract validation failures.
pub const VALIDATION_STAGE: &str = "validation";

/// Why a run did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{claim} already exists with a different spec")]
    NameConflict { claim: ClaimRef },

    #[error("infrastructure unavailable: {0}")]
    InfrastructureUnavailable(ClaimError),

    #[error("{claim} did not become ready within {}s; last observed {last}", .timeout.as_secs())]
    TimedOut {
        claim: ClaimRef,
        timeout: Duration,
        last: Readiness,
    },

    #[error("{claim} was rejected by the reconciler: {reason}")]
    Rejected { claim: ClaimRef, reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl ProvisionError {
    /// Stable machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Validation(_) => "ValidationError",
            ProvisionError::NameConflict { .. } => "NameConflict",
            ProvisionError::InfrastructureUnavailable(_) => "InfrastructureUnavailable",
            ProvisionError::TimedOut { .. } => "TimedOut",
            ProvisionError::Rejected { .. } => "Rejected",
            ProvisionError::Cancelled => "Cancelled",
            ProvisionError::Stage(_) => "StageError",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            ProvisionError::Validation(error) => Some(error.field.as_str()),
            _ => None,
        }
    }

    fn to_failure(&self, stage: Option<&str>) -> RunFailure {
        RunFailure {
            kind: self.kind().to_string(),
            stage: stage.map(str::to_string),
            field: self.field().map(str::to_string),
            message: self.to_string(),
        }
    }
}

impl From<ClaimError> for ProvisionError {
    fn from(error: ClaimError) -> Self {
        match error {
            ClaimError::Conflict { claim } => ProvisionError::NameConflict { claim },
            other => ProvisionError::InfrastructureUnavailable(other),
        }
    }
}

impl From<ReadinessError> for ProvisionError {
    fn from(error: ReadinessError) -> Self {
        match error {
            ReadinessError::TimedOut { claim, timeout, last } => ProvisionError::TimedOut { claim, timeout, last },
            ReadinessError::Cancelled { .. } => ProvisionError::Cancelled,
            ReadinessError::Rejected { claim, reason, message } => ProvisionError::Rejected {
                claim,
                reason: match message {
                    Some(message) => format!("{} ({})", reason, message),
                    None => reason,
                },
            },
            ReadinessError::Client(error) => error.into(),
        }
    }
}

/// Tunables for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub polling: PollPolicies,
    pub terminal_reasons: Vec<String>,
    pub cleanup: CleanupPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ClaimchainConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            polling: config.polling.resolve()?,
            terminal_reasons: config.terminal_reasons.clone(),
            cleanup: config.cleanup,
        })
    }
}

/// Observed state of one planned claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimObservation {
    pub stage: &'static str,
    pub claim: ClaimRef,
    pub exists: bool,
    /// Absent when the claim does not exist.
    pub readiness: Option<Readiness>,
    pub outputs: IndexMap<String, String>,
}

/// Drives provisioning runs against a [`ClaimClient`].
///
/// Runs share no mutable state, so one orchestrator may drive many
/// concurrent runs.
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn ClaimClient>,
    sink: Arc<dyn NotificationSink>,
    poller: ReadinessPoller,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ClaimClient>, sink: Arc<dyn NotificationSink>, settings: OrchestratorSettings) -> Self {
        let poller = ReadinessPoller::new(client.clone()).with_terminal_reasons(settings.terminal_reasons.clone());
        Self {
            client,
            sink,
            poller,
            settings,
        }
    }

    /// Validates `raw` and, when it passes, runs the stage chain.
    ///
    /// Validation failures touch no claims and emit a single failure event.
    pub async fn create_resource(&self, raw: &RawContract, cancel: &CancellationToken) -> WorkflowExecutionState {
        match validate_contract(raw) {
            Ok(contract) => self.run(&contract, cancel).await,
            Err(error) => {
                let mut state = WorkflowExecutionState::new(
                    new_run_id(),
                    raw.resource_name.clone().unwrap_or_default(),
                    raw.requesting_user.clone().unwrap_or_default(),
                );
                let error = ProvisionError::from(error);
                warn!(run_id = %state.run_id, field = ?error.field(), %error, "contract rejected");
                state.finish(RunStatus::Failed, Some(error.to_failure(None)));
                self.emit(NotificationEvent::for_state(&state, VALIDATION_STAGE, NotificationType::Failure, error.to_string()).with_state(&state))
                    .await;
                state
            }
        }
    }

    /// Runs the stage chain for an already validated contract.
    pub async fn run(&self, contract: &ParameterContract, cancel: &CancellationToken) -> WorkflowExecutionState {
        let names = resolve_names(contract);
        let stages = stages_for(contract.resource_type());

        let mut state = WorkflowExecutionState::new(new_run_id(), contract.resource_name(), contract.requesting_user());
        state.resource_type = Some(contract.resource_type());
        state.stages = stages.iter().map(|stage| StageResult::pending(stage.kind())).collect();
        state.outputs = seed_outputs(contract, &names);

        info!(
            run_id = %state.run_id,
            resource = %contract.resource_name(),
            resource_type = %contract.resource_type(),
            stages = stages.len(),
            "starting provisioning run"
        );
        let first_stage = stages.first().map(|stage| stage.name()).unwrap_or(VALIDATION_STAGE);
        self.emit(NotificationEvent::for_state(
            &state,
            first_stage,
            NotificationType::Starting,
            format!("provisioning {} {}", contract.resource_type(), contract.resource_name()),
        ))
        .await;

        let mut failure = None;
        for (index, stage) in stages.iter().enumerate() {
            let outcome = if cancel.is_cancelled() {
                Err(ProvisionError::Cancelled)
            } else {
                self.run_stage(stage.as_ref(), index, contract, &names, &mut state, cancel).await
            };

            match outcome {
                Ok(()) => {
                    let claim_name = state.stages[index].claim.as_ref().map(|claim| claim.name.clone()).unwrap_or_default();
                    self.emit(NotificationEvent::for_state(
                        &state,
                        stage.name(),
                        NotificationType::Progress,
                        format!("{} {} is ready", stage.kind(), claim_name),
                    ))
                    .await;
                }
                Err(error) => {
                    let result = &mut state.stages[index];
                    if matches!(error, ProvisionError::Cancelled) {
                        result.advance(StageStatus::Cancelled);
                        result.error = Some(error.to_string());
                    } else {
                        result.fail(error.to_string());
                    }
                    failure = Some((stage.name(), error));
                    break;
                }
            }
        }

        match failure {
            None => {
                state.endpoints = Some(EndpointsSummary::from_ledger(contract.namespace(), &state.outputs));
                state.finish(RunStatus::Completed, None);
                info!(run_id = %state.run_id, resource = %contract.resource_name(), "provisioning run completed");
                let last_stage = stages.last().map(|stage| stage.name()).unwrap_or(VALIDATION_STAGE);
                self.emit(
                    NotificationEvent::for_state(
                        &state,
                        last_stage,
                        NotificationType::Success,
                        format!("{} {} is ready", contract.resource_type(), contract.resource_name()),
                    )
                    .with_state(&state),
                )
                .await;
            }
            Some((stage_name, error)) => {
                let status = if matches!(error, ProvisionError::Cancelled) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                warn!(run_id = %state.run_id, stage = stage_name, kind = error.kind(), %error, "provisioning run stopped");
                state.finish(status, Some(error.to_failure(Some(stage_name))));
                run_cleanup(self.client.as_ref(), &mut state, &self.settings.cleanup).await;
                self.emit(
                    NotificationEvent::for_state(&state, stage_name, NotificationType::Failure, error.to_string()).with_state(&state),
                )
                .await;
            }
        }

        state
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        index: usize,
        contract: &ParameterContract,
        names: &ResolvedNames,
        state: &mut WorkflowExecutionState,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let run_id = state.run_id.clone();
        let stage_name = stage.name();
        state.stages[index].advance(StageStatus::Validating);
        debug!(run_id = %run_id, stage = stage_name, "building claim");

        let claim = stage.build_claim(&StageContext {
            contract,
            names,
            outputs: &state.outputs,
            run_id: &run_id,
        })?;
        let claim_ref = claim.claim_ref();
        let terminal = stage.kind() == terminal_kind(contract.resource_type());
        let mut effective_spec = claim.spec.clone();
        let result = &mut state.stages[index];

        match cancellable(cancel, self.client.get(claim_ref.kind, &claim_ref.name, &claim_ref.namespace)).await? {
            Ok(existing) => {
                if terminal && !spec_matches(&claim.spec, &existing.spec) {
                    return Err(ProvisionError::NameConflict { claim: claim_ref });
                }
                if terminal {
                    info!(run_id = %run_id, stage = stage_name, claim = %claim_ref, "claim already exists; waiting for readiness");
                } else {
                    info!(run_id = %run_id, stage = stage_name, claim = %claim_ref, "reusing existing claim as is");
                    effective_spec = existing.spec;
                }
                result.claim = Some(claim_ref.clone());
                result.preexisting = true;
            }
            Err(ClaimError::NotFound { .. }) => {
                result.advance(StageStatus::Creating);
                result.claim = Some(claim_ref.clone());
                info!(run_id = %run_id, stage = stage_name, claim = %claim_ref, "creating claim");
                match cancellable(cancel, self.client.create(&claim)).await? {
                    Ok(handle) => result.preexisting = !handle.created,
                    Err(error @ ClaimError::Conflict { .. }) => {
                        result.claim = None;
                        return Err(error.into());
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            Err(error) => return Err(error.into()),
        }

        result.advance(StageStatus::WaitingReady);
        let policy = self.settings.polling.for_kind(stage.kind());
        let ready = match self.poller.wait_ready(&claim_ref, &policy, cancel).await {
            Ok(ready) => ready,
            Err(error) => {
                result.last_condition = error.last_observed();
                return Err(error.into());
            }
        };
        result.last_condition = Some(Readiness::Ready);

        let mut published = IndexMap::new();
        published.insert(stage.output_key().to_string(), claim_ref.name.clone());
        published.extend(stage.spec_outputs(&effective_spec));
        published.extend(ready.claim.derived_outputs());
        for (key, value) in &published {
            if !state.outputs.append(key.as_str(), value.as_str()) {
                warn!(run_id = %run_id, stage = stage_name, key = %key, "ignoring conflicting output; first value wins");
            }
        }

        let result = &mut state.stages[index];
        result.outputs = published;
        result.advance(StageStatus::Succeeded);
        info!(run_id = %run_id, stage = stage_name, attempts = ready.attempts, "stage succeeded");
        Ok(())
    }

    /// Reads every planned claim without changing anything.
    pub async fn status(&self, contract: &ParameterContract) -> Result<Vec<ClaimObservation>, ProvisionError> {
        let mut observations = Vec::new();
        for (stage, claim_ref) in self.planned_claims(contract) {
            let observation = match self.client.get(claim_ref.kind, &claim_ref.name, &claim_ref.namespace).await {
                Ok(claim) => ClaimObservation {
                    stage,
                    exists: true,
                    readiness: Some(claim.readiness()),
                    outputs: claim.derived_outputs(),
                    claim: claim_ref,
                },
                Err(ClaimError::NotFound { .. }) => ClaimObservation {
                    stage,
                    exists: false,
                    readiness: None,
                    outputs: IndexMap::new(),
                    claim: claim_ref,
                },
                Err(error) => return Err(error.into()),
            };
            observations.push(observation);
        }
        Ok(observations)
    }

    /// Deletes every planned claim, latest stage first.
    pub async fn teardown(&self, contract: &ParameterContract) -> Vec<CleanupRecord> {
        let mut records = Vec::new();
        for (_, claim) in self.planned_claims(contract).into_iter().rev() {
            let outcome = match self.client.delete(claim.kind, &claim.name, &claim.namespace).await {
                Ok(()) => {
                    info!(claim = %claim, "deleted claim");
                    CleanupOutcome::Deleted
                }
                Err(error) => {
                    warn!(claim = %claim, %error, "delete failed");
                    CleanupOutcome::Failed {
                        message: error.to_string(),
                    }
                }
            };
            records.push(CleanupRecord { claim, outcome });
        }
        records
    }

    /// Claim each stage would target, in stage order.
    pub fn planned_claims(&self, contract: &ParameterContract) -> Vec<(&'static str, ClaimRef)> {
        let names = resolve_names(contract);
        let outputs = seed_outputs(contract, &names);
        let context = StageContext {
            contract,
            names: &names,
            outputs: &outputs,
            run_id: "",
        };
        stages_for(contract.resource_type())
            .iter()
            .map(|stage| {
                (
                    stage.name(),
                    ClaimRef::new(stage.kind(), stage.claim_name(&context), contract.namespace()),
                )
            })
            .collect()
    }

    async fn emit(&self, event: NotificationEvent) {
        if let Err(error) = self.sink.notify(&event).await {
            warn!(run_id = %event.run_id, kind = event.notification_type.as_str(), %error, "notification delivery failed");
        }
    }
}

/// Races a cluster call against cancellation.
async fn cancellable<T>(cancel: &CancellationToken, call: impl Future<Output = T>) -> Result<T, ProvisionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        outcome = call => Ok(outcome),
    }
}

fn new_run_id() -> String {
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S"), Uuid::new_v4().simple())
}

/// Stage kinds still `Pending` in a finished run.
pub fn untouched_stages(state: &WorkflowExecutionState) -> Vec<ClaimKind> {
    state
        .stages
        .iter()
        .filter(|stage| stage.status == StageStatus::Pending)
        .map(|stage| stage.kind)
        .collect()
}
