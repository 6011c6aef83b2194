//! Compensating deletes after a failed or cancelled run.

use claimchain_types::{ClaimRef, CleanupOutcome, CleanupRecord, RunStatus, StageStatus, WorkflowExecutionState};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::claims::ClaimClient;

/// Which claims a cancelled run removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCleanup {
    /// Only the claim whose stage was creating or waiting when the run stopped.
    #[default]
    InFlight,
    /// Every claim the run created.
    All,
    /// Nothing; the caller tears down explicitly.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CleanupPolicy {
    pub on_cancel: CancelCleanup,
    /// Leave claims that existed before the run started.
    pub keep_preexisting: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            on_cancel: CancelCleanup::InFlight,
            keep_preexisting: true,
        }
    }
}

/// Claims to delete for a finished run, latest stage first.
pub fn cleanup_targets(state: &WorkflowExecutionState, policy: &CleanupPolicy) -> Vec<ClaimRef> {
    let stage_filter = |status: StageStatus| match state.status {
        RunStatus::Failed => true,
        RunStatus::Cancelled => match policy.on_cancel {
            CancelCleanup::InFlight => status == StageStatus::Cancelled,
            CancelCleanup::All => true,
            CancelCleanup::None => false,
        },
        RunStatus::Running | RunStatus::Completed => false,
    };

    state
        .stages
        .iter()
        .rev()
        .filter(|stage| stage.reached_creating())
        .filter(|stage| !(policy.keep_preexisting && stage.preexisting))
        .filter(|stage| stage_filter(stage.status))
        .filter_map(|stage| stage.claim.clone())
        .collect()
}

/// Deletes the run's claims in reverse stage order and records each outcome.
///
/// Failures are logged and recorded; they are not retried and leave the run
/// status untouched.
pub async fn run_cleanup(client: &dyn ClaimClient, state: &mut WorkflowExecutionState, policy: &CleanupPolicy) {
    for claim in cleanup_targets(state, policy) {
        let outcome = match client.delete(claim.kind, &claim.name, &claim.namespace).await {
            Ok(()) => {
                info!(run_id = %state.run_id, claim = %claim, "deleted claim during cleanup");
                CleanupOutcome::Deleted
            }
            Err(error) => {
                warn!(run_id = %state.run_id, claim = %claim, %error, "cleanup delete failed");
                CleanupOutcome::Failed {
                    message: error.to_string(),
                }
            }
        };
        state.cleanup.push(CleanupRecord { claim, outcome });
    }
}

#[cfg(test)]
mod tests {
    use claimchain_types::{ClaimKind, RunFailure, StageResult};
    use serde_json::json;

    use super::*;
    use crate::claims::InMemoryClaimClient;

    fn stage(kind: ClaimKind, status: StageStatus, preexisting: bool) -> StageResult {
        let mut stage = StageResult::pending(kind);
        stage.advance(StageStatus::Creating);
        stage.claim = Some(ClaimRef::new(kind, kind.stage_name(), "default"));
        stage.preexisting = preexisting;
        stage.advance(status);
        stage
    }

    fn finished_state(status: RunStatus, stages: Vec<StageResult>) -> WorkflowExecutionState {
        let mut state = WorkflowExecutionState::new("run-1", "order-api", "alice");
        state.stages = stages;
        state.finish(
            status,
            Some(RunFailure {
                kind: "TimedOut".into(),
                stage: None,
                field: None,
                message: "stopped".into(),
            }),
        );
        state
    }

    #[test]
    fn failed_runs_clean_up_in_reverse_order() {
        let state = finished_state(
            RunStatus::Failed,
            vec![
                stage(ClaimKind::VCluster, StageStatus::Succeeded, false),
                stage(ClaimKind::AppContainer, StageStatus::Failed, false),
                StageResult::pending(ClaimKind::Microservice),
            ],
        );
        let kinds: Vec<_> = cleanup_targets(&state, &CleanupPolicy::default())
            .into_iter()
            .map(|claim| claim.kind)
            .collect();
        assert_eq!(kinds, vec![ClaimKind::AppContainer, ClaimKind::VCluster]);
    }

    #[test]
    fn preexisting_claims_are_kept_by_default() {
        let state = finished_state(
            RunStatus::Failed,
            vec![
                stage(ClaimKind::VCluster, StageStatus::Succeeded, true),
                stage(ClaimKind::AppContainer, StageStatus::Failed, false),
            ],
        );
        assert_eq!(cleanup_targets(&state, &CleanupPolicy::default()).len(), 1);

        let policy = CleanupPolicy {
            keep_preexisting: false,
            ..Default::default()
        };
        assert_eq!(cleanup_targets(&state, &policy).len(), 2);
    }

    #[test]
    fn cancel_policy_selects_targets() {
        let state = finished_state(
            RunStatus::Cancelled,
            vec![
                stage(ClaimKind::VCluster, StageStatus::Succeeded, false),
                stage(ClaimKind::AppContainer, StageStatus::Cancelled, false),
            ],
        );
        let targets = |on_cancel| {
            cleanup_targets(
                &state,
                &CleanupPolicy {
                    on_cancel,
                    keep_preexisting: true,
                },
            )
            .len()
        };
        assert_eq!(targets(CancelCleanup::InFlight), 1);
        assert_eq!(targets(CancelCleanup::All), 2);
        assert_eq!(targets(CancelCleanup::None), 0);
    }

    #[test]
    fn completed_runs_have_nothing_to_clean() {
        let mut state = WorkflowExecutionState::new("run-1", "order-api", "alice");
        state.stages = vec![stage(ClaimKind::VCluster, StageStatus::Succeeded, false)];
        state.finish(RunStatus::Completed, None);
        assert!(cleanup_targets(&state, &CleanupPolicy::default()).is_empty());
    }

    #[tokio::test]
    async fn delete_failures_are_recorded_without_changing_status() {
        let client = InMemoryClaimClient::new();
        client
            .create(&claimchain_types::ResourceClaim::new(ClaimKind::VCluster, "vcluster", "default", json!({})))
            .await
            .unwrap();
        client.fail_deletes(ClaimKind::AppContainer);

        let mut state = finished_state(
            RunStatus::Failed,
            vec![
                stage(ClaimKind::VCluster, StageStatus::Succeeded, false),
                stage(ClaimKind::AppContainer, StageStatus::Failed, false),
            ],
        );
        run_cleanup(&client, &mut state, &CleanupPolicy::default()).await;

        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.cleanup.len(), 2);
        assert!(matches!(state.cleanup[0].outcome, CleanupOutcome::Failed { .. }));
        assert_eq!(state.cleanup[1].outcome, CleanupOutcome::Deleted);
        assert!(!client.contains(ClaimKind::VCluster, "vcluster", "default"));
    }
}
