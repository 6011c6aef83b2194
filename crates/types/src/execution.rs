//! Execution state built incrementally by the orchestrator.
//!
//! The full [`WorkflowExecutionState`] is the artifact handed to notification
//! sinks and returned to callers, so it serializes to a stable camelCase shape.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::claim::{ClaimKind, ClaimRef, Readiness};
use crate::contract::ResourceType;

/// Lifecycle of a single stage.
///
/// `Validating`, `Creating`, and `WaitingReady` are the running phases;
/// `Succeeded`, `Failed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Validating,
    Creating,
    WaitingReady,
    Succeeded,
    Failed,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed | StageStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Validating => 1,
            StageStatus::Creating => 2,
            StageStatus::WaitingReady => 3,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Cancelled => 4,
        }
    }
}

/// Bookkeeping for one claim-create-and-wait unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_name: String,
    pub kind: ClaimKind,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Claim targeted by the stage; set on entering `Creating`.
    pub claim: Option<ClaimRef>,
    /// True when the claim already existed before this run touched it.
    pub preexisting: bool,
    pub outputs: IndexMap<String, String>,
    pub error: Option<String>,
    /// Last readiness observed by the poller, kept for diagnosis.
    pub last_condition: Option<Readiness>,
}

impl StageResult {
    pub fn pending(kind: ClaimKind) -> Self {
        Self {
            stage_name: kind.stage_name().to_string(),
            kind,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            claim: None,
            preexisting: false,
            outputs: IndexMap::new(),
            error: None,
            last_condition: None,
        }
    }

    /// Moves the stage forward. Terminal stages and backward moves are ignored.
    ///
    /// Returns whether the transition was applied.
    pub fn advance(&mut self, next: StageStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Marks the stage `Failed` with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let applied = self.advance(StageStatus::Failed);
        if applied {
            self.error = Some(error.into());
        }
        applied
    }

    /// True once the stage targeted a claim, which makes it a cleanup candidate.
    pub fn reached_creating(&self) -> bool {
        self.claim.is_some()
    }
}

/// Global run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Why a run did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    /// Taxonomy name, e.g. `ValidationError` or `TimedOut`.
    pub kind: String,
    /// First failing stage, absent for contract validation failures.
    pub stage: Option<String>,
    /// Offending parameter, for validation failures.
    pub field: Option<String>,
    pub message: String,
}

/// Append-only key/value map threaded through a run.
///
/// Entries are never overwritten: the first writer wins and later conflicting
/// writes are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputLedger {
    entries: IndexMap<String, String>,
}

impl OutputLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key`; returns false when the key already holds a different value.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        match self.entries.get(&key) {
            Some(existing) => existing == &value,
            None => {
                self.entries.insert(key, value);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

}

/// Endpoints reported when the terminal stage succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsSummary {
    pub namespace: String,
    pub vcluster_name: Option<String>,
    pub repository_url: Option<String>,
    pub service_url: Option<String>,
}

impl EndpointsSummary {
    pub fn from_ledger(namespace: &str, ledger: &OutputLedger) -> Self {
        let service_url = ledger
            .get("application-knative-service")
            .or_else(|| ledger.get("url"))
            .map(str::to_string);
        Self {
            namespace: namespace.to_string(),
            vcluster_name: ledger.get("vcluster-name").map(str::to_string),
            repository_url: ledger.get("repository-url").map(str::to_string),
            service_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    Failed { message: String },
}

/// One compensating delete attempted after a failed or cancelled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub claim: ClaimRef,
    #[serde(flatten)]
    pub outcome: CleanupOutcome,
}

/// Complete record of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionState {
    pub run_id: String,
    pub resource_name: String,
    /// Absent only when the contract failed validation before a type was known.
    pub resource_type: Option<ResourceType>,
    pub requesting_user: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageResult>,
    pub outputs: OutputLedger,
    pub failure: Option<RunFailure>,
    pub endpoints: Option<EndpointsSummary>,
    #[serde(default)]
    pub cleanup: Vec<CleanupRecord>,
}

impl WorkflowExecutionState {
    pub fn new(run_id: impl Into<String>, resource_name: impl Into<String>, requesting_user: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            resource_name: resource_name.into(),
            resource_type: None,
            requesting_user: requesting_user.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            outputs: OutputLedger::new(),
            failure: None,
            endpoints: None,
            cleanup: Vec::new(),
        }
    }

    /// Sets the terminal status once; later calls are ignored.
    pub fn finish(&mut self, status: RunStatus, failure: Option<RunFailure>) {
        if self.status != RunStatus::Running {
            return;
        }
        self.status = status;
        self.failure = failure;
        self.finished_at = Some(Utc::now());
    }

    /// Stage that ended the run, if any stage failed or was cancelled.
    pub fn first_failed_stage(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|stage| matches!(stage.status, StageStatus::Failed | StageStatus::Cancelled))
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
