//! Shared type definitions for the claimchain provisioning engine.
//!
//! Everything in this crate is pure data plus deterministic validation: the
//! tiered [`ParameterContract`](contract::ParameterContract), the claim
//! envelope exchanged with the cluster, and the execution state the
//! orchestrator hands to notification sinks.

pub mod claim;
pub mod contract;
pub mod execution;
pub mod notification;

pub use claim::{
    ClaimKind, ClaimMetadata, ClaimRef, ClaimStatus, Condition, ConditionStatus, READY_CONDITION, Readiness, ReadinessTracker,
    ResourceClaim,
};
pub use contract::validation::{ValidationError, ValidationReason, ValidationResult, is_dns1123_name, validate_contract};
pub use contract::{
    AppContainerParameters, Cache, Database, EnvironmentTier, Framework, KubernetesVersion, Language, MicroserviceParameters,
    ParameterContract, PlatformParameters, RawContract, RepositoryVisibility, ResourceParameters, ResourceSize, ResourceType,
    UniversalParameters, VClusterParameters,
};
pub use execution::{
    CleanupOutcome, CleanupRecord, EndpointsSummary, OutputLedger, RunFailure, RunStatus, StageResult, StageStatus,
    WorkflowExecutionState,
};
pub use notification::{NotificationEvent, NotificationType};
