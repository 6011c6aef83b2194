//! Claim envelope exchanged with the external reconciler.
//!
//! A claim is created once by the engine and afterwards mutated only by the
//! reconciler; the engine reads `status` and, on cleanup, deletes the object.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Condition type that decides readiness.
pub const READY_CONDITION: &str = "Ready";

/// Claim kinds understood by the engine, in provisioning order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClaimKind {
    #[serde(rename = "VClusterClaim")]
    VCluster,
    #[serde(rename = "AppContainerClaim")]
    AppContainer,
    #[serde(rename = "MicroserviceClaim")]
    Microservice,
}

impl ClaimKind {
    /// Kubernetes `kind` string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::VCluster => "VClusterClaim",
            ClaimKind::AppContainer => "AppContainerClaim",
            ClaimKind::Microservice => "MicroserviceClaim",
        }
    }

    /// Lower-case plural used in REST paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ClaimKind::VCluster => "vclusterclaims",
            ClaimKind::AppContainer => "appcontainerclaims",
            ClaimKind::Microservice => "microserviceclaims",
        }
    }

    /// Stage name reported in execution state and notifications.
    pub fn stage_name(&self) -> &'static str {
        match self {
            ClaimKind::VCluster => "vcluster",
            ClaimKind::AppContainer => "appcontainer",
            ClaimKind::Microservice => "microservice",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a claim without carrying its body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimRef {
    pub kind: ClaimKind,
    pub name: String,
    pub namespace: String,
}

impl ClaimRef {
    pub fn new(kind: ClaimKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Status value of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One entry of `status.conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn ready(status: ConditionStatus, reason: Option<&str>, message: Option<&str>) -> Self {
        Self {
            r#type: READY_CONDITION.to_string(),
            status,
            reason: reason.map(str::to_string),
            message: message.map(str::to_string),
        }
    }
}

/// Observed status of a claim as reported by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Kind-specific values published by the reconciler, flattened to kebab-case keys.
    #[serde(default)]
    pub derived_outputs: IndexMap<String, String>,
}

impl ClaimStatus {
    /// Interprets the `Ready` condition, falling back to the `ready` flag.
    pub fn readiness(&self) -> Readiness {
        let condition = self.conditions.iter().find(|condition| condition.r#type == READY_CONDITION);
        match condition {
            Some(condition) => match condition.status {
                ConditionStatus::True => Readiness::Ready,
                ConditionStatus::False => Readiness::NotReady {
                    reason: condition.reason.clone().unwrap_or_else(|| "Unspecified".to_string()),
                    message: condition.message.clone(),
                },
                ConditionStatus::Unknown => Readiness::Unknown,
            },
            None if self.ready => Readiness::Ready,
            None => Readiness::Unknown,
        }
    }
}

/// A claim object: the envelope shared by every claim kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaim {
    pub kind: ClaimKind,
    pub metadata: ClaimMetadata,
    pub spec: JsonValue,
    #[serde(default)]
    pub status: Option<ClaimStatus>,
}

impl ResourceClaim {
    pub fn new(kind: ClaimKind, name: impl Into<String>, namespace: impl Into<String>, spec: JsonValue) -> Self {
        Self {
            kind,
            metadata: ClaimMetadata {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    pub fn claim_ref(&self) -> ClaimRef {
        ClaimRef::new(self.kind, &self.metadata.name, &self.metadata.namespace)
    }

    /// Readiness as observed right now; claims without status are `Unknown`.
    pub fn readiness(&self) -> Readiness {
        self.status.as_ref().map(ClaimStatus::readiness).unwrap_or(Readiness::Unknown)
    }

    pub fn derived_outputs(&self) -> IndexMap<String, String> {
        self.status.as_ref().map(|status| status.derived_outputs.clone()).unwrap_or_default()
    }
}

/// Interpreted readiness of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    NotReady { reason: String, message: Option<String> },
    Unknown,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => f.write_str("Ready"),
            Readiness::NotReady { reason, message: Some(message) } => write!(f, "NotReady ({}: {})", reason, message),
            Readiness::NotReady { reason, message: None } => write!(f, "NotReady ({})", reason),
            Readiness::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Folds successive observations into a monotonic readiness for one poll session.
///
/// Allowed transitions are `Unknown → {Ready, NotReady}` and `NotReady → Ready`;
/// a `NotReady` may refresh its reason. Once `Ready`, the tracker stays `Ready`,
/// and an `Unknown` observation never erases a known `NotReady`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessTracker {
    current: Readiness,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self {
            current: Readiness::Unknown,
        }
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation and returns the resulting readiness.
    pub fn observe(&mut self, next: Readiness) -> &Readiness {
        let accept = match (&self.current, &next) {
            (Readiness::Ready, _) => false,
            (_, Readiness::Ready) => true,
            (Readiness::NotReady { .. }, Readiness::Unknown) => false,
            (_, Readiness::NotReady { .. }) => true,
            (Readiness::Unknown, Readiness::Unknown) => false,
        };
        if accept {
            self.current = next;
        }
        &self.current
    }

    pub fn current(&self) -> &Readiness {
        &self.current
    }
}
