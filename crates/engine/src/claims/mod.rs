//! Claim persistence boundary.
//!
//! [`ClaimClient`] is the only place the engine talks to the external
//! reconciling system. Two implementations ship with the engine: a REST client
//! for the cluster API ([`KubeClaimClient`]) and an in-process simulation
//! ([`InMemoryClaimClient`]) used by tests and dry runs.

mod kube;
mod memory;

use async_trait::async_trait;
use claimchain_types::{ClaimKind, ClaimRef, ResourceClaim};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use kube::{KubeClaimClient, decode_claim, encode_claim};
pub use memory::{CallCounts, InMemoryClaimClient};

/// Errors raised at the claim boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("{claim} not found")]
    NotFound { claim: ClaimRef },

    #[error("{claim} already exists with a different spec")]
    Conflict { claim: ClaimRef },

    #[error("cluster API unavailable during {operation} of {claim}: {message}")]
    Unavailable {
        claim: ClaimRef,
        operation: &'static str,
        message: String,
    },

    #[error("could not decode {claim}: {message}")]
    Decode { claim: ClaimRef, message: String },
}

impl ClaimError {
    pub fn unavailable(claim: &ClaimRef, operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            claim: claim.clone(),
            operation,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClaimError::NotFound { .. })
    }
}

/// Result of a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimHandle {
    pub claim: ClaimRef,
    /// False when an identical claim already existed and nothing was written.
    pub created: bool,
}

/// Create, read, and delete access to claim objects.
#[async_trait]
pub trait ClaimClient: Send + Sync {
    /// Creates `claim` unless an identical one exists.
    ///
    /// An existing claim with a different spec yields [`ClaimError::Conflict`].
    async fn create(&self, claim: &ResourceClaim) -> Result<ClaimHandle, ClaimError>;

    /// Reads the claim's current observed state without waiting.
    async fn get(&self, kind: ClaimKind, name: &str, namespace: &str) -> Result<ResourceClaim, ClaimError>;

    /// Deletes the claim; a missing claim counts as success.
    async fn delete(&self, kind: ClaimKind, name: &str, namespace: &str) -> Result<(), ClaimError>;
}

/// True when every field of `desired` is present with the same value in `observed`.
///
/// Objects compare as subsets so fields defaulted by the API server do not
/// count as drift; arrays and scalars compare exactly.
pub fn spec_matches(desired: &JsonValue, observed: &JsonValue) -> bool {
    match (desired, observed) {
        (JsonValue::Object(desired_fields), JsonValue::Object(observed_fields)) => desired_fields.iter().all(|(key, value)| {
            observed_fields
                .get(key)
                .is_some_and(|observed_value| spec_matches(value, observed_value))
        }),
        _ => desired == observed,
    }
}
