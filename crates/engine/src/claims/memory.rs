use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use claimchain_types::{ClaimKind, ClaimRef, ClaimStatus, Condition, ConditionStatus, Readiness, ResourceClaim};
use indexmap::IndexMap;
use tracing::debug;

use super::{ClaimClient, ClaimError, ClaimHandle, spec_matches};

/// Per-kind call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub get: usize,
    pub delete: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    Create,
    Get,
    Delete,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::Delete => "delete",
        }
    }
}

struct StoredClaim {
    claim: ResourceClaim,
    reads: usize,
}

#[derive(Default)]
struct MemoryState {
    claims: HashMap<ClaimRef, StoredClaim>,
    scripts: HashMap<ClaimKind, Vec<Readiness>>,
    outputs: HashMap<ClaimKind, IndexMap<String, String>>,
    outages: HashSet<(ClaimKind, Operation)>,
    calls: HashMap<ClaimKind, CallCounts>,
}

/// [`ClaimClient`] that simulates a reconciler in process memory.
///
/// Each stored claim walks through the readiness script configured for its
/// kind, one entry per `get`, repeating the last entry once exhausted. Kinds
/// without a script report `Ready` on the first read. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryClaimClient {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryClaimClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that publishes plausible endpoints once claims turn ready.
    pub fn simulated() -> Self {
        let client = Self::new();
        client.publish_outputs(
            ClaimKind::AppContainer,
            [("repository-url", "https://git.example.com/{namespace}/{name}")],
        );
        client.publish_outputs(
            ClaimKind::Microservice,
            [("application-knative-service", "https://{name}.{namespace}.example.com")],
        );
        client
    }

    /// Scripts the readiness observed by successive reads of claims of `kind`.
    pub fn script(&self, kind: ClaimKind, observations: impl IntoIterator<Item = Readiness>) -> &Self {
        self.lock().scripts.insert(kind, observations.into_iter().collect());
        self
    }

    /// Derived outputs reported by ready claims of `kind`.
    ///
    /// `{name}` and `{namespace}` in values expand to the claim's own.
    pub fn publish_outputs<'a>(&self, kind: ClaimKind, outputs: impl IntoIterator<Item = (&'a str, &'a str)>) -> &Self {
        let outputs = outputs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        self.lock().outputs.insert(kind, outputs);
        self
    }

    /// Makes every `operation` on `kind` fail as if the API were unreachable.
    fn fail(&self, kind: ClaimKind, operation: Operation) -> &Self {
        self.lock().outages.insert((kind, operation));
        self
    }

    pub fn fail_creates(&self, kind: ClaimKind) -> &Self {
        self.fail(kind, Operation::Create)
    }

    pub fn fail_gets(&self, kind: ClaimKind) -> &Self {
        self.fail(kind, Operation::Get)
    }

    pub fn fail_deletes(&self, kind: ClaimKind) -> &Self {
        self.fail(kind, Operation::Delete)
    }

    /// Stores a claim as if it had been created by an earlier run.
    pub fn insert(&self, claim: ResourceClaim) {
        self.lock()
            .claims
            .insert(claim.claim_ref(), StoredClaim { claim, reads: 0 });
    }

    pub fn contains(&self, kind: ClaimKind, name: &str, namespace: &str) -> bool {
        self.lock().claims.contains_key(&ClaimRef::new(kind, name, namespace))
    }

    pub fn calls(&self, kind: ClaimKind) -> CallCounts {
        self.lock().calls.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_calls(&self) -> CallCounts {
        self.lock().calls.values().fold(CallCounts::default(), |total, counts| CallCounts {
            create: total.create + counts.create,
            get: total.get + counts.get,
            delete: total.delete + counts.delete,
        })
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn record(&mut self, claim_ref: &ClaimRef, operation: Operation) -> Result<(), ClaimError> {
        let counts = self.calls.entry(claim_ref.kind).or_default();
        match operation {
            Operation::Create => counts.create += 1,
            Operation::Get => counts.get += 1,
            Operation::Delete => counts.delete += 1,
        }
        if self.outages.contains(&(claim_ref.kind, operation)) {
            return Err(ClaimError::unavailable(claim_ref, operation.as_str(), "simulated outage"));
        }
        Ok(())
    }

    fn observed_status(&self, claim_ref: &ClaimRef, reads: usize) -> Option<ClaimStatus> {
        let readiness = match self.scripts.get(&claim_ref.kind) {
            Some(script) if !script.is_empty() => script[reads.min(script.len() - 1)].clone(),
            _ => Readiness::Ready,
        };
        let condition = match &readiness {
            Readiness::Ready => Condition::ready(ConditionStatus::True, Some("Available"), None),
            Readiness::NotReady { reason, message } => Condition::ready(ConditionStatus::False, Some(reason.as_str()), message.as_deref()),
            Readiness::Unknown => return None,
        };
        let derived_outputs = if readiness.is_ready() {
            self.outputs
                .get(&claim_ref.kind)
                .map(|outputs| {
                    outputs
                        .iter()
                        .map(|(key, value)| {
                            let value = value
                                .replace("{name}", &claim_ref.name)
                                .replace("{namespace}", &claim_ref.namespace);
                            (key.clone(), value)
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            IndexMap::new()
        };
        Some(ClaimStatus {
            ready: readiness.is_ready(),
            conditions: vec![condition],
            derived_outputs,
        })
    }
}

#[async_trait]
impl ClaimClient for InMemoryClaimClient {
    async fn create(&self, claim: &ResourceClaim) -> Result<ClaimHandle, ClaimError> {
        let claim_ref = claim.claim_ref();
        let mut state = self.lock();
        state.record(&claim_ref, Operation::Create)?;

        if let Some(existing) = state.claims.get(&claim_ref) {
            if spec_matches(&claim.spec, &existing.claim.spec) {
                return Ok(ClaimHandle {
                    claim: claim_ref,
                    created: false,
                });
            }
            return Err(ClaimError::Conflict { claim: claim_ref });
        }

        debug!(claim = %claim_ref, "storing simulated claim");
        let mut stored = claim.clone();
        stored.status = None;
        state.claims.insert(claim_ref.clone(), StoredClaim { claim: stored, reads: 0 });
        Ok(ClaimHandle {
            claim: claim_ref,
            created: true,
        })
    }

    async fn get(&self, kind: ClaimKind, name: &str, namespace: &str) -> Result<ResourceClaim, ClaimError> {
        let claim_ref = ClaimRef::new(kind, name, namespace);
        let mut state = self.lock();
        state.record(&claim_ref, Operation::Get)?;

        let reads = match state.claims.get_mut(&claim_ref) {
            Some(stored) => {
                stored.reads += 1;
                stored.reads - 1
            }
            None => return Err(ClaimError::NotFound { claim: claim_ref }),
        };
        let status = state.observed_status(&claim_ref, reads);
        let Some(stored) = state.claims.get_mut(&claim_ref) else {
            return Err(ClaimError::NotFound { claim: claim_ref });
        };
        stored.claim.status = status;
        Ok(stored.claim.clone())
    }

    async fn delete(&self, kind: ClaimKind, name: &str, namespace: &str) -> Result<(), ClaimError> {
        let claim_ref = ClaimRef::new(kind, name, namespace);
        let mut state = self.lock();
        state.record(&claim_ref, Operation::Delete)?;
        state.claims.remove(&claim_ref);
        Ok(())
    }
}
