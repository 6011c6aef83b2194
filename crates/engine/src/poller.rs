//! Cancellable readiness polling.
//!
//! [`ReadinessPoller::wait_ready`] reads a claim on a fixed interval until its
//! `Ready` condition turns true, the timeout elapses, a configured terminal
//! reason is reported, or the caller cancels. Waiting happens on the Tokio
//! timer, so outstanding polls do not pin threads.

use std::sync::Arc;
use std::time::Duration;

use claimchain_types::{ClaimKind, ClaimRef, Readiness, ReadinessTracker, ResourceClaim};
use claimchain_util::format_duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claims::{ClaimClient, ClaimError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);
/// Default timeout for the virtual cluster stage.
pub const DEFAULT_VCLUSTER_TIMEOUT: Duration = Duration::from_secs(1200);

/// How often and how long to poll one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Effective policy for each stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicies {
    pub vcluster: PollPolicy,
    pub app_container: PollPolicy,
    pub microservice: PollPolicy,
}

impl Default for PollPolicies {
    fn default() -> Self {
        Self {
            vcluster: PollPolicy::new(DEFAULT_POLL_INTERVAL, DEFAULT_VCLUSTER_TIMEOUT),
            app_container: PollPolicy::default(),
            microservice: PollPolicy::default(),
        }
    }
}

impl PollPolicies {
    /// The same policy for every stage.
    pub fn uniform(policy: PollPolicy) -> Self {
        Self {
            vcluster: policy,
            app_container: policy,
            microservice: policy,
        }
    }

    pub fn for_kind(&self, kind: ClaimKind) -> PollPolicy {
        match kind {
            ClaimKind::VCluster => self.vcluster,
            ClaimKind::AppContainer => self.app_container,
            ClaimKind::Microservice => self.microservice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("{claim} did not become ready within {}s; last observed {last}", .timeout.as_secs())]
    TimedOut {
        claim: ClaimRef,
        timeout: Duration,
        last: Readiness,
    },

    #[error("wait for {claim} was cancelled")]
    Cancelled { claim: ClaimRef, last: Readiness },

    #[error("{claim} reported terminal reason {reason}")]
    Rejected {
        claim: ClaimRef,
        reason: String,
        message: Option<String>,
    },

    #[error(transparent)]
    Client(#[from] ClaimError),
}

impl ReadinessError {
    /// Last condition seen before the wait ended, when one was observed.
    pub fn last_observed(&self) -> Option<Readiness> {
        match self {
            ReadinessError::TimedOut { last, .. } | ReadinessError::Cancelled { last, .. } => Some(last.clone()),
            ReadinessError::Rejected { reason, message, .. } => Some(Readiness::NotReady {
                reason: reason.clone(),
                message: message.clone(),
            }),
            ReadinessError::Client(_) => None,
        }
    }
}

/// A claim observed `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyClaim {
    pub claim: ResourceClaim,
    pub attempts: u32,
}

/// Polls claims through a [`ClaimClient`].
#[derive(Clone)]
pub struct ReadinessPoller {
    client: Arc<dyn ClaimClient>,
    terminal_reasons: Vec<String>,
}

impl ReadinessPoller {
    pub fn new(client: Arc<dyn ClaimClient>) -> Self {
        Self {
            client,
            terminal_reasons: Vec::new(),
        }
    }

    /// NotReady reasons that end the wait early instead of retrying.
    pub fn with_terminal_reasons(mut self, reasons: impl IntoIterator<Item = String>) -> Self {
        self.terminal_reasons = reasons.into_iter().collect();
        self
    }

    /// Waits until `claim` is ready.
    ///
    /// A claim that is not found yet counts as `Unknown`; every other read
    /// failure ends the wait immediately. The final read happens at the
    /// deadline, so a timed-out wait spends `policy.timeout` plus one read.
    pub async fn wait_ready(
        &self,
        claim: &ClaimRef,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ReadyClaim, ReadinessError> {
        debug!(
            claim = %claim,
            interval = %format_duration(policy.interval),
            timeout = %format_duration(policy.timeout),
            "waiting for claim readiness"
        );
        let deadline = Instant::now() + policy.timeout;
        let mut tracker = ReadinessTracker::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReadinessError::Cancelled { claim: claim.clone(), last: tracker.current().clone() });
                }
                observed = self.client.get(claim.kind, &claim.name, &claim.namespace) => observed,
            };

            match observed {
                Ok(resource) => match tracker.observe(resource.readiness()).clone() {
                    Readiness::Ready => {
                        info!(claim = %claim, attempt, "claim is ready");
                        return Ok(ReadyClaim {
                            claim: resource,
                            attempts: attempt,
                        });
                    }
                    Readiness::NotReady { reason, message } => {
                        warn!(claim = %claim, attempt, reason = %reason, message = ?message, "claim not ready");
                        if self.terminal_reasons.iter().any(|terminal| terminal == &reason) {
                            return Err(ReadinessError::Rejected {
                                claim: claim.clone(),
                                reason,
                                message,
                            });
                        }
                    }
                    Readiness::Unknown => debug!(claim = %claim, attempt, "claim readiness unknown"),
                },
                Err(ClaimError::NotFound { .. }) => {
                    tracker.observe(Readiness::Unknown);
                    debug!(claim = %claim, attempt, "claim not visible yet");
                }
                Err(error) => return Err(error.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReadinessError::TimedOut {
                    claim: claim.clone(),
                    timeout: policy.timeout,
                    last: tracker.current().clone(),
                });
            }

            let pause = policy.interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReadinessError::Cancelled { claim: claim.clone(), last: tracker.current().clone() });
                }
                _ = sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::claims::InMemoryClaimClient;

    fn not_ready(reason: &str) -> Readiness {
        Readiness::NotReady {
            reason: reason.to_string(),
            message: None,
        }
    }

    async fn client_with_claim() -> (InMemoryClaimClient, ClaimRef) {
        let client = InMemoryClaimClient::new();
        let claim = claimchain_types::ResourceClaim::new(ClaimKind::VCluster, "order-api-vcluster", "default", json!({}));
        client.create(&claim).await.unwrap();
        (client, claim.claim_ref())
    }

    #[test]
    fn default_policy_allows_forty_intervals() {
        let policy = PollPolicy::default();
        assert_eq!(policy.timeout.as_secs() / policy.interval.as_secs(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_ready() {
        let (client, claim) = client_with_claim().await;
        client.script(ClaimKind::VCluster, [Readiness::Unknown, not_ready("Creating"), Readiness::Ready]);
        let poller = ReadinessPoller::new(Arc::new(client.clone()));

        let started = Instant::now();
        let ready = poller
            .wait_ready(&claim, &PollPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ready.attempts, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(client.calls(ClaimKind::VCluster).get, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_one_interval_of_the_bound() {
        let (client, claim) = client_with_claim().await;
        client.script(ClaimKind::VCluster, [not_ready("Provisioning")]);
        let poller = ReadinessPoller::new(Arc::new(client.clone()));
        let policy = PollPolicy::new(Duration::from_secs(15), Duration::from_secs(100));

        let started = Instant::now();
        let error = poller.wait_ready(&claim, &policy, &CancellationToken::new()).await.unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= policy.timeout && elapsed <= policy.timeout + policy.interval);
        match error {
            ReadinessError::TimedOut { last, .. } => assert_eq!(last, not_ready("Provisioning")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_claims_are_unknown_until_timeout() {
        let client = InMemoryClaimClient::new();
        let claim = ClaimRef::new(ClaimKind::VCluster, "ghost", "default");
        let poller = ReadinessPoller::new(Arc::new(client));
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(10));

        let error = poller.wait_ready(&claim, &policy, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, ReadinessError::TimedOut { last: Readiness::Unknown, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let (client, claim) = client_with_claim().await;
        client.script(ClaimKind::VCluster, [Readiness::Unknown]);
        let poller = ReadinessPoller::new(Arc::new(client));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let error = poller.wait_ready(&claim, &PollPolicy::default(), &cancel).await.unwrap_err();
        assert!(matches!(error, ReadinessError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(20) + DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_reasons_end_the_wait_early() {
        let (client, claim) = client_with_claim().await;
        client.script(ClaimKind::VCluster, [not_ready("Creating"), not_ready("QuotaExceeded")]);
        let poller = ReadinessPoller::new(Arc::new(client)).with_terminal_reasons(["QuotaExceeded".to_string()]);

        let error = poller
            .wait_ready(&claim, &PollPolicy::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ReadinessError::Rejected { ref reason, .. } if reason == "QuotaExceeded"));
        assert_eq!(error.last_observed(), Some(not_ready("QuotaExceeded")));
    }

    #[tokio::test(start_paused = true)]
    async fn read_failures_are_not_retried() {
        let (client, claim) = client_with_claim().await;
        client.fail_gets(ClaimKind::VCluster);
        let poller = ReadinessPoller::new(Arc::new(client.clone()));

        let error = poller
            .wait_ready(&claim, &PollPolicy::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ReadinessError::Client(ClaimError::Unavailable { .. })));
        assert_eq!(client.calls(ClaimKind::VCluster).get, 1);
    }
}
