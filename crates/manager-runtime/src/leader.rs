//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs
//! controllers. Writes carry the lease's resourceVersion, so two replicas
//! racing for an expired lease cannot both win.
//!
//! Losing the lease after acquiring it is fatal: [`LeaderElector::hold`]
//! returns [`LeaderElectionError::Lost`] and the manager shuts down so a
//! restarted replica can rejoin the election cleanly.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Api, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The lease could not be built or read
    #[error("malformed lease: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Another replica holds the lease now, or renewal kept failing
    #[error("leader lease {lease} lost by {identity}")]
    Lost {
        /// Lease name
        lease: String,
        /// Our identity
        identity: String,
    },
}

/// Where and how to hold the lease.
#[derive(Debug, Clone)]
pub struct LeaderElectionOptions {
    /// Lease name
    pub lease_name: String,
    /// Lease namespace
    pub namespace: String,
    /// Holder identity written into the lease
    pub identity: String,
    /// How long a lease stays valid without renewal
    pub lease_duration: Duration,
    /// How long the leader keeps retrying renewal before giving up
    pub renew_deadline: Duration,
    /// Pause between attempts
    pub retry_period: Duration,
}

impl LeaderElectionOptions {
    /// Options with the usual 15s lease, 10s renew deadline and 2s retry.
    pub fn new(
        lease_name: impl Into<String>,
        namespace: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            lease_name: lease_name.into(),
            namespace: namespace.into(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// Outcome of reading the current lease.
#[derive(Debug, PartialEq, Eq)]
enum LeaseState {
    HeldByUs,
    HeldByOther { holder: String },
    Expired { transitions: i32 },
}

fn micro_time(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn lease_state(lease: &Lease, identity: &str, now: DateTime<Utc>) -> LeaseState {
    let Some(spec) = lease.spec.as_ref() else {
        return LeaseState::Expired { transitions: 0 };
    };
    let transitions = spec.lease_transitions.unwrap_or(0);
    let holder = spec.holder_identity.as_deref().unwrap_or_default();
    if holder.is_empty() {
        return LeaseState::Expired { transitions };
    }
    if holder == identity {
        return LeaseState::HeldByUs;
    }

    // renewTime is read back through its wire form so this does not depend
    // on which time library the generated types use
    let renewed = spec
        .renew_time
        .as_ref()
        .and_then(|t| serde_json::to_value(t).ok())
        .and_then(|v| v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
        .map(|t| t.with_timezone(&Utc));
    let expired = match (renewed, spec.lease_duration_seconds) {
        (Some(renewed), Some(seconds)) => now > renewed + chrono::Duration::seconds(i64::from(seconds)),
        _ => true,
    };
    if expired {
        LeaseState::Expired { transitions }
    } else {
        LeaseState::HeldByOther {
            holder: holder.to_string(),
        }
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    api: Api<Lease>,
    options: LeaderElectionOptions,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    /// Creates an elector for the lease described by `options`.
    pub fn new(client: Client, options: LeaderElectionOptions) -> Self {
        Self {
            api: Api::namespaced(client, &options.namespace),
            options,
        }
    }

    /// Our holder identity.
    pub fn identity(&self) -> &str {
        &self.options.identity
    }

    /// Waits until the lease is ours.
    ///
    /// Returns `false` when `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        info!(
            identity = %self.options.identity,
            lease = %self.options.lease_name,
            namespace = %self.options.namespace,
            "Waiting for leadership"
        );
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.options.identity, "Leadership acquired");
                    return true;
                }
                Ok(false) => debug!(identity = %self.options.identity, "Lease held by another replica"),
                // transient errors shouldn't stop us
                Err(e) => warn!(identity = %self.options.identity, error = %e, "Failed to acquire lease"),
            }
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(self.options.retry_period) => {}
            }
        }
    }

    /// Keeps renewing the lease until `cancel` fires.
    ///
    /// Fails with [`LeaderElectionError::Lost`] once renewal has not
    /// succeeded for `renew_deadline`, or another replica holds the lease.
    pub async fn hold(self, cancel: CancellationToken) -> Result<(), LeaderElectionError> {
        let mut last_renewal = tokio::time::Instant::now();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(identity = %self.options.identity, "Stopped renewing lease");
                    return Ok(());
                }
                () = tokio::time::sleep(self.options.retry_period) => {}
            }
            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewal = tokio::time::Instant::now(),
                Ok(false) => return Err(self.lost()),
                Err(e) => {
                    warn!(identity = %self.options.identity, error = %e, "Failed to renew lease");
                    if last_renewal.elapsed() >= self.options.renew_deadline {
                        return Err(self.lost());
                    }
                }
            }
        }
    }

    fn lost(&self) -> LeaderElectionError {
        warn!(identity = %self.options.identity, "Leadership lost");
        LeaderElectionError::Lost {
            lease: self.options.lease_name.clone(),
            identity: self.options.identity.clone(),
        }
    }

    fn desired_lease(
        &self,
        resource_version: Option<&str>,
        acquire_time: Option<String>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<Lease, serde_json::Error> {
        let seconds = i32::try_from(self.options.lease_duration.as_secs()).unwrap_or(i32::MAX);
        let now = micro_time(now);
        serde_json::from_value(json!({
            "metadata": {
                "name": self.options.lease_name,
                "namespace": self.options.namespace,
                "resourceVersion": resource_version,
            },
            "spec": {
                "holderIdentity": self.options.identity,
                "leaseDurationSeconds": seconds,
                "acquireTime": acquire_time.unwrap_or_else(|| now.clone()),
                "renewTime": now,
                "leaseTransitions": transitions,
            }
        }))
    }

    /// Try to acquire or renew the lease atomically
    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();
        let existing = match self.api.get(&self.options.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        let Some(existing) = existing else {
            let lease = self.desired_lease(None, None, now, 0)?;
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => {
                    info!(identity = %self.options.identity, "Created new lease");
                    Ok(true)
                }
                // someone else created it first
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let resource_version = existing.metadata.resource_version.as_deref();
        let lease = match lease_state(&existing, &self.options.identity, now) {
            LeaseState::HeldByOther { holder } => {
                debug!(holder = %holder, "Lease is held");
                return Ok(false);
            }
            LeaseState::HeldByUs => {
                let acquired = existing
                    .spec
                    .as_ref()
                    .and_then(|s| s.acquire_time.as_ref())
                    .and_then(|t| serde_json::to_value(t).ok())
                    .and_then(|v| v.as_str().map(str::to_string));
                let transitions = existing
                    .spec
                    .as_ref()
                    .and_then(|s| s.lease_transitions)
                    .unwrap_or(0);
                self.desired_lease(resource_version, acquired, now, transitions)?
            }
            LeaseState::Expired { transitions } => {
                info!(identity = %self.options.identity, "Taking over expired lease");
                self.desired_lease(resource_version, None, now, transitions + 1)?
            }
        };

        match self
            .api
            .replace(&self.options.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            // the lease changed since we read it
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: DateTime<Utc>, seconds: i32) -> Lease {
        serde_json::from_value(json!({
            "metadata": { "name": "l", "namespace": "ns", "resourceVersion": "7" },
            "spec": {
                "holderIdentity": holder,
                "leaseDurationSeconds": seconds,
                "renewTime": micro_time(renewed),
                "leaseTransitions": 2,
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_own_lease_is_renewed() {
        let now = Utc::now();
        let state = lease_state(&lease(Some("me"), now, 15), "me", now);
        assert_eq!(state, LeaseState::HeldByUs);
    }

    #[test]
    fn test_live_lease_of_another_replica_is_respected() {
        let now = Utc::now();
        let state = lease_state(&lease(Some("other"), now, 15), "me", now);
        assert_eq!(
            state,
            LeaseState::HeldByOther {
                holder: "other".to_string()
            }
        );
    }

    #[test]
    fn test_stale_lease_can_be_taken_over() {
        let now = Utc::now();
        let renewed = now - chrono::Duration::seconds(60);
        let state = lease_state(&lease(Some("other"), renewed, 15), "me", now);
        assert_eq!(state, LeaseState::Expired { transitions: 2 });
    }

    #[test]
    fn test_released_lease_can_be_taken_over() {
        let now = Utc::now();
        let state = lease_state(&lease(None, now, 15), "me", now);
        assert_eq!(state, LeaseState::Expired { transitions: 2 });
    }
}
