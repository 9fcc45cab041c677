//! Cluster status.

use async_trait::async_trait;
use crds::v1alpha3::{Cluster, ClusterPhase, ClusterStatus};
use manager_runtime::{Action, ReconcileError, Reconciler, Request, SplitClient};
use tracing::{debug, info};

use super::{fetch, write_status_if_changed};

/// Keeps `Cluster.status.phase` and `observedGeneration` current.
#[derive(Debug, Default)]
pub struct ClusterReconciler;

fn observed_status(cluster: &Cluster) -> ClusterStatus {
    let mut status = cluster.status.clone().unwrap_or_default();
    status.observed_generation = cluster.metadata.generation;
    status.phase = Some(if cluster.metadata.deletion_timestamp.is_some() {
        ClusterPhase::Deleting
    } else if status.failure_reason.is_some() || status.failure_message.is_some() {
        ClusterPhase::Failed
    } else if status.infrastructure_ready {
        ClusterPhase::Provisioned
    } else if cluster.spec.infrastructure_ref.is_some() {
        ClusterPhase::Provisioning
    } else {
        ClusterPhase::Pending
    });
    status
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    async fn reconcile(&self, request: &Request, client: &SplitClient) -> Result<Action, ReconcileError> {
        let Some(mut cluster) = fetch::<Cluster>(client, request)? else {
            debug!(cluster = %request, "Cluster is gone");
            return Ok(Action::await_change());
        };
        if cluster.spec.paused {
            info!(cluster = %request, "Cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let desired = observed_status(&cluster);
        let current = cluster.status.take();
        cluster.status = Some(desired.clone());
        write_status_if_changed(client, request, current.as_ref(), &cluster, &desired).await
    }
}
