//! MachinePool status.

use async_trait::async_trait;
use crds::v1alpha3::{MachinePool, MachinePoolPhase, MachinePoolStatus};
use manager_runtime::{Action, ReconcileError, Reconciler, Request, SplitClient};
use tracing::{debug, info};

use super::{cluster_paused, count, fetch, write_status_if_changed};

/// Keeps `MachinePool.status` replica counts and phase current.
///
/// Replicas are the provider IDs reported by the infrastructure provider;
/// ready replicas are the nodes those IDs resolved to.
#[derive(Debug, Default)]
pub struct MachinePoolReconciler;

fn observed_status(pool: &MachinePool) -> MachinePoolStatus {
    let mut status = pool.status.clone().unwrap_or_default();
    let desired = pool.spec.replicas.unwrap_or(1);

    status.observed_generation = pool.metadata.generation;
    status.bootstrap_ready |= pool.spec.template.spec.bootstrap.data_secret_name.is_some();
    status.replicas = count(pool.spec.provider_id_list.len());
    status.ready_replicas = count(status.node_refs.len());
    status.available_replicas = status.ready_replicas;
    status.unavailable_replicas = (desired - status.available_replicas).max(0);

    status.phase = Some(if pool.metadata.deletion_timestamp.is_some() {
        MachinePoolPhase::Deleting
    } else if !status.bootstrap_ready {
        MachinePoolPhase::Pending
    } else if !status.infrastructure_ready {
        MachinePoolPhase::Provisioning
    } else if status.node_refs.is_empty() && desired > 0 {
        MachinePoolPhase::Provisioned
    } else if status.ready_replicas == desired {
        MachinePoolPhase::Running
    } else if status.ready_replicas < desired {
        MachinePoolPhase::ScalingUp
    } else {
        MachinePoolPhase::ScalingDown
    });
    status
}

#[async_trait]
impl Reconciler for MachinePoolReconciler {
    async fn reconcile(&self, request: &Request, client: &SplitClient) -> Result<Action, ReconcileError> {
        let Some(mut pool) = fetch::<MachinePool>(client, request)? else {
            debug!(machine_pool = %request, "MachinePool is gone");
            return Ok(Action::await_change());
        };
        if cluster_paused(client, request.namespace.as_deref(), &pool.spec.cluster_name)? {
            info!(machine_pool = %request, "Cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let desired = observed_status(&pool);
        let current = pool.status.take();
        pool.status = Some(desired.clone());
        write_status_if_changed(client, request, current.as_ref(), &pool, &desired).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::testing::Harness;
    use crds::v1alpha3::MachinePoolSpec;
    use crds::ObjectReference;
    use manager_runtime::registry::gvk_of;
    use manager_runtime::ObjectKey;

    fn pool(replicas: i32, provider_ids: usize, nodes: usize) -> MachinePool {
        let mut pool = MachinePool::new(
            "pool-a",
            MachinePoolSpec {
                cluster_name: "prod".to_string(),
                replicas: Some(replicas),
                provider_id_list: (0..provider_ids).map(|i| format!("aws:///i-{i}")).collect(),
                ..MachinePoolSpec::default()
            },
        );
        pool.metadata.namespace = Some("default".to_string());
        pool.status = Some(MachinePoolStatus {
            bootstrap_ready: true,
            infrastructure_ready: true,
            node_refs: (0..nodes)
                .map(|i| ObjectReference {
                    name: Some(format!("node-{i}")),
                    ..ObjectReference::default()
                })
                .collect(),
            ..MachinePoolStatus::default()
        });
        pool
    }

    #[test]
    fn test_phases() {
        assert_eq!(observed_status(&pool(3, 3, 3)).phase, Some(MachinePoolPhase::Running));
        assert_eq!(observed_status(&pool(3, 2, 1)).phase, Some(MachinePoolPhase::ScalingUp));
        assert_eq!(observed_status(&pool(1, 2, 2)).phase, Some(MachinePoolPhase::ScalingDown));
        assert_eq!(observed_status(&pool(2, 0, 0)).phase, Some(MachinePoolPhase::Provisioned));

        let mut unbootstrapped = pool(1, 0, 0);
        unbootstrapped.status = None;
        assert_eq!(observed_status(&unbootstrapped).phase, Some(MachinePoolPhase::Pending));
    }

    #[test]
    fn test_replica_counts() {
        let status = observed_status(&pool(4, 3, 2));

        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.unavailable_replicas, 2);
    }

    #[tokio::test]
    async fn test_reconcile_writes_status() {
        let harness = Harness::new();
        harness.seed(&pool(2, 2, 2));

        MachinePoolReconciler
            .reconcile(&ObjectKey::namespaced("default", "pool-a"), &harness.client)
            .await
            .unwrap();

        let status = harness.stored_status(&gvk_of::<MachinePool>(), "default", "pool-a");
        assert_eq!(status["phase"], "Running");
        assert_eq!(status["readyReplicas"], 2);
    }
}
