//! MachineDeployment status.
//!
//! Sums the status of the MachineSets the deployment selects. A set counts
//! as updated when its machine template equals the deployment's.

use async_trait::async_trait;
use crds::v1alpha3::{
    MachineDeployment, MachineDeploymentPhase, MachineDeploymentStatus, MachineSet, MachineSetStatus,
};
use manager_runtime::{Action, ReconcileError, Reconciler, Request, SplitClient};
use tracing::{debug, info};

use super::{cluster_paused, fetch, write_status_if_changed};

/// Keeps `MachineDeployment.status` replica counts and phase current.
#[derive(Debug, Default)]
pub struct MachineDeploymentReconciler;

fn same_template(deployment: &MachineDeployment, set: &MachineSet) -> bool {
    serde_json::to_value(&deployment.spec.template).ok() == serde_json::to_value(&set.spec.template).ok()
}

fn total(sets: &[&MachineSet], field: fn(&MachineSetStatus) -> i32) -> i32 {
    sets.iter()
        .filter_map(|s| s.status.as_ref())
        .map(field)
        .fold(0, i32::saturating_add)
}

fn observed_status(deployment: &MachineDeployment, sets: &[MachineSet]) -> MachineDeploymentStatus {
    let owned: Vec<_> = sets
        .iter()
        .filter(|s| s.metadata.deletion_timestamp.is_none())
        .filter(|s| s.spec.cluster_name == deployment.spec.cluster_name)
        .filter(|s| {
            s.metadata
                .labels
                .as_ref()
                .is_some_and(|labels| deployment.spec.selector.matches(labels))
        })
        .collect();

    let updated: Vec<_> = owned
        .iter()
        .copied()
        .filter(|s| same_template(deployment, s))
        .collect();

    let desired = deployment.spec.replicas.unwrap_or(1);
    let replicas = total(&owned, |s| s.replicas);
    let ready = total(&owned, |s| s.ready_replicas);
    let available = total(&owned, |s| s.available_replicas);

    let phase = if ready == desired {
        MachineDeploymentPhase::Running
    } else if ready < desired {
        MachineDeploymentPhase::ScalingUp
    } else {
        MachineDeploymentPhase::ScalingDown
    };

    let selector = deployment.spec.selector.to_selector_string();
    MachineDeploymentStatus {
        observed_generation: deployment.metadata.generation,
        selector: (!selector.is_empty()).then_some(selector),
        replicas,
        updated_replicas: total(&updated, |s| s.replicas),
        ready_replicas: ready,
        available_replicas: available,
        unavailable_replicas: (desired - available).max(0),
        phase: Some(phase),
    }
}

#[async_trait]
impl Reconciler for MachineDeploymentReconciler {
    async fn reconcile(&self, request: &Request, client: &SplitClient) -> Result<Action, ReconcileError> {
        let Some(mut deployment) = fetch::<MachineDeployment>(client, request)? else {
            debug!(machine_deployment = %request, "MachineDeployment is gone");
            return Ok(Action::await_change());
        };
        if deployment.spec.paused
            || cluster_paused(client, request.namespace.as_deref(), &deployment.spec.cluster_name)?
        {
            info!(machine_deployment = %request, "Paused, skipping");
            return Ok(Action::await_change());
        }

        let sets = client.list_as::<MachineSet>(request.namespace.as_deref())?;
        let desired = observed_status(&deployment, &sets);
        let current = deployment.status.take();
        deployment.status = Some(desired.clone());
        write_status_if_changed(client, request, current.as_ref(), &deployment, &desired).await
    }
}
