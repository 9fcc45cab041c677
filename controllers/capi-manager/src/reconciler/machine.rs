//! Machine status.

use async_trait::async_trait;
use chrono::Utc;
use crds::v1alpha3::{Machine, MachinePhase, MachineStatus};
use manager_runtime::{Action, ReconcileError, Reconciler, Request, SplitClient};
use tracing::{debug, info};

use super::{cluster_paused, fetch, write_status_if_changed};

/// Keeps `Machine.status.phase`, readiness flags and `observedGeneration`
/// current.
#[derive(Debug, Default)]
pub struct MachineReconciler;

fn phase(machine: &Machine, status: &MachineStatus) -> MachinePhase {
    if machine.metadata.deletion_timestamp.is_some() {
        MachinePhase::Deleting
    } else if status.failure_reason.is_some() || status.failure_message.is_some() {
        MachinePhase::Failed
    } else if status.node_ref.is_some() {
        MachinePhase::Running
    } else if status.bootstrap_ready && status.infrastructure_ready {
        MachinePhase::Provisioned
    } else if status.bootstrap_ready {
        MachinePhase::Provisioning
    } else {
        MachinePhase::Pending
    }
}

fn observed_status(machine: &Machine) -> MachineStatus {
    let previous = machine.status.clone().unwrap_or_default();
    let mut status = previous.clone();
    status.observed_generation = machine.metadata.generation;
    status.bootstrap_ready |= machine.spec.bootstrap.data_secret_name.is_some();

    let phase = phase(machine, &status);
    if previous.phase != Some(phase) {
        status.phase = Some(phase);
        status.last_updated = Some(Utc::now());
    }
    status
}

#[async_trait]
impl Reconciler for MachineReconciler {
    async fn reconcile(&self, request: &Request, client: &SplitClient) -> Result<Action, ReconcileError> {
        let Some(mut machine) = fetch::<Machine>(client, request)? else {
            debug!(machine = %request, "Machine is gone");
            return Ok(Action::await_change());
        };
        if cluster_paused(client, request.namespace.as_deref(), &machine.spec.cluster_name)? {
            info!(machine = %request, cluster = %machine.spec.cluster_name, "Cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let desired = observed_status(&machine);
        let current = machine.status.take();
        machine.status = Some(desired.clone());
        write_status_if_changed(client, request, current.as_ref(), &machine, &desired).await
    }
}
