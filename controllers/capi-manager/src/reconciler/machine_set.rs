//! MachineSet status.
//!
//! Replica counts come from the Machines in the cache that belong to the
//! same cluster and match the set's selector.

use async_trait::async_trait;
use crds::v1alpha3::{Machine, MachineSet, MachineSetStatus};
use manager_runtime::{Action, ReconcileError, Reconciler, Request, SplitClient};
use tracing::{debug, info};

use super::{cluster_paused, count, fetch, write_status_if_changed};

/// Keeps `MachineSet.status` replica counts current.
#[derive(Debug, Default)]
pub struct MachineSetReconciler;

fn owned_machines<'a>(set: &MachineSet, machines: &'a [Machine]) -> Vec<&'a Machine> {
    machines
        .iter()
        .filter(|m| m.metadata.deletion_timestamp.is_none())
        .filter(|m| m.spec.cluster_name == set.spec.cluster_name)
        .filter(|m| {
            m.metadata
                .labels
                .as_ref()
                .is_some_and(|labels| set.spec.selector.matches(labels))
        })
        .collect()
}

fn observed_status(set: &MachineSet, machines: &[Machine]) -> MachineSetStatus {
    let owned = owned_machines(set, machines);
    let template_labels = &set.spec.template.metadata.labels;
    let fully_labeled = owned
        .iter()
        .filter(|m| {
            let labels = m.metadata.labels.clone().unwrap_or_default();
            template_labels.iter().all(|(k, v)| labels.get(k) == Some(v))
        })
        .count();
    let ready = owned
        .iter()
        .filter(|m| m.status.as_ref().is_some_and(|s| s.node_ref.is_some()))
        .count();

    let selector = set.spec.selector.to_selector_string();
    MachineSetStatus {
        selector: (!selector.is_empty()).then_some(selector),
        replicas: count(owned.len()),
        fully_labeled_replicas: count(fully_labeled),
        ready_replicas: count(ready),
        available_replicas: count(ready),
        observed_generation: set.metadata.generation,
        ..set.status.clone().unwrap_or_default()
    }
}

#[async_trait]
impl Reconciler for MachineSetReconciler {
    async fn reconcile(&self, request: &Request, client: &SplitClient) -> Result<Action, ReconcileError> {
        let Some(mut set) = fetch::<MachineSet>(client, request)? else {
            debug!(machine_set = %request, "MachineSet is gone");
            return Ok(Action::await_change());
        };
        if cluster_paused(client, request.namespace.as_deref(), &set.spec.cluster_name)? {
            info!(machine_set = %request, "Cluster is paused, skipping");
            return Ok(Action::await_change());
        }

        let machines = client.list_as::<Machine>(request.namespace.as_deref())?;
        let desired = observed_status(&set, &machines);
        let current = set.status.take();
        set.status = Some(desired.clone());
        write_status_if_changed(client, request, current.as_ref(), &set, &desired).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::testing::Harness;
    use crds::v1alpha3::{MachineSetSpec, MachineSpec, MachineStatus};
    use crds::{LabelSelector, ObjectReference};
    use manager_runtime::registry::gvk_of;
    use manager_runtime::ObjectKey;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn machine(name: &str, cluster: &str, pool: &str, has_node: bool) -> Machine {
        let mut machine = Machine::new(
            name,
            MachineSpec {
                cluster_name: cluster.to_string(),
                ..MachineSpec::default()
            },
        );
        machine.metadata.namespace = Some("default".to_string());
        machine.metadata.labels = Some(labels(&[("pool", pool)]));
        machine.status = has_node.then(|| MachineStatus {
            node_ref: Some(ObjectReference {
                name: Some(format!("{name}-node")),
                ..ObjectReference::default()
            }),
            ..MachineStatus::default()
        });
        machine
    }

    fn machine_set() -> MachineSet {
        let mut set = MachineSet::new(
            "workers",
            MachineSetSpec {
                cluster_name: "prod".to_string(),
                replicas: Some(3),
                selector: LabelSelector {
                    match_labels: labels(&[("pool", "workers")]),
                },
                ..MachineSetSpec::default()
            },
        );
        set.metadata.namespace = Some("default".to_string());
        set
    }

    #[test]
    fn test_counts_only_matching_machines() {
        let machines = vec![
            machine("a", "prod", "workers", true),
            machine("b", "prod", "workers", false),
            machine("c", "prod", "masters", true),
            machine("d", "staging", "workers", true),
        ];

        let status = observed_status(&machine_set(), &machines);

        assert_eq!(status.replicas, 2);
        assert_eq!(status.ready_replicas, 1);
        assert_eq!(status.available_replicas, 1);
        assert_eq!(status.selector.as_deref(), Some("pool=workers"));
    }

    #[tokio::test]
    async fn test_reconcile_reads_machines_from_cache() {
        let harness = Harness::new();
        harness.seed(&machine_set());
        harness.seed(&machine("a", "prod", "workers", true));
        harness.seed(&machine("b", "prod", "workers", true));

        MachineSetReconciler
            .reconcile(&ObjectKey::namespaced("default", "workers"), &harness.client)
            .await
            .unwrap();

        let status = harness.stored_status(&gvk_of::<MachineSet>(), "default", "workers");
        assert_eq!(status["replicas"], 2);
        assert_eq!(status["readyReplicas"], 2);
        assert_eq!(harness.store.call_count(), 1, "only the status write reaches the store");
    }
}
