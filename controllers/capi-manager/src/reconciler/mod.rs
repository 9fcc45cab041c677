//! Reconcilers for the cluster lifecycle kinds.
//!
//! Each worker reads its object and any owned objects from the cache,
//! derives the observed status and writes the status subresource only when
//! it differs from what is stored. Writes go straight to the API server;
//! the cache catches up through the watch.

mod cluster;
mod machine;
mod machine_deployment;
mod machine_pool;
mod machine_set;

use std::sync::Arc;

use kube::api::GroupVersionKind;
use kube::Resource;
use manager_runtime::registry::gvk_of;
use manager_runtime::{Action, ControllerOptions, ObjectKey, ReconcileError, Reconciler, SplitClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ConcurrencyBounds;

pub use cluster::ClusterReconciler;
pub use machine::MachineReconciler;
pub use machine_deployment::MachineDeploymentReconciler;
pub use machine_pool::MachinePoolReconciler;
pub use machine_set::MachineSetReconciler;

/// A reconciler ready to be handed to the manager.
pub struct Registration {
    pub name: &'static str,
    pub gvk: GroupVersionKind,
    pub worker: Arc<dyn Reconciler>,
    pub options: ControllerOptions,
}

/// One registration per managed kind, watching the hub version.
pub fn registrations(bounds: &ConcurrencyBounds) -> Vec<Registration> {
    vec![
        Registration {
            name: "cluster",
            gvk: gvk_of::<crds::v1alpha3::Cluster>(),
            worker: Arc::new(ClusterReconciler),
            options: ControllerOptions::concurrency(bounds.cluster),
        },
        Registration {
            name: "machine",
            gvk: gvk_of::<crds::v1alpha3::Machine>(),
            worker: Arc::new(MachineReconciler),
            options: ControllerOptions::concurrency(bounds.machine),
        },
        Registration {
            name: "machineset",
            gvk: gvk_of::<crds::v1alpha3::MachineSet>(),
            worker: Arc::new(MachineSetReconciler),
            options: ControllerOptions::concurrency(bounds.machine_set),
        },
        Registration {
            name: "machinedeployment",
            gvk: gvk_of::<crds::v1alpha3::MachineDeployment>(),
            worker: Arc::new(MachineDeploymentReconciler),
            options: ControllerOptions::concurrency(bounds.machine_deployment),
        },
        Registration {
            name: "machinepool",
            gvk: gvk_of::<crds::v1alpha3::MachinePool>(),
            worker: Arc::new(MachinePoolReconciler),
            options: ControllerOptions::concurrency(bounds.machine_pool),
        },
    ]
}

/// Reads the requested object from the cache, `None` once it is gone.
pub(crate) fn fetch<K>(client: &SplitClient, request: &ObjectKey) -> Result<Option<K>, ReconcileError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match client.get_as::<K>(request) {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether the owning cluster is paused. A missing cluster is not paused.
pub(crate) fn cluster_paused(
    client: &SplitClient,
    namespace: Option<&str>,
    cluster_name: &str,
) -> Result<bool, ReconcileError> {
    if cluster_name.is_empty() {
        return Ok(false);
    }
    let key = match namespace {
        Some(ns) => ObjectKey::namespaced(ns, cluster_name),
        None => ObjectKey::cluster_scoped(cluster_name),
    };
    Ok(fetch::<crds::v1alpha3::Cluster>(client, &key)?.is_some_and(|c| c.spec.paused))
}

/// Writes `object`'s status when it differs from `current`.
///
/// A conflict means a newer copy is already on its way through the watch,
/// so it is not treated as a failure.
pub(crate) async fn write_status_if_changed<K, S>(
    client: &SplitClient,
    request: &ObjectKey,
    current: Option<&S>,
    object: &K,
    desired: &S,
) -> Result<Action, ReconcileError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    S: PartialEq,
{
    if current == Some(desired) {
        debug!(object = %request, "Status up to date");
        return Ok(Action::await_change());
    }
    match client.update_status_as(object).await {
        Ok(_) => {
            info!(object = %request, "Updated status");
            Ok(Action::await_change())
        }
        Err(e) if e.is_conflict() => {
            debug!(object = %request, error = %e, "Status write conflicted, waiting for newer copy");
            Ok(Action::await_change())
        }
        Err(e) => Err(e.into()),
    }
}

/// Saturating conversion for replica counts.
pub(crate) fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use manager_runtime::client::mock::{MockCache, MockStore};
    use manager_runtime::SplitClient;
    use serde::Serialize;

    /// Split client over in-memory doubles.
    pub(crate) struct Harness {
        pub cache: Arc<MockCache>,
        pub store: Arc<MockStore>,
        pub client: SplitClient,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let registry = crate::scheme::build().unwrap();
            let cache = Arc::new(MockCache::new());
            let store = Arc::new(MockStore::new());
            let client = SplitClient::new(registry, cache.clone(), store.clone(), store.clone());
            Self { cache, store, client }
        }

        /// Stores an object and delivers the stored copy to the cache.
        pub(crate) fn seed<K: Serialize>(&self, object: &K) {
            let stored = self.store.seed(object).unwrap();
            self.cache.insert_dynamic(stored).unwrap();
        }

        /// Status as stored on the API server.
        pub(crate) fn stored_status(&self, gvk: &kube::api::GroupVersionKind, ns: &str, name: &str) -> serde_json::Value {
            let key = manager_runtime::ObjectKey::namespaced(ns, name);
            self.store.stored(gvk, &key).unwrap().data["status"].clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrations_cover_every_kind() {
        let bounds = ConcurrencyBounds {
            machine: 3,
            ..ConcurrencyBounds::default()
        };
        let registrations = registrations(&bounds);

        let names: Vec<_> = registrations.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["cluster", "machine", "machineset", "machinedeployment", "machinepool"]);
        assert_eq!(registrations[1].options.max_concurrent_reconciles, 3);
        assert!(registrations.iter().all(|r| r.gvk.version == "v1alpha3"));
    }

    #[test]
    fn test_missing_cluster_is_not_paused() {
        let harness = testing::Harness::new();
        assert!(!cluster_paused(&harness.client, Some("default"), "absent").unwrap());
        assert!(!cluster_paused(&harness.client, Some("default"), "").unwrap());
    }
}
