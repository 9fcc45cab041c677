//! Cluster lifecycle CRD definitions
//!
//! Typed Kubernetes custom resources managed by the cluster manager:
//! Cluster, Machine, MachineSet, MachineDeployment and MachinePool.
//!
//! Two schema versions are served. `v1alpha3` is the hub version that the
//! reconcilers watch; `v1alpha2` is kept for admission and conversion.

pub mod references;
pub mod v1alpha2;
pub mod v1alpha3;

pub use references::*;

/// Version the reconcilers watch and the API server stores.
pub const HUB_VERSION: &str = "v1alpha3";

/// Label carrying the name of the owning cluster.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
