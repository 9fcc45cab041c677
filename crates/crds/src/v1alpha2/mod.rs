//! `v1alpha2` cluster lifecycle kinds.
//!
//! In this version the owning cluster is carried only by the
//! `cluster.x-k8s.io/cluster-name` label; `spec.clusterName` arrived in
//! `v1alpha3`. Bootstrap data was inlined instead of referenced by secret.

pub mod cluster;
pub mod machine;
pub mod machine_deployment;
pub mod machine_pool;
pub mod machine_set;

pub use cluster::*;
pub use machine::*;
pub use machine_deployment::*;
pub use machine_pool::*;
pub use machine_set::*;
