//! `v1alpha3` cluster lifecycle kinds (hub version).

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
