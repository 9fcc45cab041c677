//! MachinePool CRD (`v1alpha2`, experimental group)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::v1alpha2::MachineTemplateSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "exp.cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "MachinePool",
    namespaced,
    status = "MachinePoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolSpec {
    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template for machines in the pool
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolStatus {
    /// Instances reported by the provider
    #[serde(default)]
    pub replicas: i32,

    /// Instances with a node
    #[serde(default)]
    pub ready_replicas: i32,
}
