//! MachineDeployment CRD (`v1alpha2`)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::LabelSelector;
use crate::v1alpha2::MachineTemplateSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "MachineDeployment",
    namespaced,
    status = "MachineDeploymentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Selects the MachineSets owned by this deployment
    #[serde(default)]
    pub selector: LabelSelector,

    /// Template for machines
    #[serde(default)]
    pub template: MachineTemplateSpec,

    /// Paused deployments are not rolled out
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Generation observed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Machines targeted by the deployment
    #[serde(default)]
    pub replicas: i32,

    /// Machines running the latest template
    #[serde(default)]
    pub updated_replicas: i32,

    /// Machines with a node
    #[serde(default)]
    pub ready_replicas: i32,
}
