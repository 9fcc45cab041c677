//! MachineSet CRD (`v1alpha2`)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::{LabelSelector, TemplateMetadata};
use crate::v1alpha2::MachineSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Selects the machines owned by this set
    #[serde(default)]
    pub selector: LabelSelector,

    /// Template for new machines
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

/// Template used to stamp out Machines.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Metadata copied onto created machines
    #[serde(default)]
    pub metadata: TemplateMetadata,

    /// Spec of created machines
    #[serde(default)]
    pub spec: MachineSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    /// Number of machines matched by the selector
    #[serde(default)]
    pub replicas: i32,

    /// Machines with a node
    #[serde(default)]
    pub ready_replicas: i32,

    /// Generation observed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
