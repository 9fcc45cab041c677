//! MachineSet CRD
//!
//! Keeps a stable number of Machines running from a template.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::{LabelSelector, TemplateMetadata};
use crate::v1alpha3::MachineSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus",
    shortname = "ms"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Name of the owning Cluster
    pub cluster_name: String,

    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Seconds a machine must be ready before it counts as available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ready_seconds: Option<i32>,

    /// Which machines to remove first when scaling down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_policy: Option<String>,

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
    /// Serialized label selector, used by the scale subresource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Number of machines matched by the selector
    #[serde(default)]
    pub replicas: i32,

    /// Machines whose labels match the template labels
    #[serde(default)]
    pub fully_labeled_replicas: i32,

    /// Machines with a node
    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines that have been ready for `minReadySeconds`
    #[serde(default)]
    pub available_replicas: i32,

    /// Generation observed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}
