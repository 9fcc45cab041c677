//! MachinePool CRD (experimental group)
//!
//! A group of machines managed by an infrastructure provider as one unit.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::ObjectReference;
use crate::v1alpha3::MachineTemplateSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "exp.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "MachinePool",
    namespaced,
    status = "MachinePoolStatus",
    shortname = "mp",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolSpec {
    /// Name of the owning Cluster
    pub cluster_name: String,

    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template for machines in the pool
    #[serde(default)]
    pub template: MachineTemplateSpec,

    /// Seconds a machine must be ready before it counts as available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ready_seconds: Option<i32>,

    /// Provider IDs of the pool instances
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde(rename = "providerIDList")]
    #[schemars(rename = "providerIDList")]
    pub provider_id_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolStatus {
    /// Nodes backing the pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_refs: Vec<ObjectReference>,

    /// Instances reported by the provider
    #[serde(default)]
    pub replicas: i32,

    /// Instances with a node
    #[serde(default)]
    pub ready_replicas: i32,

    /// Instances available for `minReadySeconds`
    #[serde(default)]
    pub available_replicas: i32,

    /// Instances still required for full capacity
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MachinePoolPhase>,

    /// Whether bootstrap data is available
    #[serde(default)]
    pub bootstrap_ready: bool,

    /// Whether the infrastructure provider reports ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Generation observed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// MachinePool lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachinePoolPhase {
    /// Created, not yet acted on
    Pending,
    /// Infrastructure is being provisioned
    Provisioning,
    /// Infrastructure is ready, waiting for nodes
    Provisioned,
    /// All desired nodes are up
    Running,
    /// Pool is growing
    ScalingUp,
    /// Pool is shrinking
    ScalingDown,
    /// Deletion in progress
    Deleting,
    /// Unrecoverable failure
    Failed,
}
