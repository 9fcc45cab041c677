//! Machine CRD
//!
//! A single host that runs a Kubernetes node.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::ObjectReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    shortname = "ma",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning Cluster
    pub cluster_name: String,

    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Provider-specific infrastructure object
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,

    /// Kubernetes version of the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Provider ID reported by the cloud
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "providerID")]
    #[schemars(rename = "providerID")]
    pub provider_id: Option<String>,

    /// Failure domain the machine is placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Bootstrap provider config object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding the bootstrap data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Node backing this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<ObjectReference>,

    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MachinePhase>,

    /// Whether bootstrap data is available
    #[serde(default)]
    pub bootstrap_ready: bool,

    /// Whether the infrastructure provider reports ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Generation observed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the phase changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,

    /// Terminal failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// Machine lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachinePhase {
    /// Created, not yet acted on
    Pending,
    /// Bootstrap data is ready, infrastructure is being provisioned
    Provisioning,
    /// Infrastructure is ready, waiting for the node
    Provisioned,
    /// Node is up
    Running,
    /// Deletion in progress
    Deleting,
    /// Unrecoverable failure
    Failed,
}
