//! Machine CRD (`v1alpha2`)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::ObjectReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
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
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Bootstrap provider config object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Inline bootstrap data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Node backing this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<ObjectReference>,

    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Whether bootstrap data is available
    #[serde(default)]
    pub bootstrap_ready: bool,

    /// Whether the infrastructure provider reports ready
    #[serde(default)]
    pub infrastructure_ready: bool,
}
