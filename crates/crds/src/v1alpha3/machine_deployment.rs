//! MachineDeployment CRD
//!
//! Declarative rollouts of MachineSets.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::LabelSelector;
use crate::v1alpha3::MachineTemplateSpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "MachineDeployment",
    namespaced,
    status = "MachineDeploymentStatus",
    shortname = "md",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Name of the owning Cluster
    pub cluster_name: String,

    /// Desired number of machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Selects the MachineSets owned by this deployment
    #[serde(default)]
    pub selector: LabelSelector,

    /// Template for machines
    #[serde(default)]
    pub template: MachineTemplateSpec,

    /// Rollout strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MachineDeploymentStrategy>,

    /// Number of old MachineSets to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Paused deployments are not rolled out
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStrategy {
    /// Strategy type, only `RollingUpdate` is supported
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    #[schemars(rename = "type")]
    pub strategy_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Generation observed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Serialized label selector, used by the scale subresource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Machines targeted by the deployment
    #[serde(default)]
    pub replicas: i32,

    /// Machines running the latest template
    #[serde(default)]
    pub updated_replicas: i32,

    /// Machines with a node
    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines available for `minReadySeconds`
    #[serde(default)]
    pub available_replicas: i32,

    /// Machines still required for full capacity
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Rollout phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<MachineDeploymentPhase>,
}

/// MachineDeployment rollout phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineDeploymentPhase {
    /// Fewer machines than desired
    ScalingUp,
    /// More machines than desired
    ScalingDown,
    /// Machine count matches the desired replicas
    Running,
    /// Unrecoverable failure
    Failed,
    /// Phase cannot be determined
    Unknown,
}
