//! Admission webhooks for every served kind and version.
//!
//! `v1alpha3` kinds get defaulting and validation. `v1alpha2` kinds only
//! guard the cluster-name label, since new objects are written in the hub
//! version.

mod cluster;
mod kinds;
mod legacy;

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crds::CLUSTER_NAME_LABEL;
use kube::Resource;
use manager_runtime::{AdmissionError, AdmissionHandler, TypedWebhook, Webhook};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use cluster::ClusterWebhook;
pub use legacy::LegacyWebhook;

/// A kind that belongs to a cluster through `spec.clusterName`.
pub trait ClusterOwned:
    Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Owning cluster.
    fn cluster_name(&self) -> &str;

    /// Kind specific defaults, applied after the cluster-name label.
    fn default_spec(&mut self) {}

    /// Kind specific checks, run on create and update.
    fn validate_spec(&self) -> Result<(), AdmissionError> {
        Ok(())
    }
}

/// Defaulting and validation shared by every cluster owned kind.
pub struct ClusterOwnedWebhook<K>(PhantomData<fn() -> K>);

impl<K> ClusterOwnedWebhook<K> {
    /// Webhook for `K`.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K: ClusterOwned> Webhook for ClusterOwnedWebhook<K> {
    type Object = K;

    fn default(&self, object: &mut K) {
        let cluster_name = object.cluster_name().to_string();
        if !cluster_name.is_empty() {
            object
                .meta_mut()
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(CLUSTER_NAME_LABEL.to_string(), cluster_name);
        }
        object.default_spec();
    }

    fn validate_create(&self, object: &K) -> Result<(), AdmissionError> {
        require_cluster_name(object)?;
        object.validate_spec()
    }

    fn validate_update(&self, old: &K, new: &K) -> Result<(), AdmissionError> {
        require_cluster_name(new)?;
        if old.cluster_name() != new.cluster_name() {
            return Err(AdmissionError::denied(format!(
                "spec.clusterName is immutable: cannot change {:?} to {:?}",
                old.cluster_name(),
                new.cluster_name()
            )));
        }
        new.validate_spec()
    }
}

fn require_cluster_name<K: ClusterOwned>(object: &K) -> Result<(), AdmissionError> {
    if object.cluster_name().is_empty() {
        return Err(AdmissionError::denied("spec.clusterName must not be empty"));
    }
    Ok(())
}

/// Returns the reference namespace error if `namespace` is set and differs
/// from the object's.
pub(crate) fn check_ref_namespace(
    field: &str,
    namespace: Option<&str>,
    object_namespace: Option<&str>,
) -> Result<(), AdmissionError> {
    match (namespace, object_namespace) {
        (Some(ns), Some(own)) if ns != own => Err(AdmissionError::denied(format!(
            "{field}.namespace must match metadata.namespace {own:?}, got {ns:?}"
        ))),
        _ => Ok(()),
    }
}

fn handler<W: Webhook>(webhook: W) -> Arc<dyn AdmissionHandler> {
    Arc::new(TypedWebhook::new(webhook))
}

/// Handlers for both versions of all five kinds.
pub fn all() -> Vec<Arc<dyn AdmissionHandler>> {
    vec![
        handler(ClusterWebhook),
        handler(ClusterOwnedWebhook::<crds::v1alpha3::Machine>::new()),
        handler(ClusterOwnedWebhook::<crds::v1alpha3::MachineSet>::new()),
        handler(ClusterOwnedWebhook::<crds::v1alpha3::MachineDeployment>::new()),
        handler(ClusterOwnedWebhook::<crds::v1alpha3::MachinePool>::new()),
        handler(LegacyWebhook::<crds::v1alpha2::Cluster>::new()),
        handler(LegacyWebhook::<crds::v1alpha2::Machine>::new()),
        handler(LegacyWebhook::<crds::v1alpha2::MachineSet>::new()),
        handler(LegacyWebhook::<crds::v1alpha2::MachineDeployment>::new()),
        handler(LegacyWebhook::<crds::v1alpha2::MachinePool>::new()),
    ]
}
