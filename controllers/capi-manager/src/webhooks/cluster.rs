//! `v1alpha3` Cluster webhook.

use crds::v1alpha3::Cluster;
use crds::ObjectReference;
use manager_runtime::{AdmissionError, Webhook};

use super::check_ref_namespace;

/// Defaults provider reference namespaces and keeps the infrastructure
/// reference fixed once set.
#[derive(Debug)]
pub struct ClusterWebhook;

fn default_namespace(reference: Option<&mut ObjectReference>, namespace: Option<&String>) {
    if let Some(reference) = reference {
        if reference.namespace.is_none() {
            reference.namespace = namespace.cloned();
        }
    }
}

fn validate_refs(cluster: &Cluster) -> Result<(), AdmissionError> {
    let own = cluster.metadata.namespace.as_deref();
    if let Some(infra) = &cluster.spec.infrastructure_ref {
        check_ref_namespace("spec.infrastructureRef", infra.namespace.as_deref(), own)?;
    }
    if let Some(control_plane) = &cluster.spec.control_plane_ref {
        check_ref_namespace("spec.controlPlaneRef", control_plane.namespace.as_deref(), own)?;
    }
    Ok(())
}

impl Webhook for ClusterWebhook {
    type Object = Cluster;

    fn default(&self, cluster: &mut Cluster) {
        let namespace = cluster.metadata.namespace.clone();
        default_namespace(cluster.spec.infrastructure_ref.as_mut(), namespace.as_ref());
        default_namespace(cluster.spec.control_plane_ref.as_mut(), namespace.as_ref());
    }

    fn validate_create(&self, cluster: &Cluster) -> Result<(), AdmissionError> {
        validate_refs(cluster)
    }

    fn validate_update(&self, old: &Cluster, new: &Cluster) -> Result<(), AdmissionError> {
        if old.spec.infrastructure_ref.is_some() && old.spec.infrastructure_ref != new.spec.infrastructure_ref {
            return Err(AdmissionError::denied("spec.infrastructureRef is immutable once set"));
        }
        validate_refs(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::v1alpha3::ClusterSpec;

    fn cluster(infra: Option<ObjectReference>) -> Cluster {
        let mut cluster = Cluster::new(
            "prod",
            ClusterSpec {
                infrastructure_ref: infra,
                ..ClusterSpec::default()
            },
        );
        cluster.metadata.namespace = Some("default".to_string());
        cluster
    }

    fn infra(name: &str) -> ObjectReference {
        ObjectReference {
            kind: Some("AWSCluster".to_string()),
            name: Some(name.to_string()),
            ..ObjectReference::default()
        }
    }

    #[test]
    fn test_defaulting_fills_ref_namespace() {
        let mut object = cluster(Some(infra("prod")));

        ClusterWebhook.default(&mut object);

        let namespace = object.spec.infrastructure_ref.and_then(|r| r.namespace);
        assert_eq!(namespace.as_deref(), Some("default"));
        assert!(object.spec.control_plane_ref.is_none());
    }

    #[test]
    fn test_infrastructure_ref_is_immutable() {
        assert!(ClusterWebhook
            .validate_update(&cluster(None), &cluster(Some(infra("prod"))))
            .is_ok(), "setting the reference the first time is allowed");
        assert!(ClusterWebhook
            .validate_update(&cluster(Some(infra("prod"))), &cluster(Some(infra("other"))))
            .is_err());
    }

    #[test]
    fn test_foreign_namespace_is_rejected() {
        let mut reference = infra("prod");
        reference.namespace = Some("kube-system".to_string());
        assert!(ClusterWebhook.validate_create(&cluster(Some(reference))).is_err());
    }
}
