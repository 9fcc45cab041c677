//! `v1alpha2` webhooks.

use std::marker::PhantomData;

use crds::CLUSTER_NAME_LABEL;
use kube::Resource;
use manager_runtime::{AdmissionError, Webhook};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Rejects changes to the cluster-name label once it is set.
pub struct LegacyWebhook<K>(PhantomData<fn() -> K>);

impl<K> LegacyWebhook<K> {
    /// Webhook for `K`.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

fn cluster_label<K: Resource>(object: &K) -> Option<&str> {
    object
        .meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
        .map(String::as_str)
}

impl<K> Webhook for LegacyWebhook<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Object = K;

    fn validate_update(&self, old: &K, new: &K) -> Result<(), AdmissionError> {
        match (cluster_label(old), cluster_label(new)) {
            (Some(before), after) if Some(before) != after => Err(AdmissionError::denied(format!(
                "label {CLUSTER_NAME_LABEL} is immutable once set"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::v1alpha2::{Machine, MachineSpec};
    use std::collections::BTreeMap;

    fn machine(cluster: Option<&str>) -> Machine {
        let mut machine = Machine::new("worker-0", MachineSpec::default());
        machine.metadata.labels =
            cluster.map(|c| BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), c.to_string())]));
        machine
    }

    #[test]
    fn test_label_is_immutable_once_set() {
        let webhook = LegacyWebhook::<Machine>::new();

        assert!(webhook.validate_update(&machine(None), &machine(Some("prod"))).is_ok());
        assert!(webhook.validate_update(&machine(Some("prod")), &machine(Some("prod"))).is_ok());
        assert!(webhook.validate_update(&machine(Some("prod")), &machine(Some("staging"))).is_err());
        assert!(webhook.validate_update(&machine(Some("prod")), &machine(None)).is_err());
    }
}
