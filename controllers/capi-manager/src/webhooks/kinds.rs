//! Cluster owned `v1alpha3` kinds.

use crds::v1alpha3::{Machine, MachineDeployment, MachinePool, MachineSet, MachineTemplateSpec};
use crds::{LabelSelector, CLUSTER_NAME_LABEL};
use manager_runtime::AdmissionError;

use super::{check_ref_namespace, ClusterOwned};

/// Points the template's machines at the owning cluster and labels them.
fn default_template(template: &mut MachineTemplateSpec, cluster_name: &str) {
    if template.spec.cluster_name.is_empty() {
        template.spec.cluster_name = cluster_name.to_string();
    }
    if !cluster_name.is_empty() {
        template
            .metadata
            .labels
            .insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string());
    }
}

/// Selects the owning cluster's machines unless the user chose otherwise.
fn default_selector(selector: &mut LabelSelector, cluster_name: &str) {
    if !cluster_name.is_empty() {
        selector
            .match_labels
            .entry(CLUSTER_NAME_LABEL.to_string())
            .or_insert_with(|| cluster_name.to_string());
    }
}

fn validate_selector(selector: &LabelSelector, template: &MachineTemplateSpec) -> Result<(), AdmissionError> {
    if !selector.matches(&template.metadata.labels) {
        return Err(AdmissionError::denied(format!(
            "spec.selector {:?} does not match spec.template.metadata.labels",
            selector.to_selector_string()
        )));
    }
    if template.spec.cluster_name.is_empty() {
        return Err(AdmissionError::denied("spec.template.spec.clusterName must not be empty"));
    }
    Ok(())
}

impl ClusterOwned for Machine {
    fn cluster_name(&self) -> &str {
        &self.spec.cluster_name
    }

    fn default_spec(&mut self) {
        let namespace = self.metadata.namespace.clone();
        if let Some(config_ref) = self.spec.bootstrap.config_ref.as_mut() {
            if config_ref.namespace.is_none() {
                config_ref.namespace.clone_from(&namespace);
            }
        }
        if self.spec.infrastructure_ref.namespace.is_none() {
            self.spec.infrastructure_ref.namespace = namespace;
        }
    }

    fn validate_spec(&self) -> Result<(), AdmissionError> {
        let bootstrap = &self.spec.bootstrap;
        if bootstrap.config_ref.is_none() && bootstrap.data_secret_name.is_none() {
            return Err(AdmissionError::denied(
                "spec.bootstrap.configRef or spec.bootstrap.dataSecretName is required",
            ));
        }
        let own = self.metadata.namespace.as_deref();
        if let Some(config_ref) = &bootstrap.config_ref {
            check_ref_namespace("spec.bootstrap.configRef", config_ref.namespace.as_deref(), own)?;
        }
        check_ref_namespace(
            "spec.infrastructureRef",
            self.spec.infrastructure_ref.namespace.as_deref(),
            own,
        )
    }
}

impl ClusterOwned for MachineSet {
    fn cluster_name(&self) -> &str {
        &self.spec.cluster_name
    }

    fn default_spec(&mut self) {
        let cluster_name = self.spec.cluster_name.clone();
        self.spec.replicas.get_or_insert(1);
        self.spec.delete_policy.get_or_insert_with(|| "Random".to_string());
        default_selector(&mut self.spec.selector, &cluster_name);
        default_template(&mut self.spec.template, &cluster_name);
    }

    fn validate_spec(&self) -> Result<(), AdmissionError> {
        if let Some(policy) = self.spec.delete_policy.as_deref() {
            if !matches!(policy, "Random" | "Newest" | "Oldest") {
                return Err(AdmissionError::denied(format!(
                    "spec.deletePolicy {policy:?} must be one of Random, Newest, Oldest"
                )));
            }
        }
        validate_selector(&self.spec.selector, &self.spec.template)
    }
}

impl ClusterOwned for MachineDeployment {
    fn cluster_name(&self) -> &str {
        &self.spec.cluster_name
    }

    fn default_spec(&mut self) {
        let cluster_name = self.spec.cluster_name.clone();
        self.spec.replicas.get_or_insert(1);
        self.spec.revision_history_limit.get_or_insert(1);
        self.spec
            .strategy
            .get_or_insert_with(Default::default)
            .strategy_type
            .get_or_insert_with(|| "RollingUpdate".to_string());
        default_selector(&mut self.spec.selector, &cluster_name);
        default_template(&mut self.spec.template, &cluster_name);
    }

    fn validate_spec(&self) -> Result<(), AdmissionError> {
        validate_selector(&self.spec.selector, &self.spec.template)
    }
}

impl ClusterOwned for MachinePool {
    fn cluster_name(&self) -> &str {
        &self.spec.cluster_name
    }

    fn default_spec(&mut self) {
        let cluster_name = self.spec.cluster_name.clone();
        self.spec.replicas.get_or_insert(1);
        default_template(&mut self.spec.template, &cluster_name);
    }

    fn validate_spec(&self) -> Result<(), AdmissionError> {
        if self.spec.replicas.is_some_and(|r| r < 0) {
            return Err(AdmissionError::denied("spec.replicas must not be negative"));
        }
        Ok(())
    }
}
