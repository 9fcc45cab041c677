//! Kinds this manager understands.

use std::sync::Arc;

use manager_runtime::registry::{RegistryError, TypeRegistry};

/// Registers both served versions of every cluster lifecycle kind.
pub fn build() -> Result<Arc<TypeRegistry>, RegistryError> {
    let mut builder = TypeRegistry::builder();
    builder
        .register::<crds::v1alpha3::Cluster>()?
        .register::<crds::v1alpha3::Machine>()?
        .register::<crds::v1alpha3::MachineSet>()?
        .register::<crds::v1alpha3::MachineDeployment>()?
        .register::<crds::v1alpha3::MachinePool>()?
        .register::<crds::v1alpha2::Cluster>()?
        .register::<crds::v1alpha2::Machine>()?
        .register::<crds::v1alpha2::MachineSet>()?
        .register::<crds::v1alpha2::MachineDeployment>()?
        .register::<crds::v1alpha2::MachinePool>()?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use manager_runtime::registry::gvk_of;

    #[test]
    fn test_scheme_holds_both_versions() {
        let registry = build().unwrap();

        assert_eq!(registry.len(), 10);
        assert!(registry.contains(&gvk_of::<crds::v1alpha3::MachinePool>()));
        assert!(registry.contains(&gvk_of::<crds::v1alpha2::MachineDeployment>()));
        assert_eq!(
            registry.get(&gvk_of::<crds::v1alpha3::MachineSet>()).unwrap().list_kind(),
            "MachineSetList"
        );
    }
}
