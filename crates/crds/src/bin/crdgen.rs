//! Prints the CustomResourceDefinitions for every managed kind as a YAML stream.
//!
//! Both served versions are merged into one CRD per kind, with the hub
//! version marked as the storage version.

use anyhow::{Context, Result};
use crds::{HUB_VERSION, v1alpha2, v1alpha3};
use kube::CustomResourceExt;
use kube::core::crd::merge_crds;

fn main() -> Result<()> {
    let merged = [
        ("Cluster", vec![v1alpha2::Cluster::crd(), v1alpha3::Cluster::crd()]),
        ("Machine", vec![v1alpha2::Machine::crd(), v1alpha3::Machine::crd()]),
        ("MachineSet", vec![v1alpha2::MachineSet::crd(), v1alpha3::MachineSet::crd()]),
        (
            "MachineDeployment",
            vec![v1alpha2::MachineDeployment::crd(), v1alpha3::MachineDeployment::crd()],
        ),
        ("MachinePool", vec![v1alpha2::MachinePool::crd(), v1alpha3::MachinePool::crd()]),
    ];

    for (kind, crds) in merged {
        let crd = merge_crds(crds, HUB_VERSION)
            .with_context(|| format!("failed to merge {kind} CRD versions"))?;
        let yaml = serde_yaml::to_string(&crd)
            .with_context(|| format!("failed to render {kind} CRD"))?;
        println!("---\n{yaml}");
    }

    Ok(())
}
