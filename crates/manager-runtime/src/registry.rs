//! Type registry.
//!
//! Maps every managed kind (group, version, kind) to the API resource used to
//! talk to the API server and to a codec that checks a dynamic object decodes
//! into the registered Rust type.
//!
//! The registry is assembled once through [`TypeRegistryBuilder`] and frozen
//! into an [`Arc<TypeRegistry>`]; there is no way to mutate it afterwards.
//! It must be built before the [`Manager`](crate::Manager) is constructed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Errors raised while populating the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The generated schema for a kind is unusable
    #[error("malformed schema for {kind}: {reason}")]
    MalformedSchema {
        /// Kind being registered
        kind: String,
        /// What is wrong with it
        reason: String,
    },
}

type DecodeFn = fn(&DynamicObject) -> Result<(), serde_json::Error>;

/// A kind known to the registry.
#[derive(Clone)]
pub struct RegisteredKind {
    gvk: GroupVersionKind,
    resource: ApiResource,
    list_kind: String,
    crd: CustomResourceDefinition,
    decode: DecodeFn,
}

impl RegisteredKind {
    /// Group, version and kind.
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// API resource used to build dynamic API handles.
    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    /// Name of the list variant, e.g. `MachineList`.
    pub fn list_kind(&self) -> &str {
        &self.list_kind
    }

    /// Generated CustomResourceDefinition for this version.
    pub fn crd(&self) -> &CustomResourceDefinition {
        &self.crd
    }

    /// Checks that a dynamic object decodes into the registered type.
    pub fn decode(&self, object: &DynamicObject) -> Result<(), serde_json::Error> {
        (self.decode)(object)
    }

    /// Human readable `Kind.version.group` label used in logs and errors.
    pub fn label(&self) -> String {
        kind_label(&self.gvk)
    }
}

impl fmt::Debug for RegisteredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredKind")
            .field("gvk", &self.gvk)
            .field("plural", &self.resource.plural)
            .field("list_kind", &self.list_kind)
            .finish_non_exhaustive()
    }
}

/// Renders a GVK as `Kind.version.group`.
pub fn kind_label(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}.{}", gvk.kind, gvk.version)
    } else {
        format!("{}.{}.{}", gvk.kind, gvk.version, gvk.group)
    }
}

/// Returns the GVK of a statically typed resource.
pub fn gvk_of<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

fn decode_as<K: DeserializeOwned>(object: &DynamicObject) -> Result<(), serde_json::Error> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value::<K>)
        .map(drop)
}

/// Collects kinds before the registry is frozen.
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    kinds: HashMap<GroupVersionKind, RegisteredKind>,
}

impl TypeRegistryBuilder {
    /// Registers a typed custom resource.
    ///
    /// Registering the same kind twice is a no-op. Fails when the kind's
    /// generated CRD does not describe the version being registered or lacks
    /// an OpenAPI schema.
    pub fn register<K>(&mut self) -> Result<&mut Self, RegistryError>
    where
        K: Resource<DynamicType = ()> + CustomResourceExt + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        if self.kinds.contains_key(&gvk) {
            debug!(kind = %kind_label(&gvk), "Kind already registered");
            return Ok(self);
        }

        let resource = ApiResource::erase::<K>(&());
        let crd = K::crd();
        validate_schema(&gvk, &resource, &crd)?;

        let entry = RegisteredKind {
            list_kind: format!("{}List", gvk.kind),
            gvk: gvk.clone(),
            resource,
            crd,
            decode: decode_as::<K>,
        };
        self.kinds.insert(gvk, entry);
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry { kinds: self.kinds })
    }
}

fn validate_schema(
    gvk: &GroupVersionKind,
    resource: &ApiResource,
    crd: &CustomResourceDefinition,
) -> Result<(), RegistryError> {
    let malformed = |reason: String| RegistryError::MalformedSchema {
        kind: kind_label(gvk),
        reason,
    };

    if gvk.kind.is_empty() || gvk.version.is_empty() {
        return Err(malformed("kind and version must not be empty".to_string()));
    }
    if resource.plural.is_empty() {
        return Err(malformed("plural name must not be empty".to_string()));
    }
    if crd.spec.names.kind != gvk.kind {
        return Err(malformed(format!(
            "CRD describes kind {}",
            crd.spec.names.kind
        )));
    }
    if crd.spec.group != gvk.group {
        return Err(malformed(format!("CRD describes group {}", crd.spec.group)));
    }

    let version = crd
        .spec
        .versions
        .iter()
        .find(|v| v.name == gvk.version)
        .ok_or_else(|| malformed(format!("CRD does not serve version {}", gvk.version)))?;
    let has_schema = version
        .schema
        .as_ref()
        .is_some_and(|s| s.open_api_v3_schema.is_some());
    if !has_schema {
        return Err(malformed("CRD version has no OpenAPI schema".to_string()));
    }
    Ok(())
}

/// Immutable registry of managed kinds, shared by every component.
#[derive(Debug)]
pub struct TypeRegistry {
    kinds: HashMap<GroupVersionKind, RegisteredKind>,
}

impl TypeRegistry {
    /// Starts a new registry.
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Looks up a kind.
    pub fn get(&self, gvk: &GroupVersionKind) -> Option<&RegisteredKind> {
        self.kinds.get(gvk)
    }

    /// Whether the kind is registered.
    pub fn contains(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    /// All registered kinds, ordered by label.
    pub fn kinds(&self) -> Vec<&RegisteredKind> {
        let mut kinds: Vec<_> = self.kinds.values().collect();
        kinds.sort_by_key(|k| k.label());
        kinds
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
