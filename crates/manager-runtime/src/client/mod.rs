//! Split client
//!
//! Reads (`get`, `list`) are served from the local informer cache and never
//! touch the API server. Writes (`create`, `update`, `delete`,
//! `update_status`) go straight to the API server and never mutate the
//! cache; the cache only catches up through its watch.
//!
//! The three halves sit behind traits so tests can swap in
//! [`MockCache`](mock::MockCache) and [`MockStore`](mock::MockStore).

pub mod direct;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod traits;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::registry::{gvk_of, kind_label, RegisteredKind, TypeRegistry};

pub use direct::DirectClient;
pub use traits::{CacheReader, ObjectWriter, StatusWriter};

/// Errors returned by the split client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The kind was never added to the type registry
    #[error("kind not recognized: {0}")]
    KindNotRecognized(String),

    /// Object does not exist
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind label
        kind: String,
        /// Object key
        key: ObjectKey,
    },

    /// Optimistic concurrency conflict on write
    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        /// Kind label
        kind: String,
        /// Object key
        key: ObjectKey,
        /// Message from the API server
        message: String,
    },

    /// No informer has been started for the kind
    #[error("cache for {0} has not been started")]
    CacheNotStarted(String),

    /// Object is missing type information or a name
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Object does not decode into its registered type
    #[error("failed to decode {kind}: {source}")]
    Decode {
        /// Kind label
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// The API server could not be reached
    #[error("API server unreachable: {0}")]
    Unreachable(String),

    /// Any other API failure
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl ClientError {
    /// Whether the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// Whether the error is a write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }
}

/// Namespace and name of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster scoped object.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object, `None` when it has no name.
    pub fn from_object<K: Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();
        meta.name.as_ref().map(|name| Self {
            namespace: meta.namespace.clone(),
            name: name.clone(),
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Options applied to every write.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Field manager recorded on server-side writes
    pub field_manager: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            field_manager: "capi-manager".to_string(),
        }
    }
}

/// Reads the GVK from an object's `apiVersion` and `kind`.
pub fn gvk_from_object(object: &DynamicObject) -> Result<GroupVersionKind, ClientError> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| ClientError::InvalidObject("missing apiVersion and kind".to_string()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject, ClientError> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|source| ClientError::Decode {
            kind: "DynamicObject".to_string(),
            source,
        })
}

fn from_dynamic<K: DeserializeOwned>(
    kind: &RegisteredKind,
    object: &DynamicObject,
) -> Result<K, ClientError> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|source| ClientError::Decode {
            kind: kind.label(),
            source,
        })
}

/// Client handed to every reconciler.
///
/// Cheap to clone; every clone shares the same cache and API connection.
#[derive(Clone)]
pub struct SplitClient {
    registry: Arc<TypeRegistry>,
    reader: Arc<dyn CacheReader>,
    writer: Arc<dyn ObjectWriter>,
    status: Arc<dyn StatusWriter>,
}

impl fmt::Debug for SplitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitClient")
            .field("kinds", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl SplitClient {
    /// Assembles a client from its halves.
    pub fn new(
        registry: Arc<TypeRegistry>,
        reader: Arc<dyn CacheReader>,
        writer: Arc<dyn ObjectWriter>,
        status: Arc<dyn StatusWriter>,
    ) -> Self {
        Self {
            registry,
            reader,
            writer,
            status,
        }
    }

    /// The registry this client resolves kinds against.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    fn resolve(&self, gvk: &GroupVersionKind) -> Result<&RegisteredKind, ClientError> {
        self.registry
            .get(gvk)
            .ok_or_else(|| ClientError::KindNotRecognized(kind_label(gvk)))
    }

    fn resolve_object(
        &self,
        object: &DynamicObject,
    ) -> Result<(&RegisteredKind, ObjectKey), ClientError> {
        let kind = self.resolve(&gvk_from_object(object)?)?;
        let key = ObjectKey::from_object(object)
            .ok_or_else(|| ClientError::InvalidObject("missing metadata.name".to_string()))?;
        Ok((kind, key))
    }

    /// Reads one object from the cache.
    pub fn get(
        &self,
        gvk: &GroupVersionKind,
        key: &ObjectKey,
    ) -> Result<Arc<DynamicObject>, ClientError> {
        let kind = self.resolve(gvk)?;
        self.reader
            .get(kind, key)?
            .ok_or_else(|| ClientError::NotFound {
                kind: kind.label(),
                key: key.clone(),
            })
    }

    /// Lists objects of a kind from the cache, optionally within one namespace.
    pub fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError> {
        let kind = self.resolve(gvk)?;
        self.reader.list(kind, namespace)
    }

    /// Typed variant of [`get`](Self::get).
    pub fn get_as<K>(&self, key: &ObjectKey) -> Result<K, ClientError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        let object = self.get(&gvk, key)?;
        from_dynamic(self.resolve(&gvk)?, &object)
    }

    /// Typed variant of [`list`](Self::list).
    pub fn list_as<K>(&self, namespace: Option<&str>) -> Result<Vec<K>, ClientError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        let kind = self.resolve(&gvk)?;
        self.reader
            .list(kind, namespace)?
            .iter()
            .map(|object| from_dynamic(kind, object))
            .collect()
    }

    /// Creates an object on the API server.
    pub async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (kind, _) = self.resolve_object(object)?;
        self.writer.create(kind, object).await
    }

    /// Replaces an object on the API server.
    pub async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (kind, _) = self.resolve_object(object)?;
        self.writer.update(kind, object).await
    }

    /// Deletes an object on the API server.
    pub async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), ClientError> {
        let kind = self.resolve(gvk)?;
        self.writer.delete(kind, key).await
    }

    /// Writes only the status subresource of an object.
    pub async fn update_status(
        &self,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let (kind, _) = self.resolve_object(object)?;
        self.status.update_status(kind, object).await
    }

    /// Typed variant of [`update_status`](Self::update_status).
    pub async fn update_status_as<K>(&self, object: &K) -> Result<K, ClientError>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let dynamic = to_dynamic(object)?;
        let (kind, _) = self.resolve_object(&dynamic)?;
        let written = self.status.update_status(kind, &dynamic).await?;
        from_dynamic(kind, &written)
    }

    /// Checks the API server is reachable.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.writer.ping().await
    }
}

/// Builds the [`SplitClient`] handed to the manager.
#[async_trait]
pub trait ClientFactory: Send + Sync + fmt::Debug {
    /// Connects to the API server and assembles a client over `cache`.
    async fn build(
        &self,
        registry: Arc<TypeRegistry>,
        cache: Arc<dyn CacheReader>,
        config: kube::Config,
        options: &ClientOptions,
    ) -> Result<SplitClient, ClientError>;
}

/// Default factory: cache reads, direct writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelegatingClientFactory;

#[async_trait]
impl ClientFactory for DelegatingClientFactory {
    async fn build(
        &self,
        registry: Arc<TypeRegistry>,
        cache: Arc<dyn CacheReader>,
        config: kube::Config,
        options: &ClientOptions,
    ) -> Result<SplitClient, ClientError> {
        let direct = Arc::new(DirectClient::connect(config, options).await?);
        Ok(SplitClient::new(registry, cache, direct.clone(), direct))
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockCache, MockStore};
    use super::*;
    use crds::v1alpha3::{Machine, MachineSpec, MachineStatus};

    fn registry() -> Arc<TypeRegistry> {
        let mut builder = TypeRegistry::builder();
        builder.register::<Machine>().unwrap();
        builder.build()
    }

    fn machine(name: &str) -> Machine {
        let mut machine = Machine::new(
            name,
            MachineSpec {
                cluster_name: "c1".to_string(),
                ..MachineSpec::default()
            },
        );
        machine.metadata.namespace = Some("default".to_string());
        machine
    }

    fn client(cache: Arc<MockCache>, store: Arc<MockStore>) -> SplitClient {
        SplitClient::new(registry(), cache, store.clone(), store)
    }

    #[test]
    fn test_reads_never_reach_the_store() {
        let cache = Arc::new(MockCache::new());
        let store = Arc::new(MockStore::new());
        cache.insert(&machine("m-0")).unwrap();
        let client = client(cache.clone(), store.clone());

        let found: Machine = client
            .get_as(&ObjectKey::namespaced("default", "m-0"))
            .unwrap();
        let listed: Vec<Machine> = client.list_as(Some("default")).unwrap();

        assert_eq!(found.spec.cluster_name, "c1");
        assert_eq!(listed.len(), 1);
        assert_eq!(cache.read_count(), 2, "Both reads should hit the cache");
        assert_eq!(store.call_count(), 0, "Reads must not reach the store");
    }

    #[tokio::test]
    async fn test_writes_never_touch_the_cache() {
        let cache = Arc::new(MockCache::new());
        let store = Arc::new(MockStore::new());
        let client = client(cache.clone(), store.clone());

        let object = to_dynamic(&machine("m-1")).unwrap();
        client.create(&object).await.unwrap();

        assert_eq!(store.call_count(), 1);
        assert_eq!(cache.read_count(), 0);
        assert!(cache.is_empty(), "Writes must not populate the cache");
        let key = ObjectKey::namespaced("default", "m-1");
        assert!(matches!(
            client.get(&gvk_of::<Machine>(), &key),
            Err(ClientError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_only_changes_status() {
        let cache = Arc::new(MockCache::new());
        let store = Arc::new(MockStore::new());
        let client = client(cache, store.clone());
        client
            .create(&to_dynamic(&machine("m-2")).unwrap())
            .await
            .unwrap();

        let mut changed = machine("m-2");
        changed.spec.cluster_name = "other".to_string();
        changed.status = Some(MachineStatus {
            bootstrap_ready: true,
            ..MachineStatus::default()
        });
        let written = client.update_status_as(&changed).await.unwrap();

        assert_eq!(written.spec.cluster_name, "c1", "Spec must be untouched");
        assert!(written.status.unwrap().bootstrap_ready);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let client = client(Arc::new(MockCache::new()), Arc::new(MockStore::new()));
        let gvk = GroupVersionKind::gvk("example.io", "v1", "Widget");

        let err = client
            .get(&gvk, &ObjectKey::namespaced("default", "w"))
            .unwrap_err();
        assert!(matches!(err, ClientError::KindNotRecognized(_)));

        let err = client
            .delete(&gvk, &ObjectKey::namespaced("default", "w"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::KindNotRecognized(_)));
    }

    #[tokio::test]
    async fn test_ping_reports_unreachable_store() {
        let store = Arc::new(MockStore::new());
        let client = client(Arc::new(MockCache::new()), store.clone());

        assert!(client.ping().await.is_ok());
        store.set_reachable(false);
        assert!(matches!(
            client.ping().await,
            Err(ClientError::Unreachable(_))
        ));
    }
}
