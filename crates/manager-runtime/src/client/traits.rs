//! Seams between the split client and its backends.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;

use super::{ClientError, ObjectKey};
use crate::registry::RegisteredKind;

/// Read half, served from local state.
///
/// Reads are synchronous: they never wait on the network.
pub trait CacheReader: Send + Sync {
    /// Returns the cached object, `None` when absent.
    fn get(
        &self,
        kind: &RegisteredKind,
        key: &ObjectKey,
    ) -> Result<Option<Arc<DynamicObject>>, ClientError>;

    /// Returns every cached object of a kind, optionally within one namespace.
    fn list(
        &self,
        kind: &RegisteredKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError>;
}

/// Write half, sent to the API server.
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Creates an object.
    async fn create(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Replaces an object; `metadata.resourceVersion` guards the write.
    async fn update(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Deletes an object.
    async fn delete(&self, kind: &RegisteredKind, key: &ObjectKey) -> Result<(), ClientError>;

    /// Round trip to the API server.
    async fn ping(&self) -> Result<(), ClientError>;
}

/// Status subresource writer.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Writes `object.status`, leaving the rest of the object alone.
    async fn update_status(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;
}
