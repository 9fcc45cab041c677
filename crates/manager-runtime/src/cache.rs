//! Informer cache
//!
//! Holds one reflector [`Store`] per watched kind. Stores are fed by the
//! controllers' watches; the cache itself never writes to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use kube::api::{DynamicObject, GroupVersionKind};
use kube_runtime::reflector::{ObjectRef, Store};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::{CacheReader, ClientError, ObjectKey};
use crate::registry::{kind_label, RegisteredKind};

/// Errors raised while waiting for the cache to fill.
#[derive(Debug, Error)]
pub enum CacheSyncError {
    /// Some stores did not receive their initial list in time
    #[error("timed out after {after:?} waiting for caches to sync: {pending:?}")]
    Timeout {
        /// How long we waited
        after: Duration,
        /// Kinds that were still empty
        pending: Vec<String>,
    },

    /// A store's watch ended before the initial list arrived
    #[error("watch for {0} stopped before the cache synced")]
    WatchStopped(String),
}

/// Shared cache of every watched kind.
#[derive(Default)]
pub struct InformerCache {
    stores: RwLock<HashMap<GroupVersionKind, Store<DynamicObject>>>,
    synced: AtomicBool,
}

impl std::fmt::Debug for InformerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InformerCache")
            .field("kinds", &self.kinds())
            .field("synced", &self.is_synced())
            .finish()
    }
}

impl InformerCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the reader side of a reflector.
    pub fn insert_store(&self, gvk: GroupVersionKind, store: Store<DynamicObject>) {
        debug!(kind = %kind_label(&gvk), "Adding store to cache");
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gvk, store);
    }

    /// Labels of every kind with a store, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(kind_label)
            .collect();
        kinds.sort();
        kinds
    }

    /// Whether every store has received its initial list.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn store(&self, kind: &RegisteredKind) -> Result<Store<DynamicObject>, ClientError> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind.gvk())
            .cloned()
            .ok_or_else(|| ClientError::CacheNotStarted(kind.label()))
    }

    /// Waits until every store has received its initial list.
    ///
    /// An empty cache is synced immediately.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), CacheSyncError> {
        let stores: Vec<_> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(gvk, store)| (kind_label(gvk), store.clone()))
            .collect();

        let deadline = Instant::now() + timeout;
        let results = join_all(stores.into_iter().map(|(label, store)| async move {
            let outcome = tokio::time::timeout_at(deadline, store.wait_until_ready()).await;
            (label, outcome)
        }))
        .await;

        let mut pending = Vec::new();
        for (label, outcome) in results {
            match outcome {
                Ok(Ok(())) => debug!(kind = %label, "Cache synced"),
                Ok(Err(_)) => return Err(CacheSyncError::WatchStopped(label)),
                Err(_) => pending.push(label),
            }
        }
        if !pending.is_empty() {
            pending.sort();
            return Err(CacheSyncError::Timeout {
                after: timeout,
                pending,
            });
        }

        self.synced.store(true, Ordering::SeqCst);
        info!(kinds = self.kinds().len(), "All caches synced");
        Ok(())
    }
}

impl CacheReader for InformerCache {
    fn get(
        &self,
        kind: &RegisteredKind,
        key: &ObjectKey,
    ) -> Result<Option<Arc<DynamicObject>>, ClientError> {
        let store = self.store(kind)?;
        let mut reference = ObjectRef::new_with(&key.name, kind.resource().clone());
        if let Some(ns) = &key.namespace {
            reference = reference.within(ns);
        }
        Ok(store.get(&reference))
    }

    fn list(
        &self,
        kind: &RegisteredKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError> {
        let store = self.store(kind)?;
        let mut objects: Vec<_> = store
            .state()
            .into_iter()
            .filter(|o| namespace.is_none_or(|ns| o.metadata.namespace.as_deref() == Some(ns)))
            .collect();
        objects.sort_by(|a, b| {
            (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
        });
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{gvk_of, TypeRegistry};
    use crds::v1alpha3::Machine;
    use kube_runtime::watcher::Event;
    use kube_runtime::reflector::store::Writer;

    fn machine_kind() -> RegisteredKind {
        let mut builder = TypeRegistry::builder();
        builder.register::<Machine>().unwrap();
        builder.build().get(&gvk_of::<Machine>()).unwrap().clone()
    }

    fn object(kind: &RegisteredKind, ns: &str, name: &str) -> DynamicObject {
        DynamicObject::new(name, kind.resource()).within(ns)
    }

    #[tokio::test]
    async fn test_empty_cache_syncs_immediately() {
        let cache = InformerCache::new();
        cache.wait_for_sync(Duration::from_millis(10)).await.unwrap();
        assert!(cache.is_synced());
    }

    #[tokio::test]
    async fn test_sync_times_out_when_store_never_fills() {
        let kind = machine_kind();
        let writer: Writer<DynamicObject> = Writer::new(kind.resource().clone());
        let cache = InformerCache::new();
        cache.insert_store(kind.gvk().clone(), writer.as_reader());

        let err = cache
            .wait_for_sync(Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheSyncError::Timeout { ref pending, .. } if pending.len() == 1));
        assert!(!cache.is_synced());
    }

    #[tokio::test]
    async fn test_reads_come_from_store() {
        let kind = machine_kind();
        let mut writer: Writer<DynamicObject> = Writer::new(kind.resource().clone());
        writer.apply_watcher_event(&Event::Init);
        writer.apply_watcher_event(&Event::InitApply(object(&kind, "a", "m-1")));
        writer.apply_watcher_event(&Event::InitApply(object(&kind, "b", "m-2")));
        writer.apply_watcher_event(&Event::InitDone);

        let cache = InformerCache::new();
        cache.insert_store(kind.gvk().clone(), writer.as_reader());
        cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();

        let found = cache
            .get(&kind, &ObjectKey::namespaced("a", "m-1"))
            .unwrap();
        assert!(found.is_some());
        let missing = cache
            .get(&kind, &ObjectKey::namespaced("b", "m-1"))
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(cache.list(&kind, None).unwrap().len(), 2);
        assert_eq!(cache.list(&kind, Some("b")).unwrap().len(), 1);
    }

    #[test]
    fn test_unstarted_kind_is_an_error() {
        let kind = machine_kind();
        let cache = InformerCache::new();

        assert!(matches!(
            cache.list(&kind, None),
            Err(ClientError::CacheNotStarted(_))
        ));
    }
}
