//! In-memory doubles for the split client
//!
//! [`MockCache`] stands in for the informer cache and [`MockStore`] for the
//! API server. Both count their calls so tests can assert which path an
//! operation took.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use serde::Serialize;

use super::traits::{CacheReader, ObjectWriter, StatusWriter};
use super::{gvk_from_object, to_dynamic, ClientError, ObjectKey};
use crate::registry::RegisteredKind;

type ObjectMap = HashMap<(GroupVersionKind, ObjectKey), Arc<DynamicObject>>;

fn lock(map: &Mutex<ObjectMap>) -> MutexGuard<'_, ObjectMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn entry_key(object: &DynamicObject) -> Result<(GroupVersionKind, ObjectKey), ClientError> {
    let key = ObjectKey::from_object(object)
        .ok_or_else(|| ClientError::InvalidObject("missing metadata.name".to_string()))?;
    Ok((gvk_from_object(object)?, key))
}

/// Mock informer cache.
#[derive(Debug, Default)]
pub struct MockCache {
    objects: Mutex<ObjectMap>,
    reads: AtomicUsize,
}

impl MockCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a typed object as if the watch had delivered it.
    pub fn insert<K: Serialize>(&self, object: &K) -> Result<(), ClientError> {
        self.insert_dynamic(to_dynamic(object)?)
    }

    /// Seeds a dynamic object.
    pub fn insert_dynamic(&self, object: DynamicObject) -> Result<(), ClientError> {
        let key = entry_key(&object)?;
        lock(&self.objects).insert(key, Arc::new(object));
        Ok(())
    }

    /// Number of `get` and `list` calls served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }
}

impl CacheReader for MockCache {
    fn get(
        &self,
        kind: &RegisteredKind,
        key: &ObjectKey,
    ) -> Result<Option<Arc<DynamicObject>>, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.objects)
            .get(&(kind.gvk().clone(), key.clone()))
            .cloned())
    }

    fn list(
        &self,
        kind: &RegisteredKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut objects: Vec<_> = lock(&self.objects)
            .iter()
            .filter(|((gvk, key), _)| {
                gvk == kind.gvk() && namespace.is_none_or(|ns| key.namespace.as_deref() == Some(ns))
            })
            .map(|((_, key), object)| (key.clone(), object.clone()))
            .collect();
        objects.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(objects.into_iter().map(|(_, object)| object).collect())
    }
}

/// Mock API server.
///
/// Assigns resource versions and generations on write and rejects stale
/// resource versions with [`ClientError::Conflict`].
#[derive(Debug)]
pub struct MockStore {
    objects: Mutex<ObjectMap>,
    calls: AtomicUsize,
    reachable: AtomicBool,
    next_version: AtomicU64,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
            next_version: AtomicU64::new(1),
        }
    }
}

impl MockStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object without counting it as a call.
    pub fn seed<K: Serialize>(&self, object: &K) -> Result<DynamicObject, ClientError> {
        let mut object = to_dynamic(object)?;
        let key = entry_key(&object)?;
        object.metadata.resource_version = Some(self.bump());
        object.metadata.generation.get_or_insert(1);
        lock(&self.objects).insert(key, Arc::new(object.clone()));
        Ok(object)
    }

    /// Returns the stored copy of an object.
    pub fn stored(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Option<DynamicObject> {
        lock(&self.objects)
            .get(&(gvk.clone(), key.clone()))
            .map(|o| DynamicObject::clone(o))
    }

    /// Simulates losing or regaining the API server.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of calls received, including pings.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bump(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn enter(&self) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Unreachable("mock store offline".to_string()))
        }
    }

    fn existing(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<((GroupVersionKind, ObjectKey), DynamicObject), ClientError> {
        let key = entry_key(object)?;
        let current = lock(&self.objects)
            .get(&key)
            .map(|o| DynamicObject::clone(o))
            .ok_or_else(|| ClientError::NotFound {
                kind: kind.label(),
                key: key.1.clone(),
            })?;
        let expected = object.metadata.resource_version.as_ref();
        if expected.is_some_and(|v| Some(v) != current.metadata.resource_version.as_ref()) {
            return Err(ClientError::Conflict {
                kind: kind.label(),
                key: key.1,
                message: "the object has been modified".to_string(),
            });
        }
        Ok((key, current))
    }
}

#[async_trait]
impl ObjectWriter for MockStore {
    async fn create(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.enter()?;
        let key = entry_key(object)?;
        let mut objects = lock(&self.objects);
        if objects.contains_key(&key) {
            return Err(ClientError::Conflict {
                kind: kind.label(),
                key: key.1,
                message: "already exists".to_string(),
            });
        }
        let mut created = object.clone();
        created.metadata.resource_version = Some(self.bump());
        created.metadata.generation = Some(1);
        objects.insert(key, Arc::new(created.clone()));
        Ok(created)
    }

    async fn update(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.enter()?;
        let (key, current) = self.existing(kind, object)?;
        let mut updated = object.clone();
        let generation = current.metadata.generation.unwrap_or(1);
        updated.metadata.generation = if current.data.get("spec") == object.data.get("spec") {
            Some(generation)
        } else {
            Some(generation + 1)
        };
        // status only changes through the status subresource
        match current.data.get("status") {
            Some(status) => updated.data["status"] = status.clone(),
            None => {
                if let Some(fields) = updated.data.as_object_mut() {
                    fields.remove("status");
                }
            }
        }
        updated.metadata.resource_version = Some(self.bump());
        lock(&self.objects).insert(key, Arc::new(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, kind: &RegisteredKind, key: &ObjectKey) -> Result<(), ClientError> {
        self.enter()?;
        lock(&self.objects)
            .remove(&(kind.gvk().clone(), key.clone()))
            .map(drop)
            .ok_or_else(|| ClientError::NotFound {
                kind: kind.label(),
                key: key.clone(),
            })
    }

    async fn ping(&self) -> Result<(), ClientError> {
        self.enter()
    }
}

#[async_trait]
impl StatusWriter for MockStore {
    async fn update_status(
        &self,
        kind: &RegisteredKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.enter()?;
        let (key, mut current) = self.existing(kind, object)?;
        let status = object
            .data
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        current.data["status"] = status;
        current.metadata.resource_version = Some(self.bump());
        lock(&self.objects).insert(key, Arc::new(current.clone()));
        Ok(current)
    }
}
