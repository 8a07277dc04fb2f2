use super::{StorableObject, Store, WatchEvent};
use crate::error::{self, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// In-memory [`Store`] implementation (spec.md §1 scope note: the real
/// cluster-orchestrator store is an external collaborator; this is the
/// reference implementation used for development and the coordinator's
/// own tests, grounded on the teacher's `Store` trait usage pattern with
/// a swappable backend).
pub struct MemoryStore<T> {
    objects: RwLock<HashMap<(String, String), T>>,
    next_uid: std::sync::atomic::AtomicU64,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: StorableObject> Default for MemoryStore<T> {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(HashMap::new()),
            next_uid: std::sync::atomic::AtomicU64::new(1),
            events: tx,
        }
    }
}

impl<T: StorableObject> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T: StorableObject> Store<T> for MemoryStore<T> {
    async fn create(&self, mut object: T) -> Result<T, StoreError> {
        let key = object.metadata().key();
        let uid = self
            .next_uid
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        object.metadata_mut().uid = format!("{:016x}", uid);
        object.metadata_mut().resource_version = 1;

        let mut guard = self.objects.write();
        guard.insert(key, object.clone());
        drop(guard);
        let _ = self.events.send(WatchEvent::Put(object.clone()));
        Ok(object)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<T, StoreError> {
        let guard = self.objects.read();
        guard
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                error::MissingEntrySnafu {
                    key: format!("{}/{}", namespace, name),
                }
                .build()
            })
    }

    async fn update(&self, mut object: T) -> Result<T, StoreError> {
        let key = object.metadata().key();
        let mut guard = self.objects.write();
        let current = guard.get(&key).ok_or_else(|| {
            error::MissingEntrySnafu {
                key: format!("{}/{}", key.0, key.1),
            }
            .build()
        })?;
        if current.metadata().resource_version != object.metadata().resource_version {
            return Err(error::ConflictSnafu {
                key: format!("{}/{}", key.0, key.1),
                expected: current.metadata().resource_version,
                found: object.metadata().resource_version,
            }
            .build());
        }
        object.metadata_mut().resource_version += 1;

        if object.metadata().is_deleting() && object.metadata().finalizers.is_empty() {
            guard.remove(&key);
            drop(guard);
            let _ = self.events.send(WatchEvent::Delete {
                namespace: key.0,
                name: key.1,
            });
            return Ok(object);
        }

        guard.insert(key, object.clone());
        drop(guard);
        let _ = self.events.send(WatchEvent::Put(object.clone()));
        Ok(object)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = (namespace.to_string(), name.to_string());
        let mut guard = self.objects.write();
        let object = match guard.get_mut(&key) {
            Some(o) => o,
            None => return Ok(()),
        };
        if object.metadata().finalizers.is_empty() {
            guard.remove(&key);
            drop(guard);
            let _ = self.events.send(WatchEvent::Delete {
                namespace: key.0,
                name: key.1,
            });
        } else if !object.metadata().is_deleting() {
            object.metadata_mut().deletion_timestamp = Some(chrono::Utc::now());
            object.metadata_mut().resource_version += 1;
            let updated = object.clone();
            drop(guard);
            let _ = self.events.send(WatchEvent::Put(updated));
        }
        Ok(())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<T>, StoreError> {
        let guard = self.objects.read();
        Ok(guard
            .values()
            .filter(|o| namespace.is_none_or_eq(o.metadata().namespace.as_str()))
            .cloned()
            .collect())
    }

    async fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}

trait NamespaceFilter {
    fn is_none_or_eq(&self, ns: &str) -> bool;
}
impl NamespaceFilter for Option<&str> {
    fn is_none_or_eq(&self, ns: &str) -> bool {
        match self {
            None => true,
            Some(n) => *n == ns,
        }
    }
}
