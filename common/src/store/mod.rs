//! The declarative resource store abstraction (spec.md §6 "Declarative
//! store API").
//!
//! Per spec.md §1, the cluster-orchestrator primitives themselves are an
//! external collaborator; what's in scope here is the *contract* the
//! coordinator consumes — `Create/Get/Update/Delete/List/Watch` plus
//! finalizer semantics — grounded on the teacher's `common::store::Store`
//! trait (`common/src/store/definitions.rs`, `common/src/store/etcd.rs`).
//! [`MemoryStore`] is the reference implementation used by the
//! coordinator's own tests and as a development backend; a production
//! deployment substitutes a real implementation (etcd, Kubernetes CRDs)
//! behind the same trait.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::ObjectMeta;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Anything that can be persisted in the declarative store must expose its
/// [`ObjectMeta`] (namespace, name, uid, finalizers, deletion timestamp,
/// resource version).
pub trait StorableObject: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

impl StorableObject for crate::types::SandboxRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl StorableObject for crate::types::PoolRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// A change observed on a [`Store`]'s watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Put(T),
    Delete { namespace: String, name: String },
}

/// The declarative store contract consumed by the coordinator (spec.md
/// §6). Every mutation that touches an object with a non-empty
/// `deletion_timestamp` and an empty finalizer list is purged
/// automatically, matching Kubernetes API-server garbage collection
/// (spec.md §3 "a deleted record must not exist in the store until the
/// runtime has released its resources").
#[async_trait]
pub trait Store<T: StorableObject>: Send + Sync {
    /// Create a brand-new record. Assigns `uid` and `resource_version`.
    async fn create(&self, object: T) -> Result<T, StoreError>;

    /// Fetch the current version of a record.
    async fn get(&self, namespace: &str, name: &str) -> Result<T, StoreError>;

    /// Read-modify-write with optimistic concurrency: `object`'s
    /// `resource_version` must match the stored value, or
    /// [`StoreError::Conflict`] is returned for the caller to retry
    /// against a freshly re-read object (spec.md §5, §9 "Optimistic
    /// concurrency and retries"). If, after applying, the object is
    /// marked for deletion and has no finalizers left, it is purged and
    /// a [`WatchEvent::Delete`] is emitted instead of `Put`.
    async fn update(&self, object: T) -> Result<T, StoreError>;

    /// Mark for deletion (mark-and-return, spec.md §9 Open Questions):
    /// if the record has finalizers, only the `deletion_timestamp` is
    /// set; otherwise the record is removed immediately.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// List every record, optionally scoped to one namespace.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<T>, StoreError>;

    /// Subscribe to put/delete events across every record of type `T`.
    async fn watch(&self) -> tokio::sync::broadcast::Receiver<WatchEvent<T>>;
}
