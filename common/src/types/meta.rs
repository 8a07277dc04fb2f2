//! Kubernetes-shaped object metadata, shared by every record the
//! declarative [`crate::store`] holds (spec.md §3, §6 "Finalizer
//! semantics").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The well-known finalizer owned by the sandbox reconciler (spec.md §4.5
/// "Finalizer"). A record with a non-empty `deletion_timestamp` persists
/// until this (and any other) finalizer is removed.
pub const SANDBOX_FINALIZER: &str = "fast-sandbox.io/sandbox-protection";

/// Metadata common to every object stored in the declarative store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Stable opaque identifier assigned by the store on first creation.
    pub uid: String,
    /// Optimistic-concurrency token; incremented by the store on every
    /// successful `Update`. Callers must re-read on `StoreConflict`.
    pub resource_version: u64,
    pub finalizers: Vec<String>,
    pub deletion_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: String::new(),
            resource_version: 0,
            finalizers: Vec::new(),
            deletion_timestamp: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }

    pub fn add_finalizer(&mut self, name: &str) {
        if !self.has_finalizer(name) {
            self.finalizers.push(name.to_string());
        }
    }

    pub fn remove_finalizer(&mut self, name: &str) {
        self.finalizers.retain(|f| f != name);
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}
