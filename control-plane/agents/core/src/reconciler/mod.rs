//! Sandbox Reconciler (C5, spec.md §4.5) and Pool Reconciler (C6,
//! spec.md §4.6) — grounded on the teacher's `core::reconciler` crate,
//! one controller per record kind, each a single-writer sweep serialised
//! by re-reading the record before every mutation.

pub mod pool;
pub mod sandbox;

pub use pool::PoolReconciler;
pub use sandbox::SandboxReconciler;

use common_lib::error::StoreError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReconcileError {
    #[snafu(display("store error: {}", source))]
    Store { source: StoreError },
    #[snafu(display("failed to (de)serialize the allocation annotation: {}", source))]
    Annotation { source: serde_json::Error },
}

impl From<StoreError> for ReconcileError {
    fn from(source: StoreError) -> Self {
        ReconcileError::Store { source }
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(source: serde_json::Error) -> Self {
        ReconcileError::Annotation { source }
    }
}
