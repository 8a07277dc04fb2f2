//! Error taxonomy (spec.md §7).

use snafu::Snafu;

/// Errors raised by the [`crate::store`] abstraction.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("no record found for key '{}'", key))]
    MissingEntry { key: String },
    #[snafu(display("resource version conflict updating '{}': expected {}, found {}", key, expected, found))]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },
    #[snafu(display("failed to serialise value for key '{}': {}", key, source))]
    Serialise {
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("record '{}' still has finalizers: {:?}", key, finalizers))]
    FinalizersPresent {
        key: String,
        finalizers: Vec<String>,
    },
}

/// Errors raised by [`crate::scheduler`]'s `Allocate`.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum SchedulerError {
    #[snafu(display("exposed port {} is out of the valid range [1, 65535]", port))]
    InvalidPort { port: u32 },
    #[snafu(display("no agent in pool '{}' namespace '{}' satisfies capacity/port/affinity filters", pool_ref, namespace))]
    InsufficientCapacity { pool_ref: String, namespace: String },
}

/// The user-visible admission error taxonomy (spec.md §6 "Errors", §7
/// "Taxonomy"). Every other internal error converts into one of these at
/// the RPC boundary.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub), context(suffix(Ctx)))]
pub enum AdmissionError {
    #[snafu(display("invalid spec: {}", reason))]
    InvalidSpec { reason: String },
    #[snafu(display("insufficient capacity: {}", reason))]
    InsufficientCapacity { reason: String },
    #[snafu(display("sandbox '{}/{}' not found", namespace, name))]
    NotFound { namespace: String, name: String },
    #[snafu(display("conflicting concurrent update to '{}/{}'", namespace, name))]
    Conflict { namespace: String, name: String },
    #[snafu(display("agent unavailable: {}", reason))]
    AgentUnavailable { reason: String },
    #[snafu(display("internal error: {}", reason))]
    Internal { reason: String },
}

impl From<SchedulerError> for AdmissionError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidPort { port } => AdmissionError::InvalidSpec {
                reason: format!("exposed port {} is out of the valid range [1, 65535]", port),
            },
            SchedulerError::InsufficientCapacity { pool_ref, namespace } => {
                AdmissionError::InsufficientCapacity {
                    reason: format!(
                        "no agent in pool '{}' namespace '{}' satisfies the filters",
                        pool_ref, namespace
                    ),
                }
            }
        }
    }
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingEntry { key } => AdmissionError::NotFound {
                namespace: String::new(),
                name: key,
            },
            StoreError::Conflict { key, .. } => AdmissionError::Conflict {
                namespace: String::new(),
                name: key,
            },
            other => AdmissionError::Internal {
                reason: other.to_string(),
            },
        }
    }
}
