//! The Agent Runtime Shim's view of the container runtime (spec.md §4.7,
//! §9 "Dynamic dispatch over runtime kinds").
//!
//! The capability set is `{ListImages, CreateSandbox, DeleteSandbox,
//! ListSandboxes, Status}`. Per the design note, this is expressed as a
//! tagged variant per backend rather than an inheritance hierarchy: adding
//! a micro-VM or sandboxed-kernel backend means adding an enum variant and
//! a `match` arm, not a new trait impl hierarchy.

mod mock;

pub use mock::MockDriver;

use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum ShimError {
    #[snafu(display("container for sandbox '{}' already exists", sandbox_id))]
    AlreadyExists { sandbox_id: String },
    #[snafu(display("no container for sandbox '{}'", sandbox_id))]
    NotFound { sandbox_id: String },
    #[snafu(display("runtime rejected sandbox creation: {}", reason))]
    TerminalRuntimeError { reason: String },
}

/// Parameters for `CreateSandbox` (spec.md §6 "Agent shim RPC").
#[derive(Debug, Clone)]
pub struct CreateSandboxParams {
    pub sandbox_id: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub claim_uid: Option<String>,
    pub claim_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSandboxOutcome {
    pub sandbox_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Host-container owner labels written by the shim (spec.md §6
/// "Host-container labels").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLabels {
    pub managed: bool,
    pub agent_uid: String,
    pub agent_name: String,
    pub sandbox_name: String,
    pub claim_uid: Option<String>,
}

/// A host container as seen by a runtime backend, consumed by the orphan
/// reaper's scan mode (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct HostContainer {
    pub sandbox_id: String,
    pub labels: OwnerLabels,
    pub running: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub capacity: u32,
    pub allocated: u32,
    pub images: BTreeSet<String>,
    pub sandbox_statuses: BTreeMap<String, (bool, Option<i32>)>,
}

/// Tagged-variant runtime backend (spec.md §9).
#[derive(Clone)]
pub enum RuntimeBackend {
    Mock(MockDriver),
}

impl RuntimeBackend {
    pub fn mock() -> Self {
        RuntimeBackend::Mock(MockDriver::new())
    }

    pub async fn create_sandbox(
        &self,
        params: CreateSandboxParams,
    ) -> Result<CreateSandboxOutcome, ShimError> {
        match self {
            RuntimeBackend::Mock(m) => m.create_sandbox(params).await,
        }
    }

    pub async fn delete_sandbox(
        &self,
        sandbox_id: &str,
        grace_period: std::time::Duration,
    ) -> Result<(), ShimError> {
        match self {
            RuntimeBackend::Mock(m) => m.delete_sandbox(sandbox_id, grace_period).await,
        }
    }

    pub async fn list_images(&self) -> BTreeSet<String> {
        match self {
            RuntimeBackend::Mock(m) => m.list_images().await,
        }
    }

    pub async fn list_sandboxes(&self) -> Vec<HostContainer> {
        match self {
            RuntimeBackend::Mock(m) => m.list_sandboxes().await,
        }
    }

    pub async fn status(&self, capacity: u32) -> StatusSnapshot {
        match self {
            RuntimeBackend::Mock(m) => m.status(capacity).await,
        }
    }
}
