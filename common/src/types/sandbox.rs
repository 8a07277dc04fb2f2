//! The sandbox record (spec.md §3 "Sandbox record").

use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the JSON-encoded `allocation` annotation (spec.md §6).
pub const ANNOTATION_ALLOCATION: &str = "fast-sandbox.io/allocation";
/// Name of the nanosecond `createTimestamp` annotation (fast mode only).
pub const ANNOTATION_CREATE_TIMESTAMP: &str = "fast-sandbox.io/create-timestamp";
/// Label marking a sandbox created via the fast admission path.
pub const LABEL_FAST_PATH: &str = "fast-sandbox.io/created-by-fast-path";

/// `Manual` | `AutoRecreate` failure policy (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    #[default]
    Manual,
    AutoRecreate,
}

/// Admission consistency mode (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyMode {
    Fast,
    Strong,
}

/// Sandbox lifecycle phase (spec.md §3 "Phases").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SandboxPhase {
    #[default]
    Pending,
    Bound,
    Running,
    Terminating,
    Lost,
    Expired,
}

/// A single entry in the condition history (spec.md §3 "condition
/// history").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    pub reason: String,
    pub message: String,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

/// The `{assignedPod, assignedNode, allocatedAt}` payload carried by the
/// `allocation` annotation (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationAnnotation {
    pub assigned_pod: String,
    pub assigned_node: String,
    pub allocated_at: chrono::DateTime<chrono::Utc>,
}

/// User-desired state of a sandbox (spec.md §3 "Desired state").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxSpec {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub pool_ref: String,
    pub expire_time: Option<chrono::DateTime<chrono::Utc>>,
    pub failure_policy: FailurePolicy,
    pub recovery_timeout_seconds: u64,
    /// Opaque monotonic token; bumping it condemns the current binding
    /// and forces re-placement (spec.md §4.5 "Reset").
    pub reset_revision: u64,
    pub labels: BTreeMap<String, String>,
}

/// Observed (reconciler-owned) state of a sandbox (spec.md §3 "Observed
/// state").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SandboxObservedState {
    pub phase: Option<SandboxPhase>,
    pub assigned_agent: Option<String>,
    pub assigned_node: Option<String>,
    pub sandbox_id: Option<String>,
    pub endpoints: Vec<String>,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub accepted_reset_revision: u64,
    pub conditions: Vec<Condition>,
}

/// Full sandbox record as persisted in the declarative store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxRecord {
    pub metadata: ObjectMeta,
    pub spec: SandboxSpec,
    pub status: SandboxObservedState,
}

impl SandboxRecord {
    pub fn new(metadata: ObjectMeta, spec: SandboxSpec) -> Self {
        Self {
            metadata,
            spec,
            status: SandboxObservedState::default(),
        }
    }

    pub fn phase(&self) -> SandboxPhase {
        self.status.phase.unwrap_or_default()
    }

    pub fn push_condition(&mut self, reason: impl Into<String>, message: impl Into<String>, now: chrono::DateTime<chrono::Utc>) {
        self.status.conditions.push(Condition {
            reason: reason.into(),
            message: message.into(),
            observed_at: now,
        });
    }
}
