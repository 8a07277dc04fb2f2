//! The pool record (spec.md §3 "Pool record").

use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Template used by the pool reconciler (C6) to stand up new agent
/// processes (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTemplate {
    pub image: String,
    pub cpu_request_millis: u32,
    pub memory_request_mb: u32,
}

/// Runtime-kind hint (spec.md §9 "Dynamic dispatch over runtime kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RuntimeKind {
    #[default]
    Oci,
    MicroVm,
    SandboxedKernel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSpec {
    pub pool_min: u32,
    pub pool_max: u32,
    pub per_agent_capacity: u32,
    pub runtime_kind: RuntimeKind,
    pub template: AgentTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PoolObservedState {
    pub warmed_agents: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolRecord {
    pub metadata: ObjectMeta,
    pub spec: PoolSpec,
    pub status: PoolObservedState,
}
