//! The in-memory agent descriptor (spec.md §3 "Agent descriptor").

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Per-sandbox status as observed on the agent (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxObservedStatus {
    pub running: bool,
    pub exit_code: Option<i32>,
}

/// Information reported by an agent's `Status()` RPC (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatusReport {
    pub agent_id: String,
    pub namespace: String,
    pub pod_ip: String,
    pub node_name: String,
    pub pool_name: String,
    pub capacity: u32,
    pub images: BTreeSet<String>,
    pub sandbox_statuses: HashMap<String, SandboxObservedStatus>,
}

/// In-memory-only agent descriptor, rebuilt from heartbeats and the store
/// on start-up (spec.md §3 "Agent descriptor", invariants).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub namespace: String,
    pub pod_ip: String,
    pub node_name: String,
    pub pool_name: String,
    /// 0 = unlimited.
    pub capacity: u32,
    pub allocated: u32,
    pub used_ports: BTreeSet<u16>,
    pub sandbox_statuses: HashMap<String, SandboxObservedStatus>,
    pub images: BTreeSet<String>,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

impl AgentDescriptor {
    /// True when the agent has spare capacity (`capacity == 0` means
    /// unlimited, spec.md §4.2 "Filter").
    pub fn has_spare_capacity(&self) -> bool {
        self.capacity == 0 || self.allocated < self.capacity
    }

    pub fn caches_image(&self, image: &str) -> bool {
        self.images.contains(image)
    }

    pub fn ports_free(&self, ports: &[u16]) -> bool {
        ports.iter().all(|p| !self.used_ports.contains(p))
    }
}
