//! Agent Registry (C1, spec.md §4.1): the single process-wide inventory
//! of warmed agents, guarded by one lock — grounded on the teacher's
//! `core::registry::Registry` (`RwLock<HashMap<NodeId, NodeSpec>>`
//! pattern in `control-plane/agents/core/src/core/registry/registry.rs`).

mod scheduler;

pub use scheduler::{select_agent, AllocationRequest};

use common_lib::error::SchedulerError;
use common_lib::types::{AgentDescriptor, AgentStatusReport, SandboxObservedStatus, SandboxPhase, SandboxRecord};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentDescriptor>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert a heartbeat-derived status report (spec.md §4.1
    /// "RegisterOrUpdate"). `allocated`, `usedPorts`, and the *key set* of
    /// `sandboxStatuses` are registry-owned local state and are never
    /// replaced wholesale by a heartbeat; only the value for a
    /// sandbox-status key the registry already tracks (created by a prior
    /// `Allocate`) is refreshed from the report, so a stale or malicious
    /// heartbeat can neither invent nor erase a reservation.
    #[tracing::instrument(skip(self, report), fields(agent.id = %report.agent_id))]
    pub fn register_or_update(&self, report: AgentStatusReport) {
        let mut agents = self.agents.write();
        match agents.get_mut(&report.agent_id) {
            Some(existing) => {
                existing.pod_ip = report.pod_ip;
                existing.node_name = report.node_name;
                existing.pool_name = report.pool_name;
                existing.capacity = report.capacity;
                existing.images = report.images;
                existing.last_heartbeat = chrono::Utc::now();
                for (key, status) in report.sandbox_statuses {
                    if let Some(slot) = existing.sandbox_statuses.get_mut(&key) {
                        *slot = status;
                    }
                }
            }
            None => {
                agents.insert(
                    report.agent_id.clone(),
                    AgentDescriptor {
                        agent_id: report.agent_id,
                        namespace: report.namespace,
                        pod_ip: report.pod_ip,
                        node_name: report.node_name,
                        pool_name: report.pool_name,
                        capacity: report.capacity,
                        allocated: 0,
                        used_ports: BTreeSet::new(),
                        sandbox_statuses: HashMap::new(),
                        images: report.images,
                        last_heartbeat: chrono::Utc::now(),
                    },
                );
            }
        }
    }

    pub fn get_agent_by_id(&self, id: &str) -> Option<AgentDescriptor> {
        self.agents.read().get(id).cloned()
    }

    pub fn get_all_agents(&self) -> Vec<AgentDescriptor> {
        self.agents.read().values().cloned().collect()
    }

    /// Atomic pick-and-reserve (spec.md §4.1 "Allocate", §4.2). Inserts a
    /// placeholder `sandboxStatuses` entry keyed by `request.sandbox_key`
    /// so a later heartbeat can refresh it and `Release` has something to
    /// remove (spec.md §4.1 "Release ... remove the sandboxID entry from
    /// sandboxStatuses").
    #[tracing::instrument(skip(self, request), fields(sandbox.key = %request.sandbox_key))]
    pub fn allocate(&self, request: &AllocationRequest) -> Result<AgentDescriptor, SchedulerError> {
        let mut agents = self.agents.write();
        let chosen_id = select_agent(agents.values(), request)?;
        let descriptor = agents
            .get_mut(&chosen_id)
            .expect("select_agent must return an id present in the map it was given");
        descriptor.allocated += 1;
        descriptor.used_ports.extend(request.exposed_ports.iter().copied());
        descriptor.sandbox_statuses.insert(
            request.sandbox_key.clone(),
            SandboxObservedStatus {
                running: false,
                exit_code: None,
            },
        );
        Ok(descriptor.clone())
    }

    /// Idempotent (spec.md §4.1 "Release"): decrements `allocated` no
    /// lower than zero and removing an already-absent port/status entry
    /// is a no-op.
    pub fn release(&self, agent_id: &str, sandbox_key: &str, exposed_ports: &[u16]) {
        let mut agents = self.agents.write();
        if let Some(descriptor) = agents.get_mut(agent_id) {
            descriptor.allocated = descriptor.allocated.saturating_sub(1);
            for port in exposed_ports {
                descriptor.used_ports.remove(port);
            }
            descriptor.sandbox_statuses.remove(sandbox_key);
        }
    }

    /// Rebuild reservations from the store on start-up (spec.md §4.1
    /// "Restore") so a newly-started coordinator does not double-schedule
    /// before the control loop's first successful heartbeat. Any assigned
    /// agent not yet re-registered gets a reservation-only stub
    /// descriptor; `RegisterOrUpdate` fills in its real fields (pod IP,
    /// images, capacity) once the agent's first heartbeat arrives.
    pub fn restore(&self, sandboxes: &[SandboxRecord]) {
        let mut agents = self.agents.write();
        for sandbox in sandboxes {
            if !matches!(sandbox.phase(), SandboxPhase::Bound | SandboxPhase::Running) {
                continue;
            }
            let Some(agent_id) = sandbox.status.assigned_agent.clone() else {
                continue;
            };

            let descriptor = agents.entry(agent_id.clone()).or_insert_with(|| AgentDescriptor {
                agent_id: agent_id.clone(),
                namespace: sandbox.metadata.namespace.clone(),
                pod_ip: String::new(),
                node_name: sandbox.status.assigned_node.clone().unwrap_or_default(),
                pool_name: sandbox.spec.pool_ref.clone(),
                capacity: 0,
                allocated: 0,
                used_ports: BTreeSet::new(),
                sandbox_statuses: HashMap::new(),
                images: BTreeSet::new(),
                last_heartbeat: chrono::Utc::now(),
            });
            descriptor.allocated += 1;
            descriptor.used_ports.extend(sandbox.spec.exposed_ports.iter().copied());
            descriptor.sandbox_statuses.insert(
                sandbox.metadata.name.clone(),
                SandboxObservedStatus {
                    running: sandbox.phase() == SandboxPhase::Running,
                    exit_code: None,
                },
            );
        }
    }

    /// Remove descriptors whose heartbeat is older than `now - timeout`
    /// (spec.md §4.1 "CleanupStaleAgents"). Returns the number removed.
    pub fn cleanup_stale_agents(&self, timeout: std::time::Duration) -> usize {
        let mut agents = self.agents.write();
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let before = agents.len();
        agents.retain(|_, descriptor| descriptor.last_heartbeat >= cutoff);
        before - agents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_lib::types::{ObjectMeta, SandboxObservedState, SandboxRecord, SandboxSpec};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn report(agent_id: &str, pool: &str) -> AgentStatusReport {
        AgentStatusReport {
            agent_id: agent_id.into(),
            namespace: "default".into(),
            pod_ip: "10.0.0.1".into(),
            node_name: "node-a".into(),
            pool_name: pool.into(),
            capacity: 5,
            images: ["alpine:latest".to_string()].into_iter().collect(),
            sandbox_statuses: HashMap::new(),
        }
    }

    fn alloc_request(key: &str, pool: &str, ports: &[u16]) -> AllocationRequest {
        AllocationRequest {
            sandbox_key: key.into(),
            namespace: "default".into(),
            pool_ref: pool.into(),
            image: "alpine:latest".into(),
            exposed_ports: ports.to_vec(),
        }
    }

    #[test]
    fn register_then_update_preserves_reservations() {
        let registry = AgentRegistry::new();
        registry.register_or_update(report("a1", "p"));
        registry.allocate(&alloc_request("s1", "p", &[8080])).unwrap();

        registry.register_or_update(report("a1", "p"));
        let descriptor = registry.get_agent_by_id("a1").unwrap();
        assert_eq!(descriptor.allocated, 1);
        assert!(descriptor.used_ports.contains(&8080));
        assert!(descriptor.sandbox_statuses.contains_key("s1"));
    }

    #[test]
    fn allocate_then_release_round_trips() {
        let registry = AgentRegistry::new();
        registry.register_or_update(report("a1", "p"));
        registry.allocate(&alloc_request("s1", "p", &[8080])).unwrap();
        registry.release("a1", "s1", &[8080]);

        let descriptor = registry.get_agent_by_id("a1").unwrap();
        assert_eq!(descriptor.allocated, 0);
        assert!(descriptor.used_ports.is_empty());
        assert!(descriptor.sandbox_statuses.is_empty());
    }

    #[test]
    fn release_is_idempotent() {
        let registry = AgentRegistry::new();
        registry.register_or_update(report("a1", "p"));
        registry.allocate(&alloc_request("s1", "p", &[8080])).unwrap();
        registry.release("a1", "s1", &[8080]);
        registry.release("a1", "s1", &[8080]);

        let descriptor = registry.get_agent_by_id("a1").unwrap();
        assert_eq!(descriptor.allocated, 0);
    }

    #[test]
    fn cleanup_stale_agents_removes_old_heartbeats() {
        let registry = AgentRegistry::new();
        registry.register_or_update(report("a1", "p"));
        {
            let mut agents = registry.agents.write();
            agents.get_mut("a1").unwrap().last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(120);
        }
        let removed = registry.cleanup_stale_agents(std::time::Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(registry.get_agent_by_id("a1").is_none());
    }

    #[test]
    fn restore_reconstructs_reservations_without_a_heartbeat() {
        let registry = AgentRegistry::new();
        let mut meta = ObjectMeta::new("default", "s1");
        meta.uid = "uid-1".into();
        let spec = SandboxSpec {
            image: "alpine:latest".into(),
            command: vec![],
            args: vec![],
            env: BTreeMap::new(),
            working_dir: None,
            exposed_ports: vec![8080],
            pool_ref: "p".into(),
            expire_time: None,
            failure_policy: Default::default(),
            recovery_timeout_seconds: 0,
            reset_revision: 0,
            labels: BTreeMap::new(),
        };
        let mut record = SandboxRecord::new(meta, spec);
        record.status = SandboxObservedState {
            phase: Some(SandboxPhase::Running),
            assigned_agent: Some("a1".into()),
            assigned_node: Some("node-a".into()),
            sandbox_id: Some("sb-1".into()),
            ..Default::default()
        };

        registry.restore(&[record]);
        let descriptor = registry.get_agent_by_id("a1").unwrap();
        assert_eq!(descriptor.allocated, 1);
        assert!(descriptor.used_ports.contains(&8080));
    }

    /// spec.md §8 "Round-trip": `Allocate(s); Release(id, s)` returns the
    /// registry to the allocation-count and port-set it had before.
    #[test]
    fn round_trip_allocate_then_release_restores_prior_state() {
        proptest!(|(ports in prop::collection::vec(1u16..=20, 0..=4))| {
            let registry = AgentRegistry::new();
            registry.register_or_update(report("a1", "p"));
            let before = registry.get_agent_by_id("a1").unwrap();

            registry.allocate(&alloc_request("s1", "p", &ports)).unwrap();
            registry.release("a1", "s1", &ports);

            let after = registry.get_agent_by_id("a1").unwrap();
            prop_assert_eq!(after.allocated, before.allocated);
            prop_assert_eq!(after.used_ports, before.used_ports);
        });
    }

    /// spec.md §8 "Idempotence": calling `Release` twice has the same
    /// effect as once.
    #[test]
    fn release_called_twice_matches_release_called_once() {
        proptest!(|(ports in prop::collection::vec(1u16..=20, 0..=4))| {
            let once = AgentRegistry::new();
            once.register_or_update(report("a1", "p"));
            once.allocate(&alloc_request("s1", "p", &ports)).unwrap();
            once.release("a1", "s1", &ports);

            let twice = AgentRegistry::new();
            twice.register_or_update(report("a1", "p"));
            twice.allocate(&alloc_request("s1", "p", &ports)).unwrap();
            twice.release("a1", "s1", &ports);
            twice.release("a1", "s1", &ports);

            let once = once.get_agent_by_id("a1").unwrap();
            let twice = twice.get_agent_by_id("a1").unwrap();
            prop_assert_eq!(once.allocated, twice.allocated);
            prop_assert_eq!(once.used_ports, twice.used_ports);
            prop_assert_eq!(once.sandbox_statuses.len(), twice.sandbox_statuses.len());
        });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate { key: String, ports: Vec<u16> },
        Release { pick: usize },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..5, prop::collection::vec(1u16..=6, 0..=2)).prop_map(|(slot, ports)| Op::Allocate {
                key: format!("s{}", slot),
                ports,
            }),
            (0usize..100).prop_map(|pick| Op::Release { pick }),
        ]
    }

    fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(arb_op(), 1..20)
    }

    proptest! {
        /// spec.md §8 invariants, checked after every step of a random
        /// `Allocate`/`Release` sequence against two agents of bounded
        /// capacity: `allocated` tracks the live reservation count,
        /// `usedPorts` tracks their port union, `allocated` never exceeds
        /// `capacity`, and concurrent successful reservations never exceed
        /// the sum of both agents' capacities.
        #[test]
        fn registry_invariants_hold_over_random_operation_sequences(ops in arb_ops()) {
            const CAPACITY: u32 = 2;
            let registry = AgentRegistry::new();
            registry.register_or_update(report("a1", "p"));
            registry.register_or_update(report("a2", "p"));
            {
                let mut agents = registry.agents.write();
                agents.get_mut("a1").unwrap().capacity = CAPACITY;
                agents.get_mut("a2").unwrap().capacity = CAPACITY;
            }

            // model: sandbox key -> (agent it landed on, its ports)
            let mut open: std::collections::BTreeMap<String, (String, Vec<u16>)> = std::collections::BTreeMap::new();

            for op in ops {
                match op {
                    Op::Allocate { key, ports } => {
                        if open.contains_key(&key) {
                            continue;
                        }
                        if let Ok(descriptor) = registry.allocate(&alloc_request(&key, "p", &ports)) {
                            open.insert(key, (descriptor.agent_id, ports));
                        }
                    }
                    Op::Release { pick } => {
                        if open.is_empty() {
                            continue;
                        }
                        let key = open.keys().nth(pick % open.len()).cloned().unwrap();
                        let (agent_id, ports) = open.remove(&key).unwrap();
                        registry.release(&agent_id, &key, &ports);
                    }
                }

                prop_assert!(open.len() as u32 <= 2 * CAPACITY);
                for agent_id in ["a1", "a2"] {
                    let descriptor = registry.get_agent_by_id(agent_id).unwrap();
                    let expected: Vec<_> = open.values().filter(|(a, _)| a == agent_id).collect();
                    prop_assert_eq!(descriptor.allocated as usize, expected.len());
                    prop_assert!(descriptor.allocated <= descriptor.capacity);
                    let expected_ports: BTreeSet<u16> = expected.iter().flat_map(|(_, ports)| ports.iter().copied()).collect();
                    prop_assert_eq!(descriptor.used_ports, expected_ports);
                }
            }
        }
    }
}
