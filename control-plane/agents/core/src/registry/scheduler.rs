//! Scheduler (C2, spec.md §4.2): the filter/score/pick decision, kept as a
//! pure function over a registry snapshot so it is independent of the
//! registry's locking and can be property-tested directly — grounded on
//! the teacher's `core/scheduling` pure-decision helpers consumed by
//! `Registry::Allocate`.

use common_lib::error::{InsufficientCapacitySnafu, InvalidPortSnafu, SchedulerError};
use common_lib::types::AgentDescriptor;
use snafu::{ensure, OptionExt};

/// A placement request, reduced to exactly what `select_agent` needs.
/// `sandbox_key` is the stable, pre-placement identifier (the sandbox's
/// `name`) used to key `Registry`'s per-sandbox reservation bookkeeping —
/// deliberately not the runtime-assigned `sandboxID`, which for strong
/// mode doesn't exist until after the store has created the record, i.e.
/// after allocation has already happened.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub sandbox_key: String,
    pub namespace: String,
    pub pool_ref: String,
    pub image: String,
    pub exposed_ports: Vec<u16>,
}

/// Filter + score + pick (spec.md §4.2 steps 1-5). Returns the winning
/// agent's id; the caller is responsible for committing the reservation.
pub fn select_agent<'a>(
    agents: impl Iterator<Item = &'a AgentDescriptor>,
    request: &AllocationRequest,
) -> Result<String, SchedulerError> {
    for port in &request.exposed_ports {
        ensure!(*port >= 1, InvalidPortSnafu { port: *port as u32 });
    }

    agents
        .filter(|a| a.pool_name == request.pool_ref)
        .filter(|a| a.namespace == request.namespace)
        .filter(|a| a.has_spare_capacity())
        .filter(|a| a.ports_free(&request.exposed_ports))
        .map(|a| {
            let image_cached = a.caches_image(&request.image);
            let score = a.allocated + if image_cached { 0 } else { 1000 };
            (score, a.agent_id.clone())
        })
        // Deterministic tie-break by agent id (spec.md §4.2 step 4).
        .min_by(|(score_a, id_a), (score_b, id_b)| score_a.cmp(score_b).then_with(|| id_a.cmp(id_b)))
        .map(|(_, id)| id)
        .context(InsufficientCapacitySnafu {
            pool_ref: request.pool_ref.clone(),
            namespace: request.namespace.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashMap};

    fn agent(id: &str, pool: &str, ns: &str, capacity: u32, allocated: u32, images: &[&str]) -> AgentDescriptor {
        AgentDescriptor {
            agent_id: id.into(),
            namespace: ns.into(),
            pod_ip: "10.0.0.1".into(),
            node_name: "node-a".into(),
            pool_name: pool.into(),
            capacity,
            allocated,
            used_ports: BTreeSet::new(),
            sandbox_statuses: HashMap::new(),
            images: images.iter().map(|s| s.to_string()).collect(),
            last_heartbeat: chrono::Utc::now(),
        }
    }

    fn request(image: &str, ports: &[u16]) -> AllocationRequest {
        AllocationRequest {
            sandbox_key: "s1".into(),
            namespace: "default".into(),
            pool_ref: "p".into(),
            image: image.into(),
            exposed_ports: ports.to_vec(),
        }
    }

    #[test]
    fn invalid_port_is_rejected() {
        let agents = [agent("a1", "p", "default", 0, 0, &[])];
        let err = select_agent(agents.iter(), &request("alpine", &[0])).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidPort { port: 0 }));
    }

    #[test]
    fn prefers_cached_image_over_least_loaded() {
        let a1 = agent("a1", "p", "default", 0, 0, &["ubuntu"]);
        let a2 = agent("a2", "p", "default", 0, 0, &["alpine"]);
        let chosen = select_agent([&a1, &a2].into_iter(), &request("alpine", &[])).unwrap();
        assert_eq!(chosen, "a2");
    }

    #[test]
    fn image_miss_penalty_dominates_load_when_nobody_caches_it() {
        let a1 = agent("a1", "p", "default", 0, 5, &[]);
        let a2 = agent("a2", "p", "default", 0, 1, &[]);
        let chosen = select_agent([&a1, &a2].into_iter(), &request("nginx", &[])).unwrap();
        assert_eq!(chosen, "a2");
    }

    #[test]
    fn ties_break_deterministically_by_agent_id() {
        let a1 = agent("a1", "p", "default", 0, 0, &[]);
        let a2 = agent("a2", "p", "default", 0, 0, &[]);
        let chosen = select_agent([&a2, &a1].into_iter(), &request("alpine", &[])).unwrap();
        assert_eq!(chosen, "a1");
    }

    #[test]
    fn capacity_filter_excludes_full_agents() {
        let full = agent("a1", "p", "default", 1, 1, &[]);
        let err = select_agent([&full].into_iter(), &request("alpine", &[])).unwrap_err();
        assert!(matches!(err, SchedulerError::InsufficientCapacity { .. }));
    }

    #[test]
    fn port_conflict_excludes_agent() {
        let mut busy = agent("a1", "p", "default", 0, 0, &[]);
        busy.used_ports.insert(8080);
        let err = select_agent([&busy].into_iter(), &request("alpine", &[8080])).unwrap_err();
        assert!(matches!(err, SchedulerError::InsufficientCapacity { .. }));
    }

    fn arb_agent(id: &'static str) -> impl Strategy<Value = AgentDescriptor> {
        (1u32..=5, 0u32..=5, prop::collection::vec(1u16..=10, 0..=3), prop::sample::subsequence(vec!["alpine", "ubuntu", "nginx"], 0..=3)).prop_map(
            move |(capacity, allocated, ports, images)| {
                let mut a = agent(id, "p", "default", capacity, allocated.min(capacity), &images);
                a.used_ports = ports.into_iter().collect();
                a
            },
        )
    }

    proptest! {
        /// Deterministic scheduling (spec.md §8): on an identical registry
        /// snapshot, `select_agent` must not depend on the order the
        /// candidates are iterated in.
        #[test]
        fn selection_is_independent_of_iteration_order(
            a1 in arb_agent("a1"),
            a2 in arb_agent("a2"),
            a3 in arb_agent("a3"),
            image in prop::sample::select(vec!["alpine", "ubuntu", "nginx", "redis"]),
            ports in prop::collection::vec(1u16..=10, 0..=2),
        ) {
            let agents = [a1, a2, a3];
            let req = request(image, &ports);
            let forward = select_agent(agents.iter(), &req);
            let backward = select_agent(agents.iter().rev(), &req);
            prop_assert_eq!(forward.is_ok(), backward.is_ok());
            if let (Ok(f), Ok(b)) = (&forward, &backward) {
                prop_assert_eq!(f, b);
            }
        }
    }
}
