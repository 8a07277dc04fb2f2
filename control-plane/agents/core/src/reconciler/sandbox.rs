//! Sandbox Reconciler (C5, spec.md §4.5): drives each sandbox record
//! from `Pending` toward its desired state, one `get`-`step`-`update`
//! cycle at a time, re-reading on a store conflict — grounded on the
//! teacher's `core::reconciler::sandbox` controller, swapping its
//! replica-set state machine for the phase diagram in spec.md §4.5.

use super::ReconcileError;
use crate::control_loop::AgentHandle;
use crate::registry::{AgentRegistry, AllocationRequest};
use crate::shim_client::ShimClient;
use common_lib::error::{SchedulerError, StoreError};
use common_lib::sandbox_id::fast_mode_sandbox_id;
use common_lib::store::Store;
use common_lib::types::{AllocationAnnotation, FailurePolicy, SandboxPhase, SandboxRecord, ANNOTATION_ALLOCATION, ANNOTATION_CREATE_TIMESTAMP, SANDBOX_FINALIZER};
use std::sync::Arc;
use std::time::Duration;

pub struct SandboxReconciler<St, C> {
    store: Arc<St>,
    registry: Arc<AgentRegistry>,
    shim: Arc<C>,
    /// Matches the control loop's `CleanupStaleAgents` threshold (spec.md
    /// §4.1, §4.5 "Agent-lost detection").
    stale_timeout: Duration,
}

impl<St, C> SandboxReconciler<St, C>
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    pub fn new(store: Arc<St>, registry: Arc<AgentRegistry>, shim: Arc<C>, stale_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            shim,
            stale_timeout,
        }
    }

    /// One get-step-update cycle, retried on a store conflict (spec.md
    /// §4.5 "Failure semantics" — "store conflicts are always retried").
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self, namespace: &str, name: &str) -> Result<(), ReconcileError> {
        loop {
            let mut record = match self.store.get(namespace, name).await {
                Ok(record) => record,
                Err(StoreError::MissingEntry { .. }) => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            let changed = self.step(&mut record).await?;
            if !changed {
                return Ok(());
            }

            match self.store.update(record).await {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Sweeps every sandbox once; used by the reconciler's periodic tick.
    pub async fn sweep(&self) {
        let records = match self.store.list(None).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list sandboxes for reconciliation");
                return;
            }
        };
        for record in records {
            if let Err(err) = self.reconcile_once(&record.metadata.namespace, &record.metadata.name).await {
                tracing::warn!(
                    sandbox.namespace = %record.metadata.namespace,
                    sandbox.name = %record.metadata.name,
                    error = %err,
                    "sandbox reconcile failed"
                );
            }
        }
    }

    async fn step(&self, record: &mut SandboxRecord) -> Result<bool, ReconcileError> {
        let now = chrono::Utc::now();

        if record.metadata.is_deleting() {
            return self.step_terminating(record).await;
        }

        if record.spec.reset_revision != record.status.accepted_reset_revision
            && matches!(record.phase(), SandboxPhase::Bound | SandboxPhase::Running | SandboxPhase::Lost)
        {
            return self.step_condemn(record).await;
        }

        match record.phase() {
            SandboxPhase::Pending => self.step_pending(record, now).await,
            SandboxPhase::Bound | SandboxPhase::Running => self.step_bound_or_running(record, now).await,
            SandboxPhase::Lost => self.step_lost(record, now),
            SandboxPhase::Terminating | SandboxPhase::Expired => Ok(false),
        }
    }

    /// Allocation annotation sync (spec.md §4.5): harvests a fast-path
    /// (or strong-path) allocation annotation into observed state on
    /// first reconcile, or, absent one, performs placement directly.
    async fn step_pending(&self, record: &mut SandboxRecord, _now: chrono::DateTime<chrono::Utc>) -> Result<bool, ReconcileError> {
        if record.status.assigned_agent.is_none() {
            if let Some(raw) = record.metadata.annotations.get(ANNOTATION_ALLOCATION).cloned() {
                let annotation: AllocationAnnotation = serde_json::from_str(&raw)?;
                record.status.assigned_agent = Some(annotation.assigned_pod);
                record.status.assigned_node = Some(annotation.assigned_node);
                record.status.sandbox_id = record
                    .metadata
                    .annotations
                    .get(ANNOTATION_CREATE_TIMESTAMP)
                    .and_then(|raw| raw.parse::<i64>().ok())
                    .map(|nanos| fast_mode_sandbox_id(&record.metadata.name, &record.metadata.namespace, nanos));
                record.status.phase = Some(SandboxPhase::Bound);
                record.status.accepted_reset_revision = record.spec.reset_revision;
                return Ok(true);
            }
        }

        let allocation_request = AllocationRequest {
            sandbox_key: record.metadata.name.clone(),
            namespace: record.metadata.namespace.clone(),
            pool_ref: record.spec.pool_ref.clone(),
            image: record.spec.image.clone(),
            exposed_ports: record.spec.exposed_ports.clone(),
        };
        match self.registry.allocate(&allocation_request) {
            Ok(descriptor) => {
                record.metadata.annotations.insert(
                    ANNOTATION_ALLOCATION.to_string(),
                    serde_json::to_string(&AllocationAnnotation {
                        assigned_pod: descriptor.agent_id.clone(),
                        assigned_node: descriptor.node_name.clone(),
                        allocated_at: chrono::Utc::now(),
                    })?,
                );
                record.status.assigned_agent = Some(descriptor.agent_id);
                record.status.assigned_node = Some(descriptor.node_name);
                record.status.phase = Some(SandboxPhase::Bound);
                record.status.accepted_reset_revision = record.spec.reset_revision;
                Ok(true)
            }
            // No capacity yet: requeue with backoff (spec.md §4.5 diagram).
            Err(SchedulerError::InsufficientCapacity { .. }) => Ok(false),
            Err(SchedulerError::InvalidPort { .. }) => Ok(false),
        }
    }

    async fn step_bound_or_running(&self, record: &mut SandboxRecord, now: chrono::DateTime<chrono::Utc>) -> Result<bool, ReconcileError> {
        if let Some(expire_time) = record.spec.expire_time {
            if now >= expire_time {
                return self.step_expire(record).await;
            }
        }

        if self.is_lost(record) {
            return self.step_lose(record, now);
        }

        if record.phase() == SandboxPhase::Bound {
            if let Some(agent_id) = record.status.assigned_agent.clone() {
                if let Some(descriptor) = self.registry.get_agent_by_id(&agent_id) {
                    if descriptor.sandbox_statuses.get(&record.metadata.name).is_some_and(|s| s.running) {
                        record.status.phase = Some(SandboxPhase::Running);
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    fn effective_sandbox_id(record: &SandboxRecord) -> Option<String> {
        if let Some(id) = &record.status.sandbox_id {
            return Some(id.clone());
        }
        let nanos: i64 = record.metadata.annotations.get(ANNOTATION_CREATE_TIMESTAMP)?.parse().ok()?;
        Some(fast_mode_sandbox_id(&record.metadata.name, &record.metadata.namespace, nanos))
    }

    /// Best-effort delete of the runtime container on the agent
    /// currently backing `record`, if there is one. Returns `false` when
    /// a retryable transport error means the caller should requeue
    /// rather than proceed.
    async fn delete_on_current_agent(&self, record: &SandboxRecord) -> bool {
        let (Some(agent_id), Some(sandbox_id)) = (record.status.assigned_agent.clone(), Self::effective_sandbox_id(record)) else {
            return true;
        };
        let Some(descriptor) = self.registry.get_agent_by_id(&agent_id) else {
            return true;
        };
        let handle = AgentHandle::from(&descriptor);
        match self.shim.delete_sandbox(&handle, &sandbox_id).await {
            Ok(()) => true,
            Err(err) if err.is_retryable() => {
                tracing::debug!(sandbox.name = %record.metadata.name, agent.id = %agent_id, "agent delete failed transiently; requeuing");
                false
            }
            Err(err) => {
                tracing::warn!(sandbox.name = %record.metadata.name, agent.id = %agent_id, error = %err, "agent rejected delete; proceeding anyway");
                true
            }
        }
    }

    /// Expiry (spec.md §4.5 "Expiry"): deletes the runtime container,
    /// clears the assigned pod and sandbox ID, and retains the record.
    async fn step_expire(&self, record: &mut SandboxRecord) -> Result<bool, ReconcileError> {
        if !self.delete_on_current_agent(record).await {
            return Ok(false);
        }
        if let Some(agent_id) = record.status.assigned_agent.take() {
            self.registry.release(&agent_id, &record.metadata.name, &record.spec.exposed_ports);
        }
        record.status.sandbox_id = None;
        record.status.phase = Some(SandboxPhase::Expired);
        Ok(true)
    }

    fn is_lost(&self, record: &SandboxRecord) -> bool {
        let Some(agent_id) = &record.status.assigned_agent else {
            return false;
        };
        match self.registry.get_agent_by_id(agent_id) {
            None => true,
            Some(descriptor) => {
                chrono::Utc::now() - descriptor.last_heartbeat > chrono::Duration::from_std(self.stale_timeout).unwrap_or_default()
            }
        }
    }

    /// Agent-lost detection (spec.md §4.5 "Agent-lost detection"): the
    /// runtime container is presumed gone with the agent, so this does
    /// not attempt a delete RPC.
    fn step_lose(&self, record: &mut SandboxRecord, now: chrono::DateTime<chrono::Utc>) -> Result<bool, ReconcileError> {
        if let Some(agent_id) = record.status.assigned_agent.take() {
            self.registry.release(&agent_id, &record.metadata.name, &record.spec.exposed_ports);
        }
        record.status.sandbox_id = None;
        record.status.phase = Some(SandboxPhase::Lost);
        record.push_condition("AgentLost", "assigned agent's heartbeat is stale or the agent is gone", now);
        Ok(true)
    }

    fn step_lost(&self, record: &mut SandboxRecord, now: chrono::DateTime<chrono::Utc>) -> Result<bool, ReconcileError> {
        if record.spec.failure_policy != FailurePolicy::AutoRecreate {
            return Ok(false);
        }
        let lost_since = record.status.conditions.iter().rev().find(|c| c.reason == "AgentLost").map(|c| c.observed_at);
        match lost_since {
            Some(since) if now - since >= chrono::Duration::seconds(record.spec.recovery_timeout_seconds as i64) => {
                record.status.phase = Some(SandboxPhase::Pending);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Reset (spec.md §4.5 "Reset"): condemns the current binding and
    /// transitions back to `Pending` for re-placement; `step_pending`
    /// re-stamps `acceptedResetRevision` once placement succeeds.
    async fn step_condemn(&self, record: &mut SandboxRecord) -> Result<bool, ReconcileError> {
        if !self.delete_on_current_agent(record).await {
            return Ok(false);
        }
        if let Some(agent_id) = record.status.assigned_agent.take() {
            self.registry.release(&agent_id, &record.metadata.name, &record.spec.exposed_ports);
        }
        record.status.assigned_node = None;
        record.status.sandbox_id = None;
        record.metadata.annotations.remove(ANNOTATION_ALLOCATION);
        record.status.phase = Some(SandboxPhase::Pending);
        Ok(true)
    }

    /// Finalizer teardown (spec.md §4.5 "Finalizer"): removed only after
    /// the agent has acknowledged deletion (or is gone) and the registry
    /// reservation has been released.
    async fn step_terminating(&self, record: &mut SandboxRecord) -> Result<bool, ReconcileError> {
        if record.phase() != SandboxPhase::Terminating {
            record.status.phase = Some(SandboxPhase::Terminating);
            return Ok(true);
        }

        if !self.delete_on_current_agent(record).await {
            return Ok(false);
        }

        if let Some(agent_id) = record.status.assigned_agent.take() {
            self.registry.release(&agent_id, &record.metadata.name, &record.spec.exposed_ports);
        }
        record.metadata.remove_finalizer(SANDBOX_FINALIZER);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryShimClient;
    use common_lib::store::MemoryStore;
    use common_lib::types::{AgentStatusReport, ObjectMeta, SandboxObservedStatus, SandboxSpec};
    use std::collections::BTreeMap;

    fn reconciler_with_agent(agent_id: &str, capacity: u32) -> (SandboxReconciler<MemoryStore<SandboxRecord>, InMemoryShimClient>, Arc<AgentRegistry>, Arc<MemoryStore<SandboxRecord>>, Arc<InMemoryShimClient>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(AgentRegistry::new());
        let shim = Arc::new(InMemoryShimClient::new());
        shim.add_agent(agent_id, capacity);
        registry.register_or_update(AgentStatusReport {
            agent_id: agent_id.into(),
            namespace: "default".into(),
            pod_ip: "10.0.0.1".into(),
            node_name: "node-a".into(),
            pool_name: "p".into(),
            capacity,
            images: Default::default(),
            sandbox_statuses: Default::default(),
        });
        let reconciler = SandboxReconciler::new(store.clone(), registry.clone(), shim.clone(), Duration::from_secs(15));
        (reconciler, registry, store, shim)
    }

    fn bare_spec() -> SandboxSpec {
        SandboxSpec {
            image: "alpine:latest".into(),
            command: vec![],
            args: vec![],
            env: BTreeMap::new(),
            working_dir: None,
            exposed_ports: vec![8080],
            pool_ref: "p".into(),
            expire_time: None,
            failure_policy: FailurePolicy::Manual,
            recovery_timeout_seconds: 0,
            reset_revision: 0,
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn pending_without_annotation_allocates_and_binds() {
        let (reconciler, registry, store, _shim) = reconciler_with_agent("a1", 5);
        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let record = store.create(SandboxRecord::new(meta, bare_spec())).await.unwrap();

        reconciler.reconcile_once("default", &record.metadata.name).await.unwrap();

        let updated = store.get("default", "s1").await.unwrap();
        assert_eq!(updated.phase(), SandboxPhase::Bound);
        assert_eq!(updated.status.assigned_agent.as_deref(), Some("a1"));
        assert_eq!(registry.get_agent_by_id("a1").unwrap().allocated, 1);
    }

    #[tokio::test]
    async fn pending_with_allocation_annotation_harvests_into_bound() {
        let (reconciler, _registry, store, _shim) = reconciler_with_agent("a1", 5);
        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        meta.annotations.insert(
            ANNOTATION_ALLOCATION.to_string(),
            serde_json::to_string(&AllocationAnnotation {
                assigned_pod: "a1".into(),
                assigned_node: "node-a".into(),
                allocated_at: chrono::Utc::now(),
            })
            .unwrap(),
        );
        meta.annotations.insert(ANNOTATION_CREATE_TIMESTAMP.to_string(), "42".to_string());
        let record = store.create(SandboxRecord::new(meta, bare_spec())).await.unwrap();

        reconciler.reconcile_once("default", &record.metadata.name).await.unwrap();

        let updated = store.get("default", "s1").await.unwrap();
        assert_eq!(updated.phase(), SandboxPhase::Bound);
        assert!(updated.status.sandbox_id.is_some());
    }

    #[tokio::test]
    async fn bound_transitions_to_running_once_agent_acks() {
        let (reconciler, registry, store, _shim) = reconciler_with_agent("a1", 5);
        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let mut record = SandboxRecord::new(meta, bare_spec());
        record.status.phase = Some(SandboxPhase::Bound);
        record.status.assigned_agent = Some("a1".into());
        record.status.assigned_node = Some("node-a".into());
        store.create(record).await.unwrap();

        registry.allocate(&AllocationRequest {
            sandbox_key: "s1".into(),
            namespace: "default".into(),
            pool_ref: "p".into(),
            image: "alpine:latest".into(),
            exposed_ports: vec![8080],
        }).unwrap();

        // Simulate the control loop reporting the agent's ACK.
        registry.register_or_update(AgentStatusReport {
            agent_id: "a1".into(),
            namespace: "default".into(),
            pod_ip: "10.0.0.1".into(),
            node_name: "node-a".into(),
            pool_name: "p".into(),
            capacity: 5,
            images: Default::default(),
            sandbox_statuses: [("s1".to_string(), SandboxObservedStatus { running: true, exit_code: None })].into_iter().collect(),
        });

        reconciler.reconcile_once("default", "s1").await.unwrap();
        let updated = store.get("default", "s1").await.unwrap();
        assert_eq!(updated.phase(), SandboxPhase::Running);
    }

    #[tokio::test]
    async fn running_expires_past_expire_time() {
        let (reconciler, registry, store, _shim) = reconciler_with_agent("a1", 5);
        registry.allocate(&AllocationRequest {
            sandbox_key: "s1".into(),
            namespace: "default".into(),
            pool_ref: "p".into(),
            image: "alpine:latest".into(),
            exposed_ports: vec![8080],
        }).unwrap();

        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let mut spec = bare_spec();
        spec.expire_time = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        let mut record = SandboxRecord::new(meta, spec);
        record.status.phase = Some(SandboxPhase::Running);
        record.status.assigned_agent = Some("a1".into());
        record.status.sandbox_id = Some("sb-1".into());
        store.create(record).await.unwrap();

        reconciler.reconcile_once("default", "s1").await.unwrap();

        let updated = store.get("default", "s1").await.unwrap();
        assert_eq!(updated.phase(), SandboxPhase::Expired);
        assert!(updated.status.assigned_agent.is_none());
        assert_eq!(registry.get_agent_by_id("a1").unwrap().allocated, 0);
    }

    #[tokio::test]
    async fn bound_agent_gone_transitions_to_lost() {
        let (reconciler, _registry, store, _shim) = reconciler_with_agent("a1", 5);
        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let mut record = SandboxRecord::new(meta, bare_spec());
        record.status.phase = Some(SandboxPhase::Bound);
        // Assigned to an agent the registry has never heard of.
        record.status.assigned_agent = Some("ghost".into());
        store.create(record).await.unwrap();

        reconciler.reconcile_once("default", "s1").await.unwrap();
        let updated = store.get("default", "s1").await.unwrap();
        assert_eq!(updated.phase(), SandboxPhase::Lost);
    }

    #[tokio::test]
    async fn lost_with_auto_recreate_recovers_after_timeout() {
        let (reconciler, _registry, store, _shim) = reconciler_with_agent("a1", 5);
        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let mut spec = bare_spec();
        spec.failure_policy = FailurePolicy::AutoRecreate;
        spec.recovery_timeout_seconds = 5;
        let mut record = SandboxRecord::new(meta, spec);
        record.status.phase = Some(SandboxPhase::Lost);
        record.push_condition("AgentLost", "test", chrono::Utc::now() - chrono::Duration::seconds(10));
        store.create(record).await.unwrap();

        reconciler.reconcile_once("default", "s1").await.unwrap();
        let updated = store.get("default", "s1").await.unwrap();
        assert_eq!(updated.phase(), SandboxPhase::Pending);
    }

    #[tokio::test]
    async fn reset_revision_condemns_current_binding_and_replaces() {
        let (reconciler, registry, store, _shim) = reconciler_with_agent("a1", 5);
        registry.allocate(&AllocationRequest {
            sandbox_key: "s1".into(),
            namespace: "default".into(),
            pool_ref: "p".into(),
            image: "alpine:latest".into(),
            exposed_ports: vec![8080],
        }).unwrap();

        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let mut spec = bare_spec();
        spec.reset_revision = 1;
        let mut record = SandboxRecord::new(meta, spec);
        record.status.phase = Some(SandboxPhase::Running);
        record.status.assigned_agent = Some("a1".into());
        record.status.sandbox_id = Some("sb-1".into());
        record.status.accepted_reset_revision = 0;
        store.create(record).await.unwrap();

        // Condemn step.
        reconciler.reconcile_once("default", "s1").await.unwrap();
        let condemned = store.get("default", "s1").await.unwrap();
        assert_eq!(condemned.phase(), SandboxPhase::Pending);
        assert!(condemned.status.assigned_agent.is_none());

        // Re-placement step.
        reconciler.reconcile_once("default", "s1").await.unwrap();
        let replaced = store.get("default", "s1").await.unwrap();
        assert_eq!(replaced.phase(), SandboxPhase::Bound);
        assert_eq!(replaced.status.accepted_reset_revision, 1);
    }

    #[tokio::test]
    async fn delete_removes_finalizer_and_purges_record() {
        let (reconciler, registry, store, _shim) = reconciler_with_agent("a1", 5);
        registry.allocate(&AllocationRequest {
            sandbox_key: "s1".into(),
            namespace: "default".into(),
            pool_ref: "p".into(),
            image: "alpine:latest".into(),
            exposed_ports: vec![8080],
        }).unwrap();

        let mut meta = ObjectMeta::new("default", "s1");
        meta.add_finalizer(SANDBOX_FINALIZER);
        let mut record = SandboxRecord::new(meta, bare_spec());
        record.status.phase = Some(SandboxPhase::Running);
        record.status.assigned_agent = Some("a1".into());
        record.status.sandbox_id = Some("sb-1".into());
        store.create(record).await.unwrap();
        store.delete("default", "s1").await.unwrap();

        // Terminating transition.
        reconciler.reconcile_once("default", "s1").await.unwrap();
        // Finalizer teardown.
        reconciler.reconcile_once("default", "s1").await.unwrap();

        assert!(matches!(store.get("default", "s1").await, Err(StoreError::MissingEntry { .. })));
        assert_eq!(registry.get_agent_by_id("a1").unwrap().allocated, 0);
    }
}
