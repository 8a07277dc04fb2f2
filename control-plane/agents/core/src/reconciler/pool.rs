//! Pool Reconciler (C6, spec.md §4.6): keeps each pool's warmed-agent
//! count within `[poolMin, poolMax]`, preferring image-affinity-aware
//! placement on scale-up — grounded on the teacher's
//! `core::reconciler::pool` controller, swapping its volume-replica
//! scaling for agent pods.

use super::ReconcileError;
use crate::registry::AgentRegistry;
use common_lib::error::StoreError;
use common_lib::store::Store;
use common_lib::types::{PoolRecord, SandboxPhase, SandboxRecord};
use snafu::Snafu;
use std::sync::Arc;

#[derive(Debug, Snafu, Clone)]
#[snafu(visibility(pub))]
pub enum PodProvisionError {
    #[snafu(display("failed to provision an agent pod for pool '{}': {}", pool, reason))]
    Create { pool: String, reason: String },
    #[snafu(display("failed to tear down agent pod '{}': {}", agent_id, reason))]
    Delete { agent_id: String, reason: String },
}

/// The cluster's pod primitive, abstracted so the reconciler's scaling
/// decisions are testable without a real orchestrator (spec.md §1,
/// "external collaborators").
#[async_trait::async_trait]
pub trait PodProvisioner: Send + Sync {
    async fn create_agent_pod(&self, pool: &PoolRecord, node_hint: Option<&str>) -> Result<(), PodProvisionError>;
    async fn delete_agent_pod(&self, agent_id: &str) -> Result<(), PodProvisionError>;
}

pub struct PoolReconciler<PSt, SSt, Prov> {
    pool_store: Arc<PSt>,
    sandbox_store: Arc<SSt>,
    registry: Arc<AgentRegistry>,
    provisioner: Arc<Prov>,
}

impl<PSt, SSt, Prov> PoolReconciler<PSt, SSt, Prov>
where
    PSt: Store<PoolRecord> + 'static,
    SSt: Store<SandboxRecord> + 'static,
    Prov: PodProvisioner + 'static,
{
    pub fn new(pool_store: Arc<PSt>, sandbox_store: Arc<SSt>, registry: Arc<AgentRegistry>, provisioner: Arc<Prov>) -> Self {
        Self {
            pool_store,
            sandbox_store,
            registry,
            provisioner,
        }
    }

    pub async fn sweep(&self) {
        let pools = match self.pool_store.list(None).await {
            Ok(pools) => pools,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list pools for reconciliation");
                return;
            }
        };
        for pool in pools {
            if let Err(err) = self.reconcile_once(&pool.metadata.namespace, &pool.metadata.name).await {
                tracing::warn!(pool.namespace = %pool.metadata.namespace, pool.name = %pool.metadata.name, error = %err, "pool reconcile failed");
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self, namespace: &str, name: &str) -> Result<(), ReconcileError> {
        loop {
            let mut pool = match self.pool_store.get(namespace, name).await {
                Ok(pool) => pool,
                Err(StoreError::MissingEntry { .. }) => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            let warmed = self.registry.get_all_agents().into_iter().filter(|a| a.pool_name == pool.metadata.name).count() as u32;

            if warmed < pool.spec.pool_min {
                let hint = self.image_affinity_hint(&pool).await;
                if let Err(err) = self.provisioner.create_agent_pod(&pool, hint.as_deref()).await {
                    tracing::warn!(pool.name = %pool.metadata.name, error = %err, "agent pod creation failed; will retry next sweep");
                }
            } else if warmed > pool.spec.pool_max {
                if let Some(agent_id) = self.idlest_agent(&pool.metadata.name) {
                    if let Err(err) = self.provisioner.delete_agent_pod(&agent_id).await {
                        tracing::warn!(pool.name = %pool.metadata.name, agent.id = %agent_id, error = %err, "agent pod teardown failed; will retry next sweep");
                    }
                }
            }

            if pool.status.warmed_agents == warmed {
                return Ok(());
            }
            pool.status.warmed_agents = warmed;
            match self.pool_store.update(pool).await {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Scale-down picks the idlest warmed agent: zero `allocated`,
    /// oldest (least recent) heartbeat among the idle set (spec.md §4.6).
    fn idlest_agent(&self, pool_name: &str) -> Option<String> {
        self.registry
            .get_all_agents()
            .into_iter()
            .filter(|a| a.pool_name == pool_name && a.allocated == 0)
            .min_by_key(|a| a.last_heartbeat)
            .map(|a| a.agent_id)
    }

    /// Placement hint for scale-up: the node of any agent that already
    /// caches the image most in demand among this pool's pending
    /// sandboxes (spec.md §4.6 "image-affinity aware").
    async fn image_affinity_hint(&self, pool: &PoolRecord) -> Option<String> {
        let pending = self.sandbox_store.list(None).await.ok()?;
        let mut counts: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
        for sandbox in &pending {
            if sandbox.spec.pool_ref == pool.metadata.name && sandbox.phase() == SandboxPhase::Pending {
                *counts.entry(sandbox.spec.image.as_str()).or_default() += 1;
            }
        }
        let most_wanted_image = counts.into_iter().max_by_key(|(_, count)| *count).map(|(image, _)| image)?;

        self.registry
            .get_all_agents()
            .into_iter()
            .find(|a| a.caches_image(most_wanted_image))
            .map(|a| a.node_name)
    }
}
