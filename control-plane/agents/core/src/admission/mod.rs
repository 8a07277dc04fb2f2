//! Fast-Path Admission (C4, spec.md §4.4): the synchronous create/
//! delete/update/get/list surface, with two consistency modes for
//! `Create` — grounded on the teacher's `control-plane/rest` handlers
//! layered thinly over `core::registry` and `common::store`.

pub mod metrics;
pub mod server;

use crate::control_loop::AgentHandle;
use crate::registry::{AgentRegistry, AllocationRequest};
use crate::shim_client::{AgentCreateParams, ShimCallError, ShimClient};
use crate::shutdown::ShutdownTracker;
use common_lib::error::{AdmissionError, StoreError};
use common_lib::sandbox_id::fast_mode_sandbox_id;
use common_lib::store::Store;
use common_lib::types::*;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// `utils::FAST_PATH_RECORD_BUDGET` parsed once at first use, rather than
/// on every fast-path `Create` call.
static FAST_PATH_RECORD_BUDGET: Lazy<Duration> = Lazy::new(|| {
    utils::FAST_PATH_RECORD_BUDGET
        .parse::<humantime::Duration>()
        .expect("FAST_PATH_RECORD_BUDGET is a compile-time constant in a valid humantime format")
        .into()
});

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: Option<String>,
    pub namespace: String,
    pub image: String,
    pub pool_ref: String,
    pub exposed_ports: Vec<u16>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub consistency_mode: Option<ConsistencyMode>,
    pub expire_time_seconds: Option<u64>,
    pub failure_policy: Option<FailurePolicy>,
}

#[derive(Debug, Clone)]
pub struct CreateResponse {
    pub sandbox_name: String,
    pub agent_id: String,
    pub endpoints: Vec<String>,
}

/// The `Update` oneof (spec.md §6 "Admission RPC").
#[derive(Debug, Clone)]
pub enum UpdateOp {
    ExpireTimeSeconds(u64),
    ResetRevision(u64),
    FailurePolicy(FailurePolicy),
    RecoveryTimeoutSeconds(u64),
    Labels(BTreeMap<String, String>),
}

pub struct AdmissionService<St, C> {
    store: Arc<St>,
    registry: Arc<AgentRegistry>,
    shim: Arc<C>,
    default_consistency_mode: ConsistencyMode,
    shutdown: ShutdownTracker,
}

impl<St, C> AdmissionService<St, C>
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    pub fn new(store: Arc<St>, registry: Arc<AgentRegistry>, shim: Arc<C>, default_consistency_mode: ConsistencyMode) -> Self {
        Self {
            store,
            registry,
            shim,
            default_consistency_mode,
            shutdown: ShutdownTracker::new(),
        }
    }

    /// Lets a caller (the server's shutdown handler) await in-flight
    /// fast-mode record writes before exiting.
    pub fn shutdown_tracker(&self) -> ShutdownTracker {
        self.shutdown.clone()
    }

    #[tracing::instrument(skip(self, request), fields(sandbox.namespace = %request.namespace))]
    pub async fn create(&self, request: CreateRequest) -> Result<CreateResponse, AdmissionError> {
        let start = std::time::Instant::now();
        let mode = request.consistency_mode.unwrap_or(self.default_consistency_mode);
        let name = request.name.clone().unwrap_or_else(|| format!("sandbox-{}", uuid::Uuid::new_v4()));

        let spec = SandboxSpec {
            image: request.image.clone(),
            command: request.command.clone(),
            args: request.args.clone(),
            env: request.env.clone(),
            working_dir: request.working_dir.clone(),
            exposed_ports: request.exposed_ports.clone(),
            pool_ref: request.pool_ref.clone(),
            expire_time: request
                .expire_time_seconds
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs as i64)),
            failure_policy: request.failure_policy.unwrap_or_default(),
            recovery_timeout_seconds: 0,
            reset_revision: 0,
            labels: BTreeMap::new(),
        };

        let allocation_request = AllocationRequest {
            sandbox_key: name.clone(),
            namespace: request.namespace.clone(),
            pool_ref: request.pool_ref.clone(),
            image: request.image.clone(),
            exposed_ports: request.exposed_ports.clone(),
        };
        let descriptor = self.registry.allocate(&allocation_request)?;
        let handle = AgentHandle::from(&descriptor);

        let result = match mode {
            ConsistencyMode::Fast => self.create_fast(&name, &request, spec, &handle).await,
            ConsistencyMode::Strong => self.create_strong(&name, &request, spec, &handle).await,
        };

        metrics::observe_create(mode, result.is_ok(), start.elapsed());
        result
    }

    /// Fast mode (spec.md §4.4 "Fast mode"): call the agent first, return
    /// immediately, write the store record in the background. The
    /// reconciler — not this method — is the one that later harvests the
    /// `allocation`/`createTimestamp` annotations into observed state
    /// (spec.md §5: "the admission service writes ... via annotations
    /// that the reconciler later harvests").
    async fn create_fast(&self, name: &str, request: &CreateRequest, spec: SandboxSpec, handle: &AgentHandle) -> Result<CreateResponse, AdmissionError> {
        let create_timestamp_nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let sandbox_id = fast_mode_sandbox_id(name, &request.namespace, create_timestamp_nanos);

        let create_params = AgentCreateParams {
            sandbox_id: sandbox_id.clone(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            working_dir: spec.working_dir.clone(),
            exposed_ports: spec.exposed_ports.clone(),
            claim_uid: None,
            claim_name: Some(name.to_string()),
        };

        if let Err(err) = self.shim.create_sandbox(handle, create_params).await {
            self.registry.release(&handle.agent_id, name, &spec.exposed_ports);
            return Err(shim_err_to_admission(err));
        }

        let mut metadata = ObjectMeta::new(request.namespace.clone(), name.to_string());
        metadata.add_finalizer(SANDBOX_FINALIZER);
        metadata.labels.insert(LABEL_FAST_PATH.to_string(), "true".to_string());
        metadata.annotations.insert(
            ANNOTATION_ALLOCATION.to_string(),
            serde_json::to_string(&AllocationAnnotation {
                assigned_pod: handle.agent_id.clone(),
                assigned_node: handle.node_name.clone(),
                allocated_at: chrono::Utc::now(),
            })
            .map_err(|e| AdmissionError::Internal { reason: e.to_string() })?,
        );
        metadata
            .annotations
            .insert(ANNOTATION_CREATE_TIMESTAMP.to_string(), create_timestamp_nanos.to_string());

        let record = SandboxRecord::new(metadata, spec.clone());
        let response = CreateResponse {
            sandbox_name: name.to_string(),
            agent_id: handle.agent_id.clone(),
            endpoints: vec![format!("{}:{}", handle.pod_ip, spec.exposed_ports.first().copied().unwrap_or_default())],
        };

        let store = self.store.clone();
        let guard = self.shutdown.track();
        tokio::spawn(async move {
            let _guard = guard;
            let write = async {
                let delays = utils::FAST_PATH_RETRY_DELAYS_MS;
                let attempts = delays.len() + 1;
                for attempt in 1..=attempts {
                    match store.create(record.clone()).await {
                        Ok(_) => return,
                        Err(err) if attempt == attempts => {
                            tracing::warn!(
                                sandbox.name = %record.metadata.name,
                                error = %err,
                                "fast-path record write exhausted retries; the orphan reaper will reclaim the host container"
                            );
                            return;
                        }
                        Err(err) => {
                            let delay = Duration::from_millis(delays[attempt - 1]);
                            tracing::debug!(sandbox.name = %record.metadata.name, attempt, error = %err, "retrying fast-path record write");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            };
            if tokio::time::timeout(*FAST_PATH_RECORD_BUDGET, write).await.is_err() {
                tracing::warn!("fast-path record write task exceeded its budget; relying on the orphan reaper");
            }
        });

        Ok(response)
    }

    /// Strong mode (spec.md §4.4 "Strong mode"): the store record exists
    /// before the agent is called, and this method is the one exception
    /// to "the reconciler is the only writer of observed state"
    /// (spec.md §5).
    async fn create_strong(&self, name: &str, request: &CreateRequest, spec: SandboxSpec, handle: &AgentHandle) -> Result<CreateResponse, AdmissionError> {
        let mut metadata = ObjectMeta::new(request.namespace.clone(), name.to_string());
        metadata.add_finalizer(SANDBOX_FINALIZER);
        metadata.annotations.insert(
            ANNOTATION_ALLOCATION.to_string(),
            serde_json::to_string(&AllocationAnnotation {
                assigned_pod: handle.agent_id.clone(),
                assigned_node: handle.node_name.clone(),
                allocated_at: chrono::Utc::now(),
            })
            .map_err(|e| AdmissionError::Internal { reason: e.to_string() })?,
        );

        let mut record = SandboxRecord::new(metadata, spec.clone());
        record.status.phase = Some(SandboxPhase::Bound);
        record.status.assigned_agent = Some(handle.agent_id.clone());
        record.status.assigned_node = Some(handle.node_name.clone());

        let created = match self.store.create(record).await {
            Ok(created) => created,
            Err(err) => {
                self.registry.release(&handle.agent_id, name, &spec.exposed_ports);
                return Err(err.into());
            }
        };

        let sandbox_id = created.metadata.uid.clone();
        let create_params = AgentCreateParams {
            sandbox_id: sandbox_id.clone(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            working_dir: spec.working_dir.clone(),
            exposed_ports: spec.exposed_ports.clone(),
            claim_uid: Some(sandbox_id.clone()),
            claim_name: Some(name.to_string()),
        };

        if let Err(err) = self.shim.create_sandbox(handle, create_params).await {
            let _ = self.store.delete(&request.namespace, name).await;
            self.registry.release(&handle.agent_id, name, &spec.exposed_ports);
            return Err(shim_err_to_admission(err));
        }

        let mut updated = created;
        updated.status.sandbox_id = Some(sandbox_id);
        updated.status.phase = Some(SandboxPhase::Running);
        let updated = self.store.update(updated).await?;

        Ok(CreateResponse {
            sandbox_name: name.to_string(),
            agent_id: handle.agent_id.clone(),
            endpoints: vec![format!(
                "{}:{}",
                handle.pod_ip,
                updated.spec.exposed_ports.first().copied().unwrap_or_default()
            )],
        })
    }

    /// Mark-and-return (spec.md §9 Open Questions): the reconciler
    /// performs the actual teardown.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<(), AdmissionError> {
        self.store.delete(namespace, name).await?;
        Ok(())
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<SandboxRecord, AdmissionError> {
        Ok(self.store.get(namespace, name).await?)
    }

    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<SandboxRecord>, AdmissionError> {
        Ok(self.store.list(namespace).await?)
    }

    /// Conflict-retried read-modify-write (spec.md §6 "Update", §9
    /// "Optimistic concurrency and retries").
    #[tracing::instrument(skip(self, op))]
    pub async fn update(&self, namespace: &str, name: &str, op: UpdateOp) -> Result<SandboxRecord, AdmissionError> {
        loop {
            let mut record = self.store.get(namespace, name).await?;
            match &op {
                UpdateOp::ExpireTimeSeconds(secs) => {
                    record.spec.expire_time = Some(chrono::Utc::now() + chrono::Duration::seconds(*secs as i64));
                }
                UpdateOp::ResetRevision(rev) => {
                    // spec.md §9 Open Questions: reject rather than
                    // silently revive a terminal sandbox.
                    if record.phase() == SandboxPhase::Expired {
                        return Err(AdmissionError::InvalidSpec {
                            reason: "cannot bump resetRevision on an Expired sandbox".into(),
                        });
                    }
                    record.spec.reset_revision = *rev;
                }
                UpdateOp::FailurePolicy(policy) => record.spec.failure_policy = *policy,
                UpdateOp::RecoveryTimeoutSeconds(secs) => record.spec.recovery_timeout_seconds = *secs,
                UpdateOp::Labels(labels) => record.metadata.labels.extend(labels.clone()),
            }
            match self.store.update(record).await {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict { .. }) => continue,
                Err(other) => return Err(other.into()),
            }
        }
    }
}

fn shim_err_to_admission(err: ShimCallError) -> AdmissionError {
    AdmissionError::AgentUnavailable { reason: err.to_string() }
}
