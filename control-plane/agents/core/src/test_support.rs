//! In-process test doubles for the coordinator's external collaborators
//! (the Agent Shim gRPC boundary and the cluster's pod listing) —
//! grounded on the teacher's `core::tests::test_client` pattern of
//! wrapping the same backend the production client drives, so tests
//! exercise real scheduling and runtime logic without a network.

use crate::control_loop::{AgentHandle, AgentSource};
use crate::shim_client::{AgentCreateOutcome, AgentCreateParams, RejectedSnafu, ShimCallError, ShimClient, TransportSnafu};
use agent_shim::runtime::{CreateSandboxParams, RuntimeBackend, ShimError};
use common_lib::types::{AgentStatusReport, SandboxObservedStatus};
use parking_lot::Mutex;
use snafu::OptionExt;
use std::collections::HashMap;

struct MockAgent {
    backend: RuntimeBackend,
    capacity: u32,
}

/// A `ShimClient` backed by the real `RuntimeBackend::Mock` driver, one
/// per simulated agent, keyed by `AgentHandle::agent_id`.
pub struct InMemoryShimClient {
    agents: Mutex<HashMap<String, MockAgent>>,
}

impl InMemoryShimClient {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_agent(&self, agent_id: &str, capacity: u32) {
        self.agents.lock().insert(
            agent_id.to_string(),
            MockAgent {
                backend: RuntimeBackend::mock(),
                capacity,
            },
        );
    }

    /// Seeds the named agent's image cache, simulating a heartbeat that
    /// reports an already-pulled image (spec.md §4.2 "image affinity").
    pub fn cache_image(&self, agent_id: &str, image: impl Into<String>) {
        if let Some(agent) = self.agents.lock().get(agent_id) {
            let RuntimeBackend::Mock(driver) = &agent.backend;
            driver.cache_image(image);
        }
    }
}

impl Default for InMemoryShimClient {
    fn default() -> Self {
        Self::new()
    }
}

fn shim_error_to_call_error(agent_id: &str, err: ShimError) -> ShimCallError {
    RejectedSnafu {
        agent_id,
        reason: err.to_string(),
    }
    .build()
}

#[async_trait::async_trait]
impl ShimClient for InMemoryShimClient {
    async fn create_sandbox(&self, handle: &AgentHandle, params: AgentCreateParams) -> Result<AgentCreateOutcome, ShimCallError> {
        let backend = {
            let agents = self.agents.lock();
            let agent = agents.get(&handle.agent_id).context(TransportSnafu {
                agent_id: handle.agent_id.clone(),
                reason: "no such simulated agent".to_string(),
            })?;
            agent.backend.clone()
        };
        let outcome = backend
            .create_sandbox(CreateSandboxParams {
                sandbox_id: params.sandbox_id,
                image: params.image,
                command: params.command,
                args: params.args,
                env: params.env,
                working_dir: params.working_dir,
                exposed_ports: params.exposed_ports,
                claim_uid: params.claim_uid,
                claim_name: params.claim_name,
            })
            .await
            .map_err(|e| shim_error_to_call_error(&handle.agent_id, e))?;

        Ok(AgentCreateOutcome {
            sandbox_id: outcome.sandbox_id,
            created_at: outcome.created_at,
        })
    }

    async fn delete_sandbox(&self, handle: &AgentHandle, sandbox_id: &str) -> Result<(), ShimCallError> {
        let backend = {
            let agents = self.agents.lock();
            let agent = agents.get(&handle.agent_id).context(TransportSnafu {
                agent_id: handle.agent_id.clone(),
                reason: "no such simulated agent".to_string(),
            })?;
            agent.backend.clone()
        };
        backend
            .delete_sandbox(sandbox_id, std::time::Duration::from_secs(0))
            .await
            .map_err(|e| shim_error_to_call_error(&handle.agent_id, e))
    }

    async fn status(&self, handle: &AgentHandle) -> Result<AgentStatusReport, ShimCallError> {
        let (backend, capacity) = {
            let agents = self.agents.lock();
            let agent = agents.get(&handle.agent_id).context(TransportSnafu {
                agent_id: handle.agent_id.clone(),
                reason: "no such simulated agent".to_string(),
            })?;
            (agent.backend.clone(), agent.capacity)
        };
        let snapshot = backend.status(capacity).await;

        Ok(AgentStatusReport {
            agent_id: handle.agent_id.clone(),
            namespace: handle.namespace.clone(),
            pod_ip: handle.pod_ip.clone(),
            node_name: handle.node_name.clone(),
            pool_name: handle.pool_name.clone(),
            capacity: snapshot.capacity,
            images: snapshot.images,
            sandbox_statuses: snapshot
                .sandbox_statuses
                .into_iter()
                .map(|(id, (running, exit_code))| (id, SandboxObservedStatus { running, exit_code }))
                .collect(),
        })
    }
}

/// A fixed pod list for control-loop tests (spec.md §4.3 step 1).
pub struct StaticAgentSource {
    pub handles: Vec<AgentHandle>,
}

#[async_trait::async_trait]
impl AgentSource for StaticAgentSource {
    async fn list_agents(&self) -> Vec<AgentHandle> {
        self.handles.clone()
    }
}
