//! Client-side view of the Agent Shim RPC (spec.md §6 "Agent shim RPC"),
//! abstracted behind a trait the coordinator's admission service,
//! control loop, and reconciler all depend on — grounded on the
//! teacher's per-node gRPC client trait (`core/grpc/node_client.rs`),
//! which likewise hides channel caching behind an interface the rest of
//! the coordinator is generic over.

use crate::control_loop::AgentHandle;
use common_lib::types::{AgentStatusReport, SandboxObservedStatus};
use snafu::Snafu;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Snafu, Clone)]
#[snafu(visibility(pub))]
pub enum ShimCallError {
    #[snafu(display("transport error calling agent '{}': {}", agent_id, reason))]
    Transport { agent_id: String, reason: String },
    #[snafu(display("agent '{}' rejected the call: {}", agent_id, reason))]
    Rejected { agent_id: String, reason: String },
}

impl ShimCallError {
    /// Retryable-vs-terminal classification (spec.md §4.5 "Failure
    /// semantics"): a transport failure may clear up on retry; an
    /// explicit rejection from the agent will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShimCallError::Transport { .. })
    }
}

#[derive(Debug, Clone)]
pub struct AgentCreateParams {
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
pub struct AgentCreateOutcome {
    pub sandbox_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait::async_trait]
pub trait ShimClient: Send + Sync {
    async fn create_sandbox(&self, handle: &AgentHandle, params: AgentCreateParams) -> Result<AgentCreateOutcome, ShimCallError>;
    async fn delete_sandbox(&self, handle: &AgentHandle, sandbox_id: &str) -> Result<(), ShimCallError>;
    async fn status(&self, handle: &AgentHandle) -> Result<AgentStatusReport, ShimCallError>;
}

/// Production client: dials each agent's gRPC endpoint on demand,
/// caching channels per pod IP (the shim is a per-node external process,
/// spec.md §1/§9).
pub struct GrpcShimClient {
    channels: Mutex<HashMap<String, tonic::transport::Channel>>,
    port: u16,
}

impl GrpcShimClient {
    pub fn new(port: u16) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            port,
        }
    }

    async fn channel(&self, handle: &AgentHandle) -> Result<tonic::transport::Channel, ShimCallError> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(&handle.pod_ip) {
            return Ok(channel.clone());
        }
        let endpoint = format!("http://{}:{}", handle.pod_ip, self.port);
        let channel = tonic::transport::Endpoint::from_shared(endpoint)
            .map_err(|e| ShimCallError::Transport {
                agent_id: handle.agent_id.clone(),
                reason: e.to_string(),
            })?
            .connect()
            .await
            .map_err(|e| ShimCallError::Transport {
                agent_id: handle.agent_id.clone(),
                reason: e.to_string(),
            })?;
        channels.insert(handle.pod_ip.clone(), channel.clone());
        Ok(channel)
    }
}

#[async_trait::async_trait]
impl ShimClient for GrpcShimClient {
    async fn create_sandbox(&self, handle: &AgentHandle, params: AgentCreateParams) -> Result<AgentCreateOutcome, ShimCallError> {
        let channel = self.channel(handle).await?;
        let mut client = rpc::shim::agent_shim_client::AgentShimClient::new(channel);
        let request = rpc::shim::CreateSandboxRequest {
            sandbox_id: params.sandbox_id,
            image: params.image,
            command: params.command,
            args: params.args,
            env: params.env.into_iter().collect(),
            working_dir: params.working_dir.unwrap_or_default(),
            exposed_ports: params.exposed_ports.iter().map(|p| *p as u32).collect(),
            claim_uid: params.claim_uid.unwrap_or_default(),
            claim_name: params.claim_name.unwrap_or_default(),
        };
        let reply = client
            .create_sandbox(request)
            .await
            .map_err(|status| ShimCallError::Transport {
                agent_id: handle.agent_id.clone(),
                reason: status.to_string(),
            })?
            .into_inner();

        if reply.success {
            Ok(AgentCreateOutcome {
                sandbox_id: reply.sandbox_id,
                created_at: chrono::DateTime::from_timestamp_nanos(reply.created_at_unix_nanos),
            })
        } else {
            Err(ShimCallError::Rejected {
                agent_id: handle.agent_id.clone(),
                reason: reply.error,
            })
        }
    }

    async fn delete_sandbox(&self, handle: &AgentHandle, sandbox_id: &str) -> Result<(), ShimCallError> {
        let channel = self.channel(handle).await?;
        let mut client = rpc::shim::agent_shim_client::AgentShimClient::new(channel);
        let reply = client
            .delete_sandbox(rpc::shim::DeleteSandboxRequest {
                sandbox_id: sandbox_id.to_string(),
            })
            .await
            .map_err(|status| ShimCallError::Transport {
                agent_id: handle.agent_id.clone(),
                reason: status.to_string(),
            })?
            .into_inner();

        if reply.success {
            Ok(())
        } else {
            Err(ShimCallError::Rejected {
                agent_id: handle.agent_id.clone(),
                reason: reply.error,
            })
        }
    }

    async fn status(&self, handle: &AgentHandle) -> Result<AgentStatusReport, ShimCallError> {
        let channel = self.channel(handle).await?;
        let mut client = rpc::shim::agent_shim_client::AgentShimClient::new(channel);
        let reply = client
            .status(rpc::shim::StatusRequest {})
            .await
            .map_err(|status| ShimCallError::Transport {
                agent_id: handle.agent_id.clone(),
                reason: status.to_string(),
            })?
            .into_inner();

        Ok(AgentStatusReport {
            agent_id: reply.agent_id,
            namespace: handle.namespace.clone(),
            pod_ip: handle.pod_ip.clone(),
            node_name: reply.node_name,
            pool_name: handle.pool_name.clone(),
            capacity: reply.capacity,
            images: reply.images.into_iter().collect(),
            sandbox_statuses: reply
                .sandbox_statuses
                .into_iter()
                .map(|s| {
                    (
                        s.sandbox_id,
                        SandboxObservedStatus {
                            running: s.running,
                            exit_code: s.has_exit_code.then_some(s.exit_code),
                        },
                    )
                })
                .collect(),
        })
    }
}
