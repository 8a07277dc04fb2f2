//! gRPC server implementation of the Agent Shim RPC (spec.md §6, §4.7).

use crate::runtime::{CreateSandboxParams, RuntimeBackend, ShimError};
use rpc::shim::{
    agent_shim_server::AgentShim, CreateSandboxReply, CreateSandboxRequest, DeleteSandboxReply,
    DeleteSandboxRequest, ListImagesReply, ListImagesRequest, SandboxObservedStatus, StatusReply,
    StatusRequest,
};
use std::collections::BTreeMap;
use tonic::{Request, Response, Status};

pub struct ShimService {
    pub agent_id: String,
    pub agent_name: String,
    pub node_name: String,
    pub capacity: u32,
    pub grace_period: std::time::Duration,
    pub backend: RuntimeBackend,
}

#[tonic::async_trait]
impl AgentShim for ShimService {
    #[tracing::instrument(skip(self, request), fields(sandbox.id = %request.get_ref().sandbox_id))]
    async fn create_sandbox(
        &self,
        request: Request<CreateSandboxRequest>,
    ) -> Result<Response<CreateSandboxReply>, Status> {
        let req = request.into_inner();
        let env: BTreeMap<String, String> = req.env.into_iter().collect();
        let params = CreateSandboxParams {
            sandbox_id: req.sandbox_id.clone(),
            image: req.image,
            command: req.command,
            args: req.args,
            env,
            working_dir: if req.working_dir.is_empty() {
                None
            } else {
                Some(req.working_dir)
            },
            exposed_ports: req.exposed_ports.iter().map(|p| *p as u16).collect(),
            claim_uid: if req.claim_uid.is_empty() {
                None
            } else {
                Some(req.claim_uid)
            },
            claim_name: if req.claim_name.is_empty() {
                None
            } else {
                Some(req.claim_name)
            },
        };

        match self.backend.create_sandbox(params).await {
            Ok(outcome) => {
                let RuntimeBackend::Mock(m) = &self.backend;
                m.set_owner(&outcome.sandbox_id, &self.agent_id, &self.agent_name);
                tracing::info!(sandbox.id = %outcome.sandbox_id, "sandbox created");
                Ok(Response::new(CreateSandboxReply {
                    success: true,
                    sandbox_id: outcome.sandbox_id,
                    created_at_unix_nanos: outcome
                        .created_at
                        .timestamp_nanos_opt()
                        .unwrap_or_default(),
                    error: String::new(),
                }))
            }
            Err(ShimError::TerminalRuntimeError { reason }) => {
                tracing::warn!(error = %reason, "terminal runtime error");
                Ok(Response::new(CreateSandboxReply {
                    success: false,
                    sandbox_id: req.sandbox_id,
                    created_at_unix_nanos: 0,
                    error: reason,
                }))
            }
            Err(other) => Ok(Response::new(CreateSandboxReply {
                success: false,
                sandbox_id: req.sandbox_id,
                created_at_unix_nanos: 0,
                error: other.to_string(),
            })),
        }
    }

    #[tracing::instrument(skip(self, request), fields(sandbox.id = %request.get_ref().sandbox_id))]
    async fn delete_sandbox(
        &self,
        request: Request<DeleteSandboxRequest>,
    ) -> Result<Response<DeleteSandboxReply>, Status> {
        let req = request.into_inner();
        match self
            .backend
            .delete_sandbox(&req.sandbox_id, self.grace_period)
            .await
        {
            Ok(()) => Ok(Response::new(DeleteSandboxReply {
                success: true,
                error: String::new(),
            })),
            // Deleting an already-absent sandbox is idempotent from the
            // coordinator's point of view (spec.md §4.5 finalizer
            // contract allows "the agent is gone and the runtime has been
            // garbage-collected").
            Err(ShimError::NotFound { .. }) => Ok(Response::new(DeleteSandboxReply {
                success: true,
                error: String::new(),
            })),
            Err(other) => Ok(Response::new(DeleteSandboxReply {
                success: false,
                error: other.to_string(),
            })),
        }
    }

    async fn status(&self, _request: Request<StatusRequest>) -> Result<Response<StatusReply>, Status> {
        let snapshot = self.backend.status(self.capacity).await;
        Ok(Response::new(StatusReply {
            agent_id: self.agent_id.clone(),
            node_name: self.node_name.clone(),
            capacity: snapshot.capacity,
            allocated: snapshot.allocated,
            images: snapshot.images.into_iter().collect(),
            sandbox_statuses: snapshot
                .sandbox_statuses
                .into_iter()
                .map(|(id, (running, exit_code))| SandboxObservedStatus {
                    sandbox_id: id,
                    running,
                    exit_code: exit_code.unwrap_or_default(),
                    has_exit_code: exit_code.is_some(),
                })
                .collect(),
        }))
    }

    async fn list_images(
        &self,
        _request: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesReply>, Status> {
        let images = self.backend.list_images().await;
        Ok(Response::new(ListImagesReply {
            images: images.into_iter().collect(),
        }))
    }
}
