//! REST front-end for the admission service (spec.md §6 "Admission RPC")
//! — grounded on the teacher's `control-plane/rest` actix-web handlers
//! thinly wrapping the same service-layer methods used by tests.

use super::{AdmissionService, CreateRequest, UpdateOp};
use crate::shim_client::ShimClient;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use common_lib::error::AdmissionError;
use common_lib::store::Store;
use common_lib::types::{ConsistencyMode, FailurePolicy, SandboxRecord};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub name: Option<String>,
    pub namespace: String,
    pub image: String,
    pub pool_ref: String,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub consistency_mode: Option<ConsistencyMode>,
    pub expire_time_seconds: Option<u64>,
    pub failure_policy: Option<FailurePolicy>,
}

impl From<CreateBody> for CreateRequest {
    fn from(body: CreateBody) -> Self {
        CreateRequest {
            name: body.name,
            namespace: body.namespace,
            image: body.image,
            pool_ref: body.pool_ref,
            exposed_ports: body.exposed_ports,
            command: body.command,
            args: body.args,
            env: body.env,
            working_dir: body.working_dir,
            consistency_mode: body.consistency_mode,
            expire_time_seconds: body.expire_time_seconds,
            failure_policy: body.failure_policy,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateBody {
    ExpireTimeSeconds(u64),
    ResetRevision(u64),
    FailurePolicy(FailurePolicy),
    RecoveryTimeoutSeconds(u64),
    Labels(BTreeMap<String, String>),
}

impl From<UpdateBody> for UpdateOp {
    fn from(body: UpdateBody) -> Self {
        match body {
            UpdateBody::ExpireTimeSeconds(v) => UpdateOp::ExpireTimeSeconds(v),
            UpdateBody::ResetRevision(v) => UpdateOp::ResetRevision(v),
            UpdateBody::FailurePolicy(v) => UpdateOp::FailurePolicy(v),
            UpdateBody::RecoveryTimeoutSeconds(v) => UpdateOp::RecoveryTimeoutSeconds(v),
            UpdateBody::Labels(v) => UpdateOp::Labels(v),
        }
    }
}

fn admission_error_response(err: &AdmissionError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });
    match err {
        AdmissionError::InvalidSpec { .. } => HttpResponse::BadRequest().json(body),
        AdmissionError::NotFound { .. } => HttpResponse::NotFound().json(body),
        AdmissionError::Conflict { .. } => HttpResponse::Conflict().json(body),
        AdmissionError::InsufficientCapacity { .. } => HttpResponse::ServiceUnavailable().json(body),
        AdmissionError::AgentUnavailable { .. } => HttpResponse::ServiceUnavailable().json(body),
        AdmissionError::Internal { .. } => HttpResponse::InternalServerError().json(body),
    }
}

async fn create_handler<St, C>(service: web::Data<Arc<AdmissionService<St, C>>>, body: web::Json<CreateBody>) -> impl Responder
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    match service.create(body.into_inner().into()).await {
        Ok(response) => HttpResponse::Ok().json(serde_json::json!({
            "sandboxName": response.sandbox_name,
            "agentId": response.agent_id,
            "endpoints": response.endpoints,
        })),
        Err(err) => admission_error_response(&err),
    }
}

async fn get_handler<St, C>(service: web::Data<Arc<AdmissionService<St, C>>>, path: web::Path<(String, String)>) -> impl Responder
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    let (namespace, name) = path.into_inner();
    match service.get(&namespace, &name).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(err) => admission_error_response(&err),
    }
}

async fn list_handler<St, C>(service: web::Data<Arc<AdmissionService<St, C>>>, path: web::Path<String>) -> impl Responder
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    let namespace = path.into_inner();
    match service.list(Some(&namespace)).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(err) => admission_error_response(&err),
    }
}

async fn delete_handler<St, C>(service: web::Data<Arc<AdmissionService<St, C>>>, path: web::Path<(String, String)>) -> impl Responder
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    let (namespace, name) = path.into_inner();
    match service.delete(&namespace, &name).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(err) => admission_error_response(&err),
    }
}

async fn update_handler<St, C>(
    service: web::Data<Arc<AdmissionService<St, C>>>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateBody>,
) -> impl Responder
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    let (namespace, name) = path.into_inner();
    match service.update(&namespace, &name, body.into_inner().into()).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(err) => admission_error_response(&err),
    }
}

/// Runs the admission REST server until SIGINT/SIGTERM arrives, then
/// awaits every in-flight fast-mode record write (spec.md §9
/// "Coroutine-shaped flows") before returning.
pub async fn run<St, C>(addr: std::net::SocketAddr, service: Arc<AdmissionService<St, C>>) -> std::io::Result<()>
where
    St: Store<SandboxRecord> + 'static,
    C: ShimClient + 'static,
{
    let shutdown = service.shutdown_tracker();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(service.clone()))
            .route("/sandboxes", web::post().to(create_handler::<St, C>))
            .route("/sandboxes/{namespace}", web::get().to(list_handler::<St, C>))
            .route("/sandboxes/{namespace}/{name}", web::get().to(get_handler::<St, C>))
            .route("/sandboxes/{namespace}/{name}", web::delete().to(delete_handler::<St, C>))
            .route("/sandboxes/{namespace}/{name}", web::patch().to(update_handler::<St, C>))
    })
    .bind(addr)?
    .run();

    let handle = server.handle();
    let signal_task = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        handle.stop(true).await;
    });

    let result = server.await;
    signal_task.abort();
    tracing::info!("admission server stopped accepting; draining in-flight fast-path writes");
    shutdown.wait_idle().await;
    result
}
