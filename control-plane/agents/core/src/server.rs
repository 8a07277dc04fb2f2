//! The `core` binary: wires the Agent Registry (C1), Control Loop (C3),
//! Fast-Path Admission (C4), and the Sandbox/Pool Reconcilers (C5/C6)
//! into one coordinator process — grounded on the teacher's
//! `control-plane/agents/core/src/bin/core/main.rs` wiring pattern.

use async_trait::async_trait;
use coordinator::admission::AdmissionService;
use coordinator::control_loop::{AgentHandle, AgentSource, ControlLoop};
use coordinator::reconciler::pool::{PodProvisionError, PodProvisioner};
use coordinator::reconciler::{PoolReconciler, SandboxReconciler};
use coordinator::registry::AgentRegistry;
use coordinator::shim_client::GrpcShimClient;
use common_lib::store::{MemoryStore, Store};
use common_lib::types::{ConsistencyMode, PoolRecord, SandboxRecord};
use std::str::FromStr;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "core", about = "Fast-Sandbox coordinator (C1-C6)")]
struct CliArgs {
    /// Bind address for the admission REST server.
    #[structopt(long, default_value = utils::DEFAULT_ADMISSION_ADDR)]
    admission_addr: std::net::SocketAddr,

    /// Port the agent shim gRPC server listens on, on every agent pod.
    #[structopt(long, default_value = "50051")]
    shim_port: u16,

    /// Agent control loop (C3) tick interval.
    #[structopt(long, default_value = utils::DEFAULT_CONTROL_LOOP_TICK)]
    control_loop_tick: humantime::Duration,

    /// Per-agent status-probe deadline.
    #[structopt(long, default_value = utils::DEFAULT_AGENT_PROBE_TIMEOUT)]
    agent_probe_timeout: humantime::Duration,

    /// Multiple of `control_loop_tick` after which a stale agent is both
    /// reaped from the registry and treated as lost by the reconciler.
    #[structopt(long, default_value = "3")]
    stale_agent_multiplier: u32,

    /// Reconciler sweep interval (spec.md §4.5 "Failure semantics" idle
    /// poll period).
    #[structopt(long, default_value = utils::DEFAULT_RECONCILE_IDLE_PERIOD)]
    reconcile_period: humantime::Duration,

    /// Bounded worker-pool size for the control loop's per-tick sweep.
    #[structopt(long, default_value = "16")]
    control_loop_workers: usize,

    /// Default `Create` consistency mode when the caller omits one
    /// (spec.md §4.4): `fast` or `strong`.
    #[structopt(long, default_value = "fast")]
    default_consistency_mode: ConsistencyModeArg,

    /// Add process service tags to the traces.
    #[structopt(short, long, env = "TRACING_TAGS", value_delimiter = ",", parse(try_from_str = utils::tracing_telemetry::parse_key_value))]
    tracing_tags: Vec<opentelemetry::KeyValue>,

    /// Trace to the Jaeger agent at this endpoint.
    #[structopt(long, short)]
    jaeger: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct ConsistencyModeArg(ConsistencyMode);

impl FromStr for ConsistencyModeArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(ConsistencyModeArg(ConsistencyMode::Fast)),
            "strong" => Ok(ConsistencyModeArg(ConsistencyMode::Strong)),
            other => Err(format!("unknown consistency mode '{}', expected 'fast' or 'strong'", other)),
        }
    }
}

/// Source of the agent-labelled pod list (spec.md §4.3 step 1, an
/// external collaborator). In the absence of a live cluster API this
/// reference wiring reflects already-registered agents, mirroring the
/// orphan reaper's `AlwaysPresent` stub for the same collaborator.
struct RegistrySource {
    registry: Arc<AgentRegistry>,
}

#[async_trait]
impl AgentSource for RegistrySource {
    async fn list_agents(&self) -> Vec<AgentHandle> {
        self.registry.get_all_agents().iter().map(AgentHandle::from).collect()
    }
}

/// Reference wiring for the cluster's pod primitive (spec.md §1, §4.6):
/// logs the scaling intent rather than calling a live orchestrator.
struct LoggingProvisioner;

#[async_trait]
impl PodProvisioner for LoggingProvisioner {
    async fn create_agent_pod(&self, pool: &PoolRecord, node_hint: Option<&str>) -> Result<(), PodProvisionError> {
        tracing::info!(pool.name = %pool.metadata.name, node_hint, "would create a new agent pod from the pool template");
        Ok(())
    }

    async fn delete_agent_pod(&self, agent_id: &str) -> Result<(), PodProvisionError> {
        tracing::info!(agent.id = %agent_id, "would tear down this agent pod");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = CliArgs::from_args();
    utils::tracing_telemetry::init_tracing("core", args.tracing_tags.clone(), args.jaeger.clone());
    utils::print_package_info!();

    let sandbox_store = Arc::new(MemoryStore::<SandboxRecord>::new());
    let pool_store = Arc::new(MemoryStore::<PoolRecord>::new());
    let registry = Arc::new(AgentRegistry::new());
    let shim = Arc::new(GrpcShimClient::new(args.shim_port));

    registry.restore(&sandbox_store.list(None).await.unwrap_or_default());

    let control_loop = ControlLoop::new(
        RegistrySource { registry: registry.clone() },
        shim.clone(),
        registry.clone(),
        args.agent_probe_timeout.into(),
        args.control_loop_workers,
    );
    let stale_timeout = args.control_loop_tick.as_secs_f64() * args.stale_agent_multiplier as f64;
    let stale_timeout = std::time::Duration::from_secs_f64(stale_timeout);

    let sandbox_reconciler = Arc::new(SandboxReconciler::new(sandbox_store.clone(), registry.clone(), shim.clone(), stale_timeout));
    let pool_reconciler = Arc::new(PoolReconciler::new(pool_store.clone(), sandbox_store.clone(), registry.clone(), Arc::new(LoggingProvisioner)));

    tokio::spawn({
        let tick = *args.control_loop_tick;
        let registry = registry.clone();
        async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                control_loop.tick().await;
                registry.cleanup_stale_agents(stale_timeout);
            }
        }
    });

    tokio::spawn({
        let period = *args.reconcile_period;
        async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                sandbox_reconciler.sweep().await;
            }
        }
    });

    tokio::spawn({
        let period = *args.reconcile_period;
        async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                pool_reconciler.sweep().await;
            }
        }
    });

    let admission = Arc::new(AdmissionService::new(sandbox_store, registry, shim, args.default_consistency_mode.0));
    let result = coordinator::admission::server::run(args.admission_addr, admission).await;
    utils::tracing_telemetry::flush_tracing();
    result
}
