use agent_shim::{runtime::RuntimeBackend, ShimService};
use rpc::shim::agent_shim_server::AgentShimServer;
use structopt::StructOpt;
use tonic::transport::Server;

#[derive(Debug, StructOpt)]
#[structopt(name = "agent-shim", about = "Fast-Sandbox Agent Runtime Shim (C7)")]
struct CliArgs {
    /// Address this shim's gRPC server binds to.
    #[structopt(long, default_value = utils::DEFAULT_SHIM_GRPC_ADDR)]
    grpc_addr: std::net::SocketAddr,

    /// Stable agent identifier (normally `<pod-name>-<pod-uid>`).
    #[structopt(long)]
    agent_id: String,

    /// Pod name this shim is co-resident with.
    #[structopt(long)]
    agent_name: String,

    /// Host node name.
    #[structopt(long)]
    node_name: String,

    /// Maximum concurrent sandboxes (0 = unlimited).
    #[structopt(long, default_value = "0")]
    capacity: u32,

    /// Grace period before the kill signal on delete (spec.md §4.7).
    #[structopt(long, default_value = utils::DEFAULT_SANDBOX_GRACE_PERIOD)]
    grace_period: humantime::Duration,

    /// Add process service tags to the traces.
    #[structopt(short, long, env = "TRACING_TAGS", value_delimiter = ",", parse(try_from_str = utils::tracing_telemetry::parse_key_value))]
    tracing_tags: Vec<opentelemetry::KeyValue>,

    /// Trace to the Jaeger agent at this endpoint.
    #[structopt(long, short)]
    jaeger: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::from_args();
    utils::tracing_telemetry::init_tracing("agent-shim", args.tracing_tags.clone(), args.jaeger.clone());
    utils::print_package_info!();

    let service = ShimService {
        agent_id: args.agent_id,
        agent_name: args.agent_name,
        node_name: args.node_name,
        capacity: args.capacity,
        grace_period: args.grace_period.into(),
        backend: RuntimeBackend::mock(),
    };

    tracing::info!(addr = %args.grpc_addr, "agent shim listening");
    let result = Server::builder()
        .add_service(AgentShimServer::new(service))
        .serve(args.grpc_addr)
        .await;
    utils::tracing_telemetry::flush_tracing();
    result?;
    Ok(())
}
