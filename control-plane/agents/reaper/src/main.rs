use agent_shim::runtime::RuntimeBackend;
use async_trait::async_trait;
use orphan_reaper::{PodExistence, Reaper, SandboxRecordLookup};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "reaper", about = "Fast-Sandbox Orphan Reaper (C8)")]
struct CliArgs {
    /// Scan-mode sweep interval.
    #[structopt(long, default_value = utils::DEFAULT_REAPER_SCAN_PERIOD)]
    scan_period: humantime::Duration,

    /// Minimum container age before it is eligible for cleanup.
    #[structopt(long, default_value = utils::DEFAULT_REAPER_GRACE_PERIOD)]
    grace_period: humantime::Duration,

    /// Namespace this reaper's node serves.
    #[structopt(long, default_value = "default")]
    namespace: String,

    /// Add process service tags to the traces.
    #[structopt(short, long, env = "TRACING_TAGS", value_delimiter = ",", parse(try_from_str = utils::tracing_telemetry::parse_key_value))]
    tracing_tags: Vec<opentelemetry::KeyValue>,

    /// Trace to the Jaeger agent at this endpoint.
    #[structopt(long, short)]
    jaeger: Option<String>,
}

/// Reference wiring: in the absence of a live cluster API (an external
/// collaborator per spec.md §1), this always reports the owner pod as
/// present. A production deployment substitutes a real check against the
/// cluster's pod list behind the same trait.
struct AlwaysPresent;
#[async_trait]
impl PodExistence for AlwaysPresent {
    async fn pod_exists(&self, _agent_uid: &str) -> bool {
        true
    }
}

struct NoStoreLookup;
#[async_trait]
impl SandboxRecordLookup for NoStoreLookup {
    async fn sandbox_uid(&self, _namespace: &str, _sandbox_name: &str) -> Option<String> {
        None
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::from_args();
    utils::tracing_telemetry::init_tracing("orphan-reaper", args.tracing_tags.clone(), args.jaeger.clone());
    utils::print_package_info!();

    let reaper = Reaper::new(
        RuntimeBackend::mock(),
        AlwaysPresent,
        NoStoreLookup,
        args.grace_period.into(),
        args.namespace,
    );

    let mut interval = tokio::time::interval(args.scan_period.into());
    loop {
        interval.tick().await;
        let cleaned = reaper.scan().await;
        if !cleaned.is_empty() {
            tracing::info!(count = cleaned.len(), "reaper scan cleaned orphans");
        }
    }
}
