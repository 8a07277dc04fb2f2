//! Shared constants and small helpers used by every fast-sandbox binary.

pub mod tracing_telemetry;

/// Default bind address for the admission REST server.
pub const DEFAULT_ADMISSION_ADDR: &str = "0.0.0.0:8080";
/// Default bind address for the agent shim gRPC server.
pub const DEFAULT_SHIM_GRPC_ADDR: &str = "0.0.0.0:50051";

/// Default period at which the agent control loop (C3) polls every agent.
pub const DEFAULT_CONTROL_LOOP_TICK: &str = "2s";
/// Bounded per-agent deadline for a single control-loop status probe.
pub const DEFAULT_AGENT_PROBE_TIMEOUT: &str = "5s";
/// An agent descriptor is considered stale (and reaped from the registry)
/// once its heartbeat is older than this multiple of the tick interval.
pub const DEFAULT_STALE_AGENT_MULTIPLIER: u32 = 3;

/// Default timeout for a single admission RPC call to an agent shim.
pub const DEFAULT_ADMISSION_AGENT_TIMEOUT: &str = "5s";
/// Reconciler requeue backoff bounds (spec.md §4.5 "Failure semantics").
pub const DEFAULT_RECONCILE_BACKOFF_MIN: &str = "1s";
pub const DEFAULT_RECONCILE_BACKOFF_MAX: &str = "30s";
/// Reconciler idle poll period, when there is no pending work.
pub const DEFAULT_RECONCILE_IDLE_PERIOD: &str = "5s";

/// Fast-mode async store-write retry schedule (spec.md §4.4).
pub const FAST_PATH_RETRY_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];
/// Budget for the fast-mode async record-creation task (spec.md §5).
pub const FAST_PATH_RECORD_BUDGET: &str = "30s";

/// Default orphan-reaper scan interval (spec.md §4.8).
pub const DEFAULT_REAPER_SCAN_PERIOD: &str = "60s";
/// Grace window before a suspicious container is eligible for cleanup.
pub const DEFAULT_REAPER_GRACE_PERIOD: &str = "60s";

/// Default graceful-stop grace period before the kill signal (spec.md §4.7).
pub const DEFAULT_SANDBOX_GRACE_PERIOD: &str = "30s";

/// Key prefix used when records are persisted to a real store backend.
pub const STORE_KEY_PREFIX: &str = "/fast-sandbox.io";

/// Prints `<name> <version>` the way every fast-sandbox binary identifies
/// itself on start-up.
#[macro_export]
macro_rules! print_package_info {
    () => {
        tracing::info!(
            name = env!("CARGO_PKG_NAME"),
            version = env!("CARGO_PKG_VERSION"),
            "starting"
        );
    };
}
