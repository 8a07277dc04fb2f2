//! Metric surface (spec.md §6 "Metric surface"; SPEC_FULL.md §3
//! "Admission metrics" supplement) — grounded on the teacher's habit of
//! pairing every duration histogram with a counter (`core/metrics.rs`).
//! A real deployment would register these with `prometheus`; this
//! reference implementation emits them as structured `tracing` events
//! tagged with the metric name, which is what every binary already pipes
//! to its observability stack.

use common_lib::types::ConsistencyMode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static CREATE_TOTAL: AtomicU64 = AtomicU64::new(0);
static CREATE_SUCCESS_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn observe_create(mode: ConsistencyMode, success: bool, elapsed: Duration) {
    CREATE_TOTAL.fetch_add(1, Ordering::Relaxed);
    if success {
        CREATE_SUCCESS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }
    tracing::info!(
        metric = "fastpath_create_sandbox_duration_seconds",
        mode = ?mode,
        success,
        duration_seconds = elapsed.as_secs_f64(),
        "fastpath_create_sandbox_total"
    );
}

pub fn create_total() -> u64 {
    CREATE_TOTAL.load(Ordering::Relaxed)
}

pub fn create_success_total() -> u64 {
    CREATE_SUCCESS_TOTAL.load(Ordering::Relaxed)
}
