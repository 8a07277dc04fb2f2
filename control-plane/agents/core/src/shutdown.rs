//! Graceful-shutdown support for fast-path's detached async record-write
//! task (spec.md §9 "Coroutine-shaped flows" — the task's cancellation
//! must not leak a reservation, and a graceful shutdown must await its
//! completion), grounded on the teacher's `utils::shutdown` crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct ShutdownTracker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Held by a tracked task; dropping it (including on panic) decrements
/// the in-flight count and wakes any `wait_idle` caller.
pub struct TrackedGuard {
    inner: Arc<Inner>,
}

impl Drop for TrackedGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl ShutdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self) -> TrackedGuard {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        TrackedGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Await completion of every currently tracked task.
    pub async fn wait_idle(&self) {
        loop {
            if self.inner.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            self.inner.idle.notified().await;
        }
    }
}
