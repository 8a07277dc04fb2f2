//! Fast-Sandbox coordinator library: Agent Registry (C1), Scheduler
//! (C2), Agent Control Loop (C3), Fast-Path Admission (C4), and the
//! Sandbox/Pool Reconcilers (C5/C6) — grounded on the teacher's
//! `control-plane/agents/core` crate layout, one module per subsystem
//! wired together by the `core` binary.

pub mod admission;
pub mod control_loop;
pub mod reconciler;
pub mod registry;
pub mod shim_client;
pub mod shutdown;

#[cfg(test)]
pub mod test_support;
