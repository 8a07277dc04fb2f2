//! Generated gRPC module for the Agent Shim RPC (spec.md §6).

#[allow(clippy::all)]
pub mod shim {
    tonic::include_proto!("fastsandbox.shim.v1");
}
