pub mod agent;
pub mod meta;
pub mod pool;
pub mod sandbox;

pub use agent::{AgentDescriptor, AgentStatusReport, SandboxObservedStatus};
pub use meta::{ObjectMeta, SANDBOX_FINALIZER};
pub use pool::{AgentTemplate, PoolObservedState, PoolRecord, PoolSpec, RuntimeKind};
pub use sandbox::{
    AllocationAnnotation, Condition, ConsistencyMode, FailurePolicy, SandboxObservedState,
    SandboxPhase, SandboxRecord, SandboxSpec, ANNOTATION_ALLOCATION, ANNOTATION_CREATE_TIMESTAMP,
    LABEL_FAST_PATH,
};
