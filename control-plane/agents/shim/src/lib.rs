pub mod runtime;
pub mod service;

pub use runtime::{HostContainer, OwnerLabels, RuntimeBackend};
pub use service::ShimService;
