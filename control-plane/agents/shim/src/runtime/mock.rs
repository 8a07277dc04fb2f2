use super::{CreateSandboxOutcome, CreateSandboxParams, HostContainer, OwnerLabels, ShimError, StatusSnapshot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct Container {
    running: bool,
    exit_code: Option<i32>,
    labels: OwnerLabels,
    created_at: chrono::DateTime<chrono::Utc>,
}

struct Inner {
    images: BTreeSet<String>,
    containers: BTreeMap<String, Container>,
}

/// Reference runtime backend used in place of the production OCI/VM
/// driver, which spec.md §1 treats as an external collaborator ("the
/// contract the agent fulfils"). Suitable for tests and local
/// development; keeps container state purely in memory.
#[derive(Clone)]
pub struct MockDriver {
    inner: Arc<Mutex<Inner>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                images: BTreeSet::new(),
                containers: BTreeMap::new(),
            })),
        }
    }

    pub fn with_cached_images(images: impl IntoIterator<Item = String>) -> Self {
        let driver = Self::new();
        driver.inner.lock().images.extend(images);
        driver
    }

    /// Add an image to an already-constructed driver's cache (used by
    /// callers that need to simulate a heartbeat-reported cache change,
    /// e.g. image-affinity tests wired through the coordinator).
    pub fn cache_image(&self, image: impl Into<String>) {
        self.inner.lock().images.insert(image.into());
    }

    pub async fn create_sandbox(
        &self,
        params: CreateSandboxParams,
    ) -> Result<CreateSandboxOutcome, ShimError> {
        if params.image.is_empty() {
            return Err(ShimError::TerminalRuntimeError {
                reason: "empty image reference".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        if inner.containers.contains_key(&params.sandbox_id) {
            return Err(ShimError::AlreadyExists {
                sandbox_id: params.sandbox_id,
            });
        }
        let now = chrono::Utc::now();
        inner.images.insert(params.image.clone());
        inner.containers.insert(
            params.sandbox_id.clone(),
            Container {
                running: true,
                exit_code: None,
                labels: OwnerLabels {
                    managed: true,
                    agent_uid: String::new(),
                    agent_name: String::new(),
                    sandbox_name: params.claim_name.clone().unwrap_or_default(),
                    claim_uid: params.claim_uid.clone(),
                },
                created_at: now,
            },
        );
        Ok(CreateSandboxOutcome {
            sandbox_id: params.sandbox_id,
            created_at: now,
        })
    }

    /// Set the owner labels the shim would stamp on the host container
    /// (spec.md §6 "Host-container labels"); split out from
    /// `create_sandbox` so callers (the gRPC service) can supply the
    /// agent identity, which the runtime backend itself does not know.
    pub fn set_owner(&self, sandbox_id: &str, agent_uid: &str, agent_name: &str) {
        if let Some(c) = self.inner.lock().containers.get_mut(sandbox_id) {
            c.labels.agent_uid = agent_uid.to_string();
            c.labels.agent_name = agent_name.to_string();
        }
    }

    pub async fn delete_sandbox(
        &self,
        sandbox_id: &str,
        _grace_period: std::time::Duration,
    ) -> Result<(), ShimError> {
        let mut inner = self.inner.lock();
        if inner.containers.remove(sandbox_id).is_none() {
            return Err(ShimError::NotFound {
                sandbox_id: sandbox_id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn list_images(&self) -> BTreeSet<String> {
        self.inner.lock().images.clone()
    }

    pub async fn list_sandboxes(&self) -> Vec<HostContainer> {
        self.inner
            .lock()
            .containers
            .iter()
            .map(|(id, c)| HostContainer {
                sandbox_id: id.clone(),
                labels: c.labels.clone(),
                running: c.running,
                created_at: c.created_at,
            })
            .collect()
    }

    pub async fn status(&self, capacity: u32) -> StatusSnapshot {
        let inner = self.inner.lock();
        StatusSnapshot {
            capacity,
            allocated: inner.containers.len() as u32,
            images: inner.images.clone(),
            sandbox_statuses: inner
                .containers
                .iter()
                .map(|(id, c)| (id.clone(), (c.running, c.exit_code)))
                .collect(),
        }
    }

    /// Test/debug helper: simulate the host process dying under a
    /// container without going through `delete_sandbox` (used by reaper
    /// and agent-loss tests).
    pub fn force_mark_exited(&self, sandbox_id: &str, exit_code: i32) {
        if let Some(c) = self.inner.lock().containers.get_mut(sandbox_id) {
            c.running = false;
            c.exit_code = Some(exit_code);
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}
