//! Orphan Reaper (C8, spec.md §4.8).
//!
//! Two triggers are modeled: [`Reaper::on_pod_deleted`] (event mode) and
//! [`Reaper::scan`] (scan mode). Both funnel into the same orphan
//! decision table and cleanup sequence.

use agent_shim::runtime::{HostContainer, RuntimeBackend};
use async_trait::async_trait;
use std::time::Duration;

/// Direct (non-cached) check for whether a pod bearing the given agent
/// UID still exists — spec.md §4.8 "Before cleaning, the reaper performs
/// a direct owner-pod existence check against the store (not cached) to
/// defend against stale caches."
#[async_trait]
pub trait PodExistence: Send + Sync {
    async fn pod_exists(&self, agent_uid: &str) -> bool;
}

/// Looks up the logical store's sandbox record, if any, for a given
/// namespace/name, returning its UID for mismatch detection.
#[async_trait]
pub trait SandboxRecordLookup: Send + Sync {
    async fn sandbox_uid(&self, namespace: &str, sandbox_name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanVerdict {
    Keep,
    Clean,
}

/// The spec.md §4.8 decision table, expressed as a pure function so it
/// can be property-tested without any I/O.
pub fn decide(
    pod_exists: bool,
    record_exists: bool,
    record_uid_matches: bool,
) -> OrphanVerdict {
    if !pod_exists {
        return OrphanVerdict::Clean;
    }
    if !record_exists {
        return OrphanVerdict::Clean;
    }
    if !record_uid_matches {
        return OrphanVerdict::Clean;
    }
    OrphanVerdict::Keep
}

pub struct Reaper<P, R> {
    pub backend: RuntimeBackend,
    pub pod_existence: P,
    pub record_lookup: R,
    pub grace_period: Duration,
    /// Namespace sandboxes reported by this agent live in; used to look
    /// up the corresponding store record by `sandbox_name`.
    pub namespace: String,
}

impl<P: PodExistence, R: SandboxRecordLookup> Reaper<P, R> {
    pub fn new(backend: RuntimeBackend, pod_existence: P, record_lookup: R, grace_period: Duration, namespace: String) -> Self {
        Self {
            backend,
            pod_existence,
            record_lookup,
            grace_period,
            namespace,
        }
    }

    /// Scan-mode sweep (spec.md §4.8 "Scan mode"): examine every managed
    /// container older than the grace window.
    pub async fn scan(&self) -> Vec<String> {
        let now = chrono::Utc::now();
        let mut cleaned = Vec::new();
        for container in self.backend.list_sandboxes().await {
            if !container.labels.managed {
                continue;
            }
            let age = now.signed_duration_since(container.created_at);
            if age < chrono::Duration::from_std(self.grace_period).unwrap_or_default() {
                continue;
            }
            if self.evaluate_and_clean(&container).await {
                cleaned.push(container.sandbox_id);
            }
        }
        cleaned
    }

    /// Event-mode trigger (spec.md §4.8 "Event mode"): a pod bearing an
    /// agent label disappeared; enqueue every host container labelled
    /// with that pod's UID.
    pub async fn on_pod_deleted(&self, agent_uid: &str) -> Vec<String> {
        let mut cleaned = Vec::new();
        for container in self.backend.list_sandboxes().await {
            if container.labels.agent_uid != agent_uid {
                continue;
            }
            if self.force_clean(&container).await {
                cleaned.push(container.sandbox_id);
            }
        }
        cleaned
    }

    async fn evaluate_and_clean(&self, container: &HostContainer) -> bool {
        let pod_exists = self.pod_existence.pod_exists(&container.labels.agent_uid).await;
        let record_uid = self
            .record_lookup
            .sandbox_uid(&self.namespace, &container.labels.sandbox_name)
            .await;
        let record_exists = record_uid.is_some();
        let record_uid_matches = match (&container.labels.claim_uid, &record_uid) {
            (Some(claim), Some(actual)) => claim == actual,
            // no claim UID to compare against (fast mode) — don't treat
            // as a mismatch by itself.
            (None, _) => true,
            (Some(_), None) => false,
        };

        match decide(pod_exists, record_exists, record_uid_matches) {
            OrphanVerdict::Keep => false,
            OrphanVerdict::Clean => {
                self.cleanup(&container.sandbox_id).await;
                true
            }
        }
    }

    async fn force_clean(&self, container: &HostContainer) -> bool {
        self.cleanup(&container.sandbox_id).await;
        true
    }

    /// Cleanup sequence (spec.md §4.8): kill signal → remove task →
    /// delete container + snapshot → unlink fixtures. `RuntimeBackend`'s
    /// `delete_sandbox` already encapsulates the first three steps; the
    /// fixture unlink is logged since the mock backend has no named-pipe
    /// fixtures of its own.
    async fn cleanup(&self, sandbox_id: &str) {
        match self.backend.delete_sandbox(sandbox_id, self.grace_period).await {
            Ok(()) => tracing::info!(sandbox.id = %sandbox_id, "reaper reclaimed orphan container"),
            Err(err) => tracing::warn!(sandbox.id = %sandbox_id, error = %err, "reaper cleanup failed"),
        }
        tracing::debug!(sandbox.id = %sandbox_id, "unlinked fixtures");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table_matches_spec() {
        assert_eq!(decide(true, true, true), OrphanVerdict::Keep);
        assert_eq!(decide(false, true, true), OrphanVerdict::Clean);
        assert_eq!(decide(true, false, true), OrphanVerdict::Clean);
        assert_eq!(decide(true, true, false), OrphanVerdict::Clean);
    }

    struct AlwaysExists;
    #[async_trait]
    impl PodExistence for AlwaysExists {
        async fn pod_exists(&self, _agent_uid: &str) -> bool {
            true
        }
    }
    struct NeverExists;
    #[async_trait]
    impl PodExistence for NeverExists {
        async fn pod_exists(&self, _agent_uid: &str) -> bool {
            false
        }
    }
    struct NoRecord;
    #[async_trait]
    impl SandboxRecordLookup for NoRecord {
        async fn sandbox_uid(&self, _namespace: &str, _name: &str) -> Option<String> {
            None
        }
    }
    struct MatchingRecord;
    #[async_trait]
    impl SandboxRecordLookup for MatchingRecord {
        async fn sandbox_uid(&self, _namespace: &str, _name: &str) -> Option<String> {
            Some("any-uid".into())
        }
    }

    #[tokio::test]
    async fn scan_cleans_container_whose_pod_is_gone() {
        use agent_shim::runtime::{CreateSandboxParams, RuntimeBackend};
        let backend = RuntimeBackend::mock();
        backend
            .create_sandbox(CreateSandboxParams {
                sandbox_id: "sb-1".into(),
                image: "alpine".into(),
                command: vec![],
                args: vec![],
                env: Default::default(),
                working_dir: None,
                exposed_ports: vec![],
                claim_uid: None,
                claim_name: Some("s1".into()),
            })
            .await
            .unwrap();

        let reaper = Reaper::new(
            backend.clone(),
            NeverExists,
            NoRecord,
            Duration::from_secs(0),
            "default".into(),
        );
        let cleaned = reaper.scan().await;
        assert_eq!(cleaned, vec!["sb-1".to_string()]);
        assert!(backend.list_sandboxes().await.is_empty());
    }

    #[tokio::test]
    async fn scan_keeps_container_whose_pod_still_exists() {
        use agent_shim::runtime::{CreateSandboxParams, RuntimeBackend};
        let backend = RuntimeBackend::mock();
        backend
            .create_sandbox(CreateSandboxParams {
                sandbox_id: "sb-1".into(),
                image: "alpine".into(),
                command: vec![],
                args: vec![],
                env: Default::default(),
                working_dir: None,
                exposed_ports: vec![],
                claim_uid: None,
                claim_name: Some("s1".into()),
            })
            .await
            .unwrap();

        let reaper = Reaper::new(
            backend.clone(),
            AlwaysExists,
            MatchingRecord,
            Duration::from_secs(0),
            "default".into(),
        );
        let cleaned = reaper.scan().await;
        assert!(cleaned.is_empty());
        assert_eq!(backend.list_sandboxes().await.len(), 1);
    }

    #[tokio::test]
    async fn scan_keeps_container_within_grace_window() {
        use agent_shim::runtime::{CreateSandboxParams, RuntimeBackend};
        let backend = RuntimeBackend::mock();
        backend
            .create_sandbox(CreateSandboxParams {
                sandbox_id: "sb-1".into(),
                image: "alpine".into(),
                command: vec![],
                args: vec![],
                env: Default::default(),
                working_dir: None,
                exposed_ports: vec![],
                claim_uid: None,
                claim_name: Some("s1".into()),
            })
            .await
            .unwrap();

        let reaper = Reaper::new(
            backend.clone(),
            NeverExists,
            NoRecord,
            Duration::from_secs(3600),
            "default".into(),
        );
        let cleaned = reaper.scan().await;
        assert!(cleaned.is_empty());
        assert_eq!(backend.list_sandboxes().await.len(), 1);
    }
}
