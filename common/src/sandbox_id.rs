//! Fast-mode sandbox ID derivation (spec.md §4.4 "Fast mode",
//! §4.5 "SandboxID regeneration"): a collision-resistant hash of
//! `(name, namespace, createTimestamp)` so both the admission path and a
//! restarted reconciler can recompute the same ID from the
//! `createTimestamp` annotation alone, without any in-memory state.

use sha2::{Digest, Sha256};

pub fn fast_mode_sandbox_id(name: &str, namespace: &str, create_timestamp_nanos: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    hasher.update(b"/");
    hasher.update(create_timestamp_nanos.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_reproduce_the_same_id() {
        let a = fast_mode_sandbox_id("s1", "default", 12345);
        let b = fast_mode_sandbox_id("s1", "default", 12345);
        assert_eq!(a, b);
    }

    #[test]
    fn different_timestamps_diverge() {
        let a = fast_mode_sandbox_id("s1", "default", 1);
        let b = fast_mode_sandbox_id("s1", "default", 2);
        assert_ne!(a, b);
    }
}
