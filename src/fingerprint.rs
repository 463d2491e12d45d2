//! Determinism fingerprint (C2): a pure function over an execution
//! environment's identifying inputs, used to decide whether a later run
//! is comparable to a project's recorded baseline.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{EnvironmentFingerprint, FailureClass};

#[derive(Serialize)]
struct CanonicalInputs<'a> {
    image_digest: &'a str,
    toolchain_versions: &'a BTreeMap<String, String>,
    lockfile_hashes: &'a BTreeMap<String, String>,
    command_set_hash: &'a str,
    env_allowlist_hash: &'a str,
}

/// Hashes an already-sorted argv list into the `command_set_hash` input.
pub fn command_set_hash(commands: &[Vec<String>]) -> String {
    let mut hasher = Sha256::new();
    for argv in commands {
        hasher.update(argv.join(" "));
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

pub fn env_allowlist_hash(allowlist: &[String]) -> String {
    let mut sorted = allowlist.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    for var in &sorted {
        hasher.update(var.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Computes the environment fingerprint. `BTreeMap` keys are already
/// lexicographic, so `serde_json::to_string` on the canonical struct is
/// enough to get a stable byte sequence to hash.
pub fn compute(
    image_digest: &str,
    toolchain_versions: &BTreeMap<String, String>,
    lockfile_hashes: &BTreeMap<String, String>,
    command_set_hash: &str,
    env_allowlist_hash: &str,
) -> EnvironmentFingerprint {
    let canonical = CanonicalInputs {
        image_digest,
        toolchain_versions,
        lockfile_hashes,
        command_set_hash,
        env_allowlist_hash,
    };
    let bytes = serde_json::to_vec(&canonical).expect("canonical inputs always serialize");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let fingerprint_hash = hex::encode(hasher.finalize());

    EnvironmentFingerprint {
        fingerprint_hash,
        image_digest: image_digest.to_string(),
        toolchain_versions: toolchain_versions.clone(),
        lockfile_hashes: lockfile_hashes.clone(),
        command_set_hash: command_set_hash.to_string(),
        env_allowlist_hash: env_allowlist_hash.to_string(),
        computed_at: Utc::now(),
    }
}

/// Reproducibility predicate (§4.2): the environment matches a recorded
/// baseline, the command set matches the plan expected for this mode, and
/// the failure class (if any) is not in the noise set. `Policy`/`Timeout`
/// are enforcement/infra signal, not candidate-correctness signal, so they
/// sit in the same excluded bucket as `Flake` even though spec.md's literal
/// noise-set examples (network-provider outage, registry timeout, resource
/// starvation) describe infra flakiness rather than sandbox enforcement —
/// both are reasons the signal shouldn't feed future ranking.
pub fn is_reproducible(
    candidate: &EnvironmentFingerprint,
    baseline: &EnvironmentFingerprint,
    expected_command_set_hash: &str,
    failure_class: Option<FailureClass>,
) -> bool {
    candidate.fingerprint_hash == baseline.fingerprint_hash
        && candidate.command_set_hash == expected_command_set_hash
        && !matches!(
            failure_class,
            Some(FailureClass::Flake) | Some(FailureClass::Policy) | Some(FailureClass::Timeout)
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut toolchain = BTreeMap::new();
        toolchain.insert("rustc".to_string(), "1.82.0".to_string());
        let mut lockfiles = BTreeMap::new();
        lockfiles.insert("Cargo.lock".to_string(), "deadbeef".to_string());
        (toolchain, lockfiles)
    }

    #[test]
    fn compute_is_deterministic() {
        let (toolchain, lockfiles) = sample();
        let cmd_hash = command_set_hash(&[vec!["cargo".into(), "check".into()]]);
        let env_hash = env_allowlist_hash(&["PATH".into(), "HOME".into()]);

        let a = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);
        let b = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);
        assert_eq!(a.fingerprint_hash, b.fingerprint_hash);
    }

    #[test]
    fn compute_changes_with_toolchain() {
        let (mut toolchain, lockfiles) = sample();
        let cmd_hash = command_set_hash(&[vec!["cargo".into(), "check".into()]]);
        let env_hash = env_allowlist_hash(&["PATH".into()]);

        let a = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);
        toolchain.insert("rustc".to_string(), "1.83.0".to_string());
        let b = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);
        assert_ne!(a.fingerprint_hash, b.fingerprint_hash);
    }

    #[test]
    fn env_allowlist_hash_is_order_independent() {
        let a = env_allowlist_hash(&["PATH".into(), "HOME".into()]);
        let b = env_allowlist_hash(&["HOME".into(), "PATH".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn reproducible_requires_matching_fingerprint_and_command_set() {
        let (toolchain, lockfiles) = sample();
        let cmd_hash = command_set_hash(&[vec!["cargo".into(), "check".into()]]);
        let env_hash = env_allowlist_hash(&["PATH".into()]);
        let baseline = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);
        let candidate = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);

        assert!(is_reproducible(&candidate, &baseline, &cmd_hash, None));
        assert!(!is_reproducible(&candidate, &baseline, "different-hash", None));
    }

    #[test]
    fn noise_class_failures_are_never_reproducible() {
        let (toolchain, lockfiles) = sample();
        let cmd_hash = command_set_hash(&[vec!["cargo".into(), "check".into()]]);
        let env_hash = env_allowlist_hash(&["PATH".into()]);
        let baseline = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);
        let candidate = compute("img:sha256:abc", &toolchain, &lockfiles, &cmd_hash, &env_hash);

        assert!(!is_reproducible(&candidate, &baseline, &cmd_hash, Some(FailureClass::Flake)));
        assert!(!is_reproducible(&candidate, &baseline, &cmd_hash, Some(FailureClass::Policy)));
        assert!(!is_reproducible(&candidate, &baseline, &cmd_hash, Some(FailureClass::Timeout)));
        assert!(is_reproducible(&candidate, &baseline, &cmd_hash, Some(FailureClass::Deterministic)));
        assert!(is_reproducible(&candidate, &baseline, &cmd_hash, Some(FailureClass::Syntax)));
    }
}
