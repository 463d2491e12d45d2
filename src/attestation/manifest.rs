//! Attestation manifest builder (C6, half one): assembles the
//! tamper-evident record at a request's terminal state. `verified` is
//! never a field the caller can set directly — it only comes out of
//! `build()` when every tier claim is backed by a passing command.

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::{
    AttestationManifest, EnvironmentFingerprint, ExecutedCommand, FailureClass, FinalStatus, TerminalEvent, Tier,
    VerificationResult, SCHEMA_VERSION,
};
use crate::tier::{classify_tier, requires_human_review};

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub verification: VerificationResult,
    pub failure_class: Option<FailureClass>,
    pub candidate_digest: String,
}

pub struct ManifestBuilder;

impl ManifestBuilder {
    /// Builds the manifest for a request that has reached a terminal
    /// state. `cancelled` takes precedence over whatever the last attempt
    /// shows — a cancelled request is never `Verified`, even if its last
    /// attempt happened to pass. `max_attempts` is the retry ceiling the
    /// caller ran under (C4's `MAX_ATTEMPTS`, or an unreachable ceiling for
    /// single-pass callers that never retry at all).
    pub fn build(
        request_id: Uuid,
        attempts: &[AttemptRecord],
        fingerprint: Option<EnvironmentFingerprint>,
        max_attempts: u32,
        cancelled: bool,
    ) -> AttestationManifest {
        let last = attempts.last();
        let tier = last
            .filter(|a| a.verification.passed)
            .and_then(|a| classify_tier(&a.verification.commands));

        let final_status = if cancelled {
            FinalStatus::Cancelled
        } else if is_complete(last, tier) {
            FinalStatus::Verified
        } else {
            FinalStatus::Halted
        };

        let human_review_required = tier.map(requires_human_review).unwrap_or(false);
        let candidate_digest = last.map(|a| a.candidate_digest.clone());
        let commands = last.map(|a| a.verification.commands.clone()).unwrap_or_default();
        let skipped_checks = last.map(|a| a.verification.skipped_checks.clone()).unwrap_or_default();
        let failure_class = last.and_then(|a| a.failure_class);
        let artifact_refs = commands.iter().filter_map(|c| c.artifact_path.clone()).collect();
        let retry_count = (attempts.len() as u32).saturating_sub(1);
        let terminal_event = terminal_event(last, attempts.len() as u32, max_attempts, cancelled);

        let mut manifest = AttestationManifest {
            request_id,
            schema_version: SCHEMA_VERSION,
            final_status,
            attempts: attempts.len() as u32,
            retry_count,
            tier,
            human_review_required,
            fingerprint,
            candidate_digest,
            commands,
            skipped_checks,
            failure_class,
            terminal_event,
            artifact_refs,
            manifest_digest: String::new(),
            created_at: Utc::now(),
        };
        manifest.manifest_digest = digest(&manifest);
        manifest
    }
}

/// A terminal failure only earns `MaxRetriesExceeded` when the budget, not
/// the failure class, is what stopped it — a non-retryable class halts at
/// whatever attempt it occurred on and carries its `failure_class` as the
/// terminal cause instead (§4.4).
fn terminal_event(
    last: Option<&AttemptRecord>,
    attempt_count: u32,
    max_attempts: u32,
    cancelled: bool,
) -> Option<TerminalEvent> {
    if cancelled {
        return None;
    }
    let last = last.filter(|a| !a.verification.passed)?;
    let retryable = last.failure_class.map(|c| c.is_retryable()).unwrap_or(false);
    if retryable && attempt_count >= max_attempts {
        Some(TerminalEvent::MaxRetriesExceeded)
    } else {
        None
    }
}

/// Every tier claim must map to a command log with a passing exit code.
/// Since `classify_tier` only yields a tier when its floor stages passed,
/// completeness reduces to "the last attempt passed and produced a tier" —
/// this function still checks both independently rather than assuming
/// `classify_tier`'s internal invariant holds.
fn is_complete(last: Option<&AttemptRecord>, tier: Option<Tier>) -> bool {
    let Some(last) = last else { return false };
    if !last.verification.passed || tier.is_none() {
        return false;
    }
    tier_claim_backed_by_commands(tier.unwrap(), &last.verification.commands)
}

fn tier_claim_backed_by_commands(tier: Tier, commands: &[ExecutedCommand]) -> bool {
    classify_tier(commands) == Some(tier)
}

fn digest(manifest: &AttestationManifest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest.request_id.as_bytes());
    hasher.update(format!("{:?}", manifest.final_status));
    hasher.update(manifest.attempts.to_le_bytes());
    hasher.update(manifest.retry_count.to_le_bytes());
    hasher.update(format!("{:?}", manifest.tier));
    hasher.update([manifest.human_review_required as u8]);
    hasher.update(format!("{:?}", manifest.failure_class));
    hasher.update(format!("{:?}", manifest.terminal_event));
    for command in &manifest.commands {
        hasher.update([command.stage as u8]);
        hasher.update(format!("{:?}", command.exit_code));
    }
    if let Some(fp) = &manifest.fingerprint {
        hasher.update(&fp.fingerprint_hash);
    }
    if let Some(cd) = &manifest.candidate_digest {
        hasher.update(cd);
    }
    hex::encode(hasher.finalize())
}
