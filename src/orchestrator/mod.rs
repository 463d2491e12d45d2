//! Circuit breaker / bounded retry loop (C4). Owns every state
//! transition; C1 is the only issuer of execution, C6 is the only
//! component permitted to mark an outcome verified — this module calls
//! both but never second-guesses what they report.

mod breaker;
mod repair;

pub use breaker::{CircuitBreaker, OrchestratorError, RequestState, StateTransitionEvent, TransitionEvent};
pub use repair::build_repair_prompt;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::attestation::{AttemptRecord, LedgerWriter, ManifestBuilder, ManifestStore};
use crate::classifier::classify_result;
use crate::fingerprint;
use crate::llm::LlmGateway;
use crate::model::{AttestationManifest, Candidate, ContextPayload, LlmRequestConfig, Mode};
use crate::sandbox::executor::{CommandPlan, Executor};
use crate::sandbox::types::{SandboxProfile, SandboxSpec};

/// Hard, non-configurable per spec.md — a config field claiming to
/// override this would itself be a defect.
pub const MAX_ATTEMPTS: u32 = 3;

/// Mirrors `BalancedConfig::default().inherit_env_allowlist` — the only
/// env surface that actually reaches a verification run today.
const ENV_ALLOWLIST: [&str; 4] = ["PATH", "HOME", "LANG", "TERM"];

pub struct Orchestrator {
    pub executor: Arc<Executor>,
    pub ledger: LedgerWriter,
    pub manifest_store: Arc<ManifestStore>,
    pub events_tx: broadcast::Sender<StateTransitionEvent>,
    /// Opened directly (outside the ledger's single-writer task) to read
    /// and record the per-repo baseline fingerprint C2 needs. WAL mode on
    /// the ledger db lets this run concurrently with the writer task.
    pub ledger_db_path: PathBuf,
}

pub struct PipelineOutcome {
    pub manifest: AttestationManifest,
    pub attempts: Vec<AttemptRecord>,
}

impl Orchestrator {
    /// One context-to-candidate-to-verification pass, no retry loop.
    /// Used by `/intercept` — a single C4 "attempt" rather than the full
    /// breaker.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_single_pass(
        &self,
        llm: &dyn LlmGateway,
        request_id: Uuid,
        prompt: &str,
        context: &ContextPayload,
        llm_config: &LlmRequestConfig,
        mode: Mode,
        spec: SandboxSpec,
        plan: CommandPlan,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let mut breaker = CircuitBreaker::new(request_id, self.events_tx.clone());
        breaker.advance(TransitionEvent::ContextReady)?;

        let repo_root = spec.filesystem.workspace_path.clone();
        let profile = spec.profile.clone();
        let fingerprint_plan = plan.clone();

        let candidate = self
            .generate_candidate(llm, prompt, context, llm_config, 1)
            .await?;
        breaker.advance(TransitionEvent::CandidateGenerated)?;

        let attempt = self
            .verify_candidate(&mut breaker, request_id, 1, &candidate, mode, spec, plan, None)
            .await?;
        let passed = attempt.verification.passed;
        breaker.advance(if passed {
            TransitionEvent::VerificationPassed
        } else {
            TransitionEvent::VerificationFailedTerminal
        })?;

        self.finish(
            &mut breaker,
            request_id,
            &repo_root,
            mode,
            &profile,
            &fingerprint_plan,
            vec![attempt],
            false,
        )
        .await
    }

    /// Full bounded retry loop — drives C4 end-to-end up to
    /// `MAX_ATTEMPTS`, repairing the candidate between retryable
    /// failures and halting on the first non-retryable one.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_with_retry(
        &self,
        llm: &dyn LlmGateway,
        request_id: Uuid,
        prompt: &str,
        context: &ContextPayload,
        llm_config: &LlmRequestConfig,
        mode: Mode,
        spec_template: impl Fn() -> SandboxSpec,
        plan_template: impl Fn() -> CommandPlan,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let mut breaker = CircuitBreaker::new(request_id, self.events_tx.clone());
        breaker.advance(TransitionEvent::ContextReady)?;

        let probe_spec = spec_template();
        let repo_root = probe_spec.filesystem.workspace_path.clone();
        let profile = probe_spec.profile.clone();

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut current_prompt = prompt.to_string();
        let mut last_plan = plan_template();

        loop {
            let attempt_no = attempts.len() as u32 + 1;
            let candidate = self
                .generate_candidate(llm, &current_prompt, context, llm_config, attempt_no)
                .await?;
            breaker.advance(TransitionEvent::CandidateGenerated)?;

            let previous_commands = attempts.last().map(|a: &AttemptRecord| a.verification.commands.as_slice());
            let plan = plan_template();
            last_plan = plan.clone();
            let record = self
                .verify_candidate(
                    &mut breaker,
                    request_id,
                    attempt_no,
                    &candidate,
                    mode,
                    spec_template(),
                    plan,
                    previous_commands,
                )
                .await?;

            let failure_class = record.failure_class;
            let passed = record.verification.passed;
            attempts.push(record);

            if passed {
                breaker.advance(TransitionEvent::VerificationPassed)?;
                break;
            }

            let retryable = failure_class.map(|c| c.is_retryable()).unwrap_or(false);
            if !retryable || attempt_no >= MAX_ATTEMPTS {
                breaker.advance(TransitionEvent::VerificationFailedTerminal)?;
                break;
            }

            breaker.advance(TransitionEvent::VerificationFailedRetryable)?;
            let last = attempts.last().unwrap();
            let stderr_tail = last
                .verification
                .commands
                .last()
                .map(|c| c.stderr_tail.as_str())
                .unwrap_or("");
            current_prompt = build_repair_prompt(&candidate, failure_class.unwrap(), stderr_tail);
        }

        self.finish(&mut breaker, request_id, &repo_root, mode, &profile, &last_plan, attempts, false)
            .await
    }

    async fn generate_candidate(
        &self,
        llm: &dyn LlmGateway,
        prompt: &str,
        context: &ContextPayload,
        llm_config: &LlmRequestConfig,
        attempt: u32,
    ) -> Result<Candidate, OrchestratorError> {
        llm.generate(prompt, context, llm_config, attempt)
            .await
            .map_err(|e| OrchestratorError::Llm(e.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_candidate(
        &self,
        breaker: &mut CircuitBreaker,
        request_id: Uuid,
        attempt: u32,
        candidate: &Candidate,
        mode: Mode,
        spec: SandboxSpec,
        plan: CommandPlan,
        previous_commands: Option<&[crate::model::ExecutedCommand]>,
    ) -> Result<AttemptRecord, OrchestratorError> {
        breaker.advance(TransitionEvent::BeginVerification)?;
        let verification = self.executor.run(request_id, attempt, mode, spec, plan).await;
        let failure_class = classify_result(&verification, previous_commands);

        Ok(AttemptRecord {
            attempt,
            verification,
            failure_class,
            candidate_digest: candidate.raw_response_digest.clone(),
        })
    }

    /// Persists the manifest and, when the request reached
    /// `VerificationPassed`, drives the breaker the rest of the way to
    /// `Completed`. A halted request stays `Halted` — there is no
    /// attestation to make for it.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        breaker: &mut CircuitBreaker,
        request_id: Uuid,
        repo_root: &str,
        mode: Mode,
        profile: &SandboxProfile,
        plan: &CommandPlan,
        attempts: Vec<AttemptRecord>,
        cancelled: bool,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let candidate_fingerprint = self.compute_fingerprint(mode, profile, plan);
        let reproducible = match attempts.last() {
            Some(last) => {
                let baseline = self.reconcile_baseline(repo_root, &candidate_fingerprint).await?;
                let expected_command_set_hash = candidate_fingerprint.command_set_hash.clone();
                fingerprint::is_reproducible(&candidate_fingerprint, &baseline, &expected_command_set_hash, last.failure_class)
            }
            None => false,
        };

        let manifest = ManifestBuilder::build(request_id, &attempts, Some(candidate_fingerprint), MAX_ATTEMPTS, cancelled);

        if !cancelled && breaker.state() == RequestState::VerificationPassed {
            breaker.advance(TransitionEvent::Attest)?;
            breaker.advance(TransitionEvent::Complete)?;
        }

        self.ledger
            .record(
                request_id,
                attempts.len() as u32,
                "verification_running",
                &format!("{:?}", manifest.final_status),
                serde_json::json!({ "tier": manifest.tier, "failure_class": manifest.failure_class }),
                reproducible,
            )
            .map_err(|e| OrchestratorError::Ledger(e.to_string()))?;

        self.manifest_store
            .put(&manifest)
            .await
            .map_err(|e| OrchestratorError::Manifest(e.to_string()))?;

        Ok(PipelineOutcome { manifest, attempts })
    }

    /// The balanced/strict backends have no container image or toolchain
    /// introspection today, so `image_digest` is a mode/profile proxy and
    /// `toolchain_versions`/`lockfile_hashes` stay empty rather than
    /// fabricated — an honest gap, not a stand-in implementation.
    fn compute_fingerprint(
        &self,
        mode: Mode,
        profile: &SandboxProfile,
        plan: &CommandPlan,
    ) -> crate::model::EnvironmentFingerprint {
        let image_digest = format!("{mode:?}/{profile:?}");
        let commands: Vec<Vec<String>> = plan.commands.iter().map(|c| c.argv.clone()).collect();
        let command_set_hash = fingerprint::command_set_hash(&commands);
        let allowlist: Vec<String> = ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect();
        let env_allowlist_hash = fingerprint::env_allowlist_hash(&allowlist);

        fingerprint::compute(&image_digest, &BTreeMap::new(), &BTreeMap::new(), &command_set_hash, &env_allowlist_hash)
    }

    /// Establishes the baseline on first sight of a repo root; otherwise
    /// returns the recorded baseline's hash wrapped so the caller's
    /// straight `fingerprint_hash` comparison is the only thing it needs.
    async fn reconcile_baseline(
        &self,
        repo_root: &str,
        candidate: &crate::model::EnvironmentFingerprint,
    ) -> Result<crate::model::EnvironmentFingerprint, OrchestratorError> {
        let db_path = self.ledger_db_path.clone();
        let repo_root = repo_root.to_string();
        let candidate = candidate.clone();

        tokio::task::spawn_blocking(move || -> Result<crate::model::EnvironmentFingerprint, OrchestratorError> {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| OrchestratorError::Ledger(e.to_string()))?;
            let existing = crate::attestation::ledger::read_baseline_fingerprint(&conn, &repo_root)
                .map_err(|e| OrchestratorError::Ledger(e.to_string()))?;

            match existing {
                Some(hash) => {
                    let mut baseline = candidate;
                    baseline.fingerprint_hash = hash;
                    Ok(baseline)
                }
                None => {
                    crate::attestation::ledger::record_baseline_fingerprint(&conn, &repo_root, &candidate.fingerprint_hash)
                        .map_err(|e| OrchestratorError::Ledger(e.to_string()))?;
                    Ok(candidate)
                }
            }
        })
        .await
        .map_err(|e| OrchestratorError::Ledger(e.to_string()))?
    }
}
