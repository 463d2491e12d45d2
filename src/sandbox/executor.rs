//! Ordered command plan execution. `Executor::run` is C1's sole entry
//! point: given a provisioned sandbox spec and a plan, it provisions,
//! runs each stage in order, halts on first failure, and always returns
//! a `VerificationResult` — internal sandbox faults are captured rather
//! than propagated, since a broken sandbox is not a candidate defect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::model::{
    ExecutedCommand, SkippedCheck, TestAuthor, VerificationResult,
};
pub use crate::model::{SkipReason, Stage};
use crate::sandbox::error::SandboxError;
use crate::sandbox::provider::SandboxProvider;
use crate::sandbox::types::{ExecRequest, SandboxSpec};

/// One command belonging to a stage. `UnitTest`/`IntegrationTest`/`AiTest`
/// carry `authored_by` so the ledger can tell a human-written regression
/// test apart from one the model generated for itself.
#[derive(Debug, Clone)]
pub struct PlannedCommand {
    pub stage: Stage,
    pub argv: Vec<String>,
    pub authored_by: TestAuthor,
    pub timeout: Duration,
}

impl PlannedCommand {
    pub fn new(stage: Stage, argv: Vec<&str>, authored_by: TestAuthor, timeout: Duration) -> Self {
        Self {
            stage,
            argv: argv.into_iter().map(str::to_string).collect(),
            authored_by,
            timeout,
        }
    }
}

/// Ordered set of stages to run for one attempt. Stages always execute
/// in declaration order: `Parse`, `Lint`, `TypeCheck`, `UnitTest`,
/// `IntegrationTest`, `AiTest`.
#[derive(Debug, Clone, Default)]
pub struct CommandPlan {
    pub commands: Vec<PlannedCommand>,
}

impl CommandPlan {
    pub fn new(commands: Vec<PlannedCommand>) -> Self {
        Self { commands }
    }

    /// The `fast` plan: parse and lint only, no test execution. Used when
    /// `Mode::Fast` is requested and reuses the balanced backend.
    pub fn fast_rust() -> Self {
        Self::new(vec![
            PlannedCommand::new(
                Stage::Parse,
                vec!["cargo", "check", "--message-format=short"],
                TestAuthor::NotApplicable,
                Duration::from_secs(30),
            ),
            PlannedCommand::new(
                Stage::Lint,
                vec!["cargo", "clippy", "--message-format=short"],
                TestAuthor::NotApplicable,
                Duration::from_secs(60),
            ),
        ])
    }

    /// The full plan: every stage, human unit/integration tests first so
    /// a human regression failure halts before the (slower, flakier)
    /// AI-authored test stage runs at all.
    pub fn full_rust() -> Self {
        Self::new(vec![
            PlannedCommand::new(
                Stage::Parse,
                vec!["cargo", "check", "--message-format=short"],
                TestAuthor::NotApplicable,
                Duration::from_secs(30),
            ),
            PlannedCommand::new(
                Stage::Lint,
                vec!["cargo", "clippy", "--message-format=short"],
                TestAuthor::NotApplicable,
                Duration::from_secs(60),
            ),
            PlannedCommand::new(
                Stage::TypeCheck,
                vec!["cargo", "check", "--all-targets"],
                TestAuthor::NotApplicable,
                Duration::from_secs(60),
            ),
            PlannedCommand::new(
                Stage::UnitTest,
                vec!["cargo", "test", "--lib"],
                TestAuthor::Human,
                Duration::from_secs(120),
            ),
            PlannedCommand::new(
                Stage::IntegrationTest,
                vec!["cargo", "test", "--test", "*"],
                TestAuthor::Human,
                Duration::from_secs(180),
            ),
            PlannedCommand::new(
                Stage::AiTest,
                vec!["cargo", "test", "--test", "ai_generated"],
                TestAuthor::Ai,
                Duration::from_secs(120),
            ),
        ])
    }
}

const STDOUT_TAIL_BYTES: usize = 4096;

pub struct Executor {
    balanced: Arc<dyn SandboxProvider>,
    strict: Option<Arc<dyn SandboxProvider>>,
    artifacts_root: PathBuf,
}

impl Executor {
    pub fn new(
        balanced: Arc<dyn SandboxProvider>,
        strict: Option<Arc<dyn SandboxProvider>>,
        artifacts_root: PathBuf,
    ) -> Self {
        Self {
            balanced,
            strict,
            artifacts_root,
        }
    }

    fn provider_for(&self, mode: crate::model::Mode) -> Result<&Arc<dyn SandboxProvider>, SandboxError> {
        match mode {
            crate::model::Mode::Fast | crate::model::Mode::Balanced => Ok(&self.balanced),
            crate::model::Mode::Strict => self
                .strict
                .as_ref()
                .ok_or(SandboxError::Unsupported("strict backend not configured")),
        }
    }

    pub async fn run(
        &self,
        request_id: Uuid,
        attempt: u32,
        mode: crate::model::Mode,
        spec: SandboxSpec,
        plan: CommandPlan,
    ) -> VerificationResult {
        let started = Instant::now();
        let provider = match self.provider_for(mode) {
            Ok(p) => p,
            Err(e) => return self.fault(request_id, attempt, started, e.to_string()),
        };

        let handle = match provider.provision(spec).await {
            Ok(h) => h,
            Err(e) => return self.fault(request_id, attempt, started, e.to_string()),
        };

        let mut commands = Vec::with_capacity(plan.commands.len());
        let mut skipped = Vec::new();
        let mut halted = false;

        for planned in &plan.commands {
            if halted {
                skipped.push(SkippedCheck {
                    stage: planned.stage,
                    reason: SkipReason::PriorStageFailed,
                });
                continue;
            }

            let req = ExecRequest {
                command: planned.argv.clone(),
                cwd: None,
                env: Default::default(),
                stdin: None,
                timeout: Some(planned.timeout),
                tty: false,
                detach: false,
            };

            let run_started = Instant::now();
            let exec_result = handle.exec(req).await;
            let duration_ms = run_started.elapsed().as_millis() as u64;

            match exec_result {
                Ok(result) => {
                    let passed = result.exit_code == Some(0) && !result.timed_out;
                    let artifact_path = self
                        .write_artifact(request_id, attempt, planned.stage, &result.stdout, &result.stderr)
                        .await;

                    commands.push(ExecutedCommand {
                        stage: planned.stage,
                        argv: planned.argv.clone(),
                        exit_code: result.exit_code,
                        stdout_tail: tail(&result.stdout),
                        stderr_tail: tail(&result.stderr),
                        duration_ms,
                        authored_by: planned.authored_by,
                        artifact_path,
                    });

                    if !passed {
                        halted = true;
                    }
                }
                Err(e) => {
                    let _ = handle.destroy().await;
                    return self.fault(request_id, attempt, started, e.to_string());
                }
            }
        }

        if let Err(e) = handle.destroy().await {
            tracing::warn!(request_id = %request_id, error = %e, "sandbox teardown failed");
        }

        VerificationResult {
            request_id,
            attempt,
            passed: !halted && !commands.is_empty(),
            commands,
            skipped_checks: skipped,
            duration_ms: started.elapsed().as_millis() as u64,
            internal_error: None,
        }
    }

    fn fault(
        &self,
        request_id: Uuid,
        attempt: u32,
        started: Instant,
        message: String,
    ) -> VerificationResult {
        VerificationResult {
            request_id,
            attempt,
            passed: false,
            commands: vec![],
            skipped_checks: vec![],
            duration_ms: started.elapsed().as_millis() as u64,
            internal_error: Some(message),
        }
    }

    async fn write_artifact(
        &self,
        request_id: Uuid,
        attempt: u32,
        stage: Stage,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Option<String> {
        let dir = self
            .artifacts_root
            .join(request_id.to_string())
            .join(attempt.to_string());
        if tokio::fs::create_dir_all(&dir).await.is_err() {
            return None;
        }
        let path = dir.join(format!("{stage:?}.log")).to_string_lossy().to_string();
        let mut file = tokio::fs::File::create(&path).await.ok()?;
        file.write_all(b"-- stdout --\n").await.ok()?;
        file.write_all(stdout).await.ok()?;
        file.write_all(b"\n-- stderr --\n").await.ok()?;
        file.write_all(stderr).await.ok()?;
        Some(path)
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDOUT_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).to_string()
}
