//! Shared domain types threaded through every component. Kept as one leaf
//! module (mirroring `sandbox::types`) so C1-C6 agree on one vocabulary
//! instead of each defining its own request/response shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sandbox::types::SandboxProfile;

/// Verification rigor requested for a given intercept/orchestrate call.
/// `Fast` reuses the balanced backend with a reduced command plan
/// (parse/lint only); `Balanced` runs the full plan on the balanced
/// backend; `Strict` requires the microVM backend and fails closed if
/// unavailable rather than silently downgrading to balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Fast,
    Balanced,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Nvidia,
    Custom,
}

/// Inbound request to `/intercept` or `/orchestrate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: Uuid,
    pub prompt: String,
    pub repo_root: String,
    pub profile: SandboxProfileWire,
    pub mode: Mode,
    pub llm_provider: LlmProvider,
    #[serde(default)]
    pub llm_config: LlmRequestConfig,
}

/// Wire-safe mirror of `SandboxProfile` (serde-friendly, no borrow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxProfileWire {
    Rust,
    Python,
    Node,
    Custom(String),
}

impl From<SandboxProfileWire> for SandboxProfile {
    fn from(value: SandboxProfileWire) -> Self {
        match value {
            SandboxProfileWire::Rust => SandboxProfile::Rust,
            SandboxProfileWire::Python => SandboxProfile::Python,
            SandboxProfileWire::Node => SandboxProfile::Node,
            SandboxProfileWire::Custom(s) => SandboxProfile::Custom(s),
        }
    }
}

/// Per-request LLM gateway overrides. Resource limits are never
/// overridable here — only connection/model parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequestConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Local context assembled before the first LLM call. The AST slicer and
/// secret scanner that populate `code_context`/`redaction` are out of
/// scope here; this struct is the interface they're consumed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPayload {
    pub request_id: Uuid,
    pub code_context: Vec<CodeSlice>,
    pub redaction: RedactionReport,
    pub repo_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSlice {
    pub path: String,
    pub content: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionReport {
    pub redacted_spans: u32,
    pub findings: Vec<String>,
}

/// A candidate produced by the LLM gateway for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub request_id: Uuid,
    pub attempt: u32,
    pub files: Vec<CandidateFile>,
    pub raw_response_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFile {
    pub path: String,
    pub content: String,
}

/// Output of one sandbox run for one attempt, produced entirely by C1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub request_id: Uuid,
    pub attempt: u32,
    pub passed: bool,
    pub commands: Vec<ExecutedCommand>,
    pub skipped_checks: Vec<SkippedCheck>,
    pub duration_ms: u64,
    /// Set when the run could not be completed due to an internal sandbox
    /// fault (not a candidate defect). The classifier treats this as
    /// `FailureClass::Deterministic` unless the message matches a more
    /// specific rule.
    pub internal_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedCommand {
    pub stage: Stage,
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub duration_ms: u64,
    pub authored_by: TestAuthor,
    /// Path under `{data_dir}/artifacts/{request_id}/{attempt}/` holding
    /// the full, untruncated stdout+stderr for this command, if written.
    pub artifact_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Lint,
    TypeCheck,
    UnitTest,
    IntegrationTest,
    AiTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestAuthor {
    Human,
    Ai,
    /// Not a test stage (Parse/Lint/TypeCheck).
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCheck {
    pub stage: Stage,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BudgetExhausted,
    PriorStageFailed,
    NotApplicableForProfile,
}

/// C2's determinism fingerprint for one execution environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub fingerprint_hash: String,
    pub image_digest: String,
    pub toolchain_versions: BTreeMap<String, String>,
    pub lockfile_hashes: BTreeMap<String, String>,
    pub command_set_hash: String,
    pub env_allowlist_hash: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Syntax,
    Policy,
    Timeout,
    Flake,
    Deterministic,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Syntax | FailureClass::Deterministic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    L0,
    L1,
    L2,
    AiTestsOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Verified,
    Halted,
    Cancelled,
}

/// Why a request stopped advancing, when that reason is more specific than
/// `final_status` alone. Absent on a clean `Verified` outcome or on a halt
/// that never exhausted the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalEvent {
    MaxRetriesExceeded,
    StrictModeUnavailable,
    StrictModeRequired,
}

/// The tamper-evident record returned to the caller and persisted in the
/// manifest store. Only `ManifestBuilder` constructs one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationManifest {
    pub request_id: Uuid,
    pub schema_version: u16,
    pub final_status: FinalStatus,
    pub attempts: u32,
    pub retry_count: u32,
    pub tier: Option<Tier>,
    pub human_review_required: bool,
    pub fingerprint: Option<EnvironmentFingerprint>,
    pub candidate_digest: Option<String>,
    /// The terminal attempt's full command log — P1's "backing passing
    /// command" and every other tier/outcome claim must trace back here.
    pub commands: Vec<ExecutedCommand>,
    pub skipped_checks: Vec<SkippedCheck>,
    pub failure_class: Option<FailureClass>,
    pub terminal_event: Option<TerminalEvent>,
    /// Paths under the artifacts root for every command that wrote one,
    /// carried at the top level so a caller doesn't have to walk `commands`.
    pub artifact_refs: Vec<String>,
    pub manifest_digest: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventClass {
    /// Always written, regardless of reproducibility.
    Telemetry,
    /// Only written when the run was judged reproducible — feeds future
    /// ranking/decay, which is out of scope here.
    Behavioral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub request_id: Uuid,
    pub attempt: u32,
    pub class: LedgerEventClass,
    pub from_state: String,
    pub to_state: String,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

pub const SCHEMA_VERSION: u16 = 1;
