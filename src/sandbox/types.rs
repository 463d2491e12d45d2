use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ── Sandbox identity ────────────────────────────────────────────────

pub type SandboxId = String;
pub type CheckpointId = String;

// ── Backend kind ────────────────────────────────────────────────────

/// `Balanced` is rootless host-process isolation (fast, best-effort).
/// `Strict` is a hardware-virtualized microVM fronted by a VM manager API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxBackendKind {
    Balanced,
    Strict,
}

// ── Provider info ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxProviderInfo {
    pub kind: SandboxBackendKind,
    pub supports_persistent_state: bool,
    pub supports_checkpoint: bool,
    pub supports_public_http: bool,
    pub supports_sleep_resume: bool,
}

// ── Sandbox spec (input to provision) ───────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub request_id: String,
    pub profile: SandboxProfile,
    pub filesystem: FilesystemSpec,
    pub resources: ResourceHints,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub network: NetworkPolicy,
    pub lifecycle: LifecyclePolicy,
    pub labels: BTreeMap<String, String>,
}

/// Toolchain image the candidate should be verified under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxProfile {
    Rust,
    Python,
    Node,
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct FilesystemSpec {
    pub workspace_path: String,
    pub artifacts_path: String,
    pub tmp_path: String,
    pub persistent_workspace: bool,
    pub size_mb_hint: Option<u32>,
}

impl Default for FilesystemSpec {
    fn default() -> Self {
        Self {
            workspace_path: "/workspace".into(),
            artifacts_path: "/artifacts".into(),
            tmp_path: "/tmp".into(),
            persistent_workspace: false,
            size_mb_hint: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceHints {
    pub vcpu: Option<u8>,
    pub memory_mb: Option<u32>,
    pub disk_mb: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub guest_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub idle_timeout: Option<Duration>,
    pub auto_sleep: bool,
    pub ttl: Option<Duration>,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            auto_sleep: false,
            ttl: None,
        }
    }
}

// ── Network policy ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    pub mode: NetworkMode,
    pub allowed_hosts: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub allow_loopback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Disabled,
    AllowAll,
    Allowlist,
}

impl NetworkPolicy {
    /// Default-deny posture: no egress besides loopback. Every verification
    /// run is provisioned with this unless a future request class overrides it.
    pub fn default_safe() -> Self {
        Self {
            mode: NetworkMode::Disabled,
            allowed_hosts: vec![],
            blocked_hosts: vec![],
            allow_loopback: true,
        }
    }
}

// ── Capabilities (reported by handle) ───────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxCapabilities {
    pub persistent_state: bool,
    pub checkpoint: CheckpointCapability,
    pub public_http: bool,
    pub resumable_exec_sessions: bool,
    pub network_policy_enforcement: bool,
    pub host_mounts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointCapability {
    None,
    FilesystemOnly,
    FullVmBestEffort,
}

// ── Metadata / status ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxMetadata {
    pub request_id: String,
    pub created_at_unix_ms: i64,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SandboxSummary {
    pub id: SandboxId,
    pub backend: SandboxBackendKind,
    pub status: SandboxStatus,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Provisioning,
    Running,
    Sleeping,
    Stopped,
    Destroyed,
    Unknown,
}

// ── Exec model ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub tty: bool,
    pub detach: bool,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub started_at_unix_ms: i64,
    pub finished_at_unix_ms: Option<i64>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit { code: i32 },
    Status(String),
}

// ── File operations ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PutFileRequest {
    pub path: String,
    pub bytes: Vec<u8>,
    pub create_parents: bool,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GetFileRequest {
    pub path: String,
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GetFileResponse {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: String,
    pub is_dir: bool,
    pub size_bytes: Option<u64>,
}

// ── Port exposure (stub — only the strict backend implements this) ──

#[derive(Debug, Clone)]
pub struct ExposePortRequest {
    pub port: u16,
    pub protocol: PortProtocol,
    pub visibility: PortVisibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProtocol {
    Tcp,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortVisibility {
    LocalhostOnly,
    Public,
}

#[derive(Debug, Clone)]
pub struct ExposedEndpoint {
    pub port: u16,
    pub url: Option<String>,
    pub local_bind: Option<String>,
}

// ── Checkpoints (stub — only the strict backend implements this) ────

#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub name: Option<String>,
    pub include_memory_state: bool,
}

#[derive(Debug, Clone)]
pub struct CheckpointRef {
    pub id: CheckpointId,
    pub name: Option<String>,
    pub created_at_unix_ms: i64,
}

// ── Backend configs ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BalancedConfig {
    pub root_dir: PathBuf,
    pub inherit_env_allowlist: Vec<String>,
    pub default_shell: Vec<String>,
    pub read_only_host_mounts: Vec<PathBuf>,
    pub max_output_bytes: usize,
}

impl Default for BalancedConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(""), // must be set by caller
            inherit_env_allowlist: vec!["PATH".into(), "HOME".into(), "LANG".into(), "TERM".into()],
            default_shell: vec!["/bin/bash".into(), "-lc".into()],
            read_only_host_mounts: vec![],
            max_output_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrictConfig {
    /// Base URL of the VM manager API (e.g. "http://127.0.0.1:8080").
    pub api_base_url: String,
    /// Default VM tier: "nano" (1 vCPU, 512MB) or "micro" (2 vCPU, 1024MB).
    pub default_tier: String,
    pub request_timeout: Duration,
}

// ── Runtime config selector ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SandboxRuntimeConfig {
    Balanced(BalancedConfig),
    Strict(StrictConfig),
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_spec_default() {
        let fs = FilesystemSpec::default();
        assert_eq!(fs.workspace_path, "/workspace");
        assert_eq!(fs.artifacts_path, "/artifacts");
        assert_eq!(fs.tmp_path, "/tmp");
        assert!(!fs.persistent_workspace);
        assert!(fs.size_mb_hint.is_none());
    }

    #[test]
    fn resource_hints_default_is_none() {
        let r = ResourceHints::default();
        assert!(r.vcpu.is_none());
        assert!(r.memory_mb.is_none());
        assert!(r.disk_mb.is_none());
    }

    #[test]
    fn lifecycle_default_is_permissive() {
        let lp = LifecyclePolicy::default();
        assert!(lp.idle_timeout.is_none());
        assert!(!lp.auto_sleep);
        assert!(lp.ttl.is_none());
    }

    #[test]
    fn network_policy_default_safe() {
        let np = NetworkPolicy::default_safe();
        assert_eq!(np.mode, NetworkMode::Disabled);
        assert!(np.allowed_hosts.is_empty());
        assert!(np.blocked_hosts.is_empty());
        assert!(np.allow_loopback);
    }

    #[test]
    fn balanced_config_default() {
        let dc = BalancedConfig::default();
        assert!(dc.root_dir.as_os_str().is_empty());
        assert!(dc.inherit_env_allowlist.contains(&"PATH".to_string()));
        assert!(dc.inherit_env_allowlist.contains(&"HOME".to_string()));
        assert_eq!(dc.default_shell, vec!["/bin/bash", "-lc"]);
        assert_eq!(dc.max_output_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn sandbox_spec_builds_with_defaults() {
        let spec = SandboxSpec {
            request_id: "req-1".into(),
            profile: SandboxProfile::Rust,
            filesystem: FilesystemSpec::default(),
            resources: ResourceHints::default(),
            env: BTreeMap::new(),
            mounts: vec![],
            network: NetworkPolicy::default_safe(),
            lifecycle: LifecyclePolicy::default(),
            labels: BTreeMap::new(),
        };
        assert_eq!(spec.request_id, "req-1");
        assert!(matches!(spec.profile, SandboxProfile::Rust));
    }

    #[test]
    fn sandbox_spec_with_custom_profile_and_env() {
        let mut env = BTreeMap::new();
        env.insert("CARGO_TERM_COLOR".into(), "never".into());

        let spec = SandboxSpec {
            request_id: "req-42".into(),
            profile: SandboxProfile::Custom("deno".into()),
            filesystem: FilesystemSpec {
                workspace_path: "/workspace".into(),
                artifacts_path: "/artifacts".into(),
                tmp_path: "/tmp".into(),
                persistent_workspace: false,
                size_mb_hint: Some(1024),
            },
            resources: ResourceHints {
                vcpu: Some(2),
                memory_mb: Some(2048),
                disk_mb: None,
            },
            env,
            mounts: vec![MountSpec {
                host_path: "/home/user/project".into(),
                guest_path: "/workspace".into(),
                read_only: true,
            }],
            network: NetworkPolicy::default_safe(),
            lifecycle: LifecyclePolicy {
                idle_timeout: Some(Duration::from_secs(30)),
                auto_sleep: false,
                ttl: Some(Duration::from_secs(120)),
            },
            labels: BTreeMap::from([("request".into(), "req-42".into())]),
        };

        assert_eq!(spec.request_id, "req-42");
        assert!(matches!(spec.profile, SandboxProfile::Custom(ref s) if s == "deno"));
        assert_eq!(spec.filesystem.size_mb_hint, Some(1024));
        assert_eq!(spec.resources.vcpu, Some(2));
        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.mounts.len(), 1);
        assert!(spec.mounts[0].read_only);
        assert_eq!(spec.network.mode, NetworkMode::Disabled);
        assert_eq!(spec.lifecycle.ttl, Some(Duration::from_secs(120)));
        assert_eq!(spec.labels.get("request").unwrap(), "req-42");
    }

    #[test]
    fn exec_request_minimal() {
        let req = ExecRequest {
            command: vec!["echo".into(), "hello".into()],
            cwd: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout: None,
            tty: false,
            detach: false,
        };
        assert_eq!(req.command, vec!["echo", "hello"]);
        assert!(!req.tty);
        assert!(!req.detach);
    }

    #[test]
    fn exec_result_success() {
        let res = ExecResult {
            exit_code: Some(0),
            stdout: b"hello world\n".to_vec(),
            stderr: vec![],
            timed_out: false,
            started_at_unix_ms: 1700000000000,
            finished_at_unix_ms: Some(1700000001000),
            session_id: None,
        };
        assert_eq!(res.exit_code, Some(0));
        assert!(!res.timed_out);
        assert_eq!(String::from_utf8_lossy(&res.stdout), "hello world\n");
    }

    #[test]
    fn exec_result_timeout() {
        let res = ExecResult {
            exit_code: None,
            stdout: vec![],
            stderr: b"killed".to_vec(),
            timed_out: true,
            started_at_unix_ms: 1700000000000,
            finished_at_unix_ms: None,
            session_id: Some("sess-1".into()),
        };
        assert!(res.timed_out);
        assert!(res.exit_code.is_none());
        assert!(res.finished_at_unix_ms.is_none());
    }

    #[test]
    fn exec_event_variants() {
        let stdout = ExecEvent::Stdout(b"line1\n".to_vec());
        let stderr = ExecEvent::Stderr(b"warn\n".to_vec());
        let exit = ExecEvent::Exit { code: 0 };
        let status = ExecEvent::Status("running".into());

        assert!(matches!(stdout, ExecEvent::Stdout(_)));
        assert!(matches!(stderr, ExecEvent::Stderr(_)));
        assert!(matches!(exit, ExecEvent::Exit { code: 0 }));
        assert!(matches!(status, ExecEvent::Status(_)));
    }

    #[test]
    fn put_file_request_construction() {
        let req = PutFileRequest {
            path: "/workspace/run.sh".into(),
            bytes: b"#!/bin/bash\necho hi".to_vec(),
            create_parents: true,
            mode: Some(0o755),
        };
        assert_eq!(req.path, "/workspace/run.sh");
        assert!(req.create_parents);
        assert_eq!(req.mode, Some(0o755));
    }

    #[test]
    fn get_file_response_truncation() {
        let full = GetFileResponse {
            bytes: b"full content".to_vec(),
            truncated: false,
        };
        let truncated = GetFileResponse {
            bytes: b"partial...".to_vec(),
            truncated: true,
        };
        assert!(!full.truncated);
        assert!(truncated.truncated);
    }

    #[test]
    fn sandbox_status_variants() {
        let statuses = vec![
            SandboxStatus::Provisioning,
            SandboxStatus::Running,
            SandboxStatus::Sleeping,
            SandboxStatus::Stopped,
            SandboxStatus::Destroyed,
            SandboxStatus::Unknown,
        ];
        assert_eq!(statuses.len(), 6);
        assert_eq!(SandboxStatus::Running, SandboxStatus::Running);
        assert_ne!(SandboxStatus::Running, SandboxStatus::Stopped);
    }

    #[test]
    fn checkpoint_capability_variants() {
        assert_ne!(
            CheckpointCapability::None,
            CheckpointCapability::FilesystemOnly
        );
        assert_ne!(
            CheckpointCapability::FilesystemOnly,
            CheckpointCapability::FullVmBestEffort
        );
    }

    #[test]
    fn backend_kind_equality() {
        assert_eq!(SandboxBackendKind::Balanced, SandboxBackendKind::Balanced);
        assert_ne!(SandboxBackendKind::Balanced, SandboxBackendKind::Strict);
    }

    #[test]
    fn sandbox_summary_construction() {
        let summary = SandboxSummary {
            id: "sbx-abc123".into(),
            backend: SandboxBackendKind::Balanced,
            status: SandboxStatus::Running,
            request_id: "req-1".into(),
        };
        assert_eq!(summary.id, "sbx-abc123");
        assert_eq!(summary.backend, SandboxBackendKind::Balanced);
        assert_eq!(summary.status, SandboxStatus::Running);
    }

    #[test]
    fn sandbox_runtime_config_variants() {
        let balanced = SandboxRuntimeConfig::Balanced(BalancedConfig::default());
        assert!(matches!(balanced, SandboxRuntimeConfig::Balanced(_)));
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SandboxSpec>();
        assert_send_sync::<ExecRequest>();
        assert_send_sync::<ExecResult>();
        assert_send_sync::<ExecEvent>();
        assert_send_sync::<SandboxBackendKind>();
        assert_send_sync::<SandboxStatus>();
        assert_send_sync::<BalancedConfig>();
        assert_send_sync::<NetworkPolicy>();
        assert_send_sync::<SandboxRuntimeConfig>();
    }
}
