use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::sandbox::error::SandboxError;
use crate::sandbox::handle::{ExecStream, SandboxHandle};
use crate::sandbox::local_host::fs_jail::FsJail;
use crate::sandbox::local_host::process_supervisor::ProcessSupervisor;
use crate::sandbox::provider::SandboxProvider;
use crate::sandbox::types::*;

/// Rootless host-process isolation provider for `mode=balanced` (and
/// `mode=fast`, which reuses this backend with a shorter command plan).
///
/// Each sandbox gets its own workspace directory under `config.root_dir`.
/// Processes run as the current user with a filtered env and no network
/// namespace of their own — this is process containment, not a hardware
/// isolation boundary. Requests that need that guarantee must use
/// `mode=strict`.
pub struct BalancedProvider {
    config: BalancedConfig,
    counter: AtomicU64,
}

impl BalancedProvider {
    pub fn new(config: BalancedConfig) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&config.root_dir).map_err(|e| {
            SandboxError::Provision(format!(
                "failed to create sandboxes root {}: {e}",
                config.root_dir.display()
            ))
        })?;
        Ok(Self {
            config,
            counter: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl SandboxProvider for BalancedProvider {
    fn info(&self) -> SandboxProviderInfo {
        SandboxProviderInfo {
            kind: SandboxBackendKind::Balanced,
            supports_persistent_state: true,
            supports_checkpoint: false,
            supports_public_http: false,
            supports_sleep_resume: false,
        }
    }

    async fn provision(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        validate_profile(&spec.request_id, &spec.profile);

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let sandbox_id = format!("balanced-{}-{seq}", spec.request_id);
        let workspace_dir = self.config.root_dir.join(&spec.request_id);

        tracing::info!(
            sandbox_id = %sandbox_id,
            request_id = %spec.request_id,
            workspace_dir = %workspace_dir.display(),
            "provisioning balanced sandbox"
        );

        let jail = FsJail::create(workspace_dir)?;
        let supervisor = ProcessSupervisor::new(
            self.config.inherit_env_allowlist.clone(),
            self.config.max_output_bytes,
        );

        let metadata = SandboxMetadata {
            request_id: spec.request_id.clone(),
            created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
            labels: spec.labels.clone(),
        };

        tracing::info!(sandbox_id = %sandbox_id, "balanced sandbox provisioned");

        Ok(Box::new(BalancedHandle {
            id: sandbox_id,
            jail: Arc::new(jail),
            supervisor: Arc::new(supervisor),
            metadata,
            env: spec.env,
        }))
    }

    async fn attach(&self, id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        // "balanced-{request_id}-{seq}"
        let request_id = id
            .strip_prefix("balanced-")
            .and_then(|rest| rest.rsplit_once('-').map(|(rid, _)| rid))
            .ok_or_else(|| SandboxError::NotFound(format!("cannot parse sandbox id: {id}")))?;

        let workspace_dir = self.config.root_dir.join(request_id);
        let jail = FsJail::attach(workspace_dir)?;
        let supervisor = ProcessSupervisor::new(
            self.config.inherit_env_allowlist.clone(),
            self.config.max_output_bytes,
        );

        let metadata = SandboxMetadata {
            request_id: request_id.to_string(),
            created_at_unix_ms: 0, // unknown for attached
            labels: BTreeMap::new(),
        };

        Ok(Box::new(BalancedHandle {
            id: id.to_string(),
            jail: Arc::new(jail),
            supervisor: Arc::new(supervisor),
            metadata,
            env: BTreeMap::new(),
        }))
    }

    async fn list(&self) -> Result<Vec<SandboxSummary>, SandboxError> {
        let mut summaries = Vec::new();
        if self.config.root_dir.exists() {
            for entry in std::fs::read_dir(&self.config.root_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    summaries.push(SandboxSummary {
                        id: format!("balanced-{name}-0"),
                        backend: SandboxBackendKind::Balanced,
                        status: SandboxStatus::Running,
                        request_id: name,
                    });
                }
            }
        }
        Ok(summaries)
    }
}

struct BalancedHandle {
    id: String,
    jail: Arc<FsJail>,
    supervisor: Arc<ProcessSupervisor>,
    metadata: SandboxMetadata,
    /// Per-sandbox env vars (from SandboxSpec.env).
    env: BTreeMap<String, String>,
}

#[async_trait]
impl SandboxHandle for BalancedHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn backend_kind(&self) -> SandboxBackendKind {
        SandboxBackendKind::Balanced
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            persistent_state: true,
            checkpoint: CheckpointCapability::None,
            public_http: false,
            resumable_exec_sessions: false,
            network_policy_enforcement: false,
            host_mounts: true,
        }
    }

    fn metadata(&self) -> &SandboxMetadata {
        &self.metadata
    }

    async fn exec(&self, mut req: ExecRequest) -> Result<ExecResult, SandboxError> {
        tracing::debug!(
            sandbox_id = %self.id,
            command = ?req.command,
            "executing command in balanced sandbox"
        );
        for (k, v) in &self.env {
            req.env.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.supervisor.exec(&req, self.jail.root()).await
    }

    async fn exec_stream(
        &self,
        mut req: ExecRequest,
    ) -> Result<Box<dyn ExecStream + Send + Unpin>, SandboxError> {
        for (k, v) in &self.env {
            req.env.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let stream = self.supervisor.exec_stream(&req, self.jail.root()).await?;
        Ok(Box::new(stream))
    }

    async fn put_file(&self, req: PutFileRequest) -> Result<(), SandboxError> {
        self.jail.put_file(&req)
    }

    async fn get_file(&self, req: GetFileRequest) -> Result<GetFileResponse, SandboxError> {
        self.jail.get_file(&req)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, SandboxError> {
        self.jail.read_dir(path)
    }

    async fn remove_path(&self, path: &str, recursive: bool) -> Result<(), SandboxError> {
        self.jail.remove_path(path, recursive)
    }

    async fn expose_port(&self, _req: ExposePortRequest) -> Result<ExposedEndpoint, SandboxError> {
        Err(SandboxError::Unsupported("expose_port"))
    }

    async fn unexpose_port(&self, _port: u16) -> Result<(), SandboxError> {
        Err(SandboxError::Unsupported("unexpose_port"))
    }

    async fn checkpoint(
        &self,
        _req: CheckpointRequest,
    ) -> Result<Option<CheckpointRef>, SandboxError> {
        Err(SandboxError::Unsupported("checkpoint"))
    }

    async fn restore(&self, _checkpoint_id: &str) -> Result<(), SandboxError> {
        Err(SandboxError::Unsupported("restore"))
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SandboxError> {
        tracing::info!(sandbox_id = %self.id, "destroying balanced sandbox");
        self.jail.destroy()
    }
}

/// Best-effort toolchain check: warn if the profile's interpreter/compiler
/// is missing from PATH. Does not block provisioning — a missing toolchain
/// surfaces as a command-not-found exec failure, which `classify_result`
/// (C5) reads as a `Deterministic` failure, not a sandbox fault, since the
/// candidate itself never ran.
fn validate_profile(request_id: &str, profile: &SandboxProfile) {
    let bins_to_check: &[&str] = match profile {
        SandboxProfile::Rust => &["rustc", "cargo"],
        SandboxProfile::Python => &["python3"],
        SandboxProfile::Node => &["node"],
        SandboxProfile::Custom(_) => &[],
    };

    for bin in bins_to_check {
        if which(bin).is_none() {
            tracing::warn!(
                request_id = %request_id,
                binary = bin,
                "sandbox profile requires '{bin}' but it was not found on PATH"
            );
        }
    }
}

fn which(bin: &str) -> Option<std::path::PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let full = dir.join(bin);
            if full.is_file() { Some(full) } else { None }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_provider() -> (tempfile::TempDir, BalancedProvider) {
        let tmp = tempfile::tempdir().unwrap();
        let config = BalancedConfig {
            root_dir: tmp.path().join("sandboxes"),
            ..BalancedConfig::default()
        };
        let provider = BalancedProvider::new(config).unwrap();
        (tmp, provider)
    }

    fn base_spec(request_id: &str) -> SandboxSpec {
        SandboxSpec {
            request_id: request_id.into(),
            profile: SandboxProfile::Rust,
            filesystem: FilesystemSpec::default(),
            resources: ResourceHints::default(),
            env: BTreeMap::new(),
            mounts: vec![],
            network: NetworkPolicy::default_safe(),
            lifecycle: LifecyclePolicy::default(),
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn provision_and_exec() {
        let (_tmp, provider) = test_provider().await;
        let handle = provider.provision(base_spec("test-req")).await.unwrap();

        assert!(handle.id().starts_with("balanced-"));
        assert_eq!(handle.backend_kind(), SandboxBackendKind::Balanced);

        let result = handle
            .exec(ExecRequest {
                command: vec!["echo".into(), "from sandbox".into()],
                cwd: None,
                env: BTreeMap::new(),
                stdin: None,
                timeout: Some(std::time::Duration::from_secs(5)),
                tty: false,
                detach: false,
            })
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(0));
        assert_eq!(
            String::from_utf8_lossy(&result.stdout).trim(),
            "from sandbox"
        );
    }

    #[tokio::test]
    async fn provision_put_get_file() {
        let (_tmp, provider) = test_provider().await;
        let handle = provider.provision(base_spec("files-req")).await.unwrap();

        handle
            .put_file(PutFileRequest {
                path: "/test.txt".into(),
                bytes: b"sandbox file".to_vec(),
                create_parents: false,
                mode: None,
            })
            .await
            .unwrap();

        let resp = handle
            .get_file(GetFileRequest {
                path: "/test.txt".into(),
                max_bytes: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.bytes, b"sandbox file");
    }

    #[tokio::test]
    async fn provision_with_env() {
        let (_tmp, provider) = test_provider().await;
        let mut env = BTreeMap::new();
        env.insert("CANDIDATE_MODE".into(), "verify".into());

        let mut spec = base_spec("env-req");
        spec.env = env;

        let handle = provider.provision(spec).await.unwrap();
        let result = handle
            .exec(ExecRequest {
                command: vec!["bash".into(), "-c".into(), "echo $CANDIDATE_MODE".into()],
                cwd: None,
                env: BTreeMap::new(),
                stdin: None,
                timeout: Some(std::time::Duration::from_secs(5)),
                tty: false,
                detach: false,
            })
            .await
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "verify");
    }

    #[tokio::test]
    async fn unsupported_operations() {
        let (_tmp, provider) = test_provider().await;
        let handle = provider.provision(base_spec("unsup-req")).await.unwrap();

        assert!(matches!(
            handle
                .expose_port(ExposePortRequest {
                    port: 8080,
                    protocol: PortProtocol::Http,
                    visibility: PortVisibility::Public,
                })
                .await,
            Err(SandboxError::Unsupported("expose_port"))
        ));

        assert!(matches!(
            handle
                .checkpoint(CheckpointRequest {
                    name: None,
                    include_memory_state: false,
                })
                .await,
            Err(SandboxError::Unsupported("checkpoint"))
        ));

        assert!(matches!(
            handle.restore("cp-1").await,
            Err(SandboxError::Unsupported("restore"))
        ));
    }

    #[tokio::test]
    async fn destroy_removes_workspace() {
        let (_tmp, provider) = test_provider().await;
        let handle = provider.provision(base_spec("destroy-req")).await.unwrap();

        handle
            .put_file(PutFileRequest {
                path: "/file.txt".into(),
                bytes: b"data".to_vec(),
                create_parents: false,
                mode: None,
            })
            .await
            .unwrap();

        handle.destroy().await.unwrap();

        let list = provider.list().await.unwrap();
        assert!(!list.iter().any(|s| s.request_id == "destroy-req"));
    }

    #[tokio::test]
    async fn list_sandboxes() {
        let (_tmp, provider) = test_provider().await;
        provider.provision(base_spec("req-a")).await.unwrap();
        provider.provision(base_spec("req-b")).await.unwrap();

        let list = provider.list().await.unwrap();
        assert_eq!(list.len(), 2);
        let ids: Vec<_> = list.iter().map(|s| s.request_id.as_str()).collect();
        assert!(ids.contains(&"req-a"));
        assert!(ids.contains(&"req-b"));
    }

    #[tokio::test]
    async fn provider_info() {
        let (_tmp, provider) = test_provider().await;
        let info = provider.info();
        assert_eq!(info.kind, SandboxBackendKind::Balanced);
        assert!(info.supports_persistent_state);
        assert!(!info.supports_checkpoint);
        assert!(!info.supports_public_http);
    }

    #[tokio::test]
    async fn capabilities() {
        let (_tmp, provider) = test_provider().await;
        let handle = provider.provision(base_spec("cap-req")).await.unwrap();
        let caps = handle.capabilities();
        assert!(caps.persistent_state);
        assert_eq!(caps.checkpoint, CheckpointCapability::None);
        assert!(!caps.public_http);
        assert!(caps.host_mounts);
    }
}
