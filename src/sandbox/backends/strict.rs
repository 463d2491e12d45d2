//! Hardware-virtualized microVM backend for `mode=strict`.
//!
//! Provisioning is delegated to an external VM manager over HTTP
//! (`vm_manager::VmManagerClient`); command execution inside the VM is
//! carried over SSH, reusing `ProcessSupervisor` to run the local `ssh`
//! client the same way the balanced backend runs candidate commands
//! directly. One VM is provisioned per request and destroyed when the
//! handle is dropped via `destroy()` — no persistent VM pool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::sandbox::error::SandboxError;
use crate::sandbox::handle::{ExecStream, SandboxHandle};
use crate::sandbox::local_host::process_supervisor::ProcessSupervisor;
use crate::sandbox::provider::SandboxProvider;
use crate::sandbox::types::*;
use crate::sandbox::vm_manager::{VmCreateRequest, VmManagerClient, VmResponse};

pub struct StrictProvider {
    client: VmManagerClient,
    config: StrictConfig,
}

impl StrictProvider {
    pub fn new(config: StrictConfig) -> Self {
        let client = VmManagerClient::new(config.api_base_url.clone());
        Self { client, config }
    }

    /// Fail closed before provisioning if the manager is unreachable,
    /// rather than letting `create_vm` time out mid-request.
    pub async fn ensure_available(&self) -> Result<(), SandboxError> {
        self.client.health().await.map(|_| ())
    }
}

#[async_trait]
impl SandboxProvider for StrictProvider {
    fn info(&self) -> SandboxProviderInfo {
        SandboxProviderInfo {
            kind: SandboxBackendKind::Strict,
            supports_persistent_state: false,
            supports_checkpoint: false,
            supports_public_http: false,
            supports_sleep_resume: false,
        }
    }

    async fn provision(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let profile_name = match &spec.profile {
            SandboxProfile::Rust => "rust",
            SandboxProfile::Python => "python",
            SandboxProfile::Node => "node",
            SandboxProfile::Custom(s) => s.as_str(),
        };

        let vm = self
            .client
            .create_vm(&VmCreateRequest {
                tier: self.config.default_tier.clone(),
                profile: profile_name.to_string(),
            })
            .await?;

        tracing::info!(
            vm_id = vm.vm_id,
            request_id = %spec.request_id,
            guest_ip = %vm.guest_ip,
            "strict sandbox provisioned"
        );

        Ok(Box::new(StrictHandle {
            vm,
            client: self.client.clone(),
            request_timeout: self.config.request_timeout,
            metadata: SandboxMetadata {
                request_id: spec.request_id,
                created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
                labels: spec.labels,
            },
            destroyed: RwLock::new(false),
        }))
    }

    async fn attach(&self, id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let vm_id: u32 = id
            .parse()
            .map_err(|_| SandboxError::NotFound(format!("invalid VM id: {id}")))?;
        let vm = self.client.get_vm(vm_id).await?;

        Ok(Box::new(StrictHandle {
            vm,
            client: self.client.clone(),
            request_timeout: self.config.request_timeout,
            metadata: SandboxMetadata {
                request_id: id.to_string(),
                created_at_unix_ms: chrono::Utc::now().timestamp_millis(),
                labels: BTreeMap::new(),
            },
            destroyed: RwLock::new(false),
        }))
    }

    async fn list(&self) -> Result<Vec<SandboxSummary>, SandboxError> {
        let list = self.client.list_vms().await?;
        Ok(list
            .vms
            .values()
            .map(|vm| SandboxSummary {
                id: vm.vm_id.to_string(),
                backend: SandboxBackendKind::Strict,
                status: SandboxStatus::Running,
                request_id: vm.vm_id.to_string(),
            })
            .collect())
    }
}

struct StrictHandle {
    vm: VmResponse,
    client: VmManagerClient,
    request_timeout: Duration,
    metadata: SandboxMetadata,
    destroyed: RwLock<bool>,
}

impl StrictHandle {
    fn ssh_supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new(vec!["PATH".into()], 16 * 1024 * 1024)
    }

    /// Wrap a guest command in an `ssh` invocation against this VM.
    fn wrap_ssh(&self, req: &ExecRequest) -> ExecRequest {
        let mut ssh_args = vec![
            "ssh".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.vm.ssh_port.to_string(),
            format!("root@{}", self.vm.guest_ip),
            "--".to_string(),
        ];
        if let Some(cwd) = &req.cwd {
            ssh_args.push(format!("cd {cwd} &&"));
        }
        ssh_args.extend(req.command.iter().cloned());

        ExecRequest {
            command: ssh_args,
            cwd: None,
            env: BTreeMap::new(),
            stdin: req.stdin.clone(),
            timeout: Some(req.timeout.unwrap_or(self.request_timeout)),
            tty: false,
            detach: false,
        }
    }
}

#[async_trait]
impl SandboxHandle for StrictHandle {
    fn id(&self) -> &str {
        &self.metadata.request_id
    }

    fn backend_kind(&self) -> SandboxBackendKind {
        SandboxBackendKind::Strict
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            persistent_state: false,
            checkpoint: CheckpointCapability::None,
            public_http: false,
            resumable_exec_sessions: false,
            network_policy_enforcement: true,
            host_mounts: false,
        }
    }

    fn metadata(&self) -> &SandboxMetadata {
        &self.metadata
    }

    async fn exec(&self, req: ExecRequest) -> Result<ExecResult, SandboxError> {
        let wrapped = self.wrap_ssh(&req);
        self.ssh_supervisor().exec(&wrapped, &PathBuf::from(".")).await
    }

    async fn exec_stream(
        &self,
        req: ExecRequest,
    ) -> Result<Box<dyn ExecStream + Send + Unpin>, SandboxError> {
        let wrapped = self.wrap_ssh(&req);
        let stream = self
            .ssh_supervisor()
            .exec_stream(&wrapped, &PathBuf::from("."))
            .await?;
        Ok(Box::new(stream))
    }

    async fn put_file(&self, _req: PutFileRequest) -> Result<(), SandboxError> {
        Err(SandboxError::Unsupported("put_file (use exec with a heredoc)"))
    }

    async fn get_file(&self, _req: GetFileRequest) -> Result<GetFileResponse, SandboxError> {
        Err(SandboxError::Unsupported("get_file (use exec with cat)"))
    }

    async fn read_dir(&self, _path: &str) -> Result<Vec<DirEntry>, SandboxError> {
        Err(SandboxError::Unsupported("read_dir"))
    }

    async fn remove_path(&self, _path: &str, _recursive: bool) -> Result<(), SandboxError> {
        Err(SandboxError::Unsupported("remove_path"))
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
        let mut destroyed = self.destroyed.write().await;
        if *destroyed {
            return Ok(());
        }
        tracing::info!(vm_id = self.vm.vm_id, "destroying strict sandbox");
        self.client.delete_vm(self.vm.vm_id).await?;
        *destroyed = true;
        Ok(())
    }
}
