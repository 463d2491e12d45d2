use async_trait::async_trait;

use super::error::SandboxError;
use super::handle::SandboxHandle;
use super::types::{SandboxProviderInfo, SandboxSpec, SandboxSummary};

/// C3's factory for the two verification backends (`mode=balanced` /
/// `mode=fast` vs `mode=strict`). `Executor` picks one per request via
/// `provider_for`; it never holds a handle across requests, so `attach`
/// and `list` exist for operational recovery, not the verification path.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Backend kind and capability flags, used to pick a provider for a
    /// request's mode and to annotate the resulting manifest's fingerprint.
    fn info(&self) -> SandboxProviderInfo;

    /// Provision a sandbox and run one attempt's command plan inside it.
    async fn provision(&self, spec: SandboxSpec) -> Result<Box<dyn SandboxHandle>, SandboxError>;

    /// Re-attach to a sandbox left running by a prior process (recovery
    /// after a crash or redeploy, not part of the request-time path).
    async fn attach(&self, id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError>;

    /// Active/known sandboxes for this provider, for operational cleanup.
    async fn list(&self) -> Result<Vec<SandboxSummary>, SandboxError>;
}
