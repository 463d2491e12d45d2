//! HTTP client for the microVM manager backing `mode=strict`.
//!
//! The manager runs on a host with hardware virtualization and handles all
//! Firecracker lifecycle: process management, rootfs provisioning,
//! networking. This client only creates/inspects/destroys VMs; command
//! execution inside a provisioned VM goes over SSH (see `backends::strict`).
//!
//! API: POST /vms, GET /vms, GET /vms/{id}, DELETE /vms/{id}, GET /health

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sandbox::error::SandboxError;

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct VmCreateRequest {
    pub tier: String,
    pub profile: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VmResponse {
    pub vm_id: u32,
    pub tier: String,
    pub guest_ip: String,
    pub ssh_port: u16,
    pub pid: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmListResponse {
    pub vms: HashMap<String, VmResponse>,
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_vms: u32,
    pub max_vms: u32,
}

// ── Client ──────────────────────────────────────────────────────────

/// HTTP client for the microVM manager's REST API.
#[derive(Debug, Clone)]
pub struct VmManagerClient {
    base_url: String,
    client: reqwest::Client,
}

impl VmManagerClient {
    pub fn new(base_url: String) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Check manager health. Called before provisioning so a `strict`
    /// request can fail closed with `StrictModeUnavailable` instead of
    /// hanging on an unreachable host.
    pub async fn health(&self) -> Result<HealthResponse, SandboxError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("VM manager health check failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Backend(format!(
                "VM manager health check returned {status}: {body}"
            )));
        }

        resp.json::<HealthResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse health response: {e}")))
    }

    pub async fn create_vm(&self, req: &VmCreateRequest) -> Result<VmResponse, SandboxError> {
        let url = format!("{}/vms", self.base_url);

        tracing::info!(tier = %req.tier, profile = %req.profile, "creating VM via manager");

        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| SandboxError::Provision(format!("VM manager create failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provision(format!(
                "VM manager create returned {status}: {body}"
            )));
        }

        let vm = resp
            .json::<VmResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse VM response: {e}")))?;

        tracing::info!(vm_id = vm.vm_id, tier = %vm.tier, ssh_port = vm.ssh_port, "VM created");

        Ok(vm)
    }

    pub async fn get_vm(&self, vm_id: u32) -> Result<VmResponse, SandboxError> {
        let url = format!("{}/vms/{}", self.base_url, vm_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("VM manager get_vm failed: {e}")))?;

        if resp.status().as_u16() == 404 {
            return Err(SandboxError::NotFound(format!("VM {vm_id} not found")));
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Backend(format!(
                "VM manager get_vm returned {status}: {body}"
            )));
        }

        resp.json::<VmResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse VM response: {e}")))
    }

    pub async fn list_vms(&self) -> Result<VmListResponse, SandboxError> {
        let url = format!("{}/vms", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("VM manager list failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Backend(format!(
                "VM manager list returned {status}: {body}"
            )));
        }

        resp.json::<VmListResponse>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse VM list response: {e}")))
    }

    pub async fn delete_vm(&self, vm_id: u32) -> Result<(), SandboxError> {
        let url = format!("{}/vms/{}", self.base_url, vm_id);

        tracing::info!(vm_id = vm_id, "deleting VM via manager");

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| SandboxError::Backend(format!("VM manager delete failed: {e}")))?;

        if resp.status().as_u16() == 404 {
            tracing::warn!(vm_id = vm_id, "VM already deleted");
            return Ok(());
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Backend(format!(
                "VM manager delete returned {status}: {body}"
            )));
        }

        tracing::info!(vm_id = vm_id, "VM deleted");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
