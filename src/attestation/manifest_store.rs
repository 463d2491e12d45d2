//! File-backed, content-addressable-by-`request_id` manifest store.
//! Writes go through a temp file then `rename`, the same atomic-publish
//! pattern the teacher uses for `sessions.yaml`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::model::AttestationManifest;

#[derive(Debug, Error)]
pub enum ManifestStoreError {
    #[error("manifest for {0} not found")]
    NotFound(Uuid),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, request_id: Uuid) -> PathBuf {
        self.root.join(format!("{request_id}.json"))
    }

    pub async fn put(&self, manifest: &AttestationManifest) -> Result<(), ManifestStoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(manifest.request_id);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(manifest)?;
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn get(&self, request_id: Uuid) -> Result<AttestationManifest, ManifestStoreError> {
        let path = self.path_for(request_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| ManifestStoreError::NotFound(request_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
