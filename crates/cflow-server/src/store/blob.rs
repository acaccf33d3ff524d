//! Local blob storage for raw ingested bytes
//!
//! Blobs live under a root directory partitioned by binding id, one
//! container per binding, so content namespaces never collide across
//! bindings. Blob names are random, never derived from the original source
//! name; each blob is written once and immutable afterwards, which lets
//! readers run concurrently with writers.

use cflow_common::{FlowError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const BLOB_EXTENSION: &str = "bin";

/// Filesystem-backed blob store
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate a fresh collision-free blob name
    pub fn new_blob_name() -> String {
        format!("{}.{}", Uuid::new_v4().simple(), BLOB_EXTENSION)
    }

    /// The container directory for one binding
    pub fn container(&self, binding_id: i64) -> PathBuf {
        self.root.join(binding_id.to_string())
    }

    pub fn blob_path(&self, binding_id: i64, name: &str) -> PathBuf {
        self.container(binding_id).join(name)
    }

    /// Create the container directory for a binding
    pub async fn provision_container(&self, binding_id: i64) -> Result<()> {
        tokio::fs::create_dir_all(self.container(binding_id)).await?;
        Ok(())
    }

    /// Write one blob; the name must be fresh from [`new_blob_name`](Self::new_blob_name)
    pub async fn write(&self, binding_id: i64, name: &str, data: &[u8]) -> Result<()> {
        self.provision_container(binding_id).await?;
        let path = self.blob_path(binding_id, name);
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), size = data.len(), "blob written");
        Ok(())
    }

    pub async fn read(&self, binding_id: i64, name: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(binding_id, name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FlowError::NotFound(format!("blob missing: {}", path.display())))
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, binding_id: i64, name: &str) -> Result<()> {
        let path = self.blob_path(binding_id, name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, binding_id: i64, name: &str) -> bool {
        tokio::fs::try_exists(self.blob_path(binding_id, name))
            .await
            .unwrap_or(false)
    }
}
