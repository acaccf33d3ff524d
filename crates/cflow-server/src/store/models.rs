//! Persisted store models

use cflow_common::{FlowError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Persisted association between one transformer and one configured source
///
/// At most one binding exists per `(transformer, source_identity)` pair; the
/// id is assigned by the store and keys everything downstream.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransformerBinding {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub transformer: String,
    pub source_identity: String,
}

/// One deduplicated piece of stored content
///
/// The raw bytes live in the blob store; [`load`](Self::load) reads them on
/// demand rather than materializing every payload up front.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredContent {
    pub id: i64,
    pub binding_id: i64,
    pub created: DateTime<Utc>,
    pub content_hash: String,
    pub blob_name: String,
    #[sqlx(skip)]
    pub(crate) blob_path: PathBuf,
}

impl StoredContent {
    /// Read the raw bytes from the blob store
    pub async fn load(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.blob_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FlowError::NotFound(
                format!("blob missing: {}", self.blob_path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
