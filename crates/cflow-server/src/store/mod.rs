//! Durable, deduplicating content store
//!
//! Owns the binding and content tables (SQLite) and the blob store beneath
//! them; everything else in the pipeline goes through the operations here and
//! never touches a blob directly.
//!
//! Dedup guarantee: at most one content row per `(binding_id, content_hash)`.
//! The check-then-insert runs under a store-wide mutex, with the table's
//! uniqueness constraint as a second line should anything race past it; a
//! conflict is folded into the silent duplicate path, never surfaced. Blob
//! writes happen outside the mutex — every write gets a fresh random name, so
//! writers never contend on a blob — and a failed blob write rolls the
//! freshly inserted row back to preserve the one-blob-per-record invariant.

pub mod blob;
pub mod models;

pub use blob::BlobStore;
pub use models::{StoredContent, TransformerBinding};

use cflow_common::checksum::content_hash;
use cflow_common::{FlowError, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const MAX_DB_CONNECTIONS: u32 = 5;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS bindings (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        created         TEXT NOT NULL,
        transformer     TEXT NOT NULL,
        source_identity TEXT NOT NULL,
        UNIQUE (transformer, source_identity)
    )",
    "CREATE TABLE IF NOT EXISTS contents (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        binding_id   INTEGER NOT NULL REFERENCES bindings (id),
        created      TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        blob_name    TEXT NOT NULL,
        UNIQUE (binding_id, content_hash)
    )",
    "CREATE INDEX IF NOT EXISTS idx_contents_binding ON contents (binding_id)",
];

/// What happened to a payload handed to [`ContentStore::add_content`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New content, row and blob written
    Stored,
    /// Hash already present for this binding, nothing written
    Duplicate,
}

/// SQLite-backed deduplicating store
pub struct ContentStore {
    pool: SqlitePool,
    blobs: BlobStore,
    write_gate: Mutex<()>,
}

impl ContentStore {
    /// Open (creating if needed) the database and blob root
    pub async fn open(database_path: impl AsRef<Path>, blob_root: impl Into<PathBuf>) -> Result<Self> {
        let database_path = database_path.as_ref();
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_DB_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(db_error)?;
        }

        let blobs = BlobStore::new(blob_root);
        tokio::fs::create_dir_all(blobs.root()).await?;

        info!(database = %database_path.display(), blobs = %blobs.root().display(), "content store opened");

        Ok(Self {
            pool,
            blobs,
            write_gate: Mutex::new(()),
        })
    }

    /// All known bindings, load-ordered
    pub async fn bindings(&self) -> Result<Vec<TransformerBinding>> {
        sqlx::query_as::<_, TransformerBinding>(
            "SELECT id, created, transformer, source_identity FROM bindings ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Get the binding for a `(transformer, source identity)` pair, creating
    /// it on first sight
    ///
    /// Idempotent and race-safe: concurrent callers for the same pair all
    /// observe the same row. The blob container is provisioned alongside.
    pub async fn get_or_create_binding(
        &self,
        transformer: &str,
        source_identity: &str,
    ) -> Result<TransformerBinding> {
        let _gate = self.write_gate.lock().await;

        let inserted = sqlx::query(
            "INSERT INTO bindings (created, transformer, source_identity)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (transformer, source_identity) DO NOTHING",
        )
        .bind(Utc::now())
        .bind(transformer)
        .bind(source_identity)
        .execute(&self.pool)
        .await
        .map_err(db_error)?
        .rows_affected();

        let binding = sqlx::query_as::<_, TransformerBinding>(
            "SELECT id, created, transformer, source_identity
             FROM bindings
             WHERE transformer = ?1 AND source_identity = ?2",
        )
        .bind(transformer)
        .bind(source_identity)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        if inserted > 0 {
            self.blobs.provision_container(binding.id).await?;
            info!(
                binding_id = binding.id,
                transformer = %transformer,
                identity = %source_identity,
                "binding created"
            );
        }

        Ok(binding)
    }

    /// Persist one payload for a binding, deduplicating by content hash
    ///
    /// A payload whose hash is already present for the binding is a silent
    /// no-op, not an error.
    pub async fn add_content(&self, binding_id: i64, bytes: &[u8]) -> Result<AddOutcome> {
        let hash = content_hash(bytes);
        let blob_name = BlobStore::new_blob_name();

        let inserted_id = {
            let _gate = self.write_gate.lock().await;

            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM contents WHERE binding_id = ?1 AND content_hash = ?2",
            )
            .bind(binding_id)
            .bind(&hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            if existing.is_some() {
                debug!(binding_id, hash = %hash, "duplicate content, skipping");
                return Ok(AddOutcome::Duplicate);
            }

            let result = sqlx::query(
                "INSERT INTO contents (binding_id, created, content_hash, blob_name)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(binding_id)
            .bind(Utc::now())
            .bind(&hash)
            .bind(&blob_name)
            .execute(&self.pool)
            .await;

            match result {
                Ok(done) => done.last_insert_rowid(),
                Err(e) if is_unique_violation(&e) => {
                    // Raced past the check; the other writer's row wins.
                    debug!(binding_id, hash = %hash, "conflict folded into duplicate");
                    return Ok(AddOutcome::Duplicate);
                },
                Err(e) => return Err(db_error(e)),
            }
        };

        // Blob write runs outside the gate; the random name keeps concurrent
        // writers off each other's files.
        if let Err(e) = self.blobs.write(binding_id, &blob_name, bytes).await {
            let _ = sqlx::query("DELETE FROM contents WHERE id = ?1")
                .bind(inserted_id)
                .execute(&self.pool)
                .await;
            return Err(e);
        }

        debug!(binding_id, hash = %hash, blob = %blob_name, "content stored");
        Ok(AddOutcome::Stored)
    }

    /// All stored content for a binding, blobs loaded lazily
    pub async fn contents(&self, binding_id: i64) -> Result<Vec<StoredContent>> {
        let mut rows = sqlx::query_as::<_, StoredContent>(
            "SELECT id, binding_id, created, content_hash, blob_name
             FROM contents
             WHERE binding_id = ?1
             ORDER BY id",
        )
        .bind(binding_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        for row in &mut rows {
            row.blob_path = self.blobs.blob_path(row.binding_id, &row.blob_name);
        }

        Ok(rows)
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }
}

fn db_error(e: sqlx::Error) -> FlowError {
    FlowError::Database(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
