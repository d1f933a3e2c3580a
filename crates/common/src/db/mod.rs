//! Database layer for DocHarbor
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern over Postgres
//! - An in-memory store for tests and local tooling
//! - Connection pool management
//!
//! All status mutations go through [`DocumentStore::transition_document`],
//! a conditional update on the expected predecessor status. Object-store
//! events are delivered at-least-once and may race the status poller, so a
//! transition whose precondition no longer holds reports `false` instead of
//! overwriting newer state.

pub mod models;

mod memory;
mod repository;

pub use memory::MemoryStore;
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use models::{Document, DocumentStatus, IngestionJob, JobState};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Fields required to register a new document record
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Uuid,
    pub storage_key: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// Aggregate document statistics
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DocumentStats {
    pub total_documents: u64,
    pub indexed_count: u64,
    /// Count per file extension (derived from the original filename)
    pub file_type_distribution: BTreeMap<String, u64>,
}

/// Persistence seam for document and ingestion-job records
///
/// Implemented by [`Repository`] (Postgres) and [`MemoryStore`] (tests).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document in `pending` state
    async fn insert_document(&self, new: NewDocument) -> Result<Document>;

    /// Find a document by id
    async fn find_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// List documents, optionally filtered by status, newest first
    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>>;

    /// Delete a document record; returns whether a record was removed
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    /// Conditionally transition a document from `from` to `to`.
    ///
    /// Returns `true` when the update was applied, `false` when the
    /// document was missing or no longer in `from` (duplicate event or
    /// lost race). Stamps `indexed_at` when transitioning to `Indexed`
    /// and records `error_detail` when transitioning to `Failed`.
    async fn transition_document(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
        error_detail: Option<String>,
    ) -> Result<bool>;

    /// Create an ingestion job covering the given documents
    async fn create_job(
        &self,
        engine_job_id: String,
        document_ids: Vec<Uuid>,
        attempt_count: i32,
    ) -> Result<IngestionJob>;

    /// Jobs still in `running` state
    async fn running_jobs(&self) -> Result<Vec<IngestionJob>>;

    /// Complete a running job; returns whether the job was still running
    async fn complete_job(
        &self,
        id: Uuid,
        outcome: JobState,
        error_message: Option<String>,
    ) -> Result<bool>;

    /// Aggregate statistics over current document records
    async fn stats(&self) -> Result<DocumentStats>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let mut primary_opts = ConnectOptions::new(&config.url);
        primary_opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(true);

        let primary = Database::connect(primary_opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let mut replica_opts = ConnectOptions::new(read_url);
            replica_opts
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
                .sqlx_logging(true);

            let replica_conn = Database::connect(replica_opts)
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Failed to connect to replica: {}", e),
                })?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}
