//! Repository pattern for database operations
//!
//! Postgres implementation of [`DocumentStore`] with proper error handling.
//! Status transitions use conditional raw SQL (`WHERE status = expected`)
//! so concurrent events and polls cannot overwrite newer state.

use crate::db::models::*;
use crate::db::{DbPool, DocumentStats, DocumentStore, NewDocument};
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, Set, Statement,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl DocumentStore for Repository {
    async fn insert_document(&self, new: NewDocument) -> Result<Document> {
        let now = chrono::Utc::now();

        let document = DocumentActiveModel {
            id: Set(new.id),
            storage_key: Set(new.storage_key),
            original_filename: Set(new.original_filename),
            content_type: Set(new.content_type),
            size_bytes: Set(new.size_bytes),
            status: Set(DocumentStatus::Pending.as_str().to_string()),
            error_detail: Set(None),
            uploaded_at: Set(now.into()),
            indexed_at: Set(None),
        };

        document.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let mut query = DocumentEntity::find().order_by_desc(DocumentColumn::UploadedAt);

        if let Some(status) = status {
            query = query.filter(DocumentColumn::Status.eq(status.as_str()));
        }

        query.all(self.read_conn()).await.map_err(Into::into)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let result = DocumentEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn transition_document(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
        error_detail: Option<String>,
    ) -> Result<bool> {
        use sea_orm::ConnectionTrait;

        if !from.can_transition_to(to) {
            return Ok(false);
        }

        // Conditional update: only applies when the document is still in
        // the expected predecessor state.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE documents
            SET status = $3,
                error_detail = COALESCE($4, error_detail),
                indexed_at = CASE WHEN $3 = 'indexed' THEN NOW() ELSE indexed_at END
            WHERE id = $1 AND status = $2
            "#,
            vec![
                id.into(),
                from.as_str().into(),
                to.as_str().into(),
                error_detail.into(),
            ],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_job(
        &self,
        engine_job_id: String,
        document_ids: Vec<Uuid>,
        attempt_count: i32,
    ) -> Result<IngestionJob> {
        let now = chrono::Utc::now();

        let job = IngestionJobActiveModel {
            id: Set(Uuid::new_v4()),
            engine_job_id: Set(engine_job_id),
            document_ids: Set(document_ids_json(&document_ids)),
            status: Set(JobState::Running.as_str().to_string()),
            attempt_count: Set(attempt_count),
            error_message: Set(None),
            started_at: Set(now.into()),
            completed_at: Set(None),
        };

        job.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn running_jobs(&self) -> Result<Vec<IngestionJob>> {
        IngestionJobEntity::find()
            .filter(IngestionJobColumn::Status.eq(JobState::Running.as_str()))
            .order_by_asc(IngestionJobColumn::StartedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        outcome: JobState,
        error_message: Option<String>,
    ) -> Result<bool> {
        use sea_orm::ConnectionTrait;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE ingestion_jobs
            SET status = $2,
                error_message = $3,
                completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
            vec![id.into(), outcome.as_str().into(), error_message.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<DocumentStats> {
        use sea_orm::ConnectionTrait;

        let totals = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'indexed') AS indexed
            FROM documents
            "#,
            vec![],
        );

        let mut stats = DocumentStats::default();

        if let Some(row) = self.read_conn().query_one(totals).await? {
            stats.total_documents = row.try_get_by_index::<i64>(0).unwrap_or(0) as u64;
            stats.indexed_count = row.try_get_by_index::<i64>(1).unwrap_or(0) as u64;
        }

        let by_type = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT LOWER(SPLIT_PART(original_filename, '.', -1)) AS extension,
                   COUNT(*) AS count
            FROM documents
            GROUP BY extension
            ORDER BY count DESC
            "#,
            vec![],
        );

        for row in self.read_conn().query_all(by_type).await? {
            let extension = row.try_get_by_index::<String>(0).unwrap_or_default();
            let count = row.try_get_by_index::<i64>(1).unwrap_or(0) as u64;
            if !extension.is_empty() {
                stats.file_type_distribution.insert(extension, count);
            }
        }

        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
