//! Ingestion trigger
//!
//! Invoked for every object-created event delivered from the uploads
//! bucket. Events arrive at-least-once; every state change is a
//! conditional transition, so replays degrade to logged no-ops.
//!
//! The engine permits one ingestion job in flight per data source. A
//! rejected start is deferred through the events queue with exponential
//! backoff rather than held behind a local lock; the engine is the
//! authority on whether a job is running. All documents waiting in
//! `uploaded` are batched into the next job that starts.

use docharbor_common::{
    db::models::DocumentStatus,
    db::DocumentStore,
    engine::KnowledgeEngine,
    errors::{AppError, Result},
    metrics,
    queue::retry_delay_secs,
    storage::document_id_from_key,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What the trigger decided to do with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// An engine job was started covering `documents` documents
    Started { job_id: Uuid, documents: usize },

    /// The engine has a job running; retry scheduled after `delay_secs`
    Deferred { attempt: u32, delay_secs: u64 },

    /// Nothing waiting in `uploaded`; no job needed
    Idle,

    /// Event did not map to a known document; logged and dropped
    Ignored,

    /// Replayed event; the document has already moved on
    Duplicate,

    /// Job start failed unrecoverably; affected documents marked failed
    Failed { message: String },
}

/// Trigger configuration
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Storage key prefix for uploaded documents
    pub key_prefix: String,
    /// Maximum job-start attempts before giving up
    pub max_start_attempts: u32,
    /// Base delay for the deferred-retry backoff
    pub retry_base_delay_secs: u64,
}

/// Ingestion trigger processor
pub struct IngestionTrigger {
    store: Arc<dyn DocumentStore>,
    engine: Arc<dyn KnowledgeEngine>,
    config: TriggerConfig,
}

impl IngestionTrigger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: Arc<dyn KnowledgeEngine>,
        config: TriggerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Handle an object-created event for `storage_key`
    #[instrument(skip(self), fields(storage_key = %storage_key))]
    pub async fn on_object_created(&self, storage_key: &str) -> Result<TriggerOutcome> {
        let Some(document_id) = document_id_from_key(&self.config.key_prefix, storage_key) else {
            // The bucket may receive objects we never issued credentials
            // for; they are not ours to ingest.
            warn!("Object key outside the expected prefix, dropping event");
            return Ok(TriggerOutcome::Ignored);
        };

        let Some(_document) = self.store.find_document(document_id).await? else {
            warn!(document_id = %document_id, "No document record for object, dropping event");
            return Ok(TriggerOutcome::Ignored);
        };

        let moved = self
            .store
            .transition_document(
                document_id,
                DocumentStatus::Pending,
                DocumentStatus::Uploaded,
                None,
            )
            .await?;

        if !moved {
            debug!(document_id = %document_id, "Duplicate object-created event, no-op");
            return Ok(TriggerOutcome::Duplicate);
        }

        info!(document_id = %document_id, "Object write confirmed");
        self.try_start_job(0).await
    }

    /// Handle a deferred job-start retry
    #[instrument(skip(self))]
    pub async fn on_retry(&self, attempt: u32) -> Result<TriggerOutcome> {
        self.try_start_job(attempt).await
    }

    /// Attempt to start one engine job covering everything in `uploaded`
    async fn try_start_job(&self, attempt: u32) -> Result<TriggerOutcome> {
        let waiting = self
            .store
            .list_documents(Some(DocumentStatus::Uploaded))
            .await?;

        if waiting.is_empty() {
            debug!("No documents waiting for ingestion");
            return Ok(TriggerOutcome::Idle);
        }

        let document_ids: Vec<Uuid> = waiting.iter().map(|d| d.id).collect();

        match self.engine.start_ingestion_job().await {
            Ok(job) => {
                let record = self
                    .store
                    .create_job(job.job_id.clone(), document_ids.clone(), attempt as i32)
                    .await?;

                for id in &document_ids {
                    let moved = self
                        .store
                        .transition_document(
                            *id,
                            DocumentStatus::Uploaded,
                            DocumentStatus::Processing,
                            None,
                        )
                        .await?;
                    if !moved {
                        warn!(document_id = %id, "Document moved during job start");
                    }
                }

                info!(
                    job_id = %record.id,
                    engine_job_id = %job.job_id,
                    documents = document_ids.len(),
                    "Ingestion job started"
                );

                Ok(TriggerOutcome::Started {
                    job_id: record.id,
                    documents: document_ids.len(),
                })
            }

            Err(AppError::Conflict { message }) => {
                let next_attempt = attempt + 1;
                if next_attempt >= self.config.max_start_attempts {
                    let detail = format!(
                        "Ingestion slot unavailable after {} attempts: {}",
                        next_attempt, message
                    );
                    self.fail_documents(&document_ids, &detail).await?;
                    metrics::record_job_outcome("exhausted", document_ids.len());
                    return Ok(TriggerOutcome::Failed { message: detail });
                }

                let delay_secs = retry_delay_secs(self.config.retry_base_delay_secs, attempt);
                metrics::record_deferral();

                info!(
                    attempt = next_attempt,
                    delay_secs,
                    "Engine reports a running job, deferring start"
                );

                Ok(TriggerOutcome::Deferred {
                    attempt: next_attempt,
                    delay_secs,
                })
            }

            Err(e) => {
                // Job start is not idempotent; only the explicit
                // concurrent-job conflict gets a retry.
                let detail = format!("Failed to start ingestion job: {}", e);
                self.fail_documents(&document_ids, &detail).await?;
                metrics::record_job_outcome("start_failed", document_ids.len());
                Ok(TriggerOutcome::Failed { message: detail })
            }
        }
    }

    async fn fail_documents(&self, document_ids: &[Uuid], detail: &str) -> Result<()> {
        for id in document_ids {
            let moved = self
                .store
                .transition_document(
                    *id,
                    DocumentStatus::Uploaded,
                    DocumentStatus::Failed,
                    Some(detail.to_string()),
                )
                .await?;
            if !moved {
                warn!(document_id = %id, "Document moved before failure could be recorded");
            }
        }
        Ok(())
    }
}
