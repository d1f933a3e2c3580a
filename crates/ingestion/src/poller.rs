//! Ingestion job status poller
//!
//! Walks jobs still marked running and reconciles them against the
//! engine. Polling is idempotent; a poll that races an event loses the
//! conditional update and moves on. Jobs older than the configured
//! maximum wait are failed so documents cannot sit in `processing`
//! forever.

use docharbor_common::{
    db::models::{DocumentStatus, IngestionJob, JobState},
    db::DocumentStore,
    engine::{EngineJobState, KnowledgeEngine},
    errors::Result,
    metrics,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Counters from one poll pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub still_running: usize,
}

/// Job status poller
pub struct StatusPoller {
    store: Arc<dyn DocumentStore>,
    engine: Arc<dyn KnowledgeEngine>,
    /// Fail jobs still running after this many seconds
    max_processing_secs: u64,
}

impl StatusPoller {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: Arc<dyn KnowledgeEngine>,
        max_processing_secs: u64,
    ) -> Self {
        Self {
            store,
            engine,
            max_processing_secs,
        }
    }

    /// Reconcile every running job against the engine
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let mut summary = PollSummary::default();

        for job in self.store.running_jobs().await? {
            match self.engine.ingestion_job_status(&job.engine_job_id).await {
                Ok(status) => match status.state {
                    EngineJobState::Complete => {
                        self.finish_job(&job, JobState::Succeeded, None).await?;
                        summary.succeeded += 1;
                    }
                    EngineJobState::Failed => {
                        let reason = status
                            .failure_reason
                            .unwrap_or_else(|| "Ingestion job failed".to_string());
                        self.finish_job(&job, JobState::Failed, Some(reason)).await?;
                        summary.failed += 1;
                    }
                    EngineJobState::InProgress => {
                        let age = job.age_secs(chrono::Utc::now());
                        if age >= 0 && age as u64 >= self.max_processing_secs {
                            let reason = format!(
                                "Ingestion job timed out after {} seconds",
                                age
                            );
                            self.finish_job(&job, JobState::Failed, Some(reason)).await?;
                            summary.failed += 1;
                        } else {
                            summary.still_running += 1;
                        }
                    }
                },
                Err(e) => {
                    // Transient: the next poll retries the status check.
                    // The deadline still applies, or a permanently
                    // unreachable engine would strand documents in
                    // processing.
                    let age = job.age_secs(chrono::Utc::now());
                    if age >= 0 && age as u64 >= self.max_processing_secs {
                        let reason = format!(
                            "Ingestion job status unavailable after {} seconds: {}",
                            age, e
                        );
                        self.finish_job(&job, JobState::Failed, Some(reason)).await?;
                        summary.failed += 1;
                    } else {
                        warn!(
                            engine_job_id = %job.engine_job_id,
                            error = %e,
                            "Job status check failed, will retry on next poll"
                        );
                        summary.still_running += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Record a job outcome and flip the covered documents
    async fn finish_job(
        &self,
        job: &IngestionJob,
        outcome: JobState,
        error_message: Option<String>,
    ) -> Result<()> {
        let applied = self
            .store
            .complete_job(job.id, outcome, error_message.clone())
            .await?;

        if !applied {
            // Lost a race with another poller pass
            warn!(job_id = %job.id, "Job already completed, skipping");
            return Ok(());
        }

        let documents = job.covered_documents();
        let (target, detail) = match outcome {
            JobState::Succeeded => (DocumentStatus::Indexed, None),
            _ => (DocumentStatus::Failed, error_message),
        };

        for id in &documents {
            let moved = self
                .store
                .transition_document(*id, DocumentStatus::Processing, target, detail.clone())
                .await?;
            if !moved {
                warn!(document_id = %id, "Document not in processing during job completion");
            }
        }

        metrics::record_job_outcome(outcome.as_str(), documents.len());

        info!(
            job_id = %job.id,
            engine_job_id = %job.engine_job_id,
            outcome = outcome.as_str(),
            documents = documents.len(),
            "Ingestion job completed"
        );

        Ok(())
    }
}
