//! In-memory implementation of [`DocumentStore`]
//!
//! Backs tests and local tooling; applies the same conditional-transition
//! semantics as the Postgres repository.

use crate::db::models::*;
use crate::db::{DocumentStats, DocumentStore, NewDocument};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    documents: HashMap<Uuid, Document>,
    jobs: HashMap<Uuid, IngestionJob>,
}

/// In-memory document store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of document records currently held
    pub async fn document_count(&self) -> usize {
        self.inner.read().await.documents.len()
    }

    /// All jobs ever created, terminal ones included
    pub async fn all_jobs(&self) -> Vec<IngestionJob> {
        self.inner.read().await.jobs.values().cloned().collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, new: NewDocument) -> Result<Document> {
        let now = chrono::Utc::now();
        let document = Document {
            id: new.id,
            storage_key: new.storage_key,
            original_filename: new.original_filename,
            content_type: new.content_type,
            size_bytes: new.size_bytes,
            status: DocumentStatus::Pending.as_str().to_string(),
            error_detail: None,
            uploaded_at: now.into(),
            indexed_at: None,
        };

        self.inner
            .write()
            .await
            .documents
            .insert(document.id, document.clone());

        Ok(document)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.inner.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let inner = self.inner.read().await;
        let mut documents: Vec<Document> = inner
            .documents
            .values()
            .filter(|d| status.map_or(true, |s| d.document_status() == s))
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.write().await.documents.remove(&id).is_some())
    }

    async fn transition_document(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
        error_detail: Option<String>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }

        let mut inner = self.inner.write().await;
        let Some(document) = inner.documents.get_mut(&id) else {
            return Ok(false);
        };

        if document.document_status() != from {
            return Ok(false);
        }

        document.status = to.as_str().to_string();
        if let Some(detail) = error_detail {
            document.error_detail = Some(detail);
        }
        if to == DocumentStatus::Indexed {
            document.indexed_at = Some(chrono::Utc::now().into());
        }

        Ok(true)
    }

    async fn create_job(
        &self,
        engine_job_id: String,
        document_ids: Vec<Uuid>,
        attempt_count: i32,
    ) -> Result<IngestionJob> {
        let now = chrono::Utc::now();
        let job = IngestionJob {
            id: Uuid::new_v4(),
            engine_job_id,
            document_ids: document_ids_json(&document_ids),
            status: JobState::Running.as_str().to_string(),
            attempt_count,
            error_message: None,
            started_at: now.into(),
            completed_at: None,
        };

        self.inner.write().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn running_jobs(&self) -> Result<Vec<IngestionJob>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<IngestionJob> = inner
            .jobs
            .values()
            .filter(|j| j.job_state() == JobState::Running)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(jobs)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        outcome: JobState,
        error_message: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };

        if job.job_state() != JobState::Running {
            return Ok(false);
        }

        job.status = outcome.as_str().to_string();
        job.error_message = error_message;
        job.completed_at = Some(chrono::Utc::now().into());
        Ok(true)
    }

    async fn stats(&self) -> Result<DocumentStats> {
        let inner = self.inner.read().await;
        let mut stats = DocumentStats {
            total_documents: inner.documents.len() as u64,
            ..Default::default()
        };

        for document in inner.documents.values() {
            if document.document_status() == DocumentStatus::Indexed {
                stats.indexed_count += 1;
            }
            if let Some(extension) = document.extension() {
                *stats.file_type_distribution.entry(extension).or_insert(0) += 1;
            }
        }

        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_document(name: &str) -> NewDocument {
        let id = Uuid::new_v4();
        NewDocument {
            id,
            storage_key: format!("documents/{}.pdf", id),
            original_filename: name.to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 2 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        let doc = store.insert_document(new_document("report.pdf")).await.unwrap();

        let found = store.find_document(doc.id).await.unwrap().unwrap();
        assert_eq!(found.document_status(), DocumentStatus::Pending);
        assert_eq!(found.original_filename, "report.pdf");
    }

    #[tokio::test]
    async fn test_transition_requires_expected_predecessor() {
        let store = MemoryStore::new();
        let doc = store.insert_document(new_document("report.pdf")).await.unwrap();

        // pending -> uploaded applies once
        assert!(store
            .transition_document(doc.id, DocumentStatus::Pending, DocumentStatus::Uploaded, None)
            .await
            .unwrap());

        // replaying the same event is a no-op
        assert!(!store
            .transition_document(doc.id, DocumentStatus::Pending, DocumentStatus::Uploaded, None)
            .await
            .unwrap());

        // illegal jumps are rejected outright
        assert!(!store
            .transition_document(doc.id, DocumentStatus::Uploaded, DocumentStatus::Indexed, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_indexed_transition_stamps_timestamp() {
        let store = MemoryStore::new();
        let doc = store.insert_document(new_document("notes.md")).await.unwrap();

        store
            .transition_document(doc.id, DocumentStatus::Pending, DocumentStatus::Uploaded, None)
            .await
            .unwrap();
        store
            .transition_document(doc.id, DocumentStatus::Uploaded, DocumentStatus::Processing, None)
            .await
            .unwrap();
        store
            .transition_document(doc.id, DocumentStatus::Processing, DocumentStatus::Indexed, None)
            .await
            .unwrap();

        let doc = store.find_document(doc.id).await.unwrap().unwrap();
        assert_eq!(doc.document_status(), DocumentStatus::Indexed);
        assert!(doc.indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_stats_distribution() {
        let store = MemoryStore::new();
        store.insert_document(new_document("a.pdf")).await.unwrap();
        store.insert_document(new_document("b.pdf")).await.unwrap();
        store.insert_document(new_document("c.txt")).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.indexed_count, 0);
        assert_eq!(stats.file_type_distribution.get("pdf"), Some(&2));
        assert_eq!(stats.file_type_distribution.get("txt"), Some(&1));
    }

    #[tokio::test]
    async fn test_complete_job_once() {
        let store = MemoryStore::new();
        let job = store
            .create_job("engine-1".into(), vec![Uuid::new_v4()], 0)
            .await
            .unwrap();

        assert_eq!(store.running_jobs().await.unwrap().len(), 1);
        assert!(store
            .complete_job(job.id, JobState::Succeeded, None)
            .await
            .unwrap());
        assert!(!store
            .complete_job(job.id, JobState::Failed, Some("late".into()))
            .await
            .unwrap());
        assert!(store.running_jobs().await.unwrap().is_empty());
    }
}
