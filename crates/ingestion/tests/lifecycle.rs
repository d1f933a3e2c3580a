//! Document lifecycle tests
//!
//! Drives the trigger and poller against the in-memory store and engine
//! mock: upload -> object event -> job start -> completion, plus the
//! duplicate-delivery, deferral, and timeout paths.

use docharbor_common::{
    db::models::{Document, DocumentStatus, JobState},
    db::{DocumentStore, MemoryStore, NewDocument},
    engine::{EngineJobState, MockKnowledgeEngine},
    storage::storage_key,
};
use docharbor_ingestion::{
    poller::StatusPoller,
    trigger::{IngestionTrigger, TriggerConfig, TriggerOutcome},
};
use std::sync::Arc;
use uuid::Uuid;

const PREFIX: &str = "documents/";

struct Harness {
    store: Arc<MemoryStore>,
    engine: Arc<MockKnowledgeEngine>,
    trigger: IngestionTrigger,
    poller: StatusPoller,
}

fn harness(max_start_attempts: u32, max_processing_secs: u64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(MockKnowledgeEngine::new());

    let trigger = IngestionTrigger::new(
        store.clone(),
        engine.clone(),
        TriggerConfig {
            key_prefix: PREFIX.to_string(),
            max_start_attempts,
            retry_base_delay_secs: 30,
        },
    );

    let poller = StatusPoller::new(store.clone(), engine.clone(), max_processing_secs);

    Harness {
        store,
        engine,
        trigger,
        poller,
    }
}

/// Register a pending document the way the upload orchestrator does
async fn upload(store: &MemoryStore, filename: &str) -> (Document, String) {
    let id = Uuid::new_v4();
    let extension = filename.rsplit_once('.').unwrap().1;
    let key = storage_key(PREFIX, id, extension);

    let document = store
        .insert_document(NewDocument {
            id,
            storage_key: key.clone(),
            original_filename: filename.to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 2 * 1024 * 1024,
        })
        .await
        .unwrap();

    (document, key)
}

async fn status_of(store: &MemoryStore, id: Uuid) -> DocumentStatus {
    store
        .find_document(id)
        .await
        .unwrap()
        .unwrap()
        .document_status()
}

#[tokio::test]
async fn full_lifecycle_upload_to_indexed() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;

    // Object write confirmed: event starts a job
    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    let job_id = match outcome {
        TriggerOutcome::Started { job_id, documents } => {
            assert_eq!(documents, 1);
            job_id
        }
        other => panic!("expected Started, got {:?}", other),
    };

    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Processing);

    // Engine finishes the job; the next poll flips the document
    let jobs = h.store.all_jobs().await;
    let engine_job_id = &jobs.iter().find(|j| j.id == job_id).unwrap().engine_job_id;
    h.engine.resolve_job(engine_job_id, EngineJobState::Complete, None);

    let summary = h.poller.poll_once().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let document = h.store.find_document(document.id).await.unwrap().unwrap();
    assert_eq!(document.document_status(), DocumentStatus::Indexed);
    assert!(document.indexed_at.is_some());

    let jobs = h.store.all_jobs().await;
    assert_eq!(jobs[0].job_state(), JobState::Succeeded);
}

#[tokio::test]
async fn duplicate_event_starts_exactly_one_job() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;

    let first = h.trigger.on_object_created(&key).await.unwrap();
    assert!(matches!(first, TriggerOutcome::Started { .. }));

    // At-least-once delivery: the same event arrives again
    let second = h.trigger.on_object_created(&key).await.unwrap();
    assert_eq!(second, TriggerOutcome::Duplicate);

    assert_eq!(h.engine.jobs_started(), 1);
    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Processing);
}

#[tokio::test]
async fn replay_after_indexing_does_not_regress() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;

    h.trigger.on_object_created(&key).await.unwrap();
    let jobs = h.store.all_jobs().await;
    h.engine
        .resolve_job(&jobs[0].engine_job_id, EngineJobState::Complete, None);
    h.poller.poll_once().await.unwrap();
    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Indexed);

    // A very late replay of the original event
    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Duplicate);
    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Indexed);
    assert_eq!(h.engine.jobs_started(), 1);
}

#[tokio::test]
async fn conflict_defers_then_succeeds_on_retry() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;
    h.engine.reject_next_job_starts(1);

    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    match outcome {
        TriggerOutcome::Deferred {
            attempt,
            delay_secs,
        } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay_secs, 30);
        }
        other => panic!("expected Deferred, got {:?}", other),
    }

    // Document waits in uploaded until a job slot frees up
    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Uploaded);

    let outcome = h.trigger.on_retry(1).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Started { .. }));
    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Processing);
}

#[tokio::test]
async fn deferral_backoff_grows_exponentially() {
    let h = harness(10, 3600);
    let (_document, key) = upload(&h.store, "report.pdf").await;
    h.engine.reject_next_job_starts(10);

    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Deferred { attempt: 1, delay_secs: 30 }));

    let outcome = h.trigger.on_retry(1).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Deferred { attempt: 2, delay_secs: 60 }));

    let outcome = h.trigger.on_retry(2).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Deferred { attempt: 3, delay_secs: 120 }));
}

#[tokio::test]
async fn exhausted_retries_fail_the_documents() {
    let h = harness(2, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;
    h.engine.reject_next_job_starts(10);

    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Deferred { attempt: 1, .. }));

    // Second attempt exhausts the budget
    let outcome = h.trigger.on_retry(1).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Failed { .. }));

    let document = h.store.find_document(document.id).await.unwrap().unwrap();
    assert_eq!(document.document_status(), DocumentStatus::Failed);
    assert!(document.error_detail.unwrap().contains("attempts"));
}

#[tokio::test]
async fn unrecoverable_start_error_fails_immediately() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;

    // Only the concurrent-job conflict gets the deferred retry; a plain
    // upstream failure on start is terminal for the waiting documents.
    h.engine.fail_job_start(true);

    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Failed { .. }));

    let document = h.store.find_document(document.id).await.unwrap().unwrap();
    assert_eq!(document.document_status(), DocumentStatus::Failed);
    assert!(document.error_detail.is_some());
    assert_eq!(h.engine.jobs_started(), 0);
}

#[tokio::test]
async fn event_for_unknown_object_is_dropped() {
    let h = harness(5, 3600);

    // Key outside the prefix
    let outcome = h.trigger.on_object_created("backups/dump.bin").await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Ignored);

    // Well-formed key with no record behind it
    let key = storage_key(PREFIX, Uuid::new_v4(), "pdf");
    let outcome = h.trigger.on_object_created(&key).await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Ignored);

    assert_eq!(h.engine.jobs_started(), 0);
}

#[tokio::test]
async fn waiting_documents_batch_into_one_job() {
    let h = harness(5, 3600);
    let (doc_a, key_a) = upload(&h.store, "a.pdf").await;
    let (doc_b, key_b) = upload(&h.store, "b.pdf").await;

    // First event hits a running job; both documents end up waiting
    h.engine.reject_next_job_starts(1);
    let outcome = h.trigger.on_object_created(&key_a).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Deferred { .. }));

    let outcome = h.trigger.on_object_created(&key_b).await.unwrap();
    // Second event finds the slot free and takes both documents along
    let documents = match outcome {
        TriggerOutcome::Started { documents, .. } => documents,
        other => panic!("expected Started, got {:?}", other),
    };
    assert_eq!(documents, 2);
    assert_eq!(h.engine.jobs_started(), 1);

    assert_eq!(status_of(&h.store, doc_a.id).await, DocumentStatus::Processing);
    assert_eq!(status_of(&h.store, doc_b.id).await, DocumentStatus::Processing);

    // Job completion indexes both
    let jobs = h.store.all_jobs().await;
    h.engine
        .resolve_job(&jobs[0].engine_job_id, EngineJobState::Complete, None);
    let summary = h.poller.poll_once().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    assert_eq!(status_of(&h.store, doc_a.id).await, DocumentStatus::Indexed);
    assert_eq!(status_of(&h.store, doc_b.id).await, DocumentStatus::Indexed);
}

#[tokio::test]
async fn failed_job_records_engine_detail() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "broken.pdf").await;

    h.trigger.on_object_created(&key).await.unwrap();
    let jobs = h.store.all_jobs().await;
    h.engine.resolve_job(
        &jobs[0].engine_job_id,
        EngineJobState::Failed,
        Some("unsupported encoding"),
    );

    let summary = h.poller.poll_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let document = h.store.find_document(document.id).await.unwrap().unwrap();
    assert_eq!(document.document_status(), DocumentStatus::Failed);
    assert!(document
        .error_detail
        .unwrap()
        .contains("unsupported encoding"));
}

#[tokio::test]
async fn stuck_job_times_out_and_fails_documents() {
    // max_processing_secs of zero: any running job is overdue
    let h = harness(5, 0);
    let (document, key) = upload(&h.store, "report.pdf").await;

    h.trigger.on_object_created(&key).await.unwrap();

    // Engine never resolves the job
    let summary = h.poller.poll_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let document = h.store.find_document(document.id).await.unwrap().unwrap();
    assert_eq!(document.document_status(), DocumentStatus::Failed);
    assert!(document.error_detail.unwrap().contains("timed out"));
}

#[tokio::test]
async fn in_progress_job_is_left_alone() {
    let h = harness(5, 3600);
    let (document, key) = upload(&h.store, "report.pdf").await;

    h.trigger.on_object_created(&key).await.unwrap();

    let summary = h.poller.poll_once().await.unwrap();
    assert_eq!(summary, docharbor_ingestion::poller::PollSummary {
        succeeded: 0,
        failed: 0,
        still_running: 1,
    });
    assert_eq!(status_of(&h.store, document.id).await, DocumentStatus::Processing);
}
