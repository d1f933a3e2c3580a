//! Knowledge engine abstraction
//!
//! The engine is an external black box: it vectorizes uploaded documents
//! into an index (asynchronous ingestion jobs) and answers retrieval and
//! generation calls. This module provides:
//! - The [`KnowledgeEngine`] trait used by the gateway and worker
//! - An HTTP client implementation with bounded timeouts and retries
//! - A configurable mock for tests
//!
//! Every HTTP response passes through the response normalizer first, so
//! both direct bodies and proxy-wrapped envelopes are tolerated on the
//! wire.

use crate::config::EngineConfig;
use crate::errors::{AppError, Result};
use crate::normalizer::{normalize_http, ErrorEnvelope, ErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// A passage retrieved from the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Passage text
    pub content: String,
    /// Reference back to the source document (storage URI)
    pub document_reference: String,
    /// Similarity score in [0, 1]
    pub score: f64,
}

/// A generated answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub model_id: String,
}

/// Handle for a started ingestion job
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub job_id: String,
}

/// State of an engine-side ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineJobState {
    InProgress,
    Complete,
    Failed,
}

/// Status report for an ingestion job
#[derive(Debug, Clone)]
pub struct EngineJobStatus {
    pub state: EngineJobState,
    pub failure_reason: Option<String>,
}

/// Trait for knowledge engine operations
#[async_trait]
pub trait KnowledgeEngine: Send + Sync {
    /// Start an ingestion job for the configured data source.
    ///
    /// The engine permits one job in flight per data source; a rejected
    /// start surfaces as `AppError::Conflict` and is expected to be
    /// retried via the deferred-retry queue, not a generic retry.
    async fn start_ingestion_job(&self) -> Result<EngineJob>;

    /// Query the status of a previously started job (idempotent)
    async fn ingestion_job_status(&self, job_id: &str) -> Result<EngineJobStatus>;

    /// Retrieve the `top_k` most similar passages (idempotent)
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedPassage>>;

    /// Generate an answer grounded in the given passages.
    ///
    /// Never retried automatically; generation is neither idempotent
    /// nor cheap.
    async fn generate(&self, question: &str, passages: &[RetrievedPassage])
        -> Result<GeneratedAnswer>;

    /// Best-effort removal of a document from the index.
    ///
    /// Returns `Ok(false)` when the engine did not confirm the removal.
    async fn delete_document(&self, storage_key: &str) -> Result<bool>;

    /// Generation model identifier
    fn model_id(&self) -> &str;
}

/// Framing used when retrieval returned nothing; generation still runs
/// and produces a low-confidence answer instead of an error.
pub const NO_CONTEXT_FRAMING: &str =
    "No relevant context was found in the knowledge base for this question. \
     Say so, and answer only if you can do so from general knowledge, \
     clearly flagging the answer as unverified.";

/// Assemble the generation prompt from the question and passages
pub fn build_generation_prompt(question: &str, passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return format!("{}\n\nQuestion: {}", NO_CONTEXT_FRAMING, question);
    }

    let mut prompt = String::from(
        "Answer the question using only the numbered context passages below. \
         Cite passage numbers where relevant.\n\n",
    );
    for (i, passage) in passages.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", i + 1, passage.content));
    }
    prompt.push_str(&format!("\nQuestion: {}", question));
    prompt
}

/// HTTP knowledge engine client
pub struct HttpKnowledgeEngine {
    client: reqwest::Client,
    config: EngineConfig,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    #[serde(rename = "retrievalQuery")]
    query: RetrievalQuery<'a>,
    #[serde(rename = "numberOfResults")]
    number_of_results: usize,
}

#[derive(Serialize)]
struct RetrievalQuery<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    results: Vec<RetrieveResult>,
}

#[derive(Deserialize)]
struct RetrieveResult {
    content: RetrieveContent,
    #[serde(default)]
    location: Option<RetrieveLocation>,
    #[serde(default)]
    score: f64,
}

#[derive(Deserialize)]
struct RetrieveContent {
    text: String,
}

#[derive(Deserialize)]
struct RetrieveLocation {
    #[serde(rename = "s3Location")]
    s3_location: Option<S3Location>,
}

#[derive(Deserialize)]
struct S3Location {
    uri: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(rename = "modelId")]
    model_id: &'a str,
    prompt: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    answer: String,
    #[serde(rename = "modelId", default)]
    model_id: Option<String>,
}

#[derive(Deserialize)]
struct StartJobResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(rename = "failureReasons", default)]
    failure_reasons: Vec<String>,
}

impl HttpKnowledgeEngine {
    /// Create a new client from engine configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build engine HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn ingestion_jobs_path(&self) -> String {
        format!(
            "knowledge-bases/{}/data-sources/{}/ingestion-jobs",
            self.config.knowledge_base_id, self.config.data_source_id
        )
    }

    /// Issue a request and run the response through the normalizer
    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let mut request = request;
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::Upstream {
            service: "knowledge-engine".to_string(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        let normalized = normalize_http(status, &body);
        if normalized.success {
            Ok(normalized.data.unwrap_or(Value::Null))
        } else {
            let envelope = normalized.error.unwrap_or(ErrorEnvelope {
                kind: ErrorKind::Upstream,
                message: "Request failed".to_string(),
            });
            Err(envelope_to_error(envelope))
        }
    }
}

/// Map a normalized error envelope onto the application taxonomy
fn envelope_to_error(envelope: ErrorEnvelope) -> AppError {
    match envelope.kind {
        ErrorKind::Conflict => AppError::Conflict {
            message: envelope.message,
        },
        ErrorKind::NotFound => AppError::NotFound {
            resource_type: "engine-resource".to_string(),
            id: envelope.message,
        },
        ErrorKind::Validation => AppError::Validation {
            message: envelope.message,
            field: None,
        },
        _ => AppError::Upstream {
            service: "knowledge-engine".to_string(),
            message: envelope.message,
        },
    }
}

/// Whether an error is worth a retry for idempotent calls
pub fn is_transient(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Upstream { .. } | AppError::HttpClient(_) | AppError::ServiceUnavailable { .. }
    )
}

#[async_trait]
impl KnowledgeEngine for HttpKnowledgeEngine {
    async fn start_ingestion_job(&self) -> Result<EngineJob> {
        let data = self
            .call(self.client.post(self.url(&self.ingestion_jobs_path())))
            .await?;

        let parsed: StartJobResponse = serde_json::from_value(data)?;
        debug!(job_id = %parsed.job_id, "Ingestion job started");

        Ok(EngineJob {
            job_id: parsed.job_id,
        })
    }

    async fn ingestion_job_status(&self, job_id: &str) -> Result<EngineJobStatus> {
        let path = format!("{}/{}", self.ingestion_jobs_path(), job_id);
        let data = self.call(self.client.get(self.url(&path))).await?;

        let parsed: JobStatusResponse = serde_json::from_value(data)?;
        let state = match parsed.status.as_str() {
            "COMPLETE" | "complete" | "succeeded" => EngineJobState::Complete,
            "FAILED" | "failed" => EngineJobState::Failed,
            _ => EngineJobState::InProgress,
        };

        Ok(EngineJobStatus {
            state,
            failure_reason: if parsed.failure_reasons.is_empty() {
                None
            } else {
                Some(parsed.failure_reasons.join("; "))
            },
        })
    }

    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedPassage>> {
        let path = format!("knowledge-bases/{}/retrieve", self.config.knowledge_base_id);
        let request_body = RetrieveRequest {
            query: RetrievalQuery { text: question },
            number_of_results: top_k,
        };

        let data = self
            .call(self.client.post(self.url(&path)).json(&request_body))
            .await?;

        let parsed: RetrieveResponse = serde_json::from_value(data)?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| RetrievedPassage {
                content: r.content.text,
                document_reference: r
                    .location
                    .and_then(|l| l.s3_location)
                    .map(|l| l.uri)
                    .unwrap_or_default(),
                score: r.score.clamp(0.0, 1.0),
            })
            .collect())
    }

    async fn generate(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
    ) -> Result<GeneratedAnswer> {
        let request_body = GenerateRequest {
            model_id: &self.config.model_id,
            prompt: build_generation_prompt(question, passages),
        };

        let data = self
            .call(self.client.post(self.url("generate")).json(&request_body))
            .await?;

        let parsed: GenerateResponse = serde_json::from_value(data)?;
        Ok(GeneratedAnswer {
            answer: parsed.answer,
            model_id: parsed.model_id.unwrap_or_else(|| self.config.model_id.clone()),
        })
    }

    async fn delete_document(&self, storage_key: &str) -> Result<bool> {
        let path = format!(
            "knowledge-bases/{}/documents",
            self.config.knowledge_base_id
        );

        let result = self
            .call(
                self.client
                    .delete(self.url(&path))
                    .query(&[("uri", storage_key)]),
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            // Unknown to the index is as good as deleted
            Err(AppError::NotFound { .. }) => Ok(true),
            Err(e) => {
                warn!(storage_key = %storage_key, error = %e, "Index-side delete unconfirmed");
                Ok(false)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }
}

/// Configurable mock engine for tests
pub struct MockKnowledgeEngine {
    passages: Mutex<Vec<RetrievedPassage>>,
    job_results: Mutex<HashMap<String, EngineJobStatus>>,
    conflicts_remaining: AtomicU32,
    transient_failures_remaining: AtomicU32,
    fail_job_start: AtomicBool,
    fail_generation: AtomicBool,
    confirm_deletes: AtomicBool,
    jobs_started: AtomicU32,
    job_counter: AtomicU32,
    deleted: Mutex<Vec<String>>,
}

impl Default for MockKnowledgeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKnowledgeEngine {
    pub fn new() -> Self {
        Self {
            passages: Mutex::new(Vec::new()),
            job_results: Mutex::new(HashMap::new()),
            conflicts_remaining: AtomicU32::new(0),
            transient_failures_remaining: AtomicU32::new(0),
            fail_job_start: AtomicBool::new(false),
            fail_generation: AtomicBool::new(false),
            confirm_deletes: AtomicBool::new(true),
            jobs_started: AtomicU32::new(0),
            job_counter: AtomicU32::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Seed the passages returned by retrieval
    pub fn with_passages(self, passages: Vec<RetrievedPassage>) -> Self {
        *self.passages.lock().unwrap() = passages;
        self
    }

    /// Reject the next `n` job starts with a concurrent-job conflict
    pub fn reject_next_job_starts(&self, n: u32) {
        self.conflicts_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` retrieval calls with a transient upstream error
    pub fn fail_next_retrievals(&self, n: u32) {
        self.transient_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Make job starts fail with an unrecoverable upstream error
    pub fn fail_job_start(&self, fail: bool) {
        self.fail_job_start.store(fail, Ordering::SeqCst);
    }

    /// Make generation calls fail
    pub fn fail_generation(&self, fail: bool) {
        self.fail_generation.store(fail, Ordering::SeqCst);
    }

    /// Make index-side deletes report unconfirmed
    pub fn confirm_deletes(&self, confirm: bool) {
        self.confirm_deletes.store(confirm, Ordering::SeqCst);
    }

    /// Resolve a job so the next status poll observes the outcome
    pub fn resolve_job(&self, job_id: &str, state: EngineJobState, reason: Option<&str>) {
        self.job_results.lock().unwrap().insert(
            job_id.to_string(),
            EngineJobStatus {
                state,
                failure_reason: reason.map(String::from),
            },
        );
    }

    /// Total successful job starts
    pub fn jobs_started(&self) -> u32 {
        self.jobs_started.load(Ordering::SeqCst)
    }

    /// Storage keys deleted from the index
    pub fn deleted_references(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeEngine for MockKnowledgeEngine {
    async fn start_ingestion_job(&self) -> Result<EngineJob> {
        if self.fail_job_start.load(Ordering::SeqCst) {
            return Err(AppError::Upstream {
                service: "knowledge-engine".to_string(),
                message: "job start failed".to_string(),
            });
        }

        let remaining = self.conflicts_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Conflict {
                message: "ingestion job already running for data source".to_string(),
            });
        }

        self.jobs_started.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("mock-job-{}", self.job_counter.fetch_add(1, Ordering::SeqCst));
        Ok(EngineJob { job_id })
    }

    async fn ingestion_job_status(&self, job_id: &str) -> Result<EngineJobStatus> {
        Ok(self
            .job_results
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or(EngineJobStatus {
                state: EngineJobState::InProgress,
                failure_reason: None,
            }))
    }

    async fn retrieve(&self, _question: &str, top_k: usize) -> Result<Vec<RetrievedPassage>> {
        let remaining = self.transient_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Upstream {
                service: "knowledge-engine".to_string(),
                message: "transient retrieval failure".to_string(),
            });
        }

        let passages = self.passages.lock().unwrap();
        Ok(passages.iter().take(top_k).cloned().collect())
    }

    async fn generate(
        &self,
        _question: &str,
        passages: &[RetrievedPassage],
    ) -> Result<GeneratedAnswer> {
        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(AppError::Upstream {
                service: "knowledge-engine".to_string(),
                message: "generation failed".to_string(),
            });
        }

        let answer = if passages.is_empty() {
            "I could not find relevant information in the knowledge base.".to_string()
        } else {
            format!("Answer grounded in {} passages.", passages.len())
        };

        Ok(GeneratedAnswer {
            answer,
            model_id: "mock-model".to_string(),
        })
    }

    async fn delete_document(&self, storage_key: &str) -> Result<bool> {
        self.deleted.lock().unwrap().push(storage_key.to_string());
        Ok(self.confirm_deletes.load(Ordering::SeqCst))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(content: &str, score: f64) -> RetrievedPassage {
        RetrievedPassage {
            content: content.to_string(),
            document_reference: "s3://bucket/documents/doc.pdf".to_string(),
            score,
        }
    }

    #[test]
    fn test_prompt_includes_passages() {
        let prompt = build_generation_prompt(
            "What is the refund policy?",
            &[passage("Refunds within 30 days.", 0.92)],
        );
        assert!(prompt.contains("[1] Refunds within 30 days."));
        assert!(prompt.contains("What is the refund policy?"));
        assert!(!prompt.contains(NO_CONTEXT_FRAMING));
    }

    #[test]
    fn test_prompt_no_context_framing() {
        let prompt = build_generation_prompt("What is the refund policy?", &[]);
        assert!(prompt.contains(NO_CONTEXT_FRAMING));
    }

    #[tokio::test]
    async fn test_mock_conflict_then_success() {
        let engine = MockKnowledgeEngine::new();
        engine.reject_next_job_starts(1);

        let err = engine.start_ingestion_job().await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        let job = engine.start_ingestion_job().await.unwrap();
        assert!(job.job_id.starts_with("mock-job-"));
        assert_eq!(engine.jobs_started(), 1);
    }

    #[tokio::test]
    async fn test_mock_job_resolution() {
        let engine = MockKnowledgeEngine::new();
        let job = engine.start_ingestion_job().await.unwrap();

        let status = engine.ingestion_job_status(&job.job_id).await.unwrap();
        assert_eq!(status.state, EngineJobState::InProgress);

        engine.resolve_job(&job.job_id, EngineJobState::Failed, Some("parse error"));
        let status = engine.ingestion_job_status(&job.job_id).await.unwrap();
        assert_eq!(status.state, EngineJobState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some("parse error"));
    }

    #[tokio::test]
    async fn test_mock_retrieval_respects_top_k() {
        let engine = MockKnowledgeEngine::new().with_passages(vec![
            passage("a", 0.9),
            passage("b", 0.8),
            passage("c", 0.7),
        ]);

        let results = engine.retrieve("question", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_zero_passage_generation_is_non_empty() {
        let engine = MockKnowledgeEngine::new();
        let answer = engine.generate("anything", &[]).await.unwrap();
        assert!(!answer.answer.is_empty());
    }

    #[test]
    fn test_envelope_to_error_mapping() {
        let err = envelope_to_error(ErrorEnvelope {
            kind: ErrorKind::Conflict,
            message: "busy".into(),
        });
        assert!(matches!(err, AppError::Conflict { .. }));

        let err = envelope_to_error(ErrorEnvelope {
            kind: ErrorKind::Upstream,
            message: "down".into(),
        });
        assert!(matches!(err, AppError::Upstream { .. }));
    }
}
