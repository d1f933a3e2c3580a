//! Query orchestration handlers
//!
//! Retrieval is idempotent and retried on transient upstream errors;
//! generation is called exactly once. Zero retrieved passages degrade to
//! a no-context generation call instead of an error.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::{AppState, AuthContext};
use docharbor_common::{
    cache::keys,
    db::{DocumentStats, DocumentStore},
    engine::{is_transient, KnowledgeEngine, RetrievedPassage},
    errors::{AppError, Result},
    metrics, CHUNKS_PER_DOCUMENT_ESTIMATE,
};

/// Query request
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,

    pub top_k: Option<usize>,

    #[serde(default = "default_include_sources")]
    pub include_sources: bool,
}

fn default_include_sources() -> bool {
    true
}

/// A source attribution entry
#[derive(Debug, Serialize)]
pub struct Source {
    pub content_snippet: String,
    pub document_reference: String,
    pub confidence_score: f64,
}

/// Query response
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub metadata: QueryMetadata,
}

#[derive(Debug, Serialize)]
pub struct QueryMetadata {
    pub model_id: String,
    pub latency_ms: u64,
    pub passages_retrieved: usize,
}

/// Map passages into sources ordered by descending confidence
pub fn build_sources(passages: Vec<RetrievedPassage>) -> Vec<Source> {
    let mut sources: Vec<Source> = passages
        .into_iter()
        .map(|p| Source {
            content_snippet: p.content,
            document_reference: p.document_reference,
            confidence_score: p.score.clamp(0.0, 1.0),
        })
        .collect();

    sources.sort_by(|a, b| {
        b.confidence_score
            .partial_cmp(&a.confidence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    sources
}

/// Retrieval with bounded retry on transient upstream errors
pub async fn retrieve_with_retry(
    engine: &dyn KnowledgeEngine,
    question: &str,
    top_k: usize,
    retries: u32,
) -> Result<Vec<RetrievedPassage>> {
    let max_attempts = 1 + retries;
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = Duration::from_millis(200 * 2_u64.pow(attempt - 1));
            tokio::time::sleep(delay).await;
        }

        match engine.retrieve(question, top_k).await {
            Ok(passages) => return Ok(passages),
            Err(e) if is_transient(&e) && attempt + 1 < max_attempts => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    "Retrieval failed, retrying"
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::Upstream {
        service: "knowledge-engine".to_string(),
        message: "Retrieval failed after retries".to_string(),
    }))
}

/// Answer a natural-language question against the knowledge base
pub async fn query(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();
    let engine_config = &state.config.engine;

    let question = request.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation {
            message: "Question must not be empty".to_string(),
            field: Some("question".to_string()),
        });
    }
    if question.chars().count() > engine_config.max_question_chars {
        return Err(AppError::Validation {
            message: format!(
                "Question exceeds maximum length of {} characters",
                engine_config.max_question_chars
            ),
            field: Some("question".to_string()),
        });
    }

    let top_k = request
        .top_k
        .unwrap_or(engine_config.default_top_k)
        .clamp(1, engine_config.max_top_k);

    let passages = retrieve_with_retry(
        state.engine.as_ref(),
        question,
        top_k,
        engine_config.retrieval_retries,
    )
    .await?;

    if passages.is_empty() {
        tracing::info!(subject = %auth.subject, "No passages retrieved; degrading to no-context generation");
    }

    // Generation is not retried automatically
    let generated = state.engine.generate(question, &passages).await?;

    let passages_retrieved = passages.len();
    let sources = if request.include_sources {
        build_sources(passages)
    } else {
        Vec::new()
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    metrics::record_query(latency_ms as f64 / 1000.0, passages_retrieved);

    tracing::info!(
        subject = %auth.subject,
        passages = passages_retrieved,
        latency_ms,
        "Query answered"
    );

    Ok(Json(QueryResponse {
        answer: generated.answer,
        sources,
        metadata: QueryMetadata {
            model_id: generated.model_id,
            latency_ms,
            passages_retrieved,
        },
    }))
}

/// Knowledge-base summary response
#[derive(Debug, Serialize)]
pub struct KnowledgeBaseStatusResponse {
    #[serde(rename = "knowledgeBase")]
    pub knowledge_base: KnowledgeBaseInfo,
    pub summary: KnowledgeBaseSummary,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeBaseInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "dataSourceId")]
    pub data_source_id: String,
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeBaseSummary {
    #[serde(rename = "totalDocuments")]
    pub total_documents: u64,

    #[serde(rename = "totalDocumentsIndexed")]
    pub total_documents_indexed: u64,

    /// Estimated: the engine does not report exact chunk counts
    #[serde(rename = "estimatedChunksIndexed")]
    pub estimated_chunks_indexed: u64,

    #[serde(rename = "fileTypeDistribution")]
    pub file_type_distribution: std::collections::BTreeMap<String, u64>,
}

/// Knowledge-base summary, cached briefly when Redis is configured
pub async fn knowledge_base_status(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<KnowledgeBaseStatusResponse>> {
    let stats: DocumentStats = match state.cache {
        Some(ref cache) => {
            let store = state.store.clone();
            cache
                .get_or_load(&keys::kb_summary(), 60, move || async move {
                    store.stats().await
                })
                .await?
        }
        None => state.store.stats().await?,
    };

    let engine_config = &state.config.engine;

    Ok(Json(KnowledgeBaseStatusResponse {
        knowledge_base: KnowledgeBaseInfo {
            id: engine_config.knowledge_base_id.clone(),
            name: state.config.observability.service_name.clone(),
            data_source_id: engine_config.data_source_id.clone(),
            model_id: engine_config.model_id.clone(),
            status: "ACTIVE".to_string(),
        },
        summary: KnowledgeBaseSummary {
            total_documents: stats.total_documents,
            total_documents_indexed: stats.indexed_count,
            estimated_chunks_indexed: stats.indexed_count * CHUNKS_PER_DOCUMENT_ESTIMATE,
            file_type_distribution: stats.file_type_distribution,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docharbor_common::engine::MockKnowledgeEngine;

    fn passage(content: &str, score: f64) -> RetrievedPassage {
        RetrievedPassage {
            content: content.to_string(),
            document_reference: format!("s3://bucket/documents/{}.pdf", content),
            score,
        }
    }

    #[test]
    fn test_sources_sorted_descending() {
        let sources = build_sources(vec![
            passage("low", 0.31),
            passage("high", 0.92),
            passage("mid", 0.55),
        ]);

        let scores: Vec<f64> = sources.iter().map(|s| s.confidence_score).collect();
        assert_eq!(scores, vec![0.92, 0.55, 0.31]);
        assert_eq!(sources[0].content_snippet, "high");
    }

    #[test]
    fn test_scores_clamped_to_unit_interval() {
        let sources = build_sources(vec![passage("a", 1.7), passage("b", -0.4)]);
        assert_eq!(sources[0].confidence_score, 1.0);
        assert_eq!(sources[1].confidence_score, 0.0);
    }

    #[tokio::test]
    async fn test_retrieve_retry_recovers_from_transient_failure() {
        let engine = MockKnowledgeEngine::new().with_passages(vec![passage("a", 0.9)]);
        engine.fail_next_retrievals(1);

        let passages = retrieve_with_retry(&engine, "question", 5, 2).await.unwrap();
        assert_eq!(passages.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_retry_exhaustion_surfaces_upstream() {
        let engine = MockKnowledgeEngine::new();
        engine.fail_next_retrievals(10);

        let err = retrieve_with_retry(&engine, "question", 5, 2).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { .. }));
    }
}
