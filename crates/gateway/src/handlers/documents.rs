//! Document tracking handlers: list, status, delete

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, AuthContext};
use docharbor_common::{
    cache::keys,
    db::models::{Document, DocumentStatus},
    db::DocumentStore,
    engine::KnowledgeEngine,
    errors::{AppError, Result},
    storage::ObjectStore,
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Optional status filter (pending, uploaded, processing, indexed, failed)
    pub status: Option<String>,
}

/// Document representation on the wire
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub status: String,
    pub upload_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<String>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Serialize)]
pub struct DocumentMetadata {
    pub storage_key: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        let file_type = document.extension().unwrap_or_else(|| "unknown".to_string());
        Self {
            id: document.id,
            name: document.original_filename,
            size: document.size_bytes,
            file_type,
            status: document.status,
            upload_date: document.uploaded_at.to_rfc3339(),
            processed_date: document.indexed_at.map(|dt| dt.to_rfc3339()),
            metadata: DocumentMetadata {
                storage_key: document.storage_key,
                content_type: document.content_type,
                error_detail: document.error_detail,
            },
        }
    }
}

/// List known documents, optionally filtered by status
pub async fn list_documents(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DocumentResponse>>> {
    let filter = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(DocumentStatus::parse(raw).ok_or_else(|| AppError::Validation {
            message: format!("Unknown status filter '{}'", raw),
            field: Some("status".to_string()),
        })?),
    };

    let documents = state.store.list_documents(filter).await?;

    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

/// Get a single document's lifecycle status
pub async fn get_document_status(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentResponse>> {
    let document = state
        .store
        .find_document(document_id)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound {
            id: document_id.to_string(),
        })?;

    Ok(Json(document.into()))
}

/// Delete a document from the store, the index, and the record set.
///
/// Store- and index-side deletes are best-effort: the record is removed
/// regardless of partial failure, and an unconfirmed index delete is
/// logged as a reconciliation task rather than surfaced as an error.
pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode> {
    let document = state
        .store
        .find_document(document_id)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound {
            id: document_id.to_string(),
        })?;

    if let Err(e) = state.objects.delete_object(&document.storage_key).await {
        tracing::warn!(
            document_id = %document_id,
            storage_key = %document.storage_key,
            error = %e,
            "Object-store delete failed; continuing with record removal"
        );
    }

    match state.engine.delete_document(&document.storage_key).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                document_id = %document_id,
                storage_key = %document.storage_key,
                "Index-side delete unconfirmed; orphaned vectors need reconciliation"
            );
        }
        Err(e) => {
            tracing::warn!(
                document_id = %document_id,
                error = %e,
                "Index-side delete failed; orphaned vectors need reconciliation"
            );
        }
    }

    state.store.delete_document(document_id).await?;

    if let Some(ref cache) = state.cache {
        if let Err(e) = cache.delete(&keys::kb_summary()).await {
            tracing::debug!(error = %e, "Failed to invalidate summary cache");
        }
    }

    tracing::info!(
        document_id = %document_id,
        subject = %auth.subject,
        "Document deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}
