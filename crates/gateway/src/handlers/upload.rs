//! Upload orchestration handler
//!
//! Issues short-lived, write-only presigned URLs for direct
//! client-to-store uploads. Validation runs before any credential is
//! issued; a credential-issuance failure rolls the pending record back.

use axum::{extract::State, http::StatusCode, Json};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AuthContext};
use docharbor_common::{
    cache::keys,
    config::StorageConfig,
    db::{DocumentStore, NewDocument},
    errors::{AppError, Result},
    metrics,
    storage::{storage_key, ObjectStore},
};

/// Request for an upload credential
#[derive(Debug, Deserialize, Validate)]
pub struct UploadRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,

    #[serde(rename = "contentType")]
    #[validate(length(min = 1, max = 255))]
    pub content_type: String,

    #[serde(rename = "fileSize")]
    pub file_size: i64,
}

/// Issued upload credential
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "uploadUrl")]
    pub upload_url: String,

    #[serde(rename = "fileId")]
    pub file_id: Uuid,

    #[serde(rename = "s3Key")]
    pub s3_key: String,

    pub bucket: String,

    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 ._()\-]*$").unwrap())
}

/// Content types accepted for each allowed extension. Browsers fall back
/// to octet-stream often enough that it is accepted everywhere.
fn content_type_matches(extension: &str, content_type: &str) -> bool {
    if content_type == "application/octet-stream" {
        return true;
    }

    let expected: &[&str] = match extension {
        "pdf" => &["application/pdf"],
        "docx" => &[
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ],
        "doc" => &["application/msword"],
        "txt" => &["text/plain"],
        "md" => &["text/markdown", "text/x-markdown", "text/plain"],
        "csv" => &["text/csv", "application/csv"],
        "json" => &["application/json"],
        _ => &[],
    };

    expected.contains(&content_type)
}

/// Validate an upload request against the storage policy.
///
/// Returns the lowercase extension on success. Runs before any record is
/// created or credential issued.
pub fn validate_upload(config: &StorageConfig, request: &UploadRequest) -> Result<String> {
    if !filename_pattern().is_match(&request.filename) {
        return Err(AppError::Validation {
            message: "Filename contains unsupported characters".to_string(),
            field: Some("filename".to_string()),
        });
    }

    let extension = request
        .filename
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .ok_or_else(|| AppError::Validation {
            message: "Filename has no extension".to_string(),
            field: Some("filename".to_string()),
        })?;

    if !config.allowed_extensions.contains(&extension) {
        return Err(AppError::InvalidFileType { extension });
    }

    if !content_type_matches(&extension, &request.content_type) {
        return Err(AppError::Validation {
            message: format!(
                "Content type '{}' does not match extension '{}'",
                request.content_type, extension
            ),
            field: Some("contentType".to_string()),
        });
    }

    if request.file_size <= 0 {
        return Err(AppError::Validation {
            message: "File size must be positive".to_string(),
            field: Some("fileSize".to_string()),
        });
    }

    if request.file_size > config.max_file_size_bytes() {
        return Err(AppError::FileTooLarge {
            size_bytes: request.file_size,
            limit_bytes: config.max_file_size_bytes(),
        });
    }

    Ok(extension)
}

/// Issue an upload credential and register the pending document
pub async fn request_upload(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let storage = &state.config.storage;

    let extension = match validate_upload(storage, &request) {
        Ok(extension) => extension,
        Err(e) => {
            metrics::record_upload(false, "rejected");
            return Err(e);
        }
    };

    let file_id = Uuid::new_v4();
    let key = storage_key(&storage.key_prefix, file_id, &extension);

    state
        .store
        .insert_document(NewDocument {
            id: file_id,
            storage_key: key.clone(),
            original_filename: request.filename.clone(),
            content_type: request.content_type.clone(),
            size_bytes: request.file_size,
        })
        .await?;

    let presigned = match state
        .objects
        .presign_upload(&key, &request.content_type, storage.presign_expiry_secs)
        .await
    {
        Ok(presigned) => presigned,
        Err(e) => {
            // Roll the record back; the caller never saw the id
            if let Err(rollback) = state.store.delete_document(file_id).await {
                tracing::error!(
                    document_id = %file_id,
                    error = %rollback,
                    "Failed to roll back document record after presign failure"
                );
            }
            return Err(e);
        }
    };

    metrics::record_upload(true, &extension);

    // The summary endpoint caches document totals; a new record stales them
    if let Some(ref cache) = state.cache {
        if let Err(e) = cache.delete(&keys::kb_summary()).await {
            tracing::debug!(error = %e, "Failed to invalidate summary cache");
        }
    }

    tracing::info!(
        document_id = %file_id,
        filename = %request.filename,
        size_bytes = request.file_size,
        subject = %auth.subject,
        "Upload credential issued"
    );

    Ok((
        StatusCode::OK,
        Json(UploadResponse {
            upload_url: presigned.url,
            file_id,
            s3_key: key,
            bucket: state.objects.bucket().to_string(),
            expires_in: presigned.expires_in_secs,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_config() -> StorageConfig {
        StorageConfig {
            bucket: "docharbor-uploads".to_string(),
            key_prefix: "documents/".to_string(),
            allowed_extensions: ["pdf", "docx", "doc", "txt", "md", "csv", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size_mb: 100,
            presign_expiry_secs: 900,
        }
    }

    fn request(filename: &str, content_type: &str, size: i64) -> UploadRequest {
        UploadRequest {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            file_size: size,
        }
    }

    #[test]
    fn test_valid_pdf_passes() {
        let ext = validate_upload(
            &storage_config(),
            &request("report.pdf", "application/pdf", 2 * 1024 * 1024),
        )
        .unwrap();
        assert_eq!(ext, "pdf");
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let ext = validate_upload(
            &storage_config(),
            &request("Report.PDF", "application/pdf", 1024),
        )
        .unwrap();
        assert_eq!(ext, "pdf");
    }

    #[test]
    fn test_disallowed_extension_rejected() {
        let err = validate_upload(
            &storage_config(),
            &request("malware.exe", "application/octet-stream", 1024),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidFileType { extension } if extension == "exe"));
    }

    #[test]
    fn test_missing_extension_rejected() {
        let err = validate_upload(&storage_config(), &request("README", "text/plain", 10))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_oversize_rejected() {
        let limit = storage_config().max_file_size_bytes();
        let err = validate_upload(
            &storage_config(),
            &request("big.pdf", "application/pdf", limit + 1),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { .. }));
    }

    #[test]
    fn test_zero_size_rejected() {
        let err = validate_upload(
            &storage_config(),
            &request("empty.pdf", "application/pdf", 0),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_mismatched_content_type_rejected() {
        let err = validate_upload(
            &storage_config(),
            &request("report.pdf", "text/html", 1024),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_octet_stream_accepted_for_any_allowed_extension() {
        assert!(validate_upload(
            &storage_config(),
            &request("notes.md", "application/octet-stream", 1024),
        )
        .is_ok());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let err = validate_upload(
            &storage_config(),
            &request("../secrets.pdf", "application/pdf", 1024),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
