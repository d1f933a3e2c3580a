//! Document entity and lifecycle rules

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Document lifecycle status
///
/// Transitions only move forward: pending -> uploaded -> processing ->
/// indexed. `failed` is terminal and reachable from `uploaded` (job-start
/// retries exhausted) or `processing` (engine job failed). A failed
/// document is never revived; a fresh upload gets a fresh id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Uploaded,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    /// Whether a transition from `self` to `next` is legal
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded)
                | (Uploaded, Processing)
                | (Uploaded, Failed)
                | (Processing, Indexed)
                | (Processing, Failed)
        )
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Indexed | DocumentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "indexed" => Some(DocumentStatus::Indexed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl From<String> for DocumentStatus {
    fn from(s: String) -> Self {
        DocumentStatus::parse(&s).unwrap_or(DocumentStatus::Pending)
    }
}

impl From<DocumentStatus> for String {
    fn from(status: DocumentStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub storage_key: String,

    #[sea_orm(column_type = "Text")]
    pub original_filename: String,

    #[sea_orm(column_type = "Text")]
    pub content_type: String,

    pub size_bytes: i64,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_detail: Option<String>,

    pub uploaded_at: DateTimeWithTimeZone,

    pub indexed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the document status as an enum
    pub fn document_status(&self) -> DocumentStatus {
        DocumentStatus::from(self.status.clone())
    }

    /// File extension derived from the original filename, lowercase
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.original_filename.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
