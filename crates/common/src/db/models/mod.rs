//! SeaORM entity models
//!
//! Database entities for DocHarbor

mod document;
mod ingestion_job;

pub use document::{
    Entity as DocumentEntity,
    Model as Document,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    DocumentStatus,
};

pub use ingestion_job::{
    document_ids_json,
    Entity as IngestionJobEntity,
    Model as IngestionJob,
    ActiveModel as IngestionJobActiveModel,
    Column as IngestionJobColumn,
    JobState,
};
