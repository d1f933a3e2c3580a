//! Ingestion job entity for async vectorization tracking

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Job state enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "succeeded" => JobState::Succeeded,
            "failed" => JobState::Failed,
            _ => JobState::Running,
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ingestion_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Job identifier assigned by the knowledge engine
    #[sea_orm(column_type = "Text")]
    pub engine_job_id: String,

    /// Document ids covered by this job, as a JSON array. One job may
    /// cover many documents batched into the same slot.
    #[sea_orm(column_type = "JsonBinary")]
    pub document_ids: serde_json::Value,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Job-start attempts consumed before this job was accepted
    pub attempt_count: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub started_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the job state as an enum
    pub fn job_state(&self) -> JobState {
        JobState::from(self.status.clone())
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.job_state(), JobState::Succeeded | JobState::Failed)
    }

    /// Document ids covered by this job
    pub fn covered_documents(&self) -> Vec<Uuid> {
        self.document_ids
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Seconds this job has been running, relative to `now`
    pub fn age_secs(&self, now: chrono::DateTime<chrono::Utc>) -> i64 {
        (now - self.started_at.with_timezone(&chrono::Utc)).num_seconds()
    }
}

/// Serialize document ids into the stored JSON shape
pub fn document_ids_json(ids: &[Uuid]) -> serde_json::Value {
    serde_json::Value::Array(
        ids.iter()
            .map(|id| serde_json::Value::String(id.to_string()))
            .collect(),
    )
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(ids: serde_json::Value) -> Model {
        let now = chrono::Utc::now();
        Model {
            id: Uuid::new_v4(),
            engine_job_id: "job-123".into(),
            document_ids: ids,
            status: "running".into(),
            attempt_count: 0,
            error_message: None,
            started_at: now.into(),
            completed_at: None,
        }
    }

    #[test]
    fn test_covered_documents_roundtrip() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let job = sample_job(document_ids_json(&ids));
        assert_eq!(job.covered_documents(), ids);
    }

    #[test]
    fn test_covered_documents_skips_malformed_entries() {
        let job = sample_job(serde_json::json!(["not-a-uuid", 7]));
        assert!(job.covered_documents().is_empty());
    }

    #[test]
    fn test_job_state_parsing() {
        let mut job = sample_job(serde_json::json!([]));
        assert_eq!(job.job_state(), JobState::Running);
        assert!(!job.is_terminal());

        job.status = "succeeded".into();
        assert!(job.is_terminal());

        job.status = "failed".into();
        assert_eq!(job.job_state(), JobState::Failed);
    }
}
