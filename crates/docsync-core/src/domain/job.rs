//! Jobs discovered on the document source and what harvesting produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{Category, JobId};

/// One structured row produced by the transformer.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A job as listed by the document source. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub category: Category,
    /// Source page (list URL, folder, ...) the job was enumerated from.
    pub page: String,
    pub discovered_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(
        job_id: JobId,
        category: Category,
        page: impl Into<String>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            category,
            page: page.into(),
            discovered_at,
        }
    }
}

/// Raw document content as fetched from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub job_id: JobId,
    pub content: String,
}

/// Transformed rows of one harvested job, waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub job_id: JobId,
    pub category: Category,
    pub rows: Vec<Row>,
    pub harvested_at: DateTime<Utc>,
    pub harvested_by: String,
}
