//! Job and task records produced by the upstream segmentation workers.
//!
//! These rows are created and mutated outside this crate; the pipeline only
//! reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a segmentation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new JobId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for a segment task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new TaskId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A segmentation run over one manifestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub job_id: JobId,
    /// Manifestation this job segmented.
    pub manifestation_id: String,
    /// Number of segments, fixed at job creation.
    pub total_segments: i64,
    /// Number of segments finished so far (monotonically non-decreasing).
    pub completed_segments: i64,
    /// When the job row was created.
    pub created_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job record.
    pub fn new(
        job_id: JobId,
        manifestation_id: impl Into<String>,
        total_segments: i64,
        completed_segments: i64,
    ) -> Self {
        Self {
            job_id,
            manifestation_id: manifestation_id.into(),
            total_segments,
            completed_segments,
            created_at: None,
        }
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// A job is complete once every segment has been processed.
    pub fn is_complete(&self) -> bool {
        self.completed_segments >= self.total_segments
    }
}

/// One processed segment under a job.
///
/// `result_json` is kept as raw JSON; its shape is validated by the
/// aggregator, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTask {
    /// Task identifier.
    pub task_id: TaskId,
    /// Owning job.
    pub job_id: JobId,
    /// Segment identifier within the manifestation.
    pub segment_id: String,
    /// Worker-reported status.
    pub status: String,
    /// Raw mapping entries, expected to be `[{manifestation_id, segments}]`.
    pub result_json: Option<serde_json::Value>,
    /// Where the worker stored its full result, if anywhere.
    pub result_location: Option<String>,
    /// Worker-reported error, if any.
    pub error_message: Option<String>,
    /// Row creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Row update time.
    pub updated_at: Option<DateTime<Utc>>,
}

impl SegmentTask {
    /// Create a completed task carrying the given result.
    pub fn new(
        task_id: TaskId,
        job_id: JobId,
        segment_id: impl Into<String>,
        result_json: Option<serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            job_id,
            segment_id: segment_id.into(),
            status: "COMPLETED".to_string(),
            result_json,
            result_location: None,
            error_message: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Override the status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_completeness() {
        let id = JobId::new(Uuid::from_u128(1));
        assert!(Job::new(id, "M1", 3, 3).is_complete());
        assert!(Job::new(id, "M1", 3, 4).is_complete());
        assert!(!Job::new(id, "M1", 3, 2).is_complete());
        assert!(Job::new(id, "M1", 0, 0).is_complete());
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId::new(Uuid::from_u128(1));
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000001");
    }
}
