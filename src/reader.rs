//! Job store reader.
//!
//! Gates aggregation on job completeness and returns the job's tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::store::JobStore;
use crate::types::{Job, JobId, SegmentTask};

/// Error type for reader operations.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// No job row exists for the manifestation.
    #[error("No job found for manifestation {manifestation_id}")]
    JobNotFound {
        /// Manifestation that was looked up.
        manifestation_id: String,
    },
    /// Segmentation is still running; try again later.
    #[error("Job {job_id} incomplete: {completed}/{total} segments")]
    JobIncomplete {
        /// Job that is still running.
        job_id: JobId,
        /// Segments completed so far.
        completed: i64,
        /// Segments expected.
        total: i64,
    },
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
    /// A store call exceeded the configured timeout.
    #[error("Store call {operation} timed out after {timeout:?}")]
    Timeout {
        /// Store operation that timed out.
        operation: &'static str,
        /// Configured bound.
        timeout: Duration,
    },
}

impl ReaderError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// Job id involved in the failure, when one was found.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobIncomplete { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

/// A complete job together with its tasks.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    /// The job row.
    pub job: Job,
    /// Tasks in store order.
    pub tasks: Vec<SegmentTask>,
}

/// Reads job state for a manifestation and refuses incomplete jobs.
pub struct JobStoreReader<S: JobStore> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: JobStore> JobStoreReader<S> {
    /// Create a reader whose store calls are bounded by `timeout`.
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Load the job and its tasks.
    ///
    /// Fails with [`ReaderError::JobNotFound`] when no job exists and with
    /// [`ReaderError::JobIncomplete`] while `completed_segments < total_segments`.
    /// Tasks are only listed once the job is known to be complete.
    pub async fn read_completed(&self, manifestation_id: &str) -> Result<CompletedJob, ReaderError> {
        let job = self
            .bounded("find_job_by_manifestation", self.store.find_job_by_manifestation(manifestation_id))
            .await?
            .ok_or_else(|| ReaderError::JobNotFound {
                manifestation_id: manifestation_id.to_string(),
            })?;

        if !job.is_complete() {
            return Err(ReaderError::JobIncomplete {
                job_id: job.job_id,
                completed: job.completed_segments,
                total: job.total_segments,
            });
        }

        let tasks = self
            .bounded("list_tasks_by_job", self.store.list_tasks_by_job(&job.job_id))
            .await?;

        tracing::debug!(
            manifestation_id = %manifestation_id,
            job_id = %job.job_id,
            task_count = tasks.len(),
            "Loaded completed job"
        );

        Ok(CompletedJob { job, tasks })
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ReaderError>
    where
        F: Future<Output = Result<T, S::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ReaderError::from_store),
            Err(_) => Err(ReaderError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}
