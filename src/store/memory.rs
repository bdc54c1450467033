//! In-memory job store for testing and local runs.

use std::collections::BTreeMap;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{Job, JobId, SegmentTask};
use super::JobStore;

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Simulated backend outage.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// In-memory job store.
///
/// Tasks keep insertion order. When several jobs exist for a manifestation,
/// the last one added wins, mirroring "most recently created" in Postgres.
/// Interior locking lets tests advance job progress through a shared handle.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<Job>>,
    tasks: RwLock<BTreeMap<JobId, Vec<SegmentTask>>>,
    unavailable: RwLock<Option<String>>,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryJobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job to the store.
    pub fn add_job(&self, job: Job) {
        self.jobs.write().push(job);
    }

    /// Append a task to its job.
    pub fn add_task(&self, task: SegmentTask) {
        self.tasks.write().entry(task.job_id).or_default().push(task);
    }

    /// Set the completed segment count of a job.
    pub fn set_completed(&self, job_id: &JobId, completed_segments: i64) {
        for job in self.jobs.write().iter_mut().filter(|j| &j.job_id == job_id) {
            job.completed_segments = completed_segments;
        }
    }

    /// Make every subsequent call fail with the given reason.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.unavailable.write() = Some(reason.into());
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = Some(latency);
    }

    /// Get number of jobs.
    pub fn num_jobs(&self) -> usize {
        self.jobs.read().len()
    }

    async fn check_available(&self) -> Result<(), InMemoryError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.unavailable.read().as_ref() {
            Some(reason) => Err(InMemoryError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    type Error = InMemoryError;

    async fn find_job_by_manifestation(
        &self,
        manifestation_id: &str,
    ) -> Result<Option<Job>, Self::Error> {
        self.check_available().await?;
        Ok(self.jobs
            .read()
            .iter()
            .rev()
            .find(|j| j.manifestation_id == manifestation_id)
            .cloned())
    }

    async fn list_tasks_by_job(&self, job_id: &JobId) -> Result<Vec<SegmentTask>, Self::Error> {
        self.check_available().await?;
        Ok(self.tasks.read().get(job_id).cloned().unwrap_or_default())
    }
}
