//! Job storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use crate::types::{Job, JobId, SegmentTask};

/// Read interface over the segmentation job store.
///
/// Implementations must return tasks in a stable order; the relation
/// graph preserves whatever order is returned here.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Find the job for a manifestation, if one exists.
    async fn find_job_by_manifestation(
        &self,
        manifestation_id: &str,
    ) -> Result<Option<Job>, Self::Error>;

    /// List every task belonging to a job.
    async fn list_tasks_by_job(&self, job_id: &JobId) -> Result<Vec<SegmentTask>, Self::Error>;
}

pub use memory::InMemoryJobStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;
