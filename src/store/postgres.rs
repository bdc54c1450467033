//! PostgreSQL job store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 1)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! Reads `root_jobs` and `segment_tasks`, both owned by the segmentation
//! service. This crate never writes to either table.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use crate::types::{Job, JobId, SegmentTask, TaskId};
use super::JobStore;

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 1).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Pool settings from environment variables, with the given database URL.
    pub fn from_env(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 1),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

fn env_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// PostgreSQL job store.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    fn parse_job_row(row: &PgRow) -> Result<Job, sqlx::Error> {
        let job_id: Uuid = row.try_get("job_id")?;
        let manifestation_id: String = row.try_get("manifestation_id")?;
        let total: Option<i32> = row.try_get("total_segments")?;
        let completed: Option<i32> = row.try_get("completed_segments")?;
        let created_at: Option<chrono::DateTime<chrono::Utc>> = row.try_get("created_at")?;

        let mut job = Job::new(
            JobId::new(job_id),
            manifestation_id,
            i64::from(total.unwrap_or(0)),
            i64::from(completed.unwrap_or(0)),
        );
        job.created_at = created_at;
        Ok(job)
    }

    fn parse_task_row(row: &PgRow) -> Result<SegmentTask, sqlx::Error> {
        Ok(SegmentTask {
            task_id: TaskId::new(row.try_get("task_id")?),
            job_id: JobId::new(row.try_get("job_id")?),
            segment_id: row.try_get("segment_id")?,
            status: row.try_get::<Option<String>, _>("status")?.unwrap_or_default(),
            result_json: row.try_get("result_json")?,
            result_location: row.try_get("result_location")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
impl JobStore for PostgresJobStore {
    type Error = PostgresError;

    async fn find_job_by_manifestation(
        &self,
        manifestation_id: &str,
    ) -> Result<Option<Job>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT job_id, manifestation_id, total_segments, completed_segments, created_at
            FROM root_jobs
            WHERE manifestation_id = $1
            ORDER BY created_at DESC NULLS LAST, job_id
            LIMIT 1
            "#
        )
        .bind(manifestation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_job_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks_by_job(&self, job_id: &JobId) -> Result<Vec<SegmentTask>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, job_id, segment_id, status, result_json,
                   result_location, error_message, created_at, updated_at
            FROM segment_tasks
            WHERE job_id = $1
            ORDER BY created_at NULLS LAST, task_id
            "#
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_task_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Needs a reachable database: `TEST_DATABASE_URL=postgres://... cargo test --features postgres -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_connect_and_health_check() {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let store = PostgresJobStore::new(PostgresConfig::from_env(url)).await.unwrap();
        assert!(store.is_healthy().await);
    }
}
