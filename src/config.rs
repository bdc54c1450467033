//! Process configuration.
//!
//! Loaded once at startup and passed into component constructors.
//!
//! ## Environment
//!
//! - `SQS_QUEUE_URL`: queue to consume (required for the consumer)
//! - `AWS_REGION`: queue region (required for the consumer)
//! - `CATALOG_API_ENDPOINT`: catalog base URL (required)
//! - `CATALOG_LOGIN_EMAIL`: catalog login email (required)
//! - `CATALOG_LOGIN_PASSWORD`: catalog login password (required)
//! - `DATABASE_URL`: job store connection string (required)
//! - `STORE_TIMEOUT_SECS`: bound on each store call (default: 10)
//! - `HTTP_TIMEOUT_SECS`: bound on each catalog call (default: 30)
//! - `WORKER_CONCURRENCY`: messages processed in parallel (default: 4)
//! - `QUEUE_WAIT_TIME_SECS`: long-poll wait (default: 20)
//! - `QUEUE_BATCH_SIZE`: messages per receive, 1..=10 (default: 10)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("{0} is required but not set")]
    Missing(&'static str),
    /// A variable is set but cannot be used.
    #[error("{var} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Catalog service location and login.
pub struct CatalogSettings {
    /// Base URL, without trailing slash.
    pub endpoint: String,
    /// Login email.
    pub login_email: String,
    /// Login password.
    pub login_password: SecretString,
    /// Bound on each HTTP call.
    pub http_timeout: Duration,
}

impl fmt::Debug for CatalogSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogSettings")
            .field("endpoint", &self.endpoint)
            .field("login_email", &self.login_email)
            .field("login_password", &"[REDACTED]")
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

/// Queue transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Queue URL.
    pub queue_url: String,
    /// Queue region.
    pub region: String,
    /// Long-poll wait.
    pub wait_time: Duration,
    /// Messages requested per receive.
    pub batch_size: i32,
    /// Messages processed in parallel.
    pub concurrency: usize,
}

/// Settings for the queue consumer.
#[derive(Debug)]
pub struct Settings {
    /// Queue transport.
    pub queue: QueueSettings,
    /// Catalog service.
    pub catalog: CatalogSettings,
    /// Job store connection string.
    pub database_url: String,
    /// Bound on each store call.
    pub store_timeout: Duration,
}

/// Settings for a one-shot upload, which needs no queue.
#[derive(Debug)]
pub struct UploadSettings {
    /// Catalog service.
    pub catalog: CatalogSettings,
    /// Job store connection string.
    pub database_url: String,
    /// Bound on each store call.
    pub store_timeout: Duration,
}

impl Settings {
    /// Load consumer settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load consumer settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let batch_size: i32 = env.parsed("QUEUE_BATCH_SIZE", 10)?;
        if !(1..=10).contains(&batch_size) {
            return Err(ConfigError::Invalid {
                var: "QUEUE_BATCH_SIZE",
                reason: format!("must be between 1 and 10, got {batch_size}"),
            });
        }

        let concurrency: usize = env.parsed("WORKER_CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "WORKER_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }

        let queue = QueueSettings {
            queue_url: env.required("SQS_QUEUE_URL")?,
            region: env.required("AWS_REGION")?,
            wait_time: Duration::from_secs(env.parsed("QUEUE_WAIT_TIME_SECS", 20)?),
            batch_size,
            concurrency,
        };

        let upload = UploadSettings::from_lookup(&lookup)?;

        Ok(Self {
            queue,
            catalog: upload.catalog,
            database_url: upload.database_url,
            store_timeout: upload.store_timeout,
        })
    }
}

impl UploadSettings {
    /// Load upload settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load upload settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let endpoint = env.required("CATALOG_API_ENDPOINT")?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "CATALOG_API_ENDPOINT",
                reason: "must be an http(s) URL".to_string(),
            });
        }

        let catalog = CatalogSettings {
            endpoint,
            login_email: env.required("CATALOG_LOGIN_EMAIL")?,
            login_password: SecretString::from(env.required("CATALOG_LOGIN_PASSWORD")?),
            http_timeout: Duration::from_secs(env.parsed("HTTP_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            catalog,
            database_url: env.required("DATABASE_URL")?,
            store_timeout: Duration::from_secs(env.parsed("STORE_TIMEOUT_SECS", 10)?),
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        match (self.0)(var) {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(ConfigError::Missing(var)),
        }
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match (self.0)(var) {
            Some(value) if !value.trim().is_empty() => {
                value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                })
            }
            _ => Ok(default),
        }
    }
}
