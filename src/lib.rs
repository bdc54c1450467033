//! # segment-mapping-publisher
//!
//! Publishes cross-text segment mappings for finished segmentation jobs.
//!
//! A queue message names a manifestation. Once every segment of that
//! manifestation's job is done, the task results are folded into one
//! relation graph and uploaded to the catalog service.
//!
//! ## Architecture
//!
//! ```text
//! Queue message → MessageHandler → JobStoreReader → aggregate → build_payload → CatalogPublisher
//!                                        ↓
//!                                 JobStore (Postgres or Memory)
//! ```
//!
//! ## Guarantees
//!
//! - Incomplete jobs are never aggregated or published
//! - Segment order follows task order; mapping order follows `result_json`
//! - Malformed task results abort the message; nothing is dropped silently
//! - Messages are acknowledged only after a successful publish, or when the
//!   message itself is unusable

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod store;
pub mod reader;
pub mod aggregator;
pub mod builder;
pub mod publisher;
pub mod handler;
pub mod consumer;
pub mod config;
pub mod metrics;
pub mod telemetry;

// Re-exports
pub use types::{
    AllTextSegmentRelationMapping, Job, JobId, Mapping, ParentMapping, SegmentTask,
    SegmentsRelation, TaskId, TextMapping, UploadPayload,
};
pub use store::{JobStore, InMemoryJobStore};
#[cfg(feature = "postgres")]
pub use store::PostgresJobStore;
pub use reader::{CompletedJob, JobStoreReader, ReaderError};
pub use aggregator::{aggregate, AggregateError};
pub use builder::build_payload;
pub use publisher::{CatalogPublisher, HttpCatalogPublisher, PublishError};
pub use handler::{
    parse_message, Disposition, HandlerError, MessageHandler, PipelineFailure, PreparedUpload,
    PublishOutcome, Stage,
};
pub use consumer::{Consumer, ConsumerStats, Envelope, InMemoryQueue, MessageSource, QueueError};
#[cfg(feature = "sqs")]
pub use consumer::SqsMessageSource;
pub use config::{CatalogSettings, ConfigError, QueueSettings, Settings, UploadSettings};
pub use metrics::{NoOpMetrics, PipelineMetrics, TestMetrics, TracingMetrics};
