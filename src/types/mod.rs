//! Core types for the mapping pipeline.

pub mod job;
pub mod relation;
pub mod payload;

pub use job::{Job, JobId, SegmentTask, TaskId};
pub use relation::{AllTextSegmentRelationMapping, Mapping, SegmentsRelation};
pub use payload::{ParentMapping, TextMapping, UploadPayload};
