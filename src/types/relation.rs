//! In-memory relation graph for one manifestation.
//!
//! Built fresh per message by the aggregator and discarded once the upload
//! payload has been produced.

use serde::{Deserialize, Serialize};

/// Cross-reference from a segment to segments of another manifestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// The other manifestation.
    pub manifestation_id: String,
    /// Referenced segment ids in that manifestation, in source order.
    pub segments: Vec<String>,
}

impl Mapping {
    /// Create a mapping.
    pub fn new(manifestation_id: impl Into<String>, segments: Vec<String>) -> Self {
        Self {
            manifestation_id: manifestation_id.into(),
            segments,
        }
    }
}

/// All mappings found for one segment of the root manifestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentsRelation {
    /// Segment of the root manifestation.
    pub segment_id: String,
    /// Mappings in `result_json` order.
    pub mappings: Vec<Mapping>,
}

impl SegmentsRelation {
    /// Create a relation with no mappings.
    pub fn new(segment_id: impl Into<String>) -> Self {
        Self {
            segment_id: segment_id.into(),
            mappings: Vec::new(),
        }
    }
}

/// Every segment relation of a manifestation, in task order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllTextSegmentRelationMapping {
    /// Root manifestation.
    pub manifestation_id: String,
    /// One entry per segment task.
    pub segments: Vec<SegmentsRelation>,
}

impl AllTextSegmentRelationMapping {
    /// Create an empty relation graph rooted at `manifestation_id`.
    pub fn new(manifestation_id: impl Into<String>) -> Self {
        Self {
            manifestation_id: manifestation_id.into(),
            segments: Vec::new(),
        }
    }

    /// Total number of mappings across all segments.
    pub fn mapping_count(&self) -> usize {
        self.segments.iter().map(|s| s.mappings.len()).sum()
    }
}
