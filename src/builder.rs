//! Payload builder.
//!
//! Reshapes the relation graph into the catalog's upload payload. No I/O.

use crate::types::{AllTextSegmentRelationMapping, ParentMapping, TextMapping, UploadPayload};

/// Build the upload payload for a relation graph.
///
/// Emits one [`TextMapping`] per segment relation in input order. Every
/// `text_id` is the root manifestation id.
pub fn build_payload(relations: &AllTextSegmentRelationMapping) -> UploadPayload {
    let text_mappings = relations
        .segments
        .iter()
        .map(|relation| TextMapping {
            text_id: relations.manifestation_id.clone(),
            segment_id: relation.segment_id.clone(),
            mappings: relation
                .mappings
                .iter()
                .map(|mapping| ParentMapping {
                    parent_text_id: mapping.manifestation_id.clone(),
                    segments: mapping.segments.clone(),
                })
                .collect(),
        })
        .collect();

    UploadPayload { text_mappings }
}
