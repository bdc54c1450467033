//! Wire payload accepted by the catalog's mapping endpoint.

use serde::{Deserialize, Serialize};

/// Body of `POST {base}/mapping`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadPayload {
    /// One entry per segment relation.
    pub text_mappings: Vec<TextMapping>,
}

/// Mappings for a single segment of the root text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMapping {
    /// Always the root manifestation id.
    pub text_id: String,
    /// Segment of the root manifestation.
    pub segment_id: String,
    /// Cross-references to other texts.
    pub mappings: Vec<ParentMapping>,
}

/// Segments of another text that a root segment maps onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentMapping {
    /// The other text's manifestation id.
    pub parent_text_id: String,
    /// Flat ordered list of that text's segment ids.
    pub segments: Vec<String>,
}

impl UploadPayload {
    /// Flatten back into `(segment_id, parent_text_id, segments)` triples.
    pub fn triples(&self) -> Vec<(&str, &str, &[String])> {
        self.text_mappings
            .iter()
            .flat_map(|tm| {
                tm.mappings.iter().map(move |m| {
                    (tm.segment_id.as_str(), m.parent_text_id.as_str(), m.segments.as_slice())
                })
            })
            .collect()
    }
}
