//! Relation aggregator.
//!
//! Turns raw task rows into the relation graph of a manifestation. Every
//! `result_json` entry must validate; nothing is dropped silently.

use serde::Deserialize;
use serde_json::Value;

use crate::types::{AllTextSegmentRelationMapping, Mapping, SegmentTask, SegmentsRelation, TaskId};

/// Error type for aggregation.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// A task's `result_json` does not have the expected shape.
    #[error("Malformed result for task {task_id} (segment {segment_id}): {reason}")]
    MalformedResult {
        /// Offending task.
        task_id: TaskId,
        /// Segment the task processed.
        segment_id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// One entry of a task's `result_json`.
#[derive(Debug, Deserialize)]
struct RawMapping {
    manifestation_id: String,
    segments: Vec<SegmentRef>,
}

/// Workers emit either bare ids or `{"segment_id": ...}` objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SegmentRef {
    Id(String),
    Object { segment_id: String },
}

impl SegmentRef {
    fn into_id(self) -> String {
        match self {
            Self::Id(id) | Self::Object { segment_id: id } => id,
        }
    }
}

/// Build the relation graph for `manifestation_id` from its tasks.
///
/// Segment order follows `tasks`; mapping order follows each task's
/// `result_json`. Pure and deterministic.
pub fn aggregate(
    manifestation_id: &str,
    tasks: &[SegmentTask],
) -> Result<AllTextSegmentRelationMapping, AggregateError> {
    let mut graph = AllTextSegmentRelationMapping::new(manifestation_id);
    graph.segments.reserve(tasks.len());

    for task in tasks {
        tracing::trace!(
            task_id = %task.task_id,
            segment_id = %task.segment_id,
            status = %task.status,
            "Formatting task"
        );

        let mappings = parse_result(task).map_err(|reason| AggregateError::MalformedResult {
            task_id: task.task_id,
            segment_id: task.segment_id.clone(),
            reason,
        })?;

        graph.segments.push(SegmentsRelation {
            segment_id: task.segment_id.clone(),
            mappings,
        });
    }

    Ok(graph)
}

fn parse_result(task: &SegmentTask) -> Result<Vec<Mapping>, String> {
    let entries = match &task.result_json {
        None | Some(Value::Null) => return Err("result_json is missing".to_string()),
        Some(Value::Array(entries)) => entries,
        Some(other) => return Err(format!("result_json is not a list (found {})", kind(other))),
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            RawMapping::deserialize(entry)
                .map(|raw| Mapping {
                    manifestation_id: raw.manifestation_id,
                    segments: raw.segments.into_iter().map(SegmentRef::into_id).collect(),
                })
                .map_err(|e| format!("entry {index}: {e}"))
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;
    use serde_json::json;
    use uuid::Uuid;

    fn task(n: u128, segment: &str, result: Option<Value>) -> SegmentTask {
        SegmentTask::new(
            TaskId::new(Uuid::from_u128(n)),
            JobId::new(Uuid::from_u128(1)),
            segment,
            result,
        )
    }

    #[test]
    fn test_aggregate_preserves_order() {
        let tasks = vec![
            task(1, "S1", Some(json!([
                {"manifestation_id": "M2", "segments": ["S9"]},
                {"manifestation_id": "M3", "segments": ["S4", "S5"]},
            ]))),
            task(2, "S2", Some(json!([]))),
        ];

        let graph = aggregate("M1", &tasks).unwrap();

        assert_eq!(graph.manifestation_id, "M1");
        assert_eq!(graph.segments.len(), 2);
        assert_eq!(graph.segments[0].segment_id, "S1");
        assert_eq!(graph.segments[0].mappings, vec![
            Mapping::new("M2", vec!["S9".to_string()]),
            Mapping::new("M3", vec!["S4".to_string(), "S5".to_string()]),
        ]);
        assert_eq!(graph.segments[1].segment_id, "S2");
        assert!(graph.segments[1].mappings.is_empty());
        assert_eq!(graph.mapping_count(), 2);
    }

    #[test]
    fn test_segment_objects_are_normalized() {
        let tasks = vec![task(1, "S1", Some(json!([
            {"manifestation_id": "M2", "segments": [{"segment_id": "S9"}, "S10"]},
        ])))];

        let graph = aggregate("M1", &tasks).unwrap();
        assert_eq!(graph.segments[0].mappings[0].segments, vec!["S9", "S10"]);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let tasks = vec![task(1, "S1", Some(json!([
            {"manifestation_id": "M2", "segments": ["S9"], "score": 0.9},
        ])))];

        assert!(aggregate("M1", &tasks).is_ok());
    }

    #[test]
    fn test_missing_result_is_malformed() {
        let tasks = vec![task(1, "S1", None)];
        let err = aggregate("M1", &tasks).unwrap_err();
        let AggregateError::MalformedResult { segment_id, reason, .. } = err;
        assert_eq!(segment_id, "S1");
        assert!(reason.contains("missing"));
    }

    #[test]
    fn test_non_list_result_is_malformed() {
        let tasks = vec![task(1, "S1", Some(json!({"manifestation_id": "M2"})))];
        let AggregateError::MalformedResult { reason, .. } = aggregate("M1", &tasks).unwrap_err();
        assert!(reason.contains("not a list"));
        assert!(reason.contains("object"));
    }

    #[test]
    fn test_entry_missing_field_is_malformed() {
        let tasks = vec![
            task(1, "S1", Some(json!([]))),
            task(2, "S2", Some(json!([
                {"manifestation_id": "M2", "segments": ["S9"]},
                {"segments": ["S9"]},
            ]))),
        ];

        let AggregateError::MalformedResult { task_id, segment_id, reason } =
            aggregate("M1", &tasks).unwrap_err();
        assert_eq!(task_id, TaskId::new(Uuid::from_u128(2)));
        assert_eq!(segment_id, "S2");
        assert!(reason.starts_with("entry 1"), "unexpected reason: {reason}");
    }

    #[test]
    fn test_bad_segment_reference_is_malformed() {
        let tasks = vec![task(1, "S1", Some(json!([
            {"manifestation_id": "M2", "segments": [42]},
        ])))];
        assert!(aggregate("M1", &tasks).is_err());
    }
}
