// Metric extraction - turns management API payloads into observations
//
// Fields are classified up front:
// - overview: `object_totals` (required object), its five counters (optional
//   numbers), `node` (required string)
// - queues: the payload itself (required array), `messages` on every element
//   (required number), `node` on the first element (required string)
//
// A missing optional counter just leaves that kind out of the result. Anything
// else that does not match is an ExtractionError naming the field.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::{MetricKind, ObservationSet};

/// Errors raised when a payload does not have the expected shape
#[derive(Error, Debug, PartialEq)]
pub enum ExtractionError {
    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' is not {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },
}

/// Counters read from the overview resource
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewObservations {
    pub node: String,
    pub totals: Vec<(MetricKind, f64)>,
}

/// Aggregate read from the queues resource
#[derive(Debug, Clone, PartialEq)]
pub struct QueueObservations {
    pub node: String,
    pub messages: f64,
}

/// Extracts a full observation set from both payloads
///
/// Fails if either payload is malformed. The scheduler uses the per-resource
/// functions instead so that one bad payload does not discard the other.
pub fn extract(overview: &Value, queues: &Value) -> Result<ObservationSet, ExtractionError> {
    let overview = extract_overview(overview)?;
    let queues = extract_queues(queues)?;
    Ok(ObservationSet::from_parts(Some(overview), queues))
}

/// Reads `object_totals` and `node` from an `/api/overview` payload
pub fn extract_overview(payload: &Value) -> Result<OverviewObservations, ExtractionError> {
    let root = as_object(payload, "overview")?;

    let totals = match root.get("object_totals") {
        Some(Value::Object(totals)) => totals,
        Some(_) => return Err(invalid("object_totals", "an object")),
        None => return Err(ExtractionError::MissingField("object_totals".to_string())),
    };

    let mut values = Vec::with_capacity(MetricKind::OVERVIEW.len());
    for kind in MetricKind::OVERVIEW {
        match totals.get(kind.key()) {
            Some(value) => {
                let field = format!("object_totals.{}", kind.key());
                values.push((kind, as_number(value, &field)?));
            }
            None => debug!("object_totals has no '{}' counter, skipping", kind.key()),
        }
    }

    let node = required_string(root, "node", "node")?;

    Ok(OverviewObservations {
        node,
        totals: values,
    })
}

/// Sums `messages` over an `/api/queues` payload
///
/// # Returns
/// * `Ok(Some(..))` - Message total labeled with the first queue's node
/// * `Ok(None)` - The broker has no queues; nothing to publish
/// * `Err(ExtractionError)` - Payload is not an array or an element is malformed
pub fn extract_queues(payload: &Value) -> Result<Option<QueueObservations>, ExtractionError> {
    let queues = match payload {
        Value::Array(queues) => queues,
        _ => return Err(invalid("queues", "an array")),
    };

    let Some(first) = queues.first() else {
        return Ok(None);
    };

    let mut messages = 0.0;
    for (index, queue) in queues.iter().enumerate() {
        let field = format!("queues[{}]", index);
        let queue = as_object(queue, &field)?;
        let field = format!("queues[{}].messages", index);
        match queue.get("messages") {
            Some(value) => messages += as_number(value, &field)?,
            None => return Err(ExtractionError::MissingField(field)),
        }
    }

    let node = required_string(as_object(first, "queues[0]")?, "node", "queues[0].node")?;

    Ok(Some(QueueObservations { node, messages }))
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, ExtractionError> {
    value.as_object().ok_or_else(|| invalid(field, "an object"))
}

fn as_number(value: &Value, field: &str) -> Result<f64, ExtractionError> {
    value.as_f64().ok_or_else(|| invalid(field, "a number"))
}

fn required_string(
    object: &Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<String, ExtractionError> {
    match object.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(invalid(field, "a string")),
        None => Err(ExtractionError::MissingField(field.to_string())),
    }
}

fn invalid(field: &str, expected: &'static str) -> ExtractionError {
    ExtractionError::InvalidType {
        field: field.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overview() -> Value {
        json!({
            "object_totals": {
                "connections": 3,
                "channels": 5,
                "queues": 2,
                "consumers": 1,
                "exchanges": 4
            },
            "node": "rabbit@host1"
        })
    }

    fn queues() -> Value {
        json!([
            {"node": "rabbit@host1", "messages": 7},
            {"node": "rabbit@host1", "messages": 3}
        ])
    }

    #[test]
    fn test_extract_full_payloads() {
        let set = extract(&overview(), &queues()).unwrap();

        assert_eq!(set.node(), Some("rabbit@host1"));
        assert_eq!(set.len(), 6);
        assert_eq!(set.get(MetricKind::Connections), Some(3.0));
        assert_eq!(set.get(MetricKind::Channels), Some(5.0));
        assert_eq!(set.get(MetricKind::Queues), Some(2.0));
        assert_eq!(set.get(MetricKind::Consumers), Some(1.0));
        assert_eq!(set.get(MetricKind::Exchanges), Some(4.0));
        assert_eq!(set.get(MetricKind::Messages), Some(10.0));
    }

    #[test]
    fn test_message_total_sums_every_queue() {
        let payload = json!([
            {"node": "rabbit@a", "messages": 1},
            {"node": "rabbit@b", "messages": 2.5},
            {"node": "rabbit@a", "messages": 0},
            {"node": "rabbit@c", "messages": 100}
        ]);

        let queues = extract_queues(&payload).unwrap().unwrap();

        assert_eq!(queues.messages, 103.5);
        assert_eq!(queues.node, "rabbit@a");
    }

    #[test]
    fn test_identity_comes_from_first_queue() {
        let payload = json!([{"node": "rabbit@other", "messages": 2}]);

        let set = extract(&overview(), &payload).unwrap();

        assert_eq!(set.node(), Some("rabbit@other"));
        // Overview counters keep the identity they arrived with
        let connections = set
            .iter()
            .find(|observation| observation.kind == MetricKind::Connections)
            .unwrap();
        assert_eq!(connections.node, "rabbit@host1");
    }

    #[test]
    fn test_empty_queues_omits_message_count() {
        let set = extract(&overview(), &json!([])).unwrap();

        assert_eq!(set.get(MetricKind::Messages), None);
        assert_eq!(set.len(), 5);
        assert_eq!(set.node(), Some("rabbit@host1"));
    }

    #[test]
    fn test_missing_total_key_omits_only_that_kind() {
        let mut payload = overview();
        payload["object_totals"]
            .as_object_mut()
            .unwrap()
            .remove("consumers");

        let set = extract(&payload, &queues()).unwrap();

        assert_eq!(set.get(MetricKind::Consumers), None);
        assert_eq!(set.get(MetricKind::Connections), Some(3.0));
        assert_eq!(set.get(MetricKind::Channels), Some(5.0));
        assert_eq!(set.get(MetricKind::Queues), Some(2.0));
        assert_eq!(set.get(MetricKind::Exchanges), Some(4.0));
        assert_eq!(set.get(MetricKind::Messages), Some(10.0));
    }

    #[test]
    fn test_non_numeric_counter_is_an_error() {
        let mut payload = overview();
        payload["object_totals"]["channels"] = json!("five");

        assert_eq!(
            extract_overview(&payload),
            Err(ExtractionError::InvalidType {
                field: "object_totals.channels".to_string(),
                expected: "a number",
            })
        );
    }

    #[test]
    fn test_overview_shape_errors() {
        assert_eq!(
            extract_overview(&json!({"node": "rabbit@host1"})),
            Err(ExtractionError::MissingField("object_totals".to_string()))
        );
        assert_eq!(
            extract_overview(&json!({"object_totals": {}})),
            Err(ExtractionError::MissingField("node".to_string()))
        );
        assert!(matches!(
            extract_overview(&json!({"object_totals": {}, "node": 7})),
            Err(ExtractionError::InvalidType { .. })
        ));
        assert!(matches!(
            extract_overview(&json!([])),
            Err(ExtractionError::InvalidType { .. })
        ));
    }

    #[test]
    fn test_queue_shape_errors() {
        assert_eq!(
            extract_queues(&json!({"messages": 1})),
            Err(ExtractionError::InvalidType {
                field: "queues".to_string(),
                expected: "an array",
            })
        );
        assert_eq!(
            extract_queues(&json!([{"node": "rabbit@host1", "messages": 1}, {"node": "rabbit@host1"}])),
            Err(ExtractionError::MissingField("queues[1].messages".to_string()))
        );
        assert_eq!(
            extract_queues(&json!([{"messages": 1}])),
            Err(ExtractionError::MissingField("queues[0].node".to_string()))
        );
        assert!(matches!(
            extract_queues(&json!([{"node": "rabbit@host1", "messages": null}])),
            Err(ExtractionError::InvalidType { .. })
        ));
    }
}
