//! Strict schema validation for events and augmented events
//!
//! Candidates arrive as untyped JSON so that every violation can be reported
//! against the field that caused it. Objects are closed: any key outside the
//! schema is a violation. All violations are collected, joined into one
//! message and logged before the error is returned.

use crate::storage::types::{category_choices, AugmentedEvent, Category, Event};
use serde_json::{Map, Value};
use thiserror::Error;

/// Required length of an augmented event's feature vector.
pub const VECTOR_DIMENSION: usize = 128;

const EVENT_FIELDS: [&str; 6] = ["id", "title", "category", "latitude", "longitude", "timestamp"];

const AUGMENTED_FIELDS: [&str; 6] = [
    "confidenceScore",
    "sourceReliability",
    "clusterId",
    "region",
    "analysisMetadata",
    "vector",
];

/// One or more schema violations, each formatted as `"<path>: <reason>"`
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", .issues.join("; "))]
pub struct ValidationError {
    issues: Vec<String>,
}

impl ValidationError {
    pub(crate) fn single(path: &str, reason: impl Into<String>) -> Self {
        Self {
            issues: vec![format!("{}: {}", path, reason.into())],
        }
    }

    /// Individual field-qualified violations
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Log the failure and hand it back for propagation
    pub(crate) fn logged(self) -> Self {
        tracing::warn!(error = %self, "validation failed");
        self
    }
}

#[derive(Default)]
struct Issues(Vec<String>);

impl Issues {
    fn push(&mut self, path: &str, reason: impl AsRef<str>) {
        self.0.push(format!("{}: {}", path, reason.as_ref()));
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, ValidationError> {
        match value {
            Some(value) if self.0.is_empty() => Ok(value),
            _ => Err(ValidationError { issues: self.0 }.logged()),
        }
    }
}

/// Validate a candidate event
pub fn validate_event(candidate: &Value) -> Result<Event, ValidationError> {
    let mut issues = Issues::default();

    let Some(object) = candidate.as_object() else {
        issues.push("(root)", format!("expected object, received {}", kind(candidate)));
        return issues.finish(None);
    };

    reject_unknown(object, &[&EVENT_FIELDS], &mut issues);
    let event = read_event(object, &mut issues);

    issues.finish(event)
}

/// Validate a candidate augmented event (event fields plus a 128-float vector)
pub fn validate_augmented_event(candidate: &Value) -> Result<AugmentedEvent, ValidationError> {
    let mut issues = Issues::default();

    let Some(object) = candidate.as_object() else {
        issues.push("(root)", format!("expected object, received {}", kind(candidate)));
        return issues.finish(None);
    };

    reject_unknown(object, &[&EVENT_FIELDS, &AUGMENTED_FIELDS], &mut issues);
    let event = read_event(object, &mut issues);

    let confidence_score = optional_number(object, "confidenceScore", &mut issues);
    let source_reliability = optional_number(object, "sourceReliability", &mut issues);
    let cluster_id = optional_string(object, "clusterId", &mut issues);
    let region = optional_string(object, "region", &mut issues);

    let analysis_metadata = match object.get("analysisMetadata") {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(other) => {
            issues.push(
                "analysisMetadata",
                format!("expected object, received {}", kind(other)),
            );
            None
        }
    };

    let vector = read_vector(object, &mut issues);

    let augmented = match (event, vector) {
        (Some(event), Some(vector)) => Some(AugmentedEvent {
            event,
            confidence_score,
            source_reliability,
            cluster_id,
            region,
            analysis_metadata,
            vector,
        }),
        _ => None,
    };

    issues.finish(augmented)
}

/// Validate an already-typed event against the same rules as [`validate_event`]
pub fn check_event(event: &Event) -> Result<(), ValidationError> {
    let candidate = serde_json::to_value(event)
        .map_err(|e| ValidationError::single("(root)", e.to_string()).logged())?;
    validate_event(&candidate).map(|_| ())
}

fn reject_unknown(object: &Map<String, Value>, allowed: &[&[&str]], issues: &mut Issues) {
    for key in object.keys() {
        if !allowed.iter().any(|fields| fields.contains(&key.as_str())) {
            issues.push(key, "unrecognized field");
        }
    }
}

fn read_event(object: &Map<String, Value>, issues: &mut Issues) -> Option<Event> {
    let id = required_string(object, "id", issues);
    let title = required_string(object, "title", issues);
    let category = required_category(object, issues);
    let latitude = required_coordinate(object, "latitude", 90.0, issues);
    let longitude = required_coordinate(object, "longitude", 180.0, issues);
    let timestamp = required_timestamp(object, issues);

    Some(Event {
        id: id?,
        title: title?,
        category: category?,
        latitude: latitude?,
        longitude: longitude?,
        timestamp: timestamp?,
    })
}

fn required<'a>(object: &'a Map<String, Value>, field: &str, issues: &mut Issues) -> Option<&'a Value> {
    match object.get(field) {
        None => {
            issues.push(field, "required");
            None
        }
        Some(value) => Some(value),
    }
}

fn required_string(object: &Map<String, Value>, field: &str, issues: &mut Issues) -> Option<String> {
    match required(object, field, issues)? {
        Value::String(s) if s.trim().is_empty() => {
            issues.push(field, "must not be empty");
            None
        }
        Value::String(s) => Some(s.clone()),
        other => {
            issues.push(field, format!("expected string, received {}", kind(other)));
            None
        }
    }
}

fn required_category(object: &Map<String, Value>, issues: &mut Issues) -> Option<Category> {
    match required(object, "category", issues)? {
        Value::String(s) => {
            let parsed = Category::parse(s);
            if parsed.is_none() {
                issues.push(
                    "category",
                    format!("invalid enum value '{}', expected {}", s, category_choices()),
                );
            }
            parsed
        }
        other => {
            issues.push("category", format!("expected string, received {}", kind(other)));
            None
        }
    }
}

fn required_coordinate(
    object: &Map<String, Value>,
    field: &str,
    limit: f64,
    issues: &mut Issues,
) -> Option<f64> {
    let value = required(object, field, issues)?;
    let Some(number) = value.as_f64() else {
        issues.push(field, format!("expected number, received {}", kind(value)));
        return None;
    };
    if !(-limit..=limit).contains(&number) {
        issues.push(field, format!("must be between {} and {}", -limit, limit));
        return None;
    }
    Some(number)
}

fn required_timestamp(object: &Map<String, Value>, issues: &mut Issues) -> Option<i64> {
    let value = required(object, "timestamp", issues)?;
    match value.as_i64() {
        Some(ts) => Some(ts),
        None if value.is_number() => {
            issues.push("timestamp", "expected integer epoch milliseconds");
            None
        }
        None => {
            issues.push("timestamp", format!("expected integer, received {}", kind(value)));
            None
        }
    }
}

fn optional_number(object: &Map<String, Value>, field: &str, issues: &mut Issues) -> Option<f64> {
    let value = object.get(field)?;
    match value.as_f64() {
        Some(number) => Some(number),
        None => {
            issues.push(field, format!("expected number, received {}", kind(value)));
            None
        }
    }
}

fn optional_string(object: &Map<String, Value>, field: &str, issues: &mut Issues) -> Option<String> {
    match object.get(field)? {
        Value::String(s) => Some(s.clone()),
        other => {
            issues.push(field, format!("expected string, received {}", kind(other)));
            None
        }
    }
}

fn read_vector(object: &Map<String, Value>, issues: &mut Issues) -> Option<Vec<f32>> {
    let value = required(object, "vector", issues)?;
    let Some(items) = value.as_array() else {
        issues.push("vector", format!("expected array, received {}", kind(value)));
        return None;
    };

    let mut vector = Vec::with_capacity(items.len());
    let mut well_typed = true;
    for (i, item) in items.iter().enumerate() {
        match item.as_f64() {
            Some(x) if (x as f32).is_finite() => vector.push(x as f32),
            Some(_) => {
                issues.push(&format!("vector.{}", i), "must be finite");
                well_typed = false;
            }
            None => {
                issues.push(
                    &format!("vector.{}", i),
                    format!("expected number, received {}", kind(item)),
                );
                well_typed = false;
            }
        }
    }

    if items.len() != VECTOR_DIMENSION {
        issues.push(
            "vector",
            format!(
                "expected length {}, received {}",
                VECTOR_DIMENSION,
                items.len()
            ),
        );
        return None;
    }

    well_typed.then_some(vector)
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
    use serde_json::json;

    fn candidate() -> Value {
        json!({
            "id": "evt-1",
            "title": "Earthquake near the coast",
            "category": "natural_disaster",
            "latitude": 35.6,
            "longitude": 139.7,
            "timestamp": 1_700_000_000_000i64,
        })
    }

    fn augmented(len: usize) -> Value {
        let mut value = candidate();
        value["vector"] = json!(vec![0.5f32; len]);
        value["clusterId"] = json!("c-7");
        value
    }

    #[test]
    fn test_valid_event() {
        let event = validate_event(&candidate()).unwrap();
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.category, Category::NaturalDisaster);
        assert_eq!(event.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_missing_field() {
        let mut value = candidate();
        value.as_object_mut().unwrap().remove("title");
        let err = validate_event(&value).unwrap_err();
        assert_eq!(err.to_string(), "title: required");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut value = candidate();
        value["severity"] = json!(3);
        let err = validate_event(&value).unwrap_err();
        assert_eq!(err.issues(), ["severity: unrecognized field"]);
    }

    #[test]
    fn test_category_outside_enum() {
        let mut value = candidate();
        value["category"] = json!("sports");
        let err = validate_event(&value).unwrap_err();
        assert!(err.to_string().starts_with("category: invalid enum value 'sports'"));
    }

    #[test]
    fn test_wrong_types_are_all_reported() {
        let value = json!({
            "id": 7,
            "title": "ok",
            "category": "health",
            "latitude": "north",
            "longitude": 200.0,
            "timestamp": 12.5,
        });
        let err = validate_event(&value).unwrap_err();
        assert_eq!(
            err.issues(),
            [
                "id: expected string, received number",
                "latitude: expected number, received string",
                "longitude: must be between -180 and 180",
                "timestamp: expected integer epoch milliseconds",
            ]
        );
        assert!(err.to_string().contains("; "));
    }

    #[test]
    fn test_non_object_candidate() {
        let err = validate_event(&json!([1, 2])).unwrap_err();
        assert_eq!(err.to_string(), "(root): expected object, received array");
    }

    #[test]
    fn test_augmented_vector_dimension() {
        let ok = validate_augmented_event(&augmented(128)).unwrap();
        assert_eq!(ok.vector.len(), VECTOR_DIMENSION);
        assert_eq!(ok.cluster_id.as_deref(), Some("c-7"));

        for len in [127, 129] {
            let err = validate_augmented_event(&augmented(len)).unwrap_err();
            let message = err.to_string();
            assert!(message.contains("vector"), "{}", message);
            assert!(message.contains("128"), "{}", message);
        }
    }

    #[test]
    fn test_augmented_fields_rejected_on_plain_event() {
        let err = validate_event(&augmented(128)).unwrap_err();
        assert!(err.issues().contains(&"vector: unrecognized field".to_string()));
        assert!(err.issues().contains(&"clusterId: unrecognized field".to_string()));
    }

    #[test]
    fn test_augmented_vector_element_types() {
        let mut value = augmented(128);
        value["vector"][3] = json!("x");
        let err = validate_augmented_event(&value).unwrap_err();
        assert_eq!(err.issues(), ["vector.3: expected number, received string"]);
    }

    #[test]
    fn test_augmented_vector_out_of_f32_range() {
        let mut value = augmented(128);
        value["vector"][5] = json!(1e300);
        value["vector"][9] = json!(-1e39);
        let err = validate_augmented_event(&value).unwrap_err();
        assert_eq!(err.issues(), ["vector.5: must be finite", "vector.9: must be finite"]);

        value["vector"][5] = json!(3.0e38);
        value["vector"][9] = json!(-3.0e38);
        assert!(validate_augmented_event(&value).is_ok());
    }

    #[test]
    fn test_check_typed_event() {
        let mut event = validate_event(&candidate()).unwrap();
        assert!(check_event(&event).is_ok());

        event.latitude = 91.0;
        let err = check_event(&event).unwrap_err();
        assert_eq!(err.to_string(), "latitude: must be between -90 and 90");
    }
}
