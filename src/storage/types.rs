//! Domain types for the storage layer
//!
//! These types are storage-agnostic - they don't know about SQLite or
//! encryption. `StoredRecord` handles the on-disk split.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Closed set of event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NaturalDisaster,
    Political,
    Health,
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::NaturalDisaster,
        Category::Political,
        Category::Health,
        Category::Other,
    ];

    /// Wire name, as stored and validated
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::NaturalDisaster => "natural_disaster",
            Category::Political => "political",
            Category::Health => "health",
            Category::Other => "other",
        }
    }

    /// Parse a wire name, `None` for anything outside the enumeration
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!(
                "unknown category '{}', expected one of {}",
                s,
                category_choices()
            )
        })
    }
}

/// `natural_disaster | political | health | other`
pub(crate) fn category_choices() -> String {
    Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// A point on the globe, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A user-authored geotagged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl Event {
    pub fn coordinate(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.latitude, self.longitude)
    }
}

/// An event enriched with a feature vector, used only as clustering input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AugmentedEvent {
    #[serde(flatten)]
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reliability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_metadata: Option<Map<String, Value>>,
    pub vector: Vec<f32>,
}

/// Latitude/longitude rectangle. `west > east` wraps across the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

/// Filters for [`EventStore::query`](crate::storage::EventStore::query)
///
/// Time and position filters run against the plaintext indexed columns;
/// categories are matched after decryption.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Inclusive lower bound, epoch milliseconds
    pub from: Option<i64>,
    /// Inclusive upper bound, epoch milliseconds
    pub to: Option<i64>,
    pub bounds: Option<GeoBounds>,
    /// Empty means every category
    pub categories: Vec<Category>,
}

impl EventQuery {
    pub fn between(from: i64, to: i64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn within(bounds: GeoBounds) -> Self {
        Self {
            bounds: Some(bounds),
            ..Self::default()
        }
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_wire_names() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
            let encoded = serde_json::to_value(category).unwrap();
            assert_eq!(encoded, json!(category.as_str()));
        }
        assert_eq!(Category::parse("sports"), None);
        assert!("sports".parse::<Category>().unwrap_err().contains("health"));
    }

    #[test]
    fn test_augmented_event_uses_camel_case() {
        let augmented = AugmentedEvent {
            event: Event {
                id: "evt-1".to_string(),
                title: "Flooding".to_string(),
                category: Category::NaturalDisaster,
                latitude: 10.0,
                longitude: 20.0,
                timestamp: 1_700_000_000_000,
            },
            confidence_score: Some(0.8),
            source_reliability: None,
            cluster_id: Some("c1".to_string()),
            region: None,
            analysis_metadata: None,
            vector: vec![0.0; 2],
        };

        let value = serde_json::to_value(&augmented).unwrap();
        assert_eq!(value["id"], json!("evt-1"));
        assert_eq!(value["confidenceScore"], json!(0.8));
        assert_eq!(value["clusterId"], json!("c1"));
        assert!(value.get("sourceReliability").is_none());
    }
}
