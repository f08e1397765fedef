//! Event clustering
//!
//! Two ways to group events for display:
//! - [`spatial`]: deterministic bucketing into fixed world regions, never fails
//! - [`pipeline`]: groups augmented events, labels each group's mean vector
//!   against a theme table through a [`LabelTransport`], and falls back to
//!   the spatial clusterer on any failure
//!
//! # Example
//!
//! ```no_run
//! use eventsphere::clustering::{cluster_coordinates, ClusterPipeline, TransportKind};
//! use eventsphere::storage::GeoCoordinate;
//!
//! let regions = cluster_coordinates(&[GeoCoordinate::new(48.8, 2.3)]);
//! assert_eq!(regions[0].label, "Europe");
//!
//! let pipeline = ClusterPipeline::with_transport(TransportKind::Inline)?;
//! let clusters = pipeline.cluster(&[]);
//! assert!(clusters.is_empty());
//! # Ok::<(), eventsphere::clustering::ClusterError>(())
//! ```

pub mod pipeline;
pub mod regions;
pub mod similarity;
pub mod spatial;
pub mod themes;
pub mod worker;

pub use pipeline::ClusterPipeline;
pub use regions::Region;
pub use similarity::{cosine_similarity, mean_vector};
pub use spatial::{cluster_coordinates, cluster_events};
pub use themes::{assign_label, label_clusters, Theme, ThemeTable};
pub use worker::{
    transport_for, InlineWorker, LabelRequest, LabelTransport, RequestId, ThreadWorker,
    TransportKind, WorkerMessage, WorkerPayload, WorkerReply,
};

use crate::storage::GeoCoordinate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One labeled group of coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResult {
    pub cluster_id: String,
    pub label: String,
    pub coordinates: Vec<GeoCoordinate>,
    /// Mean of `coordinates`, or a fixed approximate center while empty
    pub center: GeoCoordinate,
}

impl ClusterResult {
    pub fn new(cluster_id: impl Into<String>, label: impl Into<String>, center: GeoCoordinate) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            label: label.into(),
            coordinates: Vec::new(),
            center,
        }
    }

    /// Reset `center` to the arithmetic mean of the members.
    /// An empty cluster keeps its current center.
    pub fn recompute_center(&mut self) {
        if let Some(center) = mean_coordinate(&self.coordinates) {
            self.center = center;
        }
    }
}

/// Arithmetic mean of latitudes and longitudes, `None` for no points
pub fn mean_coordinate(points: &[GeoCoordinate]) -> Option<GeoCoordinate> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lon) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lon), p| (lat + p.latitude, lon + p.longitude));
    Some(GeoCoordinate::new(lat / n, lon / n))
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ClusterError {
    #[error("centroid {index} has dimension {actual}, expected {expected}")]
    Dimension {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("no centroids to label")]
    EmptyInput,
    #[error("{centroids} centroids but {centers} centers")]
    LengthMismatch { centroids: usize, centers: usize },
    #[error("clustering worker failed: {0}")]
    Worker(String),
}
