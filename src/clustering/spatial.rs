//! Deterministic geographic clustering
//!
//! Synchronous and infallible, so it is always available as the fallback
//! when vector labeling fails.

use super::regions::Region;
use super::ClusterResult;
use crate::storage::{Event, GeoCoordinate};

/// Bucket coordinates into [`Region`]s.
///
/// Clusters follow region order and empty regions are omitted. Members keep
/// their original coordinates; each center is the mean of its members.
pub fn cluster_coordinates(points: &[GeoCoordinate]) -> Vec<ClusterResult> {
    let mut clusters: Vec<ClusterResult> = Region::ALL
        .iter()
        .map(|region| ClusterResult::new(region.slug(), region.name(), region.approximate_center()))
        .collect();

    for point in points {
        let region = Region::classify(*point);
        let slot = Region::ALL
            .iter()
            .position(|r| *r == region)
            .unwrap_or(Region::ALL.len() - 1);
        clusters[slot].coordinates.push(*point);
    }

    clusters.retain(|cluster| !cluster.coordinates.is_empty());
    for cluster in &mut clusters {
        cluster.recompute_center();
    }

    tracing::debug!(points = points.len(), clusters = clusters.len(), "spatial clustering");
    clusters
}

/// [`cluster_coordinates`] over event positions
pub fn cluster_events<'a, I>(events: I) -> Vec<ClusterResult>
where
    I: IntoIterator<Item = &'a Event>,
{
    let points: Vec<GeoCoordinate> = events.into_iter().map(Event::coordinate).collect();
    cluster_coordinates(&points)
}
