//! Themed clustering of augmented events with a spatial fallback

use std::collections::HashMap;

use super::regions::Region;
use super::similarity::mean_vector;
use super::spatial::cluster_events;
use super::themes::ThemeTable;
use super::worker::{transport_for, LabelRequest, LabelTransport, TransportKind};
use super::{mean_coordinate, ClusterError, ClusterResult};
use crate::config::ClusteringConfig;
use crate::storage::{AugmentedEvent, GeoCoordinate};
use crate::validation::VECTOR_DIMENSION;

/// Groups augmented events and labels each group by theme
pub struct ClusterPipeline {
    transport: Box<dyn LabelTransport>,
}

/// Events sharing a grouping key, in first-seen order
struct Group<'a> {
    members: Vec<&'a AugmentedEvent>,
}

impl ClusterPipeline {
    pub fn new(transport: Box<dyn LabelTransport>) -> Self {
        Self { transport }
    }

    /// Pipeline over the standard theme table
    pub fn with_transport(kind: TransportKind) -> Result<Self, ClusterError> {
        Ok(Self::new(transport_for(kind, ThemeTable::standard())?))
    }

    pub fn from_config(config: &ClusteringConfig) -> Result<Self, ClusterError> {
        Self::with_transport(config.transport)
    }

    /// Themed clusters, or the spatial clustering of the same events when
    /// labeling fails for any reason. Empty input yields no clusters.
    pub fn cluster(&self, events: &[AugmentedEvent]) -> Vec<ClusterResult> {
        if events.is_empty() {
            return Vec::new();
        }

        match self.try_cluster(events) {
            Ok(clusters) => clusters,
            Err(e) => {
                tracing::warn!(error = %e, "themed clustering failed, using spatial fallback");
                cluster_events(events.iter().map(|a| &a.event))
            }
        }
    }

    /// Themed clusters without the fallback.
    ///
    /// Events are grouped by `clusterId`, then by `region`, then by the
    /// spatial region they fall in. Each group's mean vector is labeled and
    /// its center is the mean of its members' coordinates.
    pub fn try_cluster(&self, events: &[AugmentedEvent]) -> Result<Vec<ClusterResult>, ClusterError> {
        if let Some((index, event)) = events
            .iter()
            .enumerate()
            .find(|(_, e)| e.vector.len() != VECTOR_DIMENSION)
        {
            return Err(ClusterError::Dimension {
                index,
                expected: VECTOR_DIMENSION,
                actual: event.vector.len(),
            });
        }

        let groups = group_events(events);

        let mut centroids = Vec::with_capacity(groups.len());
        let mut centers = Vec::with_capacity(groups.len());
        let mut members = Vec::with_capacity(groups.len());
        for group in &groups {
            let vectors: Vec<&[f32]> = group.members.iter().map(|a| a.vector.as_slice()).collect();
            let coordinates: Vec<GeoCoordinate> =
                group.members.iter().map(|a| a.event.coordinate()).collect();

            centroids.push(mean_vector(&vectors).ok_or(ClusterError::EmptyInput)?);
            centers.push(mean_coordinate(&coordinates).ok_or(ClusterError::EmptyInput)?);
            members.push(coordinates);
        }

        let mut clusters = self.transport.label(LabelRequest { centroids, centers })?;
        if clusters.len() != members.len() {
            return Err(ClusterError::Worker(format!(
                "expected {} clusters, received {}",
                members.len(),
                clusters.len()
            )));
        }

        for (cluster, coordinates) in clusters.iter_mut().zip(members) {
            cluster.coordinates = coordinates;
            cluster.recompute_center();
        }

        tracing::debug!(events = events.len(), clusters = clusters.len(), "themed clustering");
        Ok(clusters)
    }
}

fn group_key(event: &AugmentedEvent) -> String {
    event
        .cluster_id
        .clone()
        .or_else(|| event.region.clone())
        .unwrap_or_else(|| Region::classify(event.event.coordinate()).name().to_string())
}

fn group_events(events: &[AugmentedEvent]) -> Vec<Group<'_>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();

    for event in events {
        let slot = *index.entry(group_key(event)).or_insert_with(|| {
            groups.push(Group {
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].members.push(event);
    }
    groups
}

impl std::fmt::Debug for ClusterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterPipeline").finish_non_exhaustive()
    }
}
