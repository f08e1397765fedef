//! Clustering commands

use anyhow::{bail, Context, Result};
use colored::*;
use serde_json::Value;
use std::fs;
use std::path::Path;

use super::{open_store, print_json};
use eventsphere::clustering::{cluster_events, ClusterPipeline, ClusterResult};
use eventsphere::{validate_augmented_event, AugmentedEvent, Config};

fn print_clusters(clusters: &[ClusterResult], json: bool) -> Result<()> {
    if json {
        return print_json(clusters);
    }
    if clusters.is_empty() {
        println!("{}", "No events to cluster".dimmed());
        return Ok(());
    }

    for cluster in clusters {
        println!(
            "{}  {}  {} event(s) around ({:.2}, {:.2})",
            cluster.label.bold(),
            cluster.cluster_id.dimmed(),
            cluster.coordinates.len(),
            cluster.center.latitude,
            cluster.center.longitude
        );
    }
    Ok(())
}

/// Spatial clustering of every stored event
pub fn regions(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let events = store.list()?;
    print_clusters(&cluster_events(&events), json)
}

/// Themed clustering of augmented events read from a JSON array
pub fn themed(config: &Config, file: &Path, json: bool) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let events = parse_augmented(&value)?;
    let pipeline = ClusterPipeline::from_config(&config.clustering)
        .context("Failed to start clustering transport")?;

    print_clusters(&pipeline.cluster(&events), json)
}

fn parse_augmented(value: &Value) -> Result<Vec<AugmentedEvent>> {
    let Some(items) = value.as_array() else {
        bail!("Expected a JSON array of augmented events");
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            validate_augmented_event(item).with_context(|| format!("Invalid event at index {index}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_augmented_reports_index() {
        let value = json!([{ "id": "a" }]);
        let err = parse_augmented(&value).unwrap_err();
        assert!(format!("{err:#}").contains("index 0"));

        assert!(parse_augmented(&json!({})).is_err());
        assert!(parse_augmented(&json!([])).unwrap().is_empty());
    }
}
