//! Theme table and centroid labeling

use rayon::prelude::*;

use super::similarity::cosine_similarity;
use super::{ClusterError, ClusterResult};
use crate::storage::GeoCoordinate;
use crate::validation::VECTOR_DIMENSION;

const STANDARD_THEMES: [&str; 8] = [
    "Natural Disasters",
    "Political Unrest",
    "Public Health",
    "Economic Activity",
    "Conflict & Security",
    "Environment & Climate",
    "Infrastructure",
    "Culture & Society",
];

const BLOCK_WEIGHT: f32 = 1.0;
const BACKGROUND_WEIGHT: f32 = 0.05;

/// A named reference vector
#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub name: String,
    pub vector: Vec<f32>,
}

/// Ordered themes sharing one dimension
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeTable {
    themes: Vec<Theme>,
    dimension: usize,
}

impl ThemeTable {
    /// Build a table, `None` if empty or the vectors disagree on dimension
    pub fn new(themes: Vec<Theme>) -> Option<Self> {
        let dimension = themes.first()?.vector.len();
        if themes.iter().any(|t| t.vector.len() != dimension) {
            return None;
        }
        Some(Self { themes, dimension })
    }

    /// Eight themes over 128 dimensions. Theme `i` weighs 1.0 on its own
    /// 16-wide block and 0.05 everywhere else.
    pub fn standard() -> Self {
        let block = VECTOR_DIMENSION / STANDARD_THEMES.len();
        let themes = STANDARD_THEMES
            .iter()
            .enumerate()
            .map(|(i, name)| Theme {
                name: name.to_string(),
                vector: (0..VECTOR_DIMENSION)
                    .map(|d| {
                        if d / block == i {
                            BLOCK_WEIGHT
                        } else {
                            BACKGROUND_WEIGHT
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            themes,
            dimension: VECTOR_DIMENSION,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }
}

impl Default for ThemeTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Most similar theme; ties keep the earlier theme
pub fn assign_label<'t>(centroid: &[f32], table: &'t ThemeTable) -> Result<&'t Theme, ClusterError> {
    if centroid.len() != table.dimension {
        return Err(ClusterError::Dimension {
            index: 0,
            expected: table.dimension,
            actual: centroid.len(),
        });
    }

    let mut best = &table.themes[0];
    let mut best_score = cosine_similarity(centroid, &best.vector);
    for theme in &table.themes[1..] {
        let score = cosine_similarity(centroid, &theme.vector);
        if score > best_score {
            best = theme;
            best_score = score;
        }
    }
    Ok(best)
}

/// Label each centroid, one result per centroid in input order.
///
/// Results are `cluster-<index>` with the theme name as label, the supplied
/// center and no coordinates. Inputs are checked up front: both slices must
/// be non-empty and equally long, and every centroid must match the table's
/// dimension.
pub fn label_clusters(
    centroids: &[Vec<f32>],
    centers: &[GeoCoordinate],
    table: &ThemeTable,
) -> Result<Vec<ClusterResult>, ClusterError> {
    if centroids.is_empty() || centers.is_empty() {
        return Err(ClusterError::EmptyInput);
    }
    if centroids.len() != centers.len() {
        return Err(ClusterError::LengthMismatch {
            centroids: centroids.len(),
            centers: centers.len(),
        });
    }
    if let Some((index, centroid)) = centroids
        .iter()
        .enumerate()
        .find(|(_, c)| c.len() != table.dimension)
    {
        let err = ClusterError::Dimension {
            index,
            expected: table.dimension,
            actual: centroid.len(),
        };
        tracing::warn!(error = %err, "rejecting label request");
        return Err(err);
    }

    centroids
        .par_iter()
        .zip(centers.par_iter())
        .enumerate()
        .map(|(index, (centroid, center))| {
            let theme = assign_label(centroid, table)?;
            Ok(ClusterResult::new(
                format!("cluster-{}", index),
                theme.name.clone(),
                *center,
            ))
        })
        .collect()
}
