//! Low-zoom aggregation of elements into synthetic cluster nodes

use crate::{CoreError, Point, Result, SpatialBounds, SpatialElement, degrade};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How candidates are grouped once clustering kicks in
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClusterPolicy {
    /// One cluster covering every candidate
    #[default]
    SingleBounding,
    /// One cluster per screen-space cell of `cell_size` pixels, bucketed by element center
    Grid { cell_size: f64 },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusteringConfig {
    /// Clustering only happens strictly below this zoom. Default: 1.0
    pub zoom_threshold: f64,
    /// A group needs strictly more members than this to form a cluster. Default: 5
    pub min_cluster_size: usize,
    pub policy: ClusterPolicy,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            zoom_threshold: 1.0,
            min_cluster_size: 5,
            policy: ClusterPolicy::default(),
        }
    }
}

/// A group of elements drawn as a single node at low zoom
#[derive(Clone, Debug)]
pub struct ElementCluster {
    pub cluster_id: String,
    pub elements: Vec<Arc<SpatialElement>>,
    /// Union of the member bounds
    pub bounds: SpatialBounds,
    /// Mean of the member centers
    pub centroid: Point,
    /// Zoom level the cluster was computed for
    pub zoom_level: f64,
    /// Member drawn on behalf of the cluster: highest z-index, then larger area
    pub representative_element: Arc<SpatialElement>,
}

impl ElementCluster {
    /// Build a cluster from a non-empty member list
    fn from_members(
        cluster_id: String,
        elements: Vec<Arc<SpatialElement>>,
        zoom_level: f64,
    ) -> Option<Self> {
        let first = elements.first()?;
        let bounds = elements
            .iter()
            .skip(1)
            .fold(first.bounds, |acc, e| acc.union(&e.bounds));

        let count = elements.len() as f64;
        let (sum_x, sum_y) = elements.iter().fold((0.0, 0.0), |(x, y), e| {
            let c = e.bounds.center();
            (x + c.x, y + c.y)
        });
        let centroid = Point {
            x: sum_x / count,
            y: sum_y / count,
        };

        let representative_element = elements
            .iter()
            .max_by(|a, b| {
                a.z_index
                    .cmp(&b.z_index)
                    .then_with(|| a.bounds.area().total_cmp(&b.bounds.area()))
                    // Prefer the smaller id on full ties so the choice is stable
                    .then_with(|| b.element_id.cmp(&a.element_id))
            })
            .cloned()?;

        Some(Self {
            cluster_id,
            elements,
            bounds,
            centroid,
            zoom_level,
            representative_element,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Groups candidate elements into clusters when zoomed out
#[derive(Debug, Clone, Default)]
pub struct ElementClusterer {
    config: ClusteringConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ElementClusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Clusters for `elements` at `zoom_level`; empty at or above the zoom threshold
    /// or on invalid input
    pub fn cluster_elements(
        &self,
        elements: &[Arc<SpatialElement>],
        zoom_level: f64,
    ) -> Vec<ElementCluster> {
        degrade(
            "cluster_elements",
            self.try_cluster_elements(elements, zoom_level),
        )
    }

    pub fn try_cluster_elements(
        &self,
        elements: &[Arc<SpatialElement>],
        zoom_level: f64,
    ) -> Result<Vec<ElementCluster>> {
        if !zoom_level.is_finite() || zoom_level <= 0.0 {
            return Err(CoreError::InvalidZoom(zoom_level));
        }
        if zoom_level >= self.config.zoom_threshold
            || elements.len() <= self.config.min_cluster_size
        {
            return Ok(Vec::new());
        }

        match self.config.policy {
            ClusterPolicy::SingleBounding => Ok(ElementCluster::from_members(
                "cluster_0".to_owned(),
                elements.to_vec(),
                zoom_level,
            )
            .into_iter()
            .collect()),
            ClusterPolicy::Grid { cell_size } => {
                self.cluster_grid(elements, zoom_level, cell_size)
            }
        }
    }

    fn cluster_grid(
        &self,
        elements: &[Arc<SpatialElement>],
        zoom_level: f64,
        cell_size: f64,
    ) -> Result<Vec<ElementCluster>> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "grid cell size must be positive, got {cell_size}"
            )));
        }

        // Ordered map so cluster numbering follows cell position
        let mut cells: BTreeMap<(i64, i64), Vec<Arc<SpatialElement>>> = BTreeMap::new();
        for element in elements {
            let c = element.bounds.center();
            let cell = (
                (c.y * zoom_level / cell_size).floor() as i64,
                (c.x * zoom_level / cell_size).floor() as i64,
            );
            cells.entry(cell).or_default().push(element.clone());
        }

        let clusters: Vec<ElementCluster> = cells
            .into_values()
            .filter(|members| members.len() > self.config.min_cluster_size)
            .enumerate()
            .filter_map(|(i, members)| {
                ElementCluster::from_members(format!("cluster_{i}"), members, zoom_level)
            })
            .collect();

        tracing::trace!(clusters = clusters.len(), zoom_level, "grid clustering");
        Ok(clusters)
    }
}
