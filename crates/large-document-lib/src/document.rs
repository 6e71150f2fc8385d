//! DocumentView - Top-level owner of the index, culler, clusterer and view transform
//!
//! This module provides the high-level API a renderer talks to: element ingestion,
//! spatial queries, per-frame culling and the document ↔ screen mapping.

use crate::{
    ClusteringConfig, CoordinateTransform, CullingConfig, CullingResult, CullingStrategy,
    ElementCluster, ElementClusterer, ElementRef, IndexConfig, Point, Result, SpatialBounds,
    SpatialElement, SpatialIndexManager, ViewportBounds, ViewportCuller,
};

use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for a document view
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub index: IndexConfig,
    pub culling: CullingConfig,
    pub clustering: ClusteringConfig,
}

/// Summary of the document contents
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DocumentInfo {
    pub element_count: usize,
    pub layer_count: usize,
    pub type_count: usize,
    /// Union of all element bounds (`None` if empty)
    pub content_bounds: Option<SpatialBounds>,
    /// Index mutation counter
    pub generation: u64,
}

/// Everything needed to decide what to draw for a large document
///
/// Queries and culling take `&self` and may run concurrently with element mutation from
/// another thread; only view reconfiguration requires `&mut self`.
#[derive(Debug)]
pub struct DocumentView {
    manager: SpatialIndexManager,
    culler: ViewportCuller,
    clusterer: ElementClusterer,
    transform: CoordinateTransform,
    config: Config,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl DocumentView {
    pub fn new(config: Config) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("document::new");

        let screen = CoordinateTransform::default().viewport_bounds_screen();
        let transform = CoordinateTransform::new(config.index.bounds, screen).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid document bounds; using default transform");
            CoordinateTransform::default()
        });

        Self {
            manager: SpatialIndexManager::new(config.index.clone()),
            culler: ViewportCuller::new(config.culling.clone()),
            clusterer: ElementClusterer::new(config.clustering.clone()),
            transform,
            config,
        }
    }

    /// Index an element, replacing any previous element with the same id
    pub fn add_element(&self, element: ElementRef) -> bool {
        self.manager.add_element(element)
    }

    /// Index many elements in parallel, returning how many were accepted
    pub fn add_elements(&self, elements: Vec<ElementRef>) -> usize {
        #[cfg(feature = "profiling")]
        profiling::scope!("document::add_elements");

        elements
            .into_par_iter()
            .map(|element| self.manager.add_element(element))
            .filter(|added| *added)
            .count()
    }

    pub fn remove_element(&self, element_id: &str) -> bool {
        let removed = self.manager.remove_element(element_id);
        if removed {
            self.culler.forget_element(element_id);
        }
        removed
    }

    /// Resize the document: the index is rebuilt over `new_bounds` and the transform
    /// recentered on it. Nothing changes if the bounds are rejected.
    pub fn update_bounds(&mut self, new_bounds: SpatialBounds) -> Result<()> {
        self.transform.set_document_bounds(new_bounds)?;
        self.manager.update_bounds(new_bounds)?;
        self.config.index.bounds = new_bounds;
        Ok(())
    }

    pub fn get_element(&self, element_id: &str) -> Option<Arc<SpatialElement>> {
        self.manager.get(element_id)
    }

    pub fn query_region(&self, area: &SpatialBounds) -> Vec<Arc<SpatialElement>> {
        self.manager.query_region(area)
    }

    pub fn query_point(&self, point: Point) -> Vec<Arc<SpatialElement>> {
        self.manager.query_point(point)
    }

    /// Up to `max_results` elements whose centers lie within `max_distance` of `point`,
    /// nearest first
    pub fn query_nearest(
        &self,
        point: Point,
        max_distance: f64,
        max_results: usize,
    ) -> Vec<(Arc<SpatialElement>, f64)> {
        self.manager.query_nearest(point, max_distance, max_results)
    }

    pub fn query_by_layer(&self, layer_name: &str) -> Vec<Arc<SpatialElement>> {
        self.manager.query_by_layer(layer_name)
    }

    pub fn query_by_type(&self, element_type: &str) -> Vec<Arc<SpatialElement>> {
        self.manager.query_by_type(element_type)
    }

    /// Visible elements for an explicit viewport
    pub fn cull_elements(&self, viewport: &ViewportBounds) -> CullingResult {
        #[cfg(feature = "profiling")]
        profiling::scope!("document::cull_elements");

        self.culler.cull_elements(&self.manager, viewport)
    }

    /// Visible elements for the region currently shown by the transform
    pub fn cull_current_view(&self, margin: f64) -> CullingResult {
        self.cull_elements(&self.transform.viewport_bounds(margin))
    }

    pub fn cluster_elements(
        &self,
        elements: &[Arc<SpatialElement>],
        zoom_level: f64,
    ) -> Vec<ElementCluster> {
        self.clusterer.cluster_elements(elements, zoom_level)
    }

    /// Cull, then cluster the survivors (clusters are empty when zoomed in)
    pub fn cull_and_cluster(&self, viewport: &ViewportBounds) -> (CullingResult, Vec<ElementCluster>) {
        let result = self.cull_elements(viewport);
        let clusters = self
            .clusterer
            .cluster_elements(&result.visible_elements, viewport.zoom_level);
        (result, clusters)
    }

    #[inline]
    pub fn document_to_screen(&self, point: Point) -> Point {
        self.transform.document_to_screen(point)
    }

    #[inline]
    pub fn screen_to_document(&self, point: Point) -> Point {
        self.transform.screen_to_document(point)
    }

    #[inline]
    pub fn transform_bounds(&self, bounds: &SpatialBounds) -> SpatialBounds {
        self.transform.transform_bounds(bounds)
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    /// Mutable access for zoom/pan/rotation changes
    pub fn transform_mut(&mut self) -> &mut CoordinateTransform {
        &mut self.transform
    }

    pub fn strategy(&self) -> CullingStrategy {
        self.culler.strategy()
    }

    pub fn set_strategy(&mut self, strategy: CullingStrategy) {
        self.culler.set_strategy(strategy);
    }

    pub fn manager(&self) -> &SpatialIndexManager {
        &self.manager
    }

    pub fn culler(&self) -> &ViewportCuller {
        &self.culler
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.manager.get_element_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }

    /// Document summary; computing the content bounds scans every element
    pub fn info(&self) -> DocumentInfo {
        let elements = self.manager.index().all_elements();
        let content_bounds = elements
            .split_first()
            .map(|(first, rest)| rest.iter().fold(first.bounds, |acc, e| acc.union(&e.bounds)));

        DocumentInfo {
            element_count: elements.len(),
            layer_count: self.manager.layers().len(),
            type_count: self.manager.types().len(),
            content_bounds,
            generation: self.manager.generation(),
        }
    }

    /// Remove every element and drop all cached culling state
    pub fn clear(&self) {
        self.manager.clear();
        self.culler.reset();
    }
}
