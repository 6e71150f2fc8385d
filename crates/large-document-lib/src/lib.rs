//! Large Document Library - Spatial Indexing and Viewport Culling
//!
//! This library keeps only the elements of a large interactive document that matter for the
//! current viewport and zoom level under consideration, so renderers never have to scan every
//! element on every frame. The core data structure is a quadtree; on top of it sit a
//! multi-strategy viewport culler with level-of-detail (LOD) support and result caching, a
//! low-zoom element clusterer and the affine math mapping document space to screen space.
//!
//! # Architecture
//!
//! - **[`SpatialBounds`]**: Axis-aligned rectangles in document space
//! - **[`SpatialIndex`]**: Thread-safe quadtree over [`SpatialElement`] wrappers
//! - **[`SpatialIndexManager`]**: Quadtree wrapper with layer/type membership and periodic rebuilds
//! - **[`ViewportCuller`]**: Per-frame visible set under a [`CullingStrategy`], with a TTL cache
//! - **[`ElementClusterer`]**: Aggregates elements into [`ElementCluster`]s at low zoom
//! - **[`CoordinateTransform`]**: Document ↔ screen mapping with a cached inverse
//! - **[`DocumentView`]**: High-level owner of all of the above
//!
//! # Performance Characteristics
//!
//! - **Insert/Remove**: O(D) where D = tree depth (bounded by `max_levels`)
//! - **Region Query**: O(D + K) where K = results, plus objects retained at ancestors
//! - **Cull (cached)**: O(1) for repeated viewports within the cache TTL

mod bounds;
mod clustering;
mod culling;
mod document;
mod element;
mod manager;
mod quadtree;
mod transform;
mod viewport;

// Public API exports
pub use bounds::{Point, SpatialBounds};
pub use clustering::{ClusterPolicy, ClusteringConfig, ElementCluster, ElementClusterer};
pub use culling::{
    CullingConfig, CullingResult, CullingStats, CullingStrategy, ElementCullInfo, ViewportCuller,
    calculate_element_importance,
};
pub use document::{Config, DocumentInfo, DocumentView};
pub use element::{BasicElement, DocumentElement, ElementRef, SpatialElement};
pub use manager::{IndexConfig, SpatialIndexManager};
pub use quadtree::{IndexStats, SpatialIndex};
pub use transform::{CoordinateTransform, Matrix3, validate_bounds, validate_point, validate_zoom};
pub use viewport::{LodLevel, ViewportBounds};

/// Error types for the indexing and culling core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Invalid zoom level: {0}")]
    InvalidZoom(f64),

    #[error("Invalid point: ({x}, {y})")]
    InvalidPoint { x: f64, y: f64 },

    #[error("Degenerate transform: {reason}")]
    DegenerateTransform { reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Collapse a fallible internal operation into its degraded value, logging the failure.
///
/// The public API of the index and culler never propagates internal errors: a malformed
/// element should reduce rendering coverage, not take the viewer down.
pub(crate) fn degrade<T: Default>(operation: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(operation, error = %err, "spatial operation failed; degrading");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn(Config) -> DocumentView = DocumentView::new;
        let _: fn() -> Config = Config::default;
    }

    #[test]
    fn test_degrade_returns_default_on_error() {
        let failed: Result<Vec<u32>> = Err(CoreError::InvalidZoom(0.0));
        assert!(degrade("test", failed).is_empty());
        assert!(!degrade::<bool>("test", Err(CoreError::InvalidConfig("cell size".into()))));
        assert_eq!(degrade("test", Ok(7usize)), 7);
    }
}
