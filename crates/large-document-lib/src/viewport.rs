//! Viewport description handed to the culler each frame

use crate::{Point, SpatialBounds};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default pre-fetch margin around the visible region, in document units
pub(crate) const DEFAULT_VIEWPORT_MARGIN: f64 = 50.0;

/// Discrete level-of-detail tier derived from the zoom level
///
/// Level 0 is the highest detail (zoomed in), level 3 the lowest (zoomed out).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LodLevel {
    #[default]
    Full = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl LodLevel {
    /// Bucket a zoom level: ≥ 2.0 full, ≥ 1.0 high, ≥ 0.5 medium, otherwise low
    pub fn from_zoom(zoom_level: f64) -> Self {
        if zoom_level >= 2.0 {
            LodLevel::Full
        } else if zoom_level >= 1.0 {
            LodLevel::High
        } else if zoom_level >= 0.5 {
            LodLevel::Medium
        } else {
            LodLevel::Low
        }
    }

    #[inline]
    pub fn as_index(self) -> usize {
        self as usize
    }
}

/// The visible document region at a given zoom
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewportBounds {
    /// Visible region in document space
    pub bounds: SpatialBounds,
    pub zoom_level: f64,
    /// Pre-fetch margin in document units
    pub margin: f64,
}

impl ViewportBounds {
    pub fn new(bounds: SpatialBounds, zoom_level: f64) -> Self {
        Self {
            bounds,
            zoom_level,
            margin: DEFAULT_VIEWPORT_MARGIN,
        }
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Bounds grown by the pre-fetch margin
    #[inline]
    pub fn expanded_bounds(&self) -> SpatialBounds {
        self.bounds.expand(self.margin)
    }

    #[inline]
    pub fn lod_level(&self) -> LodLevel {
        LodLevel::from_zoom(self.zoom_level)
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.bounds.center()
    }
}
