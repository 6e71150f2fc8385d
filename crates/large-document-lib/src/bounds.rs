//! Axis-aligned geometry in document space

use crate::{CoreError, Result};
use geo::{Coord, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point in document or screen space
pub type Point = Coord<f64>;

/// Axis-aligned rectangle `{x, y, width, height}` with non-negative size
///
/// All containment and intersection tests are edge-inclusive, so two rectangles that
/// merely touch intersect, and a point on an edge is contained.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SpatialBounds {
    /// Create new bounds; negative sizes are clamped to zero
    #[inline]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Bounds spanning two arbitrary corners
    pub fn from_corners(a: Point, b: Point) -> Self {
        let min_x = a.x.min(b.x);
        let min_y = a.y.min(b.y);
        Self::new(min_x, min_y, a.x.max(b.x) - min_x, a.y.max(b.y) - min_y)
    }

    /// Smallest bounds enclosing every given point, or `None` for an empty iterator
    pub fn enclosing(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    #[inline]
    pub fn center(&self) -> Point {
        Coord {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Whether the two rectangles overlap or touch
    #[inline]
    pub fn intersects(&self, other: &SpatialBounds) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    #[inline]
    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Whether `other` lies entirely inside these bounds
    #[inline]
    pub fn contains_bounds(&self, other: &SpatialBounds) -> bool {
        other.x >= self.x
            && other.right() <= self.right()
            && other.y >= self.y
            && other.bottom() <= self.bottom()
    }

    /// Grow the bounds by `margin` on every side (a negative margin shrinks, never below zero size)
    pub fn expand(&self, margin: f64) -> Self {
        let width = (self.width + 2.0 * margin).max(0.0);
        let height = (self.height + 2.0 * margin).max(0.0);
        let center = self.center();
        Self::new(center.x - width / 2.0, center.y - height / 2.0, width, height)
    }

    /// Smallest bounds covering both rectangles
    pub fn union(&self, other: &SpatialBounds) -> Self {
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Euclidean distance between the centers of the bounds and `point`
    #[inline]
    pub fn center_distance(&self, point: Point) -> f64 {
        let c = self.center();
        (c.x - point.x).hypot(c.y - point.y)
    }

    /// True when every component is finite
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Reject bounds that cannot be placed in the index
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() && self.width >= 0.0 && self.height >= 0.0 {
            Ok(())
        } else {
            Err(CoreError::InvalidBounds(format!("{self:?}")))
        }
    }
}

impl From<Rect<f64>> for SpatialBounds {
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.width(), rect.height())
    }
}

impl From<SpatialBounds> for Rect<f64> {
    fn from(bounds: SpatialBounds) -> Self {
        Rect::new(
            Coord {
                x: bounds.x,
                y: bounds.y,
            },
            Coord {
                x: bounds.right(),
                y: bounds.bottom(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_size_is_clamped() {
        let b = SpatialBounds::new(10.0, 10.0, -5.0, 3.0);
        assert_eq!(b.width, 0.0);
        assert_eq!(b.height, 3.0);
    }

    #[test]
    fn test_intersects_is_edge_inclusive() {
        let a = SpatialBounds::new(0.0, 0.0, 10.0, 10.0);
        let touching = SpatialBounds::new(10.0, 0.0, 5.0, 5.0);
        let apart = SpatialBounds::new(10.5, 0.0, 5.0, 5.0);
        assert!(a.intersects(&touching));
        assert!(touching.intersects(&a));
        assert!(!a.intersects(&apart));
    }

    #[test]
    fn test_contains() {
        let a = SpatialBounds::new(0.0, 0.0, 100.0, 50.0);
        assert!(a.contains_point(Coord { x: 100.0, y: 50.0 }));
        assert!(!a.contains_point(Coord { x: 100.1, y: 25.0 }));
        assert!(a.contains_bounds(&SpatialBounds::new(10.0, 10.0, 90.0, 40.0)));
        assert!(!a.contains_bounds(&SpatialBounds::new(10.0, 10.0, 91.0, 40.0)));
    }

    #[test]
    fn test_expand_keeps_center() {
        let a = SpatialBounds::new(10.0, 20.0, 30.0, 40.0);
        let grown = a.expand(5.0);
        assert_eq!(grown, SpatialBounds::new(5.0, 15.0, 40.0, 50.0));
        assert_eq!(grown.center(), a.center());

        let collapsed = a.expand(-100.0);
        assert_eq!(collapsed.width, 0.0);
        assert_eq!(collapsed.center(), a.center());
    }

    #[test]
    fn test_union_and_enclosing() {
        let a = SpatialBounds::new(0.0, 0.0, 10.0, 10.0);
        let b = SpatialBounds::new(20.0, -5.0, 5.0, 5.0);
        assert_eq!(a.union(&b), SpatialBounds::new(0.0, -5.0, 25.0, 15.0));

        let enclosing = SpatialBounds::enclosing([
            Coord { x: 3.0, y: 4.0 },
            Coord { x: -1.0, y: 8.0 },
        ])
        .unwrap();
        assert_eq!(enclosing, SpatialBounds::new(-1.0, 4.0, 4.0, 4.0));
        assert!(SpatialBounds::enclosing(std::iter::empty()).is_none());
    }

    #[test]
    fn test_validate_rejects_nan() {
        assert!(SpatialBounds::new(0.0, 0.0, 1.0, 1.0).validate().is_ok());
        assert!(SpatialBounds::new(f64::NAN, 0.0, 1.0, 1.0).validate().is_err());
        assert!(SpatialBounds::new(0.0, 0.0, f64::INFINITY, 1.0).validate().is_err());
    }

    #[test]
    fn test_geo_rect_conversion() {
        let b = SpatialBounds::new(1.0, 2.0, 3.0, 4.0);
        let rect: Rect<f64> = b.into();
        assert_eq!(rect.max(), Coord { x: 4.0, y: 6.0 });
        assert_eq!(SpatialBounds::from(rect), b);
    }
}
