//! Affine mapping between document space and screen space
//!
//! The forward matrix is `T(viewport center + pan) · R(rotation) · S(zoom) · T(-document center)`
//! in homogeneous coordinates. Both the matrix and its inverse are recomputed only when a
//! parameter changes, so per-point conversions are a handful of multiplications.

use crate::{CoreError, Point, Result, SpatialBounds, ViewportBounds};
use geo::Coord;
use std::ops::Mul;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which a matrix is treated as singular
const SINGULAR_EPSILON: f64 = 1e-12;

/// Maximum round-trip error tolerated by [`CoordinateTransform::validate_transformation`]
const ROUND_TRIP_TOLERANCE: f64 = 1e-10;

/// Row-major 3×3 homogeneous matrix
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Matrix3(pub [[f64; 3]; 3]);

impl Default for Matrix3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix3 {
    pub const fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub const fn translation(dx: f64, dy: f64) -> Self {
        Self([[1.0, 0.0, dx], [0.0, 1.0, dy], [0.0, 0.0, 1.0]])
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self([[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Counter-clockwise rotation in radians (clockwise on a y-down screen)
    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self([[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse via the adjugate, or `None` when the matrix is (numerically) singular
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let m = &self.0;
        let inv_det = 1.0 / det;
        let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };

        Some(Self([
            [
                cofactor(1, 2, 1, 2) * inv_det,
                -cofactor(0, 2, 1, 2) * inv_det,
                cofactor(0, 1, 1, 2) * inv_det,
            ],
            [
                -cofactor(1, 2, 0, 2) * inv_det,
                cofactor(0, 2, 0, 2) * inv_det,
                -cofactor(0, 1, 0, 2) * inv_det,
            ],
            [
                cofactor(1, 2, 0, 1) * inv_det,
                -cofactor(0, 2, 0, 1) * inv_det,
                cofactor(0, 1, 0, 1) * inv_det,
            ],
        ]))
    }

    /// Apply to a point (affine: the homogeneous row is assumed `[0, 0, 1]`)
    #[inline(always)]
    pub fn apply(&self, point: Point) -> Point {
        let m = &self.0;
        Coord {
            x: m[0][0] * point.x + m[0][1] * point.y + m[0][2],
            y: m[1][0] * point.x + m[1][1] * point.y + m[1][2],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }
}

impl Mul for Matrix3 {
    type Output = Matrix3;

    fn mul(self, rhs: Matrix3) -> Matrix3 {
        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.0[r][k] * rhs.0[k][c]).sum();
            }
        }
        Matrix3(out)
    }
}

/// Reject zero, negative or non-finite zoom levels
pub fn validate_zoom(zoom: f64) -> Result<()> {
    if zoom.is_finite() && zoom > 0.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidZoom(zoom))
    }
}

pub fn validate_bounds(bounds: &SpatialBounds) -> Result<()> {
    bounds.validate()
}

pub fn validate_point(point: Point) -> Result<()> {
    if point.x.is_finite() && point.y.is_finite() {
        Ok(())
    } else {
        Err(CoreError::InvalidPoint {
            x: point.x,
            y: point.y,
        })
    }
}

/// Document ↔ screen mapping for one view
///
/// Setters validate their input and leave the transform untouched on error.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinateTransform {
    document_bounds: SpatialBounds,
    /// Screen-space rectangle the document is drawn into
    viewport_bounds: SpatialBounds,
    zoom: f64,
    /// Screen-space offset of the document center from the viewport center
    pan: Point,
    /// Radians
    rotation: f64,
    matrix: Matrix3,
    inverse: Matrix3,
}

impl Default for CoordinateTransform {
    fn default() -> Self {
        let document_bounds = SpatialBounds::new(0.0, 0.0, 10_000.0, 10_000.0);
        let viewport_bounds = SpatialBounds::new(0.0, 0.0, 800.0, 600.0);
        let pan = Coord { x: 0.0, y: 0.0 };
        let matrix = compose(&document_bounds, &viewport_bounds, 1.0, pan, 0.0);
        // Pure translation, always invertible
        let inverse = matrix.inverse().unwrap_or_default();
        Self {
            document_bounds,
            viewport_bounds,
            zoom: 1.0,
            pan,
            rotation: 0.0,
            matrix,
            inverse,
        }
    }
}

fn compose(
    document_bounds: &SpatialBounds,
    viewport_bounds: &SpatialBounds,
    zoom: f64,
    pan: Point,
    rotation: f64,
) -> Matrix3 {
    let doc_center = document_bounds.center();
    let view_center = viewport_bounds.center();
    Matrix3::translation(view_center.x + pan.x, view_center.y + pan.y)
        * Matrix3::rotation(rotation)
        * Matrix3::scale(zoom, zoom)
        * Matrix3::translation(-doc_center.x, -doc_center.y)
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl CoordinateTransform {
    /// Identity-zoom transform centering `document_bounds` in `viewport_bounds`
    pub fn new(document_bounds: SpatialBounds, viewport_bounds: SpatialBounds) -> Result<Self> {
        validate_bounds(&document_bounds)?;
        validate_bounds(&viewport_bounds)?;
        let mut transform = Self {
            document_bounds,
            viewport_bounds,
            ..Self::default()
        };
        transform.recompute(document_bounds, viewport_bounds, 1.0, transform.pan, 0.0)?;
        Ok(transform)
    }

    pub fn document_bounds(&self) -> SpatialBounds {
        self.document_bounds
    }

    pub fn viewport_bounds_screen(&self) -> SpatialBounds {
        self.viewport_bounds
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn pan(&self) -> Point {
        self.pan
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn matrix(&self) -> &Matrix3 {
        &self.matrix
    }

    pub fn inverse_matrix(&self) -> &Matrix3 {
        &self.inverse
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        validate_zoom(zoom)?;
        self.recompute(self.document_bounds, self.viewport_bounds, zoom, self.pan, self.rotation)
    }

    pub fn set_pan(&mut self, pan: Point) -> Result<()> {
        validate_point(pan)?;
        self.recompute(self.document_bounds, self.viewport_bounds, self.zoom, pan, self.rotation)
    }

    /// Set the rotation in radians
    pub fn set_rotation(&mut self, rotation: f64) -> Result<()> {
        if !rotation.is_finite() {
            return Err(CoreError::DegenerateTransform {
                reason: format!("non-finite rotation {rotation}"),
            });
        }
        self.recompute(self.document_bounds, self.viewport_bounds, self.zoom, self.pan, rotation)
    }

    pub fn set_document_bounds(&mut self, bounds: SpatialBounds) -> Result<()> {
        validate_bounds(&bounds)?;
        self.recompute(bounds, self.viewport_bounds, self.zoom, self.pan, self.rotation)
    }

    /// Set the screen rectangle, e.g. after a window resize
    pub fn set_viewport_bounds(&mut self, bounds: SpatialBounds) -> Result<()> {
        validate_bounds(&bounds)?;
        self.recompute(self.document_bounds, bounds, self.zoom, self.pan, self.rotation)
    }

    /// Zoom so the whole document fits the viewport, centered and unrotated
    pub fn fit_to_viewport(&mut self) -> Result<()> {
        let doc = self.document_bounds;
        if doc.width <= 0.0 || doc.height <= 0.0 {
            return Err(CoreError::DegenerateTransform {
                reason: format!("cannot fit empty document bounds {doc:?}"),
            });
        }
        let zoom = (self.viewport_bounds.width / doc.width)
            .min(self.viewport_bounds.height / doc.height);
        validate_zoom(zoom)?;
        self.recompute(doc, self.viewport_bounds, zoom, Coord { x: 0.0, y: 0.0 }, 0.0)
    }

    #[inline]
    pub fn document_to_screen(&self, point: Point) -> Point {
        self.matrix.apply(point)
    }

    #[inline]
    pub fn screen_to_document(&self, point: Point) -> Point {
        self.inverse.apply(point)
    }

    pub fn try_document_to_screen(&self, point: Point) -> Result<Point> {
        validate_point(point)?;
        Ok(self.document_to_screen(point))
    }

    pub fn try_screen_to_document(&self, point: Point) -> Result<Point> {
        validate_point(point)?;
        Ok(self.screen_to_document(point))
    }

    /// Screen-space bounding box of a document rectangle (exact when unrotated)
    pub fn transform_bounds(&self, bounds: &SpatialBounds) -> SpatialBounds {
        map_bounds(&self.matrix, bounds)
    }

    /// Document-space bounding box of a screen rectangle
    pub fn inverse_transform_bounds(&self, bounds: &SpatialBounds) -> SpatialBounds {
        map_bounds(&self.inverse, bounds)
    }

    /// Document region covered by the screen viewport
    pub fn visible_document_bounds(&self) -> SpatialBounds {
        self.inverse_transform_bounds(&self.viewport_bounds)
    }

    /// Culling input for the current view
    pub fn viewport_bounds(&self, margin: f64) -> ViewportBounds {
        ViewportBounds::new(self.visible_document_bounds(), self.zoom).with_margin(margin)
    }

    /// Self-check for numerical degeneracy: both matrices finite and a fixed point
    /// surviving a forward/inverse round trip
    pub fn validate_transformation(&self) -> Result<()> {
        if !self.matrix.is_finite() || !self.inverse.is_finite() {
            return Err(CoreError::DegenerateTransform {
                reason: "non-finite matrix entries".to_owned(),
            });
        }

        let probe = self.document_bounds.center();
        let probe = Coord {
            x: probe.x + 1.0,
            y: probe.y + 1.0,
        };
        let back = self.screen_to_document(self.document_to_screen(probe));
        let error = (back.x - probe.x).hypot(back.y - probe.y);
        if error > ROUND_TRIP_TOLERANCE {
            return Err(CoreError::DegenerateTransform {
                reason: format!("round-trip error {error:e}"),
            });
        }
        Ok(())
    }

    fn recompute(
        &mut self,
        document_bounds: SpatialBounds,
        viewport_bounds: SpatialBounds,
        zoom: f64,
        pan: Point,
        rotation: f64,
    ) -> Result<()> {
        let matrix = compose(&document_bounds, &viewport_bounds, zoom, pan, rotation);
        let inverse = matrix
            .inverse()
            .ok_or_else(|| CoreError::DegenerateTransform {
                reason: format!("singular matrix at zoom {zoom}"),
            })?;
        if !matrix.is_finite() || !inverse.is_finite() {
            return Err(CoreError::DegenerateTransform {
                reason: "non-finite matrix entries".to_owned(),
            });
        }

        self.document_bounds = document_bounds;
        self.viewport_bounds = viewport_bounds;
        self.zoom = zoom;
        self.pan = pan;
        self.rotation = rotation;
        self.matrix = matrix;
        self.inverse = inverse;
        Ok(())
    }
}

fn map_bounds(matrix: &Matrix3, bounds: &SpatialBounds) -> SpatialBounds {
    let corners = [
        Coord { x: bounds.x, y: bounds.y },
        Coord { x: bounds.right(), y: bounds.y },
        Coord { x: bounds.right(), y: bounds.bottom() },
        Coord { x: bounds.x, y: bounds.bottom() },
    ];
    SpatialBounds::enclosing(corners.map(|c| matrix.apply(c))).unwrap_or_default()
}
