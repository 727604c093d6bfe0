use std::fmt;
use std::ops::Mul;

use serde::{Deserialize, Serialize};

/// Device-independent units per inch (1 DIP = 1/96").
pub const DIPS_PER_INCH: f64 = 96.0;
/// PostScript points per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Converts a device-independent length into points (1/72").
pub fn dip_to_points(value: f64) -> f64 {
    value * POINTS_PER_INCH / DIPS_PER_INCH
}

/// Converts a length in points back into device-independent units.
pub fn points_to_dip(value: f64) -> f64 {
    value * DIPS_PER_INCH / POINTS_PER_INCH
}

/// 2D coordinate in device-independent units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ZERO: Point = Point::new(0.0, 0.0);

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 2D size representation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when both axes are strictly positive.
    pub fn is_positive(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub const fn from_origin_size(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    pub const fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when the rectangle covers a non-empty area.
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        Rect::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }
}

/// Four-sided thickness (margins) in device-independent units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Thickness {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Thickness {
    pub const fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn uniform(value: f64) -> Self {
        Self::new(value, value, value, value)
    }

    pub const fn zero() -> Self {
        Self::uniform(0.0)
    }

    /// Negative sides are clamped to zero.
    pub fn clamped(&self) -> Self {
        Self::new(
            self.left.max(0.0),
            self.top.max(0.0),
            self.right.max(0.0),
            self.bottom.max(0.0),
        )
    }
}

/// Size expressed in whole device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rectangle expressed in whole device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// 2x3 affine matrix using the row-vector convention:
/// `x' = x * m11 + y * m21 + m31`, `y' = x * m12 + y * m22 + m32`.
///
/// `a * b` yields the transform that applies `a` first and `b` second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub m11: f64,
    pub m12: f64,
    pub m21: f64,
    pub m22: f64,
    pub m31: f64,
    pub m32: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(m11: f64, m12: f64, m21: f64, m22: f64, m31: f64, m32: f64) -> Self {
        Self {
            m11,
            m12,
            m21,
            m22,
            m31,
            m32,
        }
    }

    pub const fn translation(x: f64, y: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, x, y)
    }

    pub const fn scale(x: f64, y: f64) -> Self {
        Self::new(x, 0.0, 0.0, y, 0.0, 0.0)
    }

    /// Clockwise rotation (y axis pointing down) by `radians`.
    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn determinant(&self) -> f64 {
        self.m11 * self.m22 - self.m12 * self.m21
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        Some(Matrix::new(
            self.m22 / det,
            -self.m12 / det,
            -self.m21 / det,
            self.m11 / det,
            (self.m21 * self.m32 - self.m22 * self.m31) / det,
            (self.m12 * self.m31 - self.m11 * self.m32) / det,
        ))
    }

    pub fn transform_point(&self, point: Point) -> Point {
        Point::new(
            point.x * self.m11 + point.y * self.m21 + self.m31,
            point.x * self.m12 + point.y * self.m22 + self.m32,
        )
    }

    /// Axis-aligned bounding box of `rect` after transformation.
    pub fn transform_rect(&self, rect: Rect) -> Rect {
        let corners = [
            self.transform_point(Point::new(rect.x, rect.y)),
            self.transform_point(Point::new(rect.right(), rect.y)),
            self.transform_point(Point::new(rect.x, rect.bottom())),
            self.transform_point(Point::new(rect.right(), rect.bottom())),
        ];
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for corner in corners {
            min_x = min_x.min(corner.x);
            min_y = min_y.min(corner.y);
            max_x = max_x.max(corner.x);
            max_y = max_y.max(corner.y);
        }
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, rhs: Matrix) -> Matrix {
        Matrix::new(
            self.m11 * rhs.m11 + self.m12 * rhs.m21,
            self.m11 * rhs.m12 + self.m12 * rhs.m22,
            self.m21 * rhs.m11 + self.m22 * rhs.m21,
            self.m21 * rhs.m12 + self.m22 * rhs.m22,
            self.m31 * rhs.m11 + self.m32 * rhs.m21 + rhs.m31,
            self.m31 * rhs.m12 + self.m32 * rhs.m22 + rhs.m32,
        )
    }
}

/// Point that is either absolute or relative (0..1) to an element's size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePoint {
    pub x: f64,
    pub y: f64,
    pub relative: bool,
}

impl RelativePoint {
    pub const CENTER: RelativePoint = RelativePoint::relative(0.5, 0.5);
    pub const TOP_LEFT: RelativePoint = RelativePoint::relative(0.0, 0.0);

    pub const fn relative(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            relative: true,
        }
    }

    pub const fn absolute(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            relative: false,
        }
    }

    /// Resolves the point against `size`.
    pub fn to_pixels(&self, size: Size) -> Point {
        if self.relative {
            Point::new(self.x * size.width, self.y * size.height)
        } else {
            Point::new(self.x, self.y)
        }
    }
}

impl Default for RelativePoint {
    fn default() -> Self {
        Self::CENTER
    }
}

/// RGBA color stored in normalized floating-point form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rgba({:.3}, {:.3}, {:.3}, {:.3})",
            self.r, self.g, self.b, self.a
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point_eq(actual: Point, expected: Point) {
        assert!(
            (actual.x - expected.x).abs() < 1e-9 && (actual.y - expected.y).abs() < 1e-9,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn multiplication_applies_left_operand_first() {
        let scale_then_move = Matrix::scale(2.0, 2.0) * Matrix::translation(10.0, 0.0);
        assert_point_eq(
            scale_then_move.transform_point(Point::new(1.0, 1.0)),
            Point::new(12.0, 2.0),
        );

        let move_then_scale = Matrix::translation(10.0, 0.0) * Matrix::scale(2.0, 2.0);
        assert_point_eq(
            move_then_scale.transform_point(Point::new(1.0, 1.0)),
            Point::new(22.0, 2.0),
        );
    }

    #[test]
    fn inverse_round_trips_points() {
        let matrix = Matrix::rotation(0.3) * Matrix::translation(4.0, -2.0);
        let inverse = matrix.invert().expect("invertible");
        let point = Point::new(7.0, 3.0);
        assert_point_eq(inverse.transform_point(matrix.transform_point(point)), point);
        assert!(Matrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn mirrored_rect_keeps_its_footprint() {
        let mirror = Matrix::new(-1.0, 0.0, 0.0, 1.0, 50.0, 0.0);
        let bounds = mirror.transform_rect(Rect::new(0.0, 0.0, 50.0, 20.0));
        assert_eq!(bounds, Rect::new(0.0, 0.0, 50.0, 20.0));
    }

    #[test]
    fn point_conversions_use_72_per_inch() {
        assert_eq!(dip_to_points(96.0), 72.0);
        assert_eq!(points_to_dip(72.0), 96.0);
    }
}
