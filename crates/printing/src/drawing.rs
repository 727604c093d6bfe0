use serde::{Deserialize, Serialize};

use crate::geometry::{Color, Matrix, Point, Rect, RelativePoint};

/// Vector shape drawn by a visual or used as a clip region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    Rectangle { rect: Rect },
    Ellipse { rect: Rect },
    Line { start: Point, end: Point },
    Polygon { points: Vec<Point>, closed: bool },
}

impl Geometry {
    pub fn rectangle(rect: Rect) -> Self {
        Geometry::Rectangle { rect }
    }

    pub fn ellipse(rect: Rect) -> Self {
        Geometry::Ellipse { rect }
    }

    /// Untransformed bounding box.
    pub fn bounds(&self) -> Rect {
        match self {
            Geometry::Rectangle { rect } | Geometry::Ellipse { rect } => *rect,
            Geometry::Line { start, end } => Rect::new(
                start.x.min(end.x),
                start.y.min(end.y),
                (start.x - end.x).abs(),
                (start.y - end.y).abs(),
            ),
            Geometry::Polygon { points, .. } => {
                let Some(first) = points.first() else {
                    return Rect::default();
                };
                let (mut min_x, mut min_y, mut max_x, mut max_y) =
                    (first.x, first.y, first.x, first.y);
                for point in points.iter().skip(1) {
                    min_x = min_x.min(point.x);
                    min_y = min_y.min(point.y);
                    max_x = max_x.max(point.x);
                    max_y = max_y.max(point.y);
                }
                Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
            }
        }
    }
}

/// Stroke descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pen {
    pub color: Color,
    pub thickness: f64,
}

impl Pen {
    pub const fn new(color: Color, thickness: f64) -> Self {
        Self { color, thickness }
    }
}

/// Alpha mask applied to a visual and its subtree, mapped onto the visual's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpacityMask {
    Solid {
        alpha: f32,
    },
    LinearGradient {
        start: RelativePoint,
        end: RelativePoint,
        start_alpha: f32,
        end_alpha: f32,
    },
}

/// Backend seam shared by the raster, vector and recording targets.
///
/// Every `push_*` call must be balanced by exactly one [`DrawingContext::pop`]. Pushed
/// transforms compose child-relative-to-parent: the new transform is applied before
/// the current one.
pub trait DrawingContext {
    fn push_transform(&mut self, transform: Matrix);
    fn push_clip(&mut self, rect: Rect);
    fn push_geometry_clip(&mut self, geometry: &Geometry);
    fn push_opacity(&mut self, opacity: f64);
    fn push_opacity_mask(&mut self, mask: &OpacityMask, bounds: Rect);
    fn pop(&mut self);

    fn fill_rectangle(&mut self, color: Color, rect: Rect);
    fn draw_geometry(&mut self, fill: Option<Color>, pen: Option<&Pen>, geometry: &Geometry);

    /// Bounds of the active clip region in the backend's native device units
    /// (pixels for raster targets, points for PDF), or `None` when unclipped.
    fn device_clip_bounds(&self) -> Option<Rect>;
}
