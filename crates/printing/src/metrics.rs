//! Page geometry derived from a visual's bounds and the requested page settings.
//! 依據視覺邊界與頁面設定推導出的頁面幾何資訊。

use serde::{Deserialize, Serialize};

use crate::geometry::{
    PixelRect, PixelSize, Point, Rect, Size, Thickness, DIPS_PER_INCH,
};
use crate::visual::Visual;

/// Requested page layout for one content unit. Immutable value; `with_*` returns a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    /// Target page size in DIP; the content's own size is used when absent.
    pub target_size: Option<Size>,
    pub margins: Option<Thickness>,
    /// Content scale; non-positive values are treated as 1.
    pub scale: f64,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            target_size: None,
            margins: None,
            scale: 1.0,
        }
    }
}

impl PageSettings {
    pub fn with_target_size(mut self, size: Size) -> Self {
        self.target_size = Some(size);
        self
    }

    pub fn with_margins(mut self, margins: Thickness) -> Self {
        self.margins = Some(margins);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Horizontal and vertical resolution in dots per inch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dpi {
    pub x: f64,
    pub y: f64,
}

impl Dpi {
    /// One device pixel per DIP.
    pub const LOGICAL: Dpi = Dpi::uniform(DIPS_PER_INCH);

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn uniform(value: f64) -> Self {
        Self::new(value, value)
    }

    /// Per-axis comparison with a small absolute tolerance.
    pub fn nearly_equals(&self, other: &Dpi) -> bool {
        const EPSILON: f64 = 1e-6;
        (self.x - other.x).abs() < EPSILON && (self.y - other.y).abs() < EPSILON
    }
}

impl Default for Dpi {
    fn default() -> Self {
        Self::LOGICAL
    }
}

/// Converts a DIP length into device pixels at `dpi`, rounding half away from zero.
pub fn dip_to_pixels(dip: f64, dpi: f64) -> i32 {
    // f64::round rounds half away from zero.
    (dip * dpi / DIPS_PER_INCH).round() as i32
}

/// Geometry for exactly one physical page.
///
/// Immutable; the only value that differs between slices of one logical page is the
/// content offset, produced through [`PageMetrics::with_content_offset`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMetrics {
    page_size: Size,
    margins: Thickness,
    content_rect: Rect,
    content_scale: f64,
    dpi: Dpi,
    page_pixel_size: PixelSize,
    content_pixel_rect: PixelRect,
    visual_bounds: Rect,
    content_offset: Point,
}

impl PageMetrics {
    /// Computes metrics for `visual` at `dpi`.
    pub fn for_visual(visual: &dyn Visual, settings: &PageSettings, dpi: Dpi) -> Self {
        Self::compute(visual.bounds(), settings, dpi)
    }

    /// Computes metrics for content with the given bounds. Total for any input.
    pub fn compute(visual_bounds: Rect, settings: &PageSettings, dpi: Dpi) -> Self {
        let page_size = match settings.target_size {
            Some(size) if size.is_positive() => size,
            _ => Size::new(visual_bounds.width.max(1.0), visual_bounds.height.max(1.0)),
        };

        let margins = settings.margins.unwrap_or_default().clamped();

        let content_width = (page_size.width - (margins.left + margins.right)).max(0.0);
        let content_height = (page_size.height - (margins.top + margins.bottom)).max(0.0);
        let content_rect = Rect::new(margins.left, margins.top, content_width, content_height);

        let page_pixel_size = PixelSize::new(
            dip_to_pixels(page_size.width, dpi.x).max(1) as u32,
            dip_to_pixels(page_size.height, dpi.y).max(1) as u32,
        );
        let content_pixel_rect = PixelRect::new(
            dip_to_pixels(margins.left, dpi.x),
            dip_to_pixels(margins.top, dpi.y),
            dip_to_pixels(content_width, dpi.x).max(0),
            dip_to_pixels(content_height, dpi.y).max(0),
        );

        let content_scale = if settings.scale > 0.0 {
            settings.scale
        } else {
            1.0
        };

        Self {
            page_size,
            margins,
            content_rect,
            content_scale,
            dpi,
            page_pixel_size,
            content_pixel_rect,
            visual_bounds,
            content_offset: Point::ZERO,
        }
    }

    /// Copy of these metrics showing the content from `offset`.
    pub fn with_content_offset(&self, offset: Point) -> Self {
        Self {
            content_offset: offset,
            ..self.clone()
        }
    }

    /// Page size in DIP; both axes are at least one unit.
    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn margins(&self) -> Thickness {
        self.margins
    }

    /// Page rectangle inset by the margins.
    pub fn content_rect(&self) -> Rect {
        self.content_rect
    }

    pub fn content_scale(&self) -> f64 {
        self.content_scale
    }

    pub fn dpi(&self) -> Dpi {
        self.dpi
    }

    pub fn page_pixel_size(&self) -> PixelSize {
        self.page_pixel_size
    }

    pub fn content_pixel_rect(&self) -> PixelRect {
        self.content_pixel_rect
    }

    pub fn visual_bounds(&self) -> Rect {
        self.visual_bounds
    }

    /// Top-left of the source content aligned to the content rectangle's origin.
    pub fn content_offset(&self) -> Point {
        self.content_offset
    }

    /// Content area expressed in content-space units (content rectangle over scale).
    pub fn available_content_size(&self) -> Size {
        Size::new(
            self.content_rect.width / self.content_scale,
            self.content_rect.height / self.content_scale,
        )
    }
}
