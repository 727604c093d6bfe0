//! Raster backend built on `tiny-skia`.
//! 以 tiny-skia 實作的點陣繪圖後端。

use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};
use serde::Serialize;
use tiny_skia::{
    FillRule, GradientStop, LinearGradient, Mask, MaskType, Paint, Path, PathBuilder, Pixmap,
    PixmapPaint, Shader, SpreadMode, Stroke, Transform,
};

use crate::drawing::{DrawingContext, Geometry, OpacityMask, Pen};
use crate::error::RenderError;
use crate::geometry::{Color, Matrix, Rect, DIPS_PER_INCH};
use crate::metrics::{dip_to_pixels, Dpi};
use crate::page::PhysicalPage;
use crate::render::{render_page, PageRenderReport};

/// Packed 32-bit pixel layouts understood by output sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum PixelFormat {
    Bgra8888 = 0,
    Rgba8888 = 1,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;
}

/// Rendered page pixels with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBitmap {
    width: u32,
    height: u32,
    dpi: Dpi,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PageBitmap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dpi(&self) -> Dpi {
        self.dpi
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row; rows are tightly packed.
    pub fn stride(&self) -> usize {
        self.width as usize * PixelFormat::BYTES_PER_PIXEL
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Channel values `[r, g, b, a]` at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.stride() + x as usize * PixelFormat::BYTES_PER_PIXEL;
        let px = &self.data[index..index + PixelFormat::BYTES_PER_PIXEL];
        Some(match self.format {
            PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra8888 => [px[2], px[1], px[0], px[3]],
        })
    }

    /// Re-packs the pixels in `format`.
    pub fn to_format(&self, format: PixelFormat) -> PageBitmap {
        let mut data = self.data.clone();
        if format != self.format {
            for px in data.chunks_exact_mut(PixelFormat::BYTES_PER_PIXEL) {
                px.swap(0, 2);
            }
        }
        PageBitmap {
            format,
            data,
            ..*self
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let rgba = self.to_format(PixelFormat::Rgba8888);
        let mut data = Vec::new();
        PngEncoder::new(&mut data)
            .write_image(&rgba.data, self.width, self.height, ColorType::Rgba8)
            .map_err(|err| RenderError::Backend(format!("png encode failed: {err}")))?;
        Ok(data)
    }

    fn from_pixmap(pixmap: &Pixmap, dpi: Dpi) -> Self {
        let mut data = Vec::with_capacity(pixmap.data().len());
        for pixel in pixmap.pixels() {
            let color = pixel.demultiply();
            data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            dpi,
            format: PixelFormat::Rgba8888,
            data,
        }
    }
}

/// Renders `page` into a bitmap at `dpi`.
pub fn render_to_bitmap(
    page: &PhysicalPage,
    dpi: Dpi,
) -> Result<(PageBitmap, PageRenderReport), RenderError> {
    let size = page.metrics().page_size();
    let width = dip_to_pixels(size.width, dpi.x).max(1) as u32;
    let height = dip_to_pixels(size.height, dpi.y).max(1) as u32;

    let mut context = RasterContext::new(width, height, dpi)?;
    let report = render_page(&mut context, page)?;
    let bitmap = context.finish()?;
    Ok((bitmap, report))
}

#[derive(Clone)]
struct RasterState {
    transform: Matrix,
    clip: Option<Mask>,
    clip_bounds: Option<Rect>,
}

enum Frame {
    State(RasterState),
    Layer {
        saved: RasterState,
        composite: LayerComposite,
    },
}

enum LayerComposite {
    Opacity(f32),
    Mask { mask: OpacityMask, bounds: Rect, transform: Matrix },
}

/// [`DrawingContext`] drawing into a pixmap. Coordinates arrive in DIP.
pub struct RasterContext {
    width: u32,
    height: u32,
    dpi: Dpi,
    layers: Vec<Pixmap>,
    state: RasterState,
    stack: Vec<Frame>,
    error: Option<RenderError>,
}

impl RasterContext {
    pub fn new(width: u32, height: u32, dpi: Dpi) -> Result<Self, RenderError> {
        let mut pixmap = new_pixmap(width, height)?;
        pixmap.fill(tiny_skia::Color::WHITE);
        Ok(Self {
            width,
            height,
            dpi,
            layers: vec![pixmap],
            state: RasterState {
                transform: Matrix::scale(dpi.x / DIPS_PER_INCH, dpi.y / DIPS_PER_INCH),
                clip: None,
                clip_bounds: None,
            },
            stack: Vec::new(),
            error: None,
        })
    }

    /// Flattens any open layers and returns the page pixels.
    pub fn finish(mut self) -> Result<PageBitmap, RenderError> {
        while !self.stack.is_empty() {
            self.pop();
        }
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let pixmap = self
            .layers
            .first()
            .ok_or_else(|| RenderError::Backend("raster target has no base layer".into()))?;
        Ok(PageBitmap::from_pixmap(pixmap, self.dpi))
    }

    fn record_error(&mut self, error: RenderError) {
        if self.error.is_none() {
            tracing::warn!(%error, "raster backend failure");
            self.error = Some(error);
        }
    }

    fn intersect_clip(&mut self, path: Option<Path>, device_bounds: Rect) {
        let transform = to_skia(self.state.transform);
        let mask = match (self.state.clip.take(), path) {
            (Some(mut mask), Some(path)) => {
                mask.intersect_path(&path, FillRule::Winding, true, transform);
                Some(mask)
            }
            (None, Some(path)) => Mask::new(self.width, self.height).map(|mut mask| {
                mask.fill_path(&path, FillRule::Winding, true, transform);
                mask
            }),
            // An empty clip shape hides everything.
            (_, None) => Mask::new(self.width, self.height),
        };
        if mask.is_none() {
            self.record_error(RenderError::Backend("failed to allocate clip mask".into()));
        }
        self.state.clip = mask;
        self.state.clip_bounds = Some(match self.state.clip_bounds {
            Some(current) => current.intersect(&device_bounds),
            None => device_bounds,
        });
    }

    fn push_layer(&mut self, composite: LayerComposite) {
        match new_pixmap(self.width, self.height) {
            Ok(layer) => {
                self.layers.push(layer);
                self.stack.push(Frame::Layer {
                    saved: self.state.clone(),
                    composite,
                });
            }
            Err(error) => {
                self.record_error(error);
                self.stack.push(Frame::State(self.state.clone()));
            }
        }
    }

    fn composite_layer(&mut self, composite: LayerComposite) {
        let Some(mut layer) = self.layers.pop() else {
            return;
        };
        let opacity = match composite {
            LayerComposite::Opacity(opacity) => opacity,
            LayerComposite::Mask {
                mask,
                bounds,
                transform,
            } => {
                match build_alpha_mask(self.width, self.height, &mask, bounds, transform) {
                    Ok(alpha) => layer.apply_mask(&alpha),
                    Err(error) => self.record_error(error),
                }
                1.0
            }
        };
        let paint = PixmapPaint {
            opacity,
            ..PixmapPaint::default()
        };
        if let Some(target) = self.layers.last_mut() {
            target.draw_pixmap(0, 0, layer.as_ref(), &paint, Transform::identity(), None);
        }
    }

    fn target(&mut self) -> Option<(&mut Pixmap, Transform, Option<&Mask>)> {
        let transform = to_skia(self.state.transform);
        let clip = self.state.clip.as_ref();
        self.layers.last_mut().map(|pixmap| (pixmap, transform, clip))
    }
}

impl DrawingContext for RasterContext {
    fn push_transform(&mut self, transform: Matrix) {
        self.stack.push(Frame::State(self.state.clone()));
        self.state.transform = transform * self.state.transform;
    }

    fn push_clip(&mut self, rect: Rect) {
        self.stack.push(Frame::State(self.state.clone()));
        let device = self.state.transform.transform_rect(rect);
        self.intersect_clip(rect_path(rect), device);
    }

    fn push_geometry_clip(&mut self, geometry: &Geometry) {
        self.stack.push(Frame::State(self.state.clone()));
        let device = self.state.transform.transform_rect(geometry.bounds());
        self.intersect_clip(geometry_path(geometry), device);
    }

    fn push_opacity(&mut self, opacity: f64) {
        self.push_layer(LayerComposite::Opacity(opacity.clamp(0.0, 1.0) as f32));
    }

    fn push_opacity_mask(&mut self, mask: &OpacityMask, bounds: Rect) {
        let transform = self.state.transform;
        self.push_layer(LayerComposite::Mask {
            mask: *mask,
            bounds,
            transform,
        });
    }

    fn pop(&mut self) {
        match self.stack.pop() {
            Some(Frame::State(saved)) => self.state = saved,
            Some(Frame::Layer { saved, composite }) => {
                self.state = saved;
                self.composite_layer(composite);
            }
            None => tracing::warn!("pop without a matching push"),
        }
    }

    fn fill_rectangle(&mut self, color: Color, rect: Rect) {
        let Some(path) = rect_path(rect) else {
            return;
        };
        let paint = solid_paint(color);
        if let Some((pixmap, transform, clip)) = self.target() {
            pixmap.fill_path(&path, &paint, FillRule::Winding, transform, clip);
        }
    }

    fn draw_geometry(&mut self, fill: Option<Color>, pen: Option<&Pen>, geometry: &Geometry) {
        let Some(path) = geometry_path(geometry) else {
            return;
        };
        let fillable = !matches!(geometry, Geometry::Line { .. });
        let Some((pixmap, transform, clip)) = self.target() else {
            return;
        };
        if let (Some(color), true) = (fill, fillable) {
            pixmap.fill_path(&path, &solid_paint(color), FillRule::Winding, transform, clip);
        }
        if let Some(pen) = pen {
            let stroke = Stroke {
                width: pen.thickness.max(0.0) as f32,
                ..Stroke::default()
            };
            pixmap.stroke_path(&path, &solid_paint(pen.color), &stroke, transform, clip);
        }
    }

    fn device_clip_bounds(&self) -> Option<Rect> {
        self.state.clip_bounds
    }
}

fn new_pixmap(width: u32, height: u32) -> Result<Pixmap, RenderError> {
    Pixmap::new(width, height).ok_or_else(|| {
        RenderError::Backend(format!("invalid raster size {width}x{height}"))
    })
}

pub(crate) fn to_skia(matrix: Matrix) -> Transform {
    Transform::from_row(
        matrix.m11 as f32,
        matrix.m12 as f32,
        matrix.m21 as f32,
        matrix.m22 as f32,
        matrix.m31 as f32,
        matrix.m32 as f32,
    )
}

fn to_skia_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        color.a.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

fn solid_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_skia_color(color));
    paint.anti_alias = true;
    paint
}

fn skia_rect(rect: Rect) -> Option<tiny_skia::Rect> {
    if !rect.has_area() {
        return None;
    }
    tiny_skia::Rect::from_xywh(
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    )
}

fn rect_path(rect: Rect) -> Option<Path> {
    skia_rect(rect).map(PathBuilder::from_rect)
}

fn geometry_path(geometry: &Geometry) -> Option<Path> {
    match geometry {
        Geometry::Rectangle { rect } => rect_path(*rect),
        Geometry::Ellipse { rect } => skia_rect(*rect).and_then(PathBuilder::from_oval),
        Geometry::Line { start, end } => {
            let mut builder = PathBuilder::new();
            builder.move_to(start.x as f32, start.y as f32);
            builder.line_to(end.x as f32, end.y as f32);
            builder.finish()
        }
        Geometry::Polygon { points, closed } => {
            let (first, rest) = points.split_first()?;
            let mut builder = PathBuilder::new();
            builder.move_to(first.x as f32, first.y as f32);
            for point in rest {
                builder.line_to(point.x as f32, point.y as f32);
            }
            if *closed {
                builder.close();
            }
            builder.finish()
        }
    }
}

fn build_alpha_mask(
    width: u32,
    height: u32,
    mask: &OpacityMask,
    bounds: Rect,
    transform: Matrix,
) -> Result<Mask, RenderError> {
    let mut pixmap = new_pixmap(width, height)?;
    if let Some(area) = rect_path(bounds) {
        let mut paint = Paint::default();
        paint.anti_alias = true;
        match *mask {
            OpacityMask::Solid { alpha } => {
                paint.set_color(to_skia_color(Color::new(0.0, 0.0, 0.0, alpha)));
            }
            OpacityMask::LinearGradient {
                start,
                end,
                start_alpha,
                end_alpha,
            } => {
                let from = start.to_pixels(bounds.size());
                let to = end.to_pixels(bounds.size());
                let stops = vec![
                    GradientStop::new(0.0, to_skia_color(Color::new(0.0, 0.0, 0.0, start_alpha))),
                    GradientStop::new(1.0, to_skia_color(Color::new(0.0, 0.0, 0.0, end_alpha))),
                ];
                paint.shader = LinearGradient::new(
                    tiny_skia::Point::from_xy((bounds.x + from.x) as f32, (bounds.y + from.y) as f32),
                    tiny_skia::Point::from_xy((bounds.x + to.x) as f32, (bounds.y + to.y) as f32),
                    stops,
                    SpreadMode::Pad,
                    Transform::identity(),
                )
                .unwrap_or(Shader::SolidColor(to_skia_color(Color::new(
                    0.0, 0.0, 0.0, start_alpha,
                ))));
            }
        }
        pixmap.fill_path(&area, &paint, FillRule::Winding, to_skia(transform), None);
    }
    Ok(Mask::from_pixmap(pixmap.as_ref(), MaskType::Alpha))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::geometry::{Size, Thickness};
    use crate::metrics::PageSettings;
    use crate::page::LogicalPage;
    use crate::pagination::{expand_page, DEFAULT_FIT_TOLERANCE};
    use crate::scene::SceneNode;

    const RED: Color = Color::rgb(1.0, 0.0, 0.0);

    fn page_of(node: SceneNode, size: Size, margin: f64) -> PhysicalPage {
        let settings = PageSettings::default()
            .with_target_size(size)
            .with_margins(Thickness::uniform(margin));
        let page = LogicalPage::new(Arc::new(node), settings, false).normalized(Dpi::LOGICAL);
        expand_page(&page, DEFAULT_FIT_TOLERANCE)
            .next()
            .expect("one page")
    }

    #[test]
    fn content_is_clipped_to_the_content_rect() {
        let node = SceneNode::new(0.0, 0.0, 100.0, 100.0).with_background(RED);
        let page = page_of(node, Size::new(100.0, 100.0), 10.0);
        let (bitmap, report) = render_to_bitmap(&page, Dpi::LOGICAL).expect("render");

        assert_eq!((bitmap.width(), bitmap.height()), (100, 100));
        assert_eq!(bitmap.pixel(5, 5), Some([255, 255, 255, 255]));
        assert_eq!(bitmap.pixel(50, 50), Some([255, 0, 0, 255]));
        assert_eq!(bitmap.pixel(95, 50), Some([255, 255, 255, 255]));
        assert_eq!(report.content_clip, Some(Rect::new(10.0, 10.0, 80.0, 80.0)));
    }

    #[test]
    fn pixel_size_follows_dpi() {
        let node = SceneNode::new(0.0, 0.0, 96.0, 48.0).with_background(RED);
        let page = page_of(node, Size::new(96.0, 48.0), 0.0);
        let (bitmap, report) = render_to_bitmap(&page, Dpi::uniform(192.0)).expect("render");

        assert_eq!((bitmap.width(), bitmap.height()), (192, 96));
        assert_eq!(bitmap.dpi(), Dpi::uniform(192.0));
        assert_eq!(report.content_clip, Some(Rect::new(0.0, 0.0, 192.0, 96.0)));
        assert_eq!(bitmap.stride(), 192 * 4);
    }

    #[test]
    fn opacity_blends_with_the_background() {
        let node = SceneNode::new(0.0, 0.0, 20.0, 20.0)
            .with_background(Color::BLACK)
            .with_opacity(0.5);
        let page = page_of(node, Size::new(20.0, 20.0), 0.0);
        let (bitmap, _) = render_to_bitmap(&page, Dpi::LOGICAL).expect("render");

        let [r, g, b, a] = bitmap.pixel(10, 10).expect("pixel");
        assert!((126..=129).contains(&r), "r = {r}");
        assert_eq!((r, g, b, a), (r, r, r, 255));
    }

    #[test]
    fn solid_mask_scales_alpha() {
        let node = SceneNode::new(0.0, 0.0, 20.0, 20.0)
            .with_background(Color::BLACK)
            .with_opacity_mask(OpacityMask::Solid { alpha: 0.0 });
        let page = page_of(node, Size::new(20.0, 20.0), 0.0);
        let (bitmap, _) = render_to_bitmap(&page, Dpi::LOGICAL).expect("render");
        assert_eq!(bitmap.pixel(10, 10), Some([255, 255, 255, 255]));
    }

    #[test]
    fn geometry_clip_limits_drawing() {
        let node = SceneNode::new(0.0, 0.0, 40.0, 40.0)
            .with_background(RED)
            .with_clip(Geometry::rectangle(Rect::new(0.0, 0.0, 20.0, 40.0)));
        let page = page_of(node, Size::new(40.0, 40.0), 0.0);
        let (bitmap, _) = render_to_bitmap(&page, Dpi::LOGICAL).expect("render");
        assert_eq!(bitmap.pixel(10, 20), Some([255, 0, 0, 255]));
        assert_eq!(bitmap.pixel(30, 20), Some([255, 255, 255, 255]));
    }

    #[test]
    fn bgra_swaps_red_and_blue() {
        let node = SceneNode::new(0.0, 0.0, 4.0, 4.0).with_background(RED);
        let page = page_of(node, Size::new(4.0, 4.0), 0.0);
        let (bitmap, _) = render_to_bitmap(&page, Dpi::LOGICAL).expect("render");
        let bgra = bitmap.to_format(PixelFormat::Bgra8888);

        assert_eq!(&bgra.data()[..4], &[0, 0, 255, 255]);
        assert_eq!(bgra.pixel(1, 1), bitmap.pixel(1, 1));
        assert_eq!(PixelFormat::Bgra8888 as u8, 0);
        assert_eq!(PixelFormat::Rgba8888 as u8, 1);
    }

    #[test]
    fn png_encoding_produces_a_png_signature() {
        let node = SceneNode::new(0.0, 0.0, 8.0, 8.0);
        let page = page_of(node, Size::new(8.0, 8.0), 0.0);
        let (bitmap, _) = render_to_bitmap(&page, Dpi::LOGICAL).expect("render");
        let png = bitmap.encode_png().expect("png");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
