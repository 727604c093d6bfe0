//! Backend-independent page rendering.
//!
//! Every backend receives the same sequence of drawing calls for a page; only the base
//! transform each backend installs (DIP to pixels, DIP to points) differs.
//! 各後端收到相同的繪圖呼叫序列，只有各自的基礎轉換不同。

use serde::Serialize;

use crate::drawing::DrawingContext;
use crate::error::RenderError;
use crate::geometry::{Color, Matrix, Rect};
use crate::metrics::PageMetrics;
use crate::page::PhysicalPage;
use crate::visual::Visual;

/// What a page render produced, as observed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageRenderReport {
    /// Active clip after the content rectangle was applied, in the backend's device
    /// units. `None` for blank pages.
    pub content_clip: Option<Rect>,
    pub visuals_rendered: usize,
}

/// Transform from content space to page space (DIP) for `metrics`.
pub fn content_transform(metrics: &PageMetrics) -> Matrix {
    let content_rect = metrics.content_rect();
    let offset = metrics.content_offset();
    let bounds = metrics.visual_bounds();
    let scale = metrics.content_scale();

    Matrix::translation(-bounds.x, -bounds.y)
        * Matrix::translation(-offset.x, -offset.y)
        * Matrix::scale(scale, scale)
        * Matrix::translation(content_rect.x, content_rect.y)
}

/// Draws `page` onto `context` in page space (DIP).
pub fn render_page(
    context: &mut dyn DrawingContext,
    page: &PhysicalPage,
) -> Result<PageRenderReport, RenderError> {
    let metrics = page.metrics();
    context.fill_rectangle(Color::WHITE, Rect::from_size(metrics.page_size()));

    let content_rect = metrics.content_rect();
    if !content_rect.has_area() {
        return Ok(PageRenderReport {
            content_clip: None,
            visuals_rendered: 0,
        });
    }

    let offset = metrics.content_offset();
    let bounds = metrics.visual_bounds();
    let scale = metrics.content_scale();

    context.push_transform(Matrix::translation(content_rect.x, content_rect.y));
    context.push_clip(Rect::from_size(content_rect.size()));
    let content_clip = context.device_clip_bounds();
    context.push_transform(Matrix::scale(scale, scale));
    context.push_transform(Matrix::translation(-offset.x, -offset.y));
    context.push_transform(Matrix::translation(-bounds.x, -bounds.y));

    let mut visuals_rendered = 0;
    let result = render_visual(context, page.visual.as_ref(), &mut visuals_rendered);

    for _ in 0..5 {
        context.pop();
    }

    result.map(|()| PageRenderReport {
        content_clip,
        visuals_rendered,
    })
}

/// Transform from a node's local space into its parent's space.
pub fn local_transform(visual: &dyn Visual) -> Matrix {
    let bounds = visual.bounds();
    let mut transform = Matrix::IDENTITY;

    if visual.has_mirror_transform() {
        transform = Matrix::new(-1.0, 0.0, 0.0, 1.0, bounds.width, 0.0);
    }

    // The render transform applies before the mirror.
    if let Some(render_transform) = visual.render_transform() {
        let origin = visual.render_transform_origin().to_pixels(bounds.size());
        transform = Matrix::translation(-origin.x, -origin.y)
            * render_transform
            * Matrix::translation(origin.x, origin.y)
            * transform;
    }

    transform * Matrix::translation(bounds.x, bounds.y)
}

/// Whether a node contributes anything when rendered.
pub fn is_rendered(visual: &dyn Visual) -> bool {
    visual.is_visible() && visual.opacity() > 0.0
}

fn render_visual(
    context: &mut dyn DrawingContext,
    visual: &dyn Visual,
    rendered: &mut usize,
) -> Result<(), RenderError> {
    if !is_rendered(visual) {
        return Ok(());
    }

    let bounds = visual.bounds();
    let local_area = Rect::from_size(bounds.size());
    let mut scopes = 0;

    let transform = local_transform(visual);
    if !transform.is_identity() {
        context.push_transform(transform);
        scopes += 1;
    }
    let opacity = visual.opacity();
    if opacity < 1.0 {
        context.push_opacity(opacity);
        scopes += 1;
    }
    if visual.clip_to_bounds() {
        context.push_clip(local_area);
        scopes += 1;
    }
    if let Some(clip) = visual.clip() {
        context.push_geometry_clip(clip);
        scopes += 1;
    }
    if let Some(mask) = visual.opacity_mask() {
        context.push_opacity_mask(mask, local_area);
        scopes += 1;
    }

    let result = render_contents(context, visual, rendered);

    for _ in 0..scopes {
        context.pop();
    }
    result
}

fn render_contents(
    context: &mut dyn DrawingContext,
    visual: &dyn Visual,
    rendered: &mut usize,
) -> Result<(), RenderError> {
    visual.render(context)?;
    *rendered += 1;
    for child in visual.children() {
        render_visual(context, child.as_ref(), rendered)?;
    }
    Ok(())
}
