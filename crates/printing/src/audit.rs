use serde::Serialize;

use crate::geometry::{Matrix, Rect};
use crate::render::{is_rendered, local_transform};
use crate::visual::Visual;

/// Per-node snapshot of how a visual tree will be rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualRenderMetadata {
    pub depth: usize,
    pub type_name: String,
    pub tag: Option<String>,
    pub bounds: Rect,
    /// Axis-aligned footprint of the node in the audit's root space.
    pub world_bounds: Rect,
    pub world_transform: Matrix,
    pub opacity: f64,
    pub rendered: bool,
    pub has_mirror: bool,
    pub has_render_transform: bool,
    pub clip_to_bounds: bool,
    pub has_clip: bool,
    pub has_opacity_mask: bool,
    pub child_count: usize,
}

/// Walks `root` depth-first in paint order.
pub fn collect(root: &dyn Visual) -> Vec<VisualRenderMetadata> {
    collect_from(root, Matrix::IDENTITY)
}

/// Same as [`collect`] with `base` applied after the root's own transform.
pub fn collect_from(root: &dyn Visual, base: Matrix) -> Vec<VisualRenderMetadata> {
    let mut entries = Vec::new();
    visit(root, base, 0, &mut entries);
    entries
}

fn visit(visual: &dyn Visual, parent: Matrix, depth: usize, entries: &mut Vec<VisualRenderMetadata>) {
    let bounds = visual.bounds();
    let world_transform = local_transform(visual) * parent;
    let children = visual.children();

    entries.push(VisualRenderMetadata {
        depth,
        type_name: visual.type_name().to_string(),
        tag: visual.tag().map(str::to_string),
        bounds,
        world_bounds: world_transform.transform_rect(Rect::from_size(bounds.size())),
        world_transform,
        opacity: visual.opacity(),
        rendered: is_rendered(visual),
        has_mirror: visual.has_mirror_transform(),
        has_render_transform: visual.render_transform().is_some(),
        clip_to_bounds: visual.clip_to_bounds(),
        has_clip: visual.clip().is_some(),
        has_opacity_mask: visual.opacity_mask().is_some(),
        child_count: children.len(),
    });

    for child in children {
        visit(child.as_ref(), world_transform, depth + 1, entries);
    }
}
