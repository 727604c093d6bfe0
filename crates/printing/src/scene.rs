//! Retained scene tree used to describe printable content.
//! 以保留式節點樹描述可列印的內容。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::drawing::{DrawingContext, Geometry, OpacityMask, Pen};
use crate::error::RenderError;
use crate::geometry::{Color, Matrix, Rect, RelativePoint};
use crate::visual::{PrintHints, Visual, VisualRef};

/// A filled and/or stroked geometry drawn in the node's local space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub geometry: Geometry,
    #[serde(default)]
    pub fill: Option<Color>,
    #[serde(default)]
    pub stroke: Option<Pen>,
}

impl Shape {
    pub fn filled(geometry: Geometry, color: Color) -> Self {
        Self {
            geometry,
            fill: Some(color),
            stroke: None,
        }
    }

    pub fn stroked(geometry: Geometry, pen: Pen) -> Self {
        Self {
            geometry,
            fill: None,
            stroke: Some(pen),
        }
    }
}

/// Concrete [`Visual`] with builder-style configuration.
#[derive(Debug, Clone)]
pub struct SceneNode {
    bounds: Rect,
    shapes: Vec<Shape>,
    children: Vec<VisualRef>,
    visible: bool,
    opacity: f64,
    clip_to_bounds: bool,
    clip: Option<Geometry>,
    opacity_mask: Option<OpacityMask>,
    render_transform: Option<Matrix>,
    render_transform_origin: RelativePoint,
    mirror: bool,
    hints: PrintHints,
    tag: Option<String>,
    type_name: String,
    render_error: Option<String>,
}

impl SceneNode {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::with_bounds(Rect::new(x, y, width, height))
    }

    pub fn with_bounds(bounds: Rect) -> Self {
        Self {
            bounds,
            shapes: Vec::new(),
            children: Vec::new(),
            visible: true,
            opacity: 1.0,
            clip_to_bounds: false,
            clip: None,
            opacity_mask: None,
            render_transform: None,
            render_transform_origin: RelativePoint::CENTER,
            mirror: false,
            hints: PrintHints::default(),
            tag: None,
            type_name: "SceneNode".to_string(),
            render_error: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shapes.push(shape);
        self
    }

    /// Fills the node's full local area.
    pub fn with_background(self, color: Color) -> Self {
        let area = Rect::new(0.0, 0.0, self.bounds.width, self.bounds.height);
        self.with_shape(Shape::filled(Geometry::rectangle(area), color))
    }

    pub fn with_child(mut self, child: impl Visual + 'static) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    pub fn with_child_ref(mut self, child: VisualRef) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_clip_to_bounds(mut self, clip: bool) -> Self {
        self.clip_to_bounds = clip;
        self
    }

    pub fn with_clip(mut self, geometry: Geometry) -> Self {
        self.clip = Some(geometry);
        self
    }

    pub fn with_opacity_mask(mut self, mask: OpacityMask) -> Self {
        self.opacity_mask = Some(mask);
        self
    }

    pub fn with_render_transform(mut self, transform: Matrix, origin: RelativePoint) -> Self {
        self.render_transform = Some(transform);
        self.render_transform_origin = origin;
        self
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_hints(mut self, hints: PrintHints) -> Self {
        self.hints = hints;
        self
    }

    /// Makes [`Visual::render`] fail with `message`.
    pub fn with_render_error(mut self, message: impl Into<String>) -> Self {
        self.render_error = Some(message.into());
        self
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }
}

impl Visual for SceneNode {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn render(&self, context: &mut dyn DrawingContext) -> Result<(), RenderError> {
        if let Some(message) = &self.render_error {
            return Err(RenderError::Visual(message.clone()));
        }
        for shape in &self.shapes {
            context.draw_geometry(shape.fill, shape.stroke.as_ref(), &shape.geometry);
        }
        Ok(())
    }

    fn children(&self) -> &[VisualRef] {
        &self.children
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn opacity(&self) -> f64 {
        self.opacity
    }

    fn clip_to_bounds(&self) -> bool {
        self.clip_to_bounds
    }

    fn clip(&self) -> Option<&Geometry> {
        self.clip.as_ref()
    }

    fn opacity_mask(&self) -> Option<&OpacityMask> {
        self.opacity_mask.as_ref()
    }

    fn render_transform(&self) -> Option<Matrix> {
        self.render_transform
    }

    fn render_transform_origin(&self) -> RelativePoint {
        self.render_transform_origin
    }

    fn has_mirror_transform(&self) -> bool {
        self.mirror
    }

    fn print_hints(&self) -> PrintHints {
        self.hints
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Serializable description of a scene tree, as read from JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescription {
    pub bounds: Rect,
    pub tag: Option<String>,
    pub kind: Option<String>,
    pub visible: bool,
    pub opacity: f64,
    pub clip_to_bounds: bool,
    pub clip: Option<Geometry>,
    pub opacity_mask: Option<OpacityMask>,
    pub render_transform: Option<Matrix>,
    pub render_transform_origin: RelativePoint,
    pub mirror: bool,
    pub hints: PrintHints,
    pub shapes: Vec<Shape>,
    pub children: Vec<SceneDescription>,
}

impl Default for SceneDescription {
    fn default() -> Self {
        Self {
            bounds: Rect::default(),
            tag: None,
            kind: None,
            visible: true,
            opacity: 1.0,
            clip_to_bounds: false,
            clip: None,
            opacity_mask: None,
            render_transform: None,
            render_transform_origin: RelativePoint::CENTER,
            mirror: false,
            hints: PrintHints::default(),
            shapes: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl SceneDescription {
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Builds the node tree this description stands for.
    pub fn to_node(&self) -> SceneNode {
        let mut node = SceneNode::with_bounds(self.bounds)
            .with_visible(self.visible)
            .with_opacity(self.opacity)
            .with_clip_to_bounds(self.clip_to_bounds)
            .with_mirror(self.mirror)
            .with_hints(self.hints);
        node.shapes = self.shapes.clone();
        node.clip = self.clip.clone();
        node.opacity_mask = self.opacity_mask;
        node.render_transform = self.render_transform;
        node.render_transform_origin = self.render_transform_origin;
        node.tag = self.tag.clone();
        if let Some(kind) = &self.kind {
            node.type_name = kind.clone();
        }
        for child in &self.children {
            node.children.push(Arc::new(child.to_node()));
        }
        node
    }

    pub fn into_visual(self) -> VisualRef {
        Arc::new(self.to_node())
    }
}
