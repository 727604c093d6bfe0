use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::drawing::{DrawingContext, Geometry, OpacityMask};
use crate::error::RenderError;
use crate::geometry::{Matrix, Rect, RelativePoint, Size, Thickness};
use crate::metrics::PageSettings;

/// Shared handle to printable content.
pub type VisualRef = Arc<dyn Visual>;

/// Content collaborator implemented by whatever owns the visual tree.
///
/// The tree is measured and arranged by its owner; the printing pipeline only reads
/// the last arranged [`Visual::bounds`] and never mutates the tree.
/// 視覺樹由擁有者負責量測與排列；列印管線僅讀取最後排列的邊界。
pub trait Visual: fmt::Debug + Send + Sync {
    /// Bounds relative to the parent, as last arranged.
    fn bounds(&self) -> Rect;

    /// Draws this node's own content in its local coordinate space.
    fn render(&self, context: &mut dyn DrawingContext) -> Result<(), RenderError>;

    /// Direct children in paint order.
    fn children(&self) -> &[VisualRef] {
        &[]
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn opacity(&self) -> f64 {
        1.0
    }

    fn clip_to_bounds(&self) -> bool {
        false
    }

    fn clip(&self) -> Option<&Geometry> {
        None
    }

    fn opacity_mask(&self) -> Option<&OpacityMask> {
        None
    }

    fn render_transform(&self) -> Option<Matrix> {
        None
    }

    fn render_transform_origin(&self) -> RelativePoint {
        RelativePoint::CENTER
    }

    /// Right-to-left flow; mirrors the node horizontally around its own width.
    fn has_mirror_transform(&self) -> bool {
        false
    }

    /// Advisory print attributes attached to this node.
    fn print_hints(&self) -> PrintHints {
        PrintHints::default()
    }

    /// Free-form identifier surfaced in diagnostics.
    fn tag(&self) -> Option<&str> {
        None
    }

    /// Short type label used by the render audit.
    fn type_name(&self) -> &str {
        "Visual"
    }
}

/// Advisory attributes a visual carries for printing. Read node-locally.
/// 視覺節點提供的列印提示屬性，僅讀取節點本身。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintHints {
    pub is_printable: bool,
    pub margins: Option<Thickness>,
    pub scale: Option<f64>,
    pub page_break_after: bool,
    pub target_page_size: Option<Size>,
}

impl Default for PrintHints {
    fn default() -> Self {
        Self {
            is_printable: true,
            margins: None,
            scale: None,
            page_break_after: false,
            target_page_size: None,
        }
    }
}

impl PrintHints {
    /// Overlays the set hints on `fallback`. Returns `fallback` unchanged when no
    /// layout hint is present.
    pub fn apply(&self, fallback: &PageSettings) -> PageSettings {
        if self.margins.is_none() && self.scale.is_none() && self.target_page_size.is_none() {
            return fallback.clone();
        }

        PageSettings {
            target_size: self.target_page_size.or(fallback.target_size),
            margins: self.margins.or(fallback.margins),
            scale: self.scale.unwrap_or(fallback.scale),
        }
    }
}
