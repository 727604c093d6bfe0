use serde::Serialize;

use crate::drawing::{DrawingContext, Geometry, OpacityMask, Pen};
use crate::geometry::{Color, Matrix, Rect};

/// Display list recorded from a [`DrawingContext`] session.
///
/// Used to inspect what a page render emitted without rasterizing it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrintDisplayList {
    pub commands: Vec<DisplayCommand>,
    #[serde(skip)]
    stack: Vec<Frame>,
    #[serde(skip)]
    transform: Matrix,
    #[serde(skip)]
    clip: Option<Rect>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    transform: Matrix,
    clip: Option<Rect>,
}

impl PrintDisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to the display list.
    pub fn push(&mut self, command: DisplayCommand) {
        self.commands.push(command);
    }

    /// Returns true if the display list is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of push commands still waiting for their pop.
    pub fn open_scopes(&self) -> usize {
        self.stack.len()
    }

    fn save(&mut self) {
        self.stack.push(Frame {
            transform: self.transform,
            clip: self.clip,
        });
    }
}

/// Low-level drawing commands captured by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DisplayCommand {
    PushTransform(Matrix),
    PushClip(Rect),
    PushGeometryClip(Geometry),
    PushOpacity(f64),
    PushOpacityMask { mask: OpacityMask, bounds: Rect },
    Pop,
    FillRectangle { color: Color, rect: Rect },
    DrawGeometry {
        fill: Option<Color>,
        pen: Option<Pen>,
        geometry: Geometry,
    },
}

impl DrawingContext for PrintDisplayList {
    fn push_transform(&mut self, transform: Matrix) {
        self.save();
        self.transform = transform * self.transform;
        self.push(DisplayCommand::PushTransform(transform));
    }

    fn push_clip(&mut self, rect: Rect) {
        self.save();
        let device = self.transform.transform_rect(rect);
        self.clip = Some(match self.clip {
            Some(current) => current.intersect(&device),
            None => device,
        });
        self.push(DisplayCommand::PushClip(rect));
    }

    fn push_geometry_clip(&mut self, geometry: &Geometry) {
        self.save();
        let device = self.transform.transform_rect(geometry.bounds());
        self.clip = Some(match self.clip {
            Some(current) => current.intersect(&device),
            None => device,
        });
        self.push(DisplayCommand::PushGeometryClip(geometry.clone()));
    }

    fn push_opacity(&mut self, opacity: f64) {
        self.save();
        self.push(DisplayCommand::PushOpacity(opacity));
    }

    fn push_opacity_mask(&mut self, mask: &OpacityMask, bounds: Rect) {
        self.save();
        self.push(DisplayCommand::PushOpacityMask {
            mask: *mask,
            bounds,
        });
    }

    fn pop(&mut self) {
        if let Some(frame) = self.stack.pop() {
            self.transform = frame.transform;
            self.clip = frame.clip;
        }
        self.push(DisplayCommand::Pop);
    }

    fn fill_rectangle(&mut self, color: Color, rect: Rect) {
        self.push(DisplayCommand::FillRectangle { color, rect });
    }

    fn draw_geometry(&mut self, fill: Option<Color>, pen: Option<&Pen>, geometry: &Geometry) {
        self.push(DisplayCommand::DrawGeometry {
            fill,
            pen: pen.copied(),
            geometry: geometry.clone(),
        });
    }

    fn device_clip_bounds(&self) -> Option<Rect> {
        self.clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_bounds_follow_the_transform_stack() {
        let mut list = PrintDisplayList::new();
        list.push_transform(Matrix::translation(10.0, 20.0));
        list.push_clip(Rect::new(0.0, 0.0, 100.0, 50.0));
        assert_eq!(
            list.device_clip_bounds(),
            Some(Rect::new(10.0, 20.0, 100.0, 50.0))
        );

        list.push_transform(Matrix::scale(2.0, 2.0));
        list.push_clip(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(
            list.device_clip_bounds(),
            Some(Rect::new(10.0, 20.0, 100.0, 50.0))
        );

        list.pop();
        list.pop();
        list.pop();
        assert_eq!(list.open_scopes(), 1);
        list.pop();
        assert_eq!(list.open_scopes(), 0);
        assert_eq!(list.device_clip_bounds(), None);
    }

    #[test]
    fn records_commands_in_order() {
        let mut list = PrintDisplayList::new();
        list.fill_rectangle(Color::WHITE, Rect::new(0.0, 0.0, 5.0, 5.0));
        list.push_opacity(0.5);
        list.pop();
        assert_eq!(
            list.commands,
            vec![
                DisplayCommand::FillRectangle {
                    color: Color::WHITE,
                    rect: Rect::new(0.0, 0.0, 5.0, 5.0),
                },
                DisplayCommand::PushOpacity(0.5),
                DisplayCommand::Pop,
            ]
        );
    }
}
