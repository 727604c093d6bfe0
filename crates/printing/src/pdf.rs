//! Vector backend writing PDF content streams.
//!
//! Pages are emitted in points (1/72") with a base transform mapping the DIP page space
//! (origin top-left, y down) onto PDF user space.
//! 以點為單位輸出 PDF 頁面；基礎轉換將 DIP 頁面座標對應到 PDF 使用者空間。

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use crate::drawing::{DrawingContext, Geometry, OpacityMask, Pen};
use crate::enumerator::CancellationToken;
use crate::error::{PrintError, RenderError};
use crate::geometry::{dip_to_points, Color, Matrix, Point, Rect, Size};
use crate::page::PhysicalPage;
use crate::render::{render_page, PageRenderReport};

/// Control-point factor approximating a quarter ellipse with one cubic Bézier.
const KAPPA: f64 = 0.552_284_749_830_793_4;

#[derive(Debug, Clone, PartialEq)]
enum GraphicsState {
    Alpha(f64),
    SoftMask { mask: OpacityMask, bounds: Rect },
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    transform: Matrix,
    clip: Option<Rect>,
    opacity: f64,
}

/// [`DrawingContext`] emitting one PDF page content stream. Coordinates arrive in DIP.
#[derive(Debug)]
pub struct PdfCanvas {
    page_size: Size,
    content: String,
    states: Vec<GraphicsState>,
    transform: Matrix,
    clip: Option<Rect>,
    opacity: f64,
    stack: Vec<Frame>,
}

impl PdfCanvas {
    pub fn new(page_size: Size) -> Self {
        let mut canvas = Self {
            page_size,
            content: String::new(),
            states: Vec::new(),
            transform: Matrix::IDENTITY,
            clip: None,
            opacity: 1.0,
            stack: Vec::new(),
        };
        let scale = dip_to_points(1.0);
        let base = Matrix::new(scale, 0.0, 0.0, -scale, 0.0, dip_to_points(page_size.height));
        canvas.emit_matrix(base);
        canvas
    }

    /// Page size in points.
    pub fn media_box(&self) -> Size {
        Size::new(
            dip_to_points(self.page_size.width),
            dip_to_points(self.page_size.height),
        )
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn line(&mut self, text: &str) {
        self.content.push_str(text);
        self.content.push('\n');
    }

    fn emit_matrix(&mut self, m: Matrix) {
        let line = format!(
            "{} {} {} {} {} {} cm",
            num(m.m11),
            num(m.m12),
            num(m.m21),
            num(m.m22),
            num(m.m31),
            num(m.m32)
        );
        self.line(&line);
    }

    fn save(&mut self) {
        self.stack.push(Frame {
            transform: self.transform,
            clip: self.clip,
            opacity: self.opacity,
        });
        self.line("q");
    }

    fn register(&mut self, state: GraphicsState) -> usize {
        if let Some(index) = self.states.iter().position(|existing| *existing == state) {
            return index;
        }
        self.states.push(state);
        self.states.len() - 1
    }

    fn set_state(&mut self, state: GraphicsState) {
        let index = self.register(state);
        self.line(&format!("/GS{index} gs"));
    }

    fn intersect_clip(&mut self, local: Rect) {
        let device = self.transform.transform_rect(local);
        self.clip = Some(match self.clip {
            Some(current) => current.intersect(&device),
            None => device,
        });
    }

    fn emit_path(&mut self, geometry: &Geometry) -> bool {
        match geometry {
            Geometry::Rectangle { rect } => {
                let line = format!(
                    "{} {} {} {} re",
                    num(rect.x),
                    num(rect.y),
                    num(rect.width),
                    num(rect.height)
                );
                self.line(&line);
            }
            Geometry::Ellipse { rect } => self.emit_ellipse(*rect),
            Geometry::Line { start, end } => {
                self.move_to(*start);
                self.line_to(*end);
            }
            Geometry::Polygon { points, closed } => {
                let Some((first, rest)) = points.split_first() else {
                    return false;
                };
                self.move_to(*first);
                for point in rest {
                    self.line_to(*point);
                }
                if *closed {
                    self.line("h");
                }
            }
        }
        true
    }

    fn move_to(&mut self, point: Point) {
        let line = format!("{} {} m", num(point.x), num(point.y));
        self.line(&line);
    }

    fn line_to(&mut self, point: Point) {
        let line = format!("{} {} l", num(point.x), num(point.y));
        self.line(&line);
    }

    fn emit_ellipse(&mut self, rect: Rect) {
        let rx = rect.width / 2.0;
        let ry = rect.height / 2.0;
        let cx = rect.x + rx;
        let cy = rect.y + ry;
        let ox = rx * KAPPA;
        let oy = ry * KAPPA;

        self.move_to(Point::new(cx + rx, cy));
        let segments = [
            [(cx + rx, cy + oy), (cx + ox, cy + ry), (cx, cy + ry)],
            [(cx - ox, cy + ry), (cx - rx, cy + oy), (cx - rx, cy)],
            [(cx - rx, cy - oy), (cx - ox, cy - ry), (cx, cy - ry)],
            [(cx + ox, cy - ry), (cx + rx, cy - oy), (cx + rx, cy)],
        ];
        for [(x1, y1), (x2, y2), (x3, y3)] in segments {
            let line = format!(
                "{} {} {} {} {} {} c",
                num(x1),
                num(y1),
                num(x2),
                num(y2),
                num(x3),
                num(y3)
            );
            self.line(&line);
        }
        self.line("h");
    }

    /// Runs `paint` with the fill/stroke alpha of `color` folded into the current opacity.
    fn with_alpha(&mut self, alpha: f32, paint: impl FnOnce(&mut Self)) {
        if alpha >= 1.0 {
            paint(self);
            return;
        }
        self.line("q");
        self.set_state(GraphicsState::Alpha(self.opacity * f64::from(alpha.max(0.0))));
        paint(self);
        self.line("Q");
    }
}

impl DrawingContext for PdfCanvas {
    fn push_transform(&mut self, transform: Matrix) {
        self.save();
        self.transform = transform * self.transform;
        self.emit_matrix(transform);
    }

    fn push_clip(&mut self, rect: Rect) {
        self.save();
        self.intersect_clip(rect);
        let line = format!(
            "{} {} {} {} re W n",
            num(rect.x),
            num(rect.y),
            num(rect.width),
            num(rect.height)
        );
        self.line(&line);
    }

    fn push_geometry_clip(&mut self, geometry: &Geometry) {
        self.save();
        self.intersect_clip(geometry.bounds());
        if self.emit_path(geometry) {
            self.line("W n");
        } else {
            self.line("0 0 0 0 re W n");
        }
    }

    fn push_opacity(&mut self, opacity: f64) {
        self.save();
        self.opacity *= opacity.clamp(0.0, 1.0);
        self.set_state(GraphicsState::Alpha(self.opacity));
    }

    fn push_opacity_mask(&mut self, mask: &OpacityMask, bounds: Rect) {
        self.save();
        self.set_state(GraphicsState::SoftMask {
            mask: *mask,
            bounds,
        });
    }

    fn pop(&mut self) {
        match self.stack.pop() {
            Some(frame) => {
                self.transform = frame.transform;
                self.clip = frame.clip;
                self.opacity = frame.opacity;
                self.line("Q");
            }
            None => tracing::warn!("pop without a matching push"),
        }
    }

    fn fill_rectangle(&mut self, color: Color, rect: Rect) {
        self.with_alpha(color.a, |canvas| {
            let line = format!(
                "{} rg\n{} {} {} {} re f",
                rgb(color),
                num(rect.x),
                num(rect.y),
                num(rect.width),
                num(rect.height)
            );
            canvas.line(&line);
        });
    }

    fn draw_geometry(&mut self, fill: Option<Color>, pen: Option<&Pen>, geometry: &Geometry) {
        let fill = fill.filter(|_| !matches!(geometry, Geometry::Line { .. }));
        if let Some(color) = fill {
            self.with_alpha(color.a, |canvas| {
                canvas.line(&format!("{} rg", rgb(color)));
                if canvas.emit_path(geometry) {
                    canvas.line("f");
                }
            });
        }
        if let Some(pen) = pen.copied() {
            self.with_alpha(pen.color.a, |canvas| {
                canvas.line(&format!("{} RG\n{} w", rgb(pen.color), num(pen.thickness)));
                if canvas.emit_path(geometry) {
                    canvas.line("S");
                }
            });
        }
    }

    /// Clip bounds in points, measured from the top-left page corner.
    fn device_clip_bounds(&self) -> Option<Rect> {
        self.clip.map(|clip| {
            Rect::new(
                dip_to_points(clip.x),
                dip_to_points(clip.y),
                dip_to_points(clip.width),
                dip_to_points(clip.height),
            )
        })
    }
}

/// Assembles rendered pages into a PDF file.
/// 將已繪製的頁面組合為 PDF 檔案。
#[derive(Debug)]
pub struct PdfDocumentWriter {
    builder: PdfBuilder,
    pages_object: usize,
    page_objects: Vec<usize>,
}

impl Default for PdfDocumentWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfDocumentWriter {
    pub fn new() -> Self {
        let mut builder = PdfBuilder::new();
        let pages_object = builder.reserve();
        Self {
            builder,
            pages_object,
            page_objects: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_objects.len()
    }

    /// Renders `page` as the next PDF page.
    pub fn render_page(&mut self, page: &PhysicalPage) -> Result<PageRenderReport, RenderError> {
        let mut canvas = PdfCanvas::new(page.metrics().page_size());
        let report = render_page(&mut canvas, page)?;
        self.add_canvas(canvas);
        Ok(report)
    }

    pub fn add_canvas(&mut self, canvas: PdfCanvas) {
        let mut graphics_states = String::new();
        for (index, state) in canvas.states.iter().enumerate() {
            let object = match state {
                GraphicsState::Alpha(alpha) => self.builder.add_object(format!(
                    "<< /Type /ExtGState /ca {a} /CA {a} >>",
                    a = num(*alpha)
                )),
                GraphicsState::SoftMask { mask, bounds } => {
                    let form = self.add_mask_form(mask, *bounds);
                    self.builder.add_object(format!(
                        "<< /Type /ExtGState /SMask << /Type /Mask /S /Luminosity /G {form} 0 R >> >>"
                    ))
                }
            };
            let _ = write!(graphics_states, " /GS{index} {object} 0 R");
        }

        let content = self.builder.add_stream("", canvas.content.as_bytes());
        let media = canvas.media_box();
        let page = self.builder.add_object(format!(
            "<< /Type /Page /Parent {parent} 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << /ExtGState <<{graphics_states} >> >> /Contents {content} 0 R >>",
            parent = self.pages_object,
            width = num(media.width),
            height = num(media.height),
        ));
        self.page_objects.push(page);
    }

    fn add_mask_form(&mut self, mask: &OpacityMask, bounds: Rect) -> usize {
        let bbox = format!(
            "[{} {} {} {}]",
            num(bounds.x),
            num(bounds.y),
            num(bounds.right()),
            num(bounds.bottom())
        );
        let area = format!(
            "{} {} {} {} re",
            num(bounds.x),
            num(bounds.y),
            num(bounds.width),
            num(bounds.height)
        );
        let group = "/Group << /S /Transparency /CS /DeviceGray >>";

        match *mask {
            OpacityMask::Solid { alpha } => {
                let stream = format!("{} g\n{area} f\n", num(f64::from(alpha.clamp(0.0, 1.0))));
                self.builder.add_stream(
                    &format!("/Type /XObject /Subtype /Form /BBox {bbox} {group}"),
                    stream.as_bytes(),
                )
            }
            OpacityMask::LinearGradient {
                start,
                end,
                start_alpha,
                end_alpha,
            } => {
                let from = start.to_pixels(bounds.size());
                let to = end.to_pixels(bounds.size());
                let shading = self.builder.add_object(format!(
                    "<< /ShadingType 2 /ColorSpace /DeviceGray /Coords [{} {} {} {}] \
                     /Function << /FunctionType 2 /Domain [0 1] /C0 [{}] /C1 [{}] /N 1 >> \
                     /Extend [true true] >>",
                    num(bounds.x + from.x),
                    num(bounds.y + from.y),
                    num(bounds.x + to.x),
                    num(bounds.y + to.y),
                    num(f64::from(start_alpha.clamp(0.0, 1.0))),
                    num(f64::from(end_alpha.clamp(0.0, 1.0))),
                ));
                let stream = format!("q\n{area} W n\n/Sh0 sh\nQ\n");
                self.builder.add_stream(
                    &format!(
                        "/Type /XObject /Subtype /Form /BBox {bbox} {group} \
                         /Resources << /Shading << /Sh0 {shading} 0 R >> >>"
                    ),
                    stream.as_bytes(),
                )
            }
        }
    }

    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        let kids = self
            .page_objects
            .iter()
            .map(|object| format!("{object} 0 R"))
            .collect::<Vec<_>>()
            .join(" ");
        self.builder.set_object(
            self.pages_object,
            format!(
                "<< /Type /Pages /Count {count} /Kids [{kids}] >>",
                count = self.page_objects.len()
            ),
        );
        let catalog = self.builder.add_object(format!(
            "<< /Type /Catalog /Pages {pages} 0 R >>",
            pages = self.pages_object
        ));
        self.builder.finish(catalog)
    }
}

/// Renders `pages` into an in-memory PDF document, checking `cancel` before each page.
pub fn pdf_bytes(pages: &[PhysicalPage], cancel: &CancellationToken) -> Result<Vec<u8>, PrintError> {
    let mut writer = PdfDocumentWriter::new();
    for (page_index, page) in pages.iter().enumerate() {
        cancel.check()?;
        writer
            .render_page(page)
            .map_err(|source| PrintError::Render {
                page_index,
                tag: page.tag().map(str::to_string),
                source,
            })?;
    }
    Ok(writer.finish()?)
}

/// Renders `pages` and writes the document to `path`, creating parent directories.
pub fn export_pdf(
    path: &Path,
    pages: &[PhysicalPage],
    cancel: &CancellationToken,
) -> Result<(), PrintError> {
    let bytes = pdf_bytes(pages, cancel)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

#[derive(Debug)]
struct PdfBuilder {
    objects: Vec<Option<String>>,
}

impl PdfBuilder {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    /// Allocates an object number whose body is supplied later.
    fn reserve(&mut self) -> usize {
        self.objects.push(None);
        self.objects.len()
    }

    fn set_object(&mut self, number: usize, body: String) {
        if let Some(slot) = self.objects.get_mut(number - 1) {
            *slot = Some(body);
        }
    }

    fn add_object(&mut self, body: impl Into<String>) -> usize {
        self.objects.push(Some(body.into()));
        self.objects.len()
    }

    fn add_stream(&mut self, dictionary: &str, stream: &[u8]) -> usize {
        let mut body = format!("<< {dictionary} /Length {} >>\nstream\n", stream.len());
        body.push_str(&String::from_utf8_lossy(stream));
        body.push_str("\nendstream");
        self.add_object(body)
    }

    fn finish(self, root: usize) -> io::Result<Vec<u8>> {
        let mut output = Vec::new();
        output.extend_from_slice(b"%PDF-1.4\n%\xFF\xFF\xFF\xFF\n");
        let mut offsets = Vec::with_capacity(self.objects.len());

        for (index, body) in self.objects.iter().enumerate() {
            offsets.push(output.len());
            writeln!(
                &mut output,
                "{} 0 obj\n{}\nendobj",
                index + 1,
                body.as_deref().unwrap_or("null")
            )?;
        }

        let xref_start = output.len();
        writeln!(
            &mut output,
            "xref\n0 {}\n0000000000 65535 f ",
            self.objects.len() + 1
        )?;
        for offset in &offsets {
            writeln!(&mut output, "{:010} 00000 n ", offset)?;
        }

        writeln!(
            &mut output,
            "trailer\n<< /Size {} /Root {} 0 R >>",
            self.objects.len() + 1,
            root
        )?;
        writeln!(&mut output, "startxref\n{}\n%%EOF", xref_start)?;

        Ok(output)
    }
}

fn num(value: f64) -> String {
    let text = format!("{value:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

fn rgb(color: Color) -> String {
    format!(
        "{} {} {}",
        num(f64::from(color.r.clamp(0.0, 1.0))),
        num(f64::from(color.g.clamp(0.0, 1.0))),
        num(f64::from(color.b.clamp(0.0, 1.0)))
    )
}
