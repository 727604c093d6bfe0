//! Native print sink integration.
//!
//! The OS print system is reached through [`NativePrintBackend`]. This module owns the
//! configuration record handed to the backend and the page callbacks it invokes while
//! running its device loop.
//! 原生列印介面：本模組負責產生設定資料並實作原生列印迴圈所呼叫的頁面回呼。

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::PrintingConfig;
use crate::diagnostics::{Diagnostics, CATEGORY_NATIVE_PRINT};
use crate::enumerator::CancellationToken;
use crate::error::{PrintError, RenderError};
use crate::geometry::{dip_to_points, Rect};
use crate::job::{Orientation, PrintJobState};
use crate::metrics::{Dpi, PageMetrics};
use crate::page::PhysicalPage;
use crate::raster::{render_to_bitmap, PageBitmap, PixelFormat};
use crate::session::PrintSession;

/// Job title used when neither a job name nor a description is set.
pub const DEFAULT_JOB_TITLE: &str = "Print Job";

/// Configuration record handed to the native print operation. Lengths are in points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativePrintSettings {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_left: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub has_page_range: bool,
    pub from_page: u32,
    pub to_page: u32,
    pub orientation: Orientation,
    pub show_print_panel: bool,
    pub show_progress_panel: bool,
    pub job_name: String,
    pub printer_name: Option<String>,
    pub enable_pdf_export: bool,
    pub pdf_path: Option<PathBuf>,
    pub page_count: usize,
}

impl NativePrintSettings {
    /// Derives the record from the session options and the collected pages.
    ///
    /// Creates the PDF output directory when a PDF path is set.
    pub fn from_session(
        session: &PrintSession,
        pages: &[PhysicalPage],
        config: &PrintingConfig,
    ) -> Result<Self, PrintError> {
        let (page_size, margins) = match pages.first() {
            Some(page) => (page.metrics().page_size(), page.metrics().margins()),
            None => (config.default_page_size, config.default_margins),
        };
        let options = session.options();
        let page_count = pages.len();
        let last_page = u32::try_from(page_count).unwrap_or(u32::MAX);

        let (has_page_range, from_page, to_page) = match options.page_range {
            Some(range) => {
                let from = range.start();
                let maximum = last_page.max(from);
                (true, from, range.end().clamp(from, maximum))
            }
            None => (false, 1, last_page.max(1)),
        };

        let job_name = non_blank(options.job_name.as_deref())
            .or_else(|| non_blank(session.description()))
            .unwrap_or(DEFAULT_JOB_TITLE)
            .to_string();

        let pdf_path = match options.pdf_path() {
            Some(path) => Some(prepare_output_path(path)?),
            None => None,
        };
        let enable_pdf_export = pdf_path.is_some();
        let show_print_panel = options.show_dialog && !enable_pdf_export;

        Ok(Self {
            paper_width: dip_to_points(page_size.width),
            paper_height: dip_to_points(page_size.height),
            margin_left: dip_to_points(margins.left),
            margin_top: dip_to_points(margins.top),
            margin_right: dip_to_points(margins.right),
            margin_bottom: dip_to_points(margins.bottom),
            has_page_range,
            from_page,
            to_page,
            orientation: Orientation::of(page_size),
            show_print_panel,
            show_progress_panel: show_print_panel,
            job_name,
            printer_name: non_blank(options.printer_name.as_deref()).map(str::to_string),
            enable_pdf_export,
            pdf_path,
            page_count,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

/// Absolute form of `path`, with its parent directory created.
fn prepare_output_path(path: &Path) -> Result<PathBuf, PrintError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    if let Some(parent) = absolute.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(absolute)
}

/// Pixels handed to the device surface for one page.
#[derive(Debug, Clone, Copy)]
pub struct BitmapBlit<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    /// Destination rectangle on the device, in points.
    pub destination: Rect,
}

/// OS drawing surface for the page currently being printed.
pub trait DeviceContext {
    fn draw_bitmap(&mut self, blit: &BitmapBlit<'_>) -> Result<(), RenderError>;
}

/// Callbacks the native device loop invokes.
pub trait PageCallbacks {
    fn page_count(&self) -> usize;

    /// Draws page `page_index` onto `device`. Returns false on failure.
    fn render_page(&mut self, device: &mut dyn DeviceContext, page_index: usize) -> bool;
}

/// One configured native print operation.
pub trait PrintOperation {
    fn configure(&mut self, settings: &NativePrintSettings);

    /// Shows the print panel, then runs the device loop. False when the user dismissed
    /// the panel or the loop failed.
    fn run_modal(&mut self, callbacks: &mut dyn PageCallbacks) -> bool;

    /// Runs the device loop without user interaction.
    fn commit(&mut self, callbacks: &mut dyn PageCallbacks) -> bool;
}

/// Entry point into the OS print subsystem.
pub trait NativePrintBackend: Send + Sync {
    fn create_operation(&self) -> Result<Box<dyn PrintOperation>, PrintError>;

    /// Prints an in-memory PDF document. Returns false when the operation did not complete.
    fn print_pdf(&self, document: &[u8], show_panel: bool) -> bool;

    /// Pixel layout the device surface expects.
    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Bgra8888
    }
}

/// Result of probing for a native print backend.
#[derive(Clone)]
pub enum NativeCapability {
    Available(Arc<dyn NativePrintBackend>),
    Unavailable(String),
}

impl fmt::Debug for NativeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeCapability::Available(_) => f.write_str("Available"),
            NativeCapability::Unavailable(reason) => {
                f.debug_tuple("Unavailable").field(reason).finish()
            }
        }
    }
}

impl NativeCapability {
    /// Probe used when no backend was supplied by the host application.
    pub fn probe() -> Self {
        NativeCapability::Unavailable(format!(
            "no native print backend is registered for {}",
            env::consts::OS
        ))
    }

    pub fn is_available(&self) -> bool {
        matches!(self, NativeCapability::Available(_))
    }

    pub fn backend(&self) -> Result<&Arc<dyn NativePrintBackend>, PrintError> {
        match self {
            NativeCapability::Available(backend) => Ok(backend),
            NativeCapability::Unavailable(reason) => {
                Err(PrintError::PlatformUnavailable(reason.clone()))
            }
        }
    }
}

/// [`PageCallbacks`] implementation rasterizing pages at print resolution.
pub struct NativePrintJob<'a> {
    pages: &'a [PhysicalPage],
    dpi: Dpi,
    format: PixelFormat,
    diagnostics: &'a Diagnostics,
    cancel: CancellationToken,
    trace: bool,
    first_error: Option<PrintError>,
    pages_rendered: usize,
}

impl<'a> NativePrintJob<'a> {
    pub fn new(
        pages: &'a [PhysicalPage],
        dpi: Dpi,
        format: PixelFormat,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            pages,
            dpi,
            format,
            diagnostics,
            cancel: CancellationToken::new(),
            trace: false,
            first_error: None,
            pages_rendered: 0,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Pages requested after `cancel` fires fail the job with [`PrintError::Cancelled`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pages_rendered(&self) -> usize {
        self.pages_rendered
    }

    /// First page failure seen during the device loop.
    pub fn take_error(&mut self) -> Option<PrintError> {
        self.first_error.take()
    }

    fn draw(&self, device: &mut dyn DeviceContext, page: &PhysicalPage) -> Result<(), RenderError> {
        let metrics = metrics_at(page, self.dpi);
        let page = PhysicalPage {
            metrics,
            ..page.clone()
        };
        let (bitmap, _) = render_to_bitmap(&page, self.dpi)?;
        blit(device, &bitmap.to_format(self.format), page.metrics())
    }
}

fn metrics_at(page: &PhysicalPage, dpi: Dpi) -> Arc<PageMetrics> {
    if page.metrics().dpi().nearly_equals(&dpi) {
        return Arc::clone(&page.metrics);
    }
    let offset = page.metrics().content_offset();
    Arc::new(
        PageMetrics::for_visual(page.visual.as_ref(), &page.settings, dpi).with_content_offset(offset),
    )
}

fn blit(device: &mut dyn DeviceContext, bitmap: &PageBitmap, metrics: &PageMetrics) -> Result<(), RenderError> {
    let page_size = metrics.page_size();
    let destination = Rect::new(
        0.0,
        0.0,
        dip_to_points(page_size.width),
        dip_to_points(page_size.height),
    );
    if !destination.has_area() || bitmap.width() == 0 || bitmap.height() == 0 {
        return Err(RenderError::Backend("page has no drawable area".into()));
    }
    device.draw_bitmap(&BitmapBlit {
        data: bitmap.data(),
        width: bitmap.width(),
        height: bitmap.height(),
        stride: bitmap.stride(),
        format: bitmap.format(),
        destination,
    })
}

impl PageCallbacks for NativePrintJob<'_> {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn render_page(&mut self, device: &mut dyn DeviceContext, page_index: usize) -> bool {
        let Some(page) = self.pages.get(page_index) else {
            return false;
        };
        if self.cancel.is_cancelled() {
            tracing::debug!(page_index, "native print cancelled");
            if self.first_error.is_none() {
                self.first_error = Some(PrintError::Cancelled);
            }
            return false;
        }
        if self.trace {
            self.diagnostics.trace(
                CATEGORY_NATIVE_PRINT,
                format!("render page {page_index}"),
                json!({
                    "page_index": page_index,
                    "tag": page.tag(),
                    "content_offset": page.metrics().content_offset(),
                }),
            );
        }

        match self.draw(device, page) {
            Ok(()) => {
                self.pages_rendered += 1;
                true
            }
            Err(source) => {
                self.diagnostics.report_error(
                    CATEGORY_NATIVE_PRINT,
                    "render page to device failed",
                    &source,
                    Some(json!({
                        "page_index": page_index,
                        "tag": page.tag(),
                        "dpi": self.dpi,
                    })),
                );
                if self.first_error.is_none() {
                    self.first_error = Some(PrintError::Render {
                        page_index,
                        tag: page.tag().map(str::to_string),
                        source,
                    });
                }
                false
            }
        }
    }
}

/// Runs a configured operation over `job`.
///
/// A page failure fails the job. A non-success status is an error when no dialog was
/// shown and a user cancellation otherwise.
pub fn run_operation(
    operation: &mut dyn PrintOperation,
    settings: &NativePrintSettings,
    job: &mut NativePrintJob<'_>,
    show_dialog: bool,
) -> Result<PrintJobState, PrintError> {
    operation.configure(settings);
    let succeeded = if show_dialog {
        operation.run_modal(job)
    } else {
        operation.commit(job)
    };

    if let Some(error) = job.take_error() {
        return Err(error);
    }
    match (succeeded, show_dialog) {
        (true, _) => Ok(PrintJobState::Completed),
        (false, true) => Ok(PrintJobState::Cancelled),
        (false, false) => Err(PrintError::Native(
            "print job did not complete successfully".into(),
        )),
    }
}
