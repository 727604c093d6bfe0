use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};

use crate::audit;
use crate::config::PrintingConfig;
use crate::diagnostics::{
    DiagnosticEvent, Diagnostics, CATEGORY_PAGINATION, CATEGORY_PDF_EXPORTER,
    CATEGORY_PRINT_MANAGER, CATEGORY_RASTER_RENDERER,
};
use crate::enumerator::CancellationToken;
use crate::error::PrintError;
use crate::job::{PrintJobId, PrintJobState};
use crate::metrics::Dpi;
use crate::native::{run_operation, NativeCapability, NativePrintJob, NativePrintSettings};
use crate::page::PhysicalPage;
use crate::pagination::{DefaultPaginator, PaginationResult, Paginator};
use crate::pdf;
use crate::preview::PrintPreview;
use crate::raster::render_to_bitmap;
use crate::render::content_transform;
use crate::session::PrintSession;

/// Where a print job's output went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PrintOutput {
    /// Nothing was produced (no pages).
    Nothing,
    PdfFile(PathBuf),
    /// In-memory PDF handed to the native backend.
    NativePdf,
    /// Pages drawn through the native device loop.
    NativeDevice,
}

/// Summary returned after a print job finishes.
/// 列印工作完成後回傳的摘要資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintJobResult {
    pub job_id: PrintJobId,
    pub state: PrintJobState,
    pub page_count: usize,
    pub output: PrintOutput,
}

/// Orchestrates pagination and hands pages to the preview, PDF and native sinks.
/// 協調分頁流程並將頁面交給預覽、PDF 與原生列印輸出。
#[derive(Debug, Clone)]
pub struct PrintManager {
    config: PrintingConfig,
    diagnostics: Diagnostics,
    native: NativeCapability,
}

impl PrintManager {
    pub fn new(config: PrintingConfig, diagnostics: Diagnostics, native: NativeCapability) -> Self {
        Self {
            config,
            diagnostics,
            native,
        }
    }

    pub fn config(&self) -> &PrintingConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn native(&self) -> &NativeCapability {
        &self.native
    }

    /// Collects the session's physical pages at `dpi`.
    pub fn paginate(
        &self,
        session: &PrintSession,
        dpi: Dpi,
        cancel: &CancellationToken,
    ) -> Result<PaginationResult, PrintError> {
        let paginator = DefaultPaginator::new(dpi).with_tolerance(self.config.fit_tolerance);
        let result = paginator.paginate(session.document(), session.options(), cancel)?;

        self.diagnostics.publish(
            DiagnosticEvent::new(
                CATEGORY_PAGINATION,
                format!(
                    "collected {} pages for session '{}'",
                    result.pages.len(),
                    session.description().unwrap_or_default()
                ),
            )
            .with_context(json!({
                "job_id": session.id(),
                "description": session.description(),
                "summary": result.summary,
                "dpi": dpi,
            })),
        );
        if self.config.trace_render {
            self.trace_pages(CATEGORY_PAGINATION, &result.pages);
        }
        Ok(result)
    }

    /// Prints `session` through the vector exporter, a PDF file or the native device loop.
    pub fn print(
        &self,
        session: &PrintSession,
        cancel: &CancellationToken,
    ) -> Result<PrintJobResult, PrintError> {
        let pages = self.paginate(session, self.config.print_dpi, cancel)?.pages;
        let options = session.options();
        tracing::debug!(
            job_id = %session.id(),
            page_count = pages.len(),
            vector = options.use_vector_exporter,
            "starting print job"
        );

        let outcome = if options.use_vector_exporter {
            self.print_vector(session, &pages, cancel)
        } else if let Some(path) = options.pdf_path() {
            self.write_pdf(path, &pages, cancel)
                .map(|()| (PrintJobState::Completed, PrintOutput::PdfFile(path.clone())))
        } else {
            self.print_native(session, &pages, cancel)
        };

        match outcome {
            Ok((state, output)) => {
                self.diagnostics.report(
                    CATEGORY_PRINT_MANAGER,
                    format!("print job {} finished as {state:?}", session.id()),
                );
                Ok(PrintJobResult {
                    job_id: session.id(),
                    state,
                    page_count: pages.len(),
                    output,
                })
            }
            Err(error) => {
                self.diagnostics.report_error(
                    CATEGORY_PRINT_MANAGER,
                    "print job failed",
                    &error,
                    Some(json!({ "job_id": session.id() })),
                );
                Err(error)
            }
        }
    }

    /// Renders every page of `session` into a preview bitmap.
    pub fn create_preview(
        &self,
        session: &PrintSession,
        cancel: &CancellationToken,
    ) -> Result<PrintPreview, PrintError> {
        if !self.config.enable_preview {
            return Err(PrintError::PlatformUnavailable(
                "print preview is disabled by configuration".into(),
            ));
        }

        let dpi = self.config.preview_dpi;
        let pages = self.paginate(session, dpi, cancel)?.pages;
        let mut images = Vec::with_capacity(pages.len());
        for (page_index, page) in pages.iter().enumerate() {
            cancel.check()?;
            let (bitmap, report) = render_to_bitmap(page, dpi).map_err(|source| {
                self.render_failure(CATEGORY_RASTER_RENDERER, page_index, page, source)
            })?;
            if self.config.trace_render {
                self.diagnostics.trace(
                    CATEGORY_RASTER_RENDERER,
                    format!("rendered preview page {page_index}"),
                    json!({ "page_index": page_index, "report": report }),
                );
            }
            images.push(bitmap);
        }

        PrintPreview::new(pages, images)
    }

    /// Exports `session` as a PDF document at `path`, ignoring the print options' sinks.
    pub fn export_pdf(
        &self,
        session: &PrintSession,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PrintJobResult, PrintError> {
        let pages = self.paginate(session, self.config.print_dpi, cancel)?.pages;
        self.write_pdf(path, &pages, cancel)?;
        Ok(PrintJobResult {
            job_id: session.id(),
            state: PrintJobState::Completed,
            page_count: pages.len(),
            output: PrintOutput::PdfFile(path.to_path_buf()),
        })
    }

    /// In-memory PDF for `session`.
    pub fn pdf_bytes(
        &self,
        session: &PrintSession,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, PrintError> {
        let pages = self.paginate(session, self.config.print_dpi, cancel)?.pages;
        pdf::pdf_bytes(&pages, cancel).map_err(|error| self.pdf_failure(error, &pages))
    }

    fn print_vector(
        &self,
        session: &PrintSession,
        pages: &[PhysicalPage],
        cancel: &CancellationToken,
    ) -> Result<(PrintJobState, PrintOutput), PrintError> {
        if pages.is_empty() {
            return Ok((PrintJobState::Completed, PrintOutput::Nothing));
        }
        let options = session.options();
        if let Some(path) = options.pdf_path() {
            self.write_pdf(path, pages, cancel)?;
            if !options.show_dialog {
                return Ok((PrintJobState::Completed, PrintOutput::PdfFile(path.clone())));
            }
        }

        let backend = self.native.backend()?;
        let bytes =
            pdf::pdf_bytes(pages, cancel).map_err(|error| self.pdf_failure(error, pages))?;
        match (backend.print_pdf(&bytes, options.show_dialog), options.show_dialog) {
            (true, _) => Ok((PrintJobState::Completed, PrintOutput::NativePdf)),
            (false, true) => Ok((PrintJobState::Cancelled, PrintOutput::NativePdf)),
            (false, false) => Err(PrintError::Native(
                "PDF print operation did not complete successfully".into(),
            )),
        }
    }

    fn print_native(
        &self,
        session: &PrintSession,
        pages: &[PhysicalPage],
        cancel: &CancellationToken,
    ) -> Result<(PrintJobState, PrintOutput), PrintError> {
        cancel.check()?;
        let backend = self.native.backend()?;
        let settings = NativePrintSettings::from_session(session, pages, &self.config)?;
        let mut operation = backend.create_operation()?;
        let mut job = NativePrintJob::new(
            pages,
            self.config.print_dpi,
            backend.pixel_format(),
            &self.diagnostics,
        )
        .with_trace(self.config.trace_render)
        .with_cancellation(cancel.clone());

        let state = run_operation(
            operation.as_mut(),
            &settings,
            &mut job,
            session.options().show_dialog,
        )?;
        Ok((state, PrintOutput::NativeDevice))
    }

    fn write_pdf(
        &self,
        path: &Path,
        pages: &[PhysicalPage],
        cancel: &CancellationToken,
    ) -> Result<(), PrintError> {
        pdf::export_pdf(path, pages, cancel).map_err(|error| self.pdf_failure(error, pages))?;
        self.diagnostics.report(
            CATEGORY_PDF_EXPORTER,
            format!("exported {} pages to {}", pages.len(), path.display()),
        );
        Ok(())
    }

    fn pdf_failure(&self, error: PrintError, pages: &[PhysicalPage]) -> PrintError {
        if matches!(error, PrintError::Cancelled) {
            return error;
        }
        let context = match &error {
            PrintError::Render { page_index, .. } => pages
                .get(*page_index)
                .map(|page| page_context(*page_index, page))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        self.diagnostics.report_error(
            CATEGORY_PDF_EXPORTER,
            "PDF export failed",
            &error,
            Some(context),
        );
        error
    }

    fn render_failure(
        &self,
        category: &str,
        page_index: usize,
        page: &PhysicalPage,
        source: crate::error::RenderError,
    ) -> PrintError {
        let error = PrintError::Render {
            page_index,
            tag: page.tag().map(str::to_string),
            source,
        };
        self.diagnostics.report_error(
            category,
            "page render failed",
            &error,
            Some(page_context(page_index, page)),
        );
        error
    }

    fn trace_pages(&self, category: &str, pages: &[PhysicalPage]) {
        for (page_index, page) in pages.iter().enumerate() {
            let metrics = page.metrics();
            let visuals = audit::collect_from(&*page.visual, content_transform(metrics));
            self.diagnostics.trace(
                category,
                format!("page {page_index} details"),
                json!({
                    "page": page_context(page_index, page),
                    "visuals": serde_json::to_value(visuals).unwrap_or(Value::Null),
                }),
            );
        }
    }
}

fn page_context(page_index: usize, page: &PhysicalPage) -> Value {
    let metrics = page.metrics();
    json!({
        "page_index": page_index,
        "tag": page.tag(),
        "page_size": metrics.page_size(),
        "content_rect": metrics.content_rect(),
        "content_offset": metrics.content_offset(),
        "dpi": metrics.dpi(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::drawing::DrawingContext;
    use crate::error::RenderError;
    use crate::geometry::{Color, Rect, Size, Thickness};
    use crate::job::PrintOptions;
    use crate::metrics::PageSettings;
    use crate::native::{
        BitmapBlit, DeviceContext, NativePrintBackend, PageCallbacks, PrintOperation,
    };
    use crate::scene::SceneNode;
    use crate::session::PrintSessionBuilder;
    use crate::visual::Visual;

    /// Cancels `cancel` the first time it is drawn.
    #[derive(Debug)]
    struct CancellingVisual {
        height: f64,
        cancel: CancellationToken,
    }

    impl Visual for CancellingVisual {
        fn bounds(&self) -> Rect {
            Rect::new(0.0, 0.0, 720.0, self.height)
        }

        fn render(&self, _context: &mut dyn DrawingContext) -> Result<(), RenderError> {
            self.cancel.cancel();
            Ok(())
        }
    }

    fn cancelling_session(cancel: &CancellationToken) -> PrintSession {
        let settings = PageSettings::default()
            .with_target_size(Size::new(816.0, 1056.0))
            .with_margins(Thickness::uniform(48.0));
        PrintSessionBuilder::new()
            .add_visual(
                Arc::new(CancellingVisual {
                    height: 5000.0,
                    cancel: cancel.clone(),
                }),
                Some(settings),
            )
            .configure_options(|options| options.show_dialog = false)
            .build(None)
            .expect("session")
    }

    /// Backend double: PDF printing returns `pdf_result`; operations draw every page.
    struct MockBackend {
        pdf_result: bool,
        pdf_documents: Mutex<Vec<(usize, bool)>>,
        blits: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl MockBackend {
        fn new(pdf_result: bool) -> Arc<Self> {
            Arc::new(Self {
                pdf_result,
                pdf_documents: Mutex::new(Vec::new()),
                blits: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    impl NativePrintBackend for MockBackend {
        fn create_operation(&self) -> Result<Box<dyn PrintOperation>, PrintError> {
            Ok(Box::new(MockOperation {
                blits: Arc::clone(&self.blits),
            }))
        }

        fn print_pdf(&self, document: &[u8], show_panel: bool) -> bool {
            self.pdf_documents
                .lock()
                .expect("lock")
                .push((document.len(), show_panel));
            self.pdf_result
        }
    }

    struct MockOperation {
        blits: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    struct MockDevice(Arc<Mutex<Vec<(u32, u32)>>>);

    impl DeviceContext for MockDevice {
        fn draw_bitmap(&mut self, blit: &BitmapBlit<'_>) -> Result<(), RenderError> {
            self.0.lock().expect("lock").push((blit.width, blit.height));
            Ok(())
        }
    }

    impl PrintOperation for MockOperation {
        fn configure(&mut self, _settings: &crate::native::NativePrintSettings) {}

        fn run_modal(&mut self, callbacks: &mut dyn PageCallbacks) -> bool {
            self.commit(callbacks)
        }

        fn commit(&mut self, callbacks: &mut dyn PageCallbacks) -> bool {
            let mut device = MockDevice(Arc::clone(&self.blits));
            (0..callbacks.page_count()).all(|index| callbacks.render_page(&mut device, index))
        }
    }

    fn manager_with(backend: Arc<MockBackend>) -> PrintManager {
        PrintManager::new(
            PrintingConfig::default(),
            Diagnostics::new(),
            NativeCapability::Available(backend),
        )
    }

    fn session(
        height: f64,
        configure: impl FnOnce(&mut PrintOptions) + Send + 'static,
    ) -> PrintSession {
        let settings = PageSettings::default()
            .with_target_size(Size::new(816.0, 1056.0))
            .with_margins(Thickness::uniform(48.0));
        PrintSessionBuilder::new()
            .add_visual(
                Arc::new(SceneNode::new(0.0, 0.0, 720.0, height).with_background(Color::BLACK)),
                Some(settings),
            )
            .configure_options(configure)
            .build(Some("report".into()))
            .expect("session")
    }

    fn manager(config: PrintingConfig) -> (PrintManager, Arc<Mutex<Vec<DiagnosticEvent>>>) {
        let diagnostics = Diagnostics::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        diagnostics.subscribe(move |event| sink.lock().expect("lock").push(event.clone()));
        (
            PrintManager::new(config, diagnostics, NativeCapability::probe()),
            events,
        )
    }

    #[test]
    fn preview_renders_every_page_at_preview_dpi() {
        let (manager, events) = manager(PrintingConfig::default());
        let preview = manager
            .create_preview(&session(1600.0, |_| {}), &CancellationToken::new())
            .expect("preview");

        assert_eq!(preview.len(), 2);
        assert_eq!(preview.images()[0].width(), 1224);
        assert_eq!(preview.images()[0].height(), 1584);
        assert_eq!(preview.pages()[1].metrics().content_offset().y, 640.0);
        assert!(events
            .lock()
            .expect("lock")
            .iter()
            .any(|event| event.category == CATEGORY_PAGINATION));
    }

    #[test]
    fn disabled_preview_is_unavailable() {
        let config = PrintingConfig {
            enable_preview: false,
            ..PrintingConfig::default()
        };
        let (manager, _) = manager(config);
        let result = manager.create_preview(&session(100.0, |_| {}), &CancellationToken::new());
        assert!(matches!(result, Err(PrintError::PlatformUnavailable(_))));
    }

    #[test]
    fn native_print_without_backend_is_unavailable() {
        let (manager, _) = manager(PrintingConfig::default());
        let result = manager.print(
            &session(100.0, |options| options.show_dialog = false),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(PrintError::PlatformUnavailable(_))));
    }

    #[test]
    fn pdf_path_option_exports_without_a_backend() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("job.pdf");
        let target = path.clone();
        let (manager, _) = manager(PrintingConfig::default());

        let result = manager
            .print(
                &session(1600.0, move |options| options.pdf_output_path = Some(target)),
                &CancellationToken::new(),
            )
            .expect("print");

        assert_eq!(result.state, PrintJobState::Completed);
        assert_eq!(result.page_count, 2);
        assert_eq!(result.output, PrintOutput::PdfFile(path.clone()));
        assert!(std::fs::read(&path).expect("pdf written").starts_with(b"%PDF"));
    }

    #[test]
    fn cancelled_token_stops_the_preview() {
        let (manager, _) = manager(PrintingConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager.create_preview(&session(100.0, |_| {}), &cancel);
        assert!(matches!(result, Err(PrintError::Cancelled)));
    }

    #[test]
    fn render_failures_are_reported_with_page_context() {
        let (manager, events) = manager(PrintingConfig::default());
        let session = PrintSessionBuilder::new()
            .add_visual(
                Arc::new(
                    SceneNode::new(0.0, 0.0, 10.0, 10.0)
                        .with_tag("cover")
                        .with_render_error("boom"),
                ),
                None,
            )
            .build(None)
            .expect("session");

        let err = manager
            .create_preview(&session, &CancellationToken::new())
            .expect_err("render fails");
        assert!(matches!(err, PrintError::Render { page_index: 0, .. }));

        let events = events.lock().expect("lock");
        let failure = events
            .iter()
            .find(|event| event.category == CATEGORY_RASTER_RENDERER)
            .expect("failure reported");
        assert!(failure.error.as_deref().unwrap_or_default().contains("cover"));
        assert_eq!(
            failure.context.as_ref().and_then(|context| context["tag"].as_str()),
            Some("cover")
        );
    }

    #[test]
    fn trace_mode_publishes_page_audits() {
        let config = PrintingConfig {
            trace_render: true,
            ..PrintingConfig::default()
        };
        let (manager, events) = manager(config);
        manager
            .paginate(&session(100.0, |_| {}), Dpi::LOGICAL, &CancellationToken::new())
            .expect("paginate");

        let events = events.lock().expect("lock");
        let trace = events
            .iter()
            .find(|event| event.category == "Pagination.Trace")
            .expect("trace event");
        let visuals = &trace.context.as_ref().expect("context")["visuals"];
        assert_eq!(visuals[0]["world_bounds"]["x"], json!(48.0));
    }

    #[test]
    fn native_device_loop_draws_every_page_at_print_dpi() {
        let backend = MockBackend::new(true);
        let manager = manager_with(Arc::clone(&backend));

        let result = manager
            .print(
                &session(1600.0, |options| options.show_dialog = false),
                &CancellationToken::new(),
            )
            .expect("print");

        assert_eq!(result.state, PrintJobState::Completed);
        assert_eq!(result.output, PrintOutput::NativeDevice);
        let blits = backend.blits.lock().expect("lock");
        assert_eq!(blits.as_slice(), &[(2550, 3300), (2550, 3300)]);
    }

    #[test]
    fn vector_exporter_spools_pdf_to_the_backend() {
        let backend = MockBackend::new(true);
        let manager = manager_with(Arc::clone(&backend));

        let result = manager
            .print(
                &session(100.0, |options| options.use_vector_exporter = true),
                &CancellationToken::new(),
            )
            .expect("print");

        assert_eq!(result.output, PrintOutput::NativePdf);
        let documents = backend.pdf_documents.lock().expect("lock");
        assert_eq!(documents.len(), 1);
        assert!(documents[0].0 > 0);
        assert!(documents[0].1, "dialog flag is forwarded");
    }

    #[test]
    fn failed_pdf_print_is_cancelled_only_when_a_dialog_was_shown() {
        let manager = manager_with(MockBackend::new(false));

        let with_dialog = manager
            .print(
                &session(100.0, |options| options.use_vector_exporter = true),
                &CancellationToken::new(),
            )
            .expect("dialog dismissal is not an error");
        assert_eq!(with_dialog.state, PrintJobState::Cancelled);

        let silent = manager.print(
            &session(100.0, |options| {
                options.use_vector_exporter = true;
                options.show_dialog = false;
            }),
            &CancellationToken::new(),
        );
        assert!(matches!(silent, Err(PrintError::Native(_))));
    }

    #[test]
    fn vector_export_to_file_skips_the_backend_without_a_dialog() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("out").join("vector.pdf");
        let target = path.clone();
        let backend = MockBackend::new(true);
        let manager = manager_with(Arc::clone(&backend));

        let result = manager
            .print(
                &session(100.0, move |options| {
                    options.use_vector_exporter = true;
                    options.show_dialog = false;
                    options.pdf_output_path = Some(target);
                }),
                &CancellationToken::new(),
            )
            .expect("print");

        assert_eq!(result.output, PrintOutput::PdfFile(path.clone()));
        assert!(path.exists());
        assert!(backend.pdf_documents.lock().expect("lock").is_empty());
    }

    #[test]
    fn cancelling_during_the_first_page_stops_the_pdf_export() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cancelled.pdf");
        let cancel = CancellationToken::new();
        let session = cancelling_session(&cancel);
        let (manager, events) = manager(PrintingConfig::default());

        assert_eq!(
            manager
                .paginate(&session, Dpi::LOGICAL, &CancellationToken::new())
                .expect("paginate")
                .pages
                .len(),
            6
        );
        let result = manager.export_pdf(&session, &path, &cancel);

        assert!(matches!(result, Err(PrintError::Cancelled)));
        assert!(!path.exists());
        assert!(!events
            .lock()
            .expect("lock")
            .iter()
            .any(|event| event.category == CATEGORY_PDF_EXPORTER));
    }

    #[test]
    fn cancelling_during_the_first_page_stops_the_native_job() {
        let backend = MockBackend::new(true);
        let manager = manager_with(Arc::clone(&backend));
        let cancel = CancellationToken::new();

        let result = manager.print(&cancelling_session(&cancel), &cancel);

        assert!(matches!(result, Err(PrintError::Cancelled)));
        assert_eq!(backend.blits.lock().expect("lock").len(), 1);
    }

    #[test]
    fn cancelling_after_the_last_page_keeps_the_completed_job() {
        let backend = MockBackend::new(true);
        let manager = manager_with(Arc::clone(&backend));
        let cancel = CancellationToken::new();
        let session = PrintSessionBuilder::new()
            .add_visual(
                Arc::new(CancellingVisual {
                    height: 100.0,
                    cancel: cancel.clone(),
                }),
                None,
            )
            .configure_options(|options| options.show_dialog = false)
            .build(None)
            .expect("session");

        let result = manager.print(&session, &cancel).expect("print");

        assert!(cancel.is_cancelled());
        assert_eq!(result.state, PrintJobState::Completed);
        assert_eq!(result.page_count, 1);
    }
}
