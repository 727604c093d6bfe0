use std::fmt;
use std::sync::Arc;

use crate::enumerator::{CompositePageEnumerator, PageEnumerator, VisualPageEnumerator};
use crate::error::PrintError;
use crate::job::{PrintJobId, PrintOptions};
use crate::metrics::PageSettings;
use crate::visual::VisualRef;

/// Factory producing a fresh page enumerator for every print or preview pass.
pub type PageSourceFactory = Arc<dyn Fn() -> Box<dyn PageEnumerator> + Send + Sync>;

type OptionsCallback = Box<dyn FnOnce(&mut PrintOptions) + Send>;

/// Ordered set of page sources that make up a printable document.
#[derive(Clone)]
pub struct PrintDocument {
    factories: Vec<PageSourceFactory>,
}

impl fmt::Debug for PrintDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintDocument")
            .field("sources", &self.factories.len())
            .finish()
    }
}

impl PrintDocument {
    pub fn from_factories(factories: Vec<PageSourceFactory>) -> Result<Self, PrintError> {
        if factories.is_empty() {
            return Err(PrintError::Configuration(
                "at least one page source must be supplied".into(),
            ));
        }
        Ok(Self { factories })
    }

    /// Single-visual document. Fails when the visual is marked non-printable.
    pub fn from_visual(visual: VisualRef, settings: Option<PageSettings>) -> Result<Self, PrintError> {
        let hints = visual.print_hints();
        if !hints.is_printable {
            return Err(PrintError::Configuration(
                "the visual is marked as non-printable".into(),
            ));
        }
        Self::from_factories(vec![visual_source(visual, settings)])
    }

    pub fn source_count(&self) -> usize {
        self.factories.len()
    }

    /// Fresh composite enumerator over every source, in order.
    pub fn create_enumerator(&self) -> CompositePageEnumerator {
        let sources = self.factories.iter().map(|factory| factory()).collect();
        CompositePageEnumerator::new(sources)
    }
}

fn visual_source(visual: VisualRef, settings: Option<PageSettings>) -> PageSourceFactory {
    let hints = visual.print_hints();
    let page_settings = hints.apply(&settings.unwrap_or_default());
    let page_break_after = hints.page_break_after;
    Arc::new(move || {
        Box::new(VisualPageEnumerator::new(
            Arc::clone(&visual),
            page_settings.clone(),
            page_break_after,
        )) as Box<dyn PageEnumerator>
    })
}

/// A print job: document, snapshotted options and an optional description.
///
/// Immutable once built and consumed by one print or preview operation at a time.
#[derive(Debug, Clone)]
pub struct PrintSession {
    id: PrintJobId,
    document: PrintDocument,
    options: PrintOptions,
    description: Option<String>,
}

impl PrintSession {
    pub fn new(document: PrintDocument, options: PrintOptions, description: Option<String>) -> Self {
        Self {
            id: PrintJobId::new(),
            document,
            options,
            description,
        }
    }

    pub fn id(&self) -> PrintJobId {
        self.id
    }

    pub fn document(&self) -> &PrintDocument {
        &self.document
    }

    pub fn options(&self) -> &PrintOptions {
        &self.options
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Accumulates page sources and option edits, then snapshots them into a session.
/// 累積頁面來源與選項設定，最後建立不可變的列印工作。
#[derive(Default)]
pub struct PrintSessionBuilder {
    sources: Vec<PageSourceFactory>,
    configure: Vec<OptionsCallback>,
}

impl PrintSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a visual as one page source. Non-printable visuals are skipped.
    pub fn add_visual(mut self, visual: VisualRef, settings: Option<PageSettings>) -> Self {
        if !visual.print_hints().is_printable {
            tracing::debug!(tag = ?visual.tag(), "skipping non-printable visual");
            return self;
        }
        self.sources.push(visual_source(visual, settings));
        self
    }

    pub fn add_page_source<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PageEnumerator> + Send + Sync + 'static,
    {
        self.sources.push(Arc::new(factory));
        self
    }

    /// Queues an edit applied to the options when the session is built.
    pub fn configure_options<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut PrintOptions) + Send + 'static,
    {
        self.configure.push(Box::new(configure));
        self
    }

    pub fn build(self, description: Option<String>) -> Result<PrintSession, PrintError> {
        if self.sources.is_empty() {
            return Err(PrintError::Configuration(
                "at least one page source must be added to build a session".into(),
            ));
        }

        let mut options = PrintOptions::default();
        for configure in self.configure {
            configure(&mut options);
        }

        let document = PrintDocument::from_factories(self.sources)?;
        Ok(PrintSession::new(document, options, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::CancellationToken;
    use crate::geometry::Thickness;
    use crate::job::PageRange;
    use crate::scene::SceneNode;
    use crate::visual::PrintHints;

    fn visual(tag: &str) -> VisualRef {
        Arc::new(SceneNode::new(0.0, 0.0, 100.0, 100.0).with_tag(tag))
    }

    #[test]
    fn build_without_sources_is_a_configuration_error() {
        let result = PrintSessionBuilder::new().build(None);
        assert!(matches!(result, Err(PrintError::Configuration(_))));
    }

    #[test]
    fn non_printable_visuals_are_skipped() {
        let hidden: VisualRef = Arc::new(SceneNode::new(0.0, 0.0, 10.0, 10.0).with_hints(PrintHints {
            is_printable: false,
            ..PrintHints::default()
        }));
        let result = PrintSessionBuilder::new().add_visual(hidden.clone(), None).build(None);
        assert!(matches!(result, Err(PrintError::Configuration(_))));
        assert!(matches!(
            PrintDocument::from_visual(hidden, None),
            Err(PrintError::Configuration(_))
        ));
    }

    #[test]
    fn options_are_applied_in_order_and_snapshotted() {
        let range = PageRange::new(1, 2).expect("range");
        let session = PrintSessionBuilder::new()
            .add_visual(visual("a"), None)
            .configure_options(|options| options.job_name = Some("first".into()))
            .configure_options(move |options| {
                options.job_name = Some("second".into());
                options.page_range = Some(range);
                options.show_dialog = false;
            })
            .build(Some("Quarterly report".into()))
            .expect("session");

        assert_eq!(session.options().job_name.as_deref(), Some("second"));
        assert_eq!(session.options().page_range, Some(range));
        assert!(!session.options().show_dialog);
        assert_eq!(session.description(), Some("Quarterly report"));
    }

    #[test]
    fn every_enumeration_starts_fresh() {
        let session = PrintSessionBuilder::new()
            .add_visual(visual("a"), None)
            .add_visual(visual("b"), None)
            .build(None)
            .expect("session");
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let mut enumerator = session.document().create_enumerator();
            let mut tags = Vec::new();
            while enumerator.move_next(&cancel).expect("pull") {
                if let Some(tag) = enumerator.current().and_then(|page| page.visual.tag()) {
                    tags.push(tag.to_string());
                }
            }
            assert_eq!(tags, vec!["a", "b"]);
        }
    }

    #[test]
    fn hints_shape_page_settings() {
        let hinted: VisualRef = Arc::new(SceneNode::new(0.0, 0.0, 10.0, 10.0).with_hints(PrintHints {
            margins: Some(Thickness::uniform(8.0)),
            page_break_after: true,
            ..PrintHints::default()
        }));
        let document = PrintDocument::from_visual(hinted, None).expect("document");
        let mut enumerator = document.create_enumerator();
        assert!(enumerator.move_next(&CancellationToken::new()).expect("page"));
        let page = enumerator.current().expect("current");
        assert_eq!(page.settings.margins, Some(Thickness::uniform(8.0)));
        assert!(page.page_break_after);
    }
}
