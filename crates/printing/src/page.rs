use std::sync::Arc;

use crate::metrics::{Dpi, PageMetrics, PageSettings};
use crate::visual::VisualRef;

/// One content unit produced by a page source, before height-based splitting.
#[derive(Debug, Clone)]
pub struct LogicalPage {
    pub visual: VisualRef,
    pub settings: PageSettings,
    pub page_break_after: bool,
    /// Precomputed metrics; computed on demand when absent.
    pub metrics: Option<Arc<PageMetrics>>,
}

impl LogicalPage {
    pub fn new(visual: VisualRef, settings: PageSettings, page_break_after: bool) -> Self {
        Self {
            visual,
            settings,
            page_break_after,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cached metrics when present, otherwise freshly computed at the logical DPI.
    pub fn resolve_metrics(&self) -> Arc<PageMetrics> {
        match &self.metrics {
            Some(metrics) => Arc::clone(metrics),
            None => Arc::new(PageMetrics::for_visual(
                self.visual.as_ref(),
                &self.settings,
                Dpi::LOGICAL,
            )),
        }
    }

    /// Returns a page whose metrics were computed at `dpi`. Pages that already carry
    /// matching metrics are returned unchanged.
    pub fn normalized(self, dpi: Dpi) -> LogicalPage {
        if let Some(metrics) = &self.metrics {
            if metrics.dpi().nearly_equals(&dpi) {
                return self;
            }
        }

        let metrics = PageMetrics::for_visual(self.visual.as_ref(), &self.settings, dpi);
        self.with_metrics(Arc::new(metrics))
    }
}

impl PartialEq for LogicalPage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.visual, &other.visual)
            && self.settings == other.settings
            && self.page_break_after == other.page_break_after
            && self.metrics == other.metrics
    }
}

/// The unit handed to a renderer: a logical page (or a slice of one) with final metrics.
#[derive(Debug, Clone)]
pub struct PhysicalPage {
    pub visual: VisualRef,
    pub settings: PageSettings,
    pub page_break_after: bool,
    pub metrics: Arc<PageMetrics>,
}

impl PhysicalPage {
    pub fn metrics(&self) -> &PageMetrics {
        &self.metrics
    }

    /// Tag of the root visual, for diagnostics.
    pub fn tag(&self) -> Option<&str> {
        self.visual.tag()
    }

    pub(crate) fn from_logical(page: &LogicalPage, metrics: Arc<PageMetrics>) -> Self {
        Self {
            visual: Arc::clone(&page.visual),
            settings: page.settings.clone(),
            page_break_after: page.page_break_after,
            metrics,
        }
    }
}

impl PartialEq for PhysicalPage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.visual, &other.visual)
            && self.settings == other.settings
            && self.page_break_after == other.page_break_after
            && self.metrics == other.metrics
    }
}

impl From<PhysicalPage> for LogicalPage {
    fn from(page: PhysicalPage) -> Self {
        LogicalPage {
            visual: page.visual,
            settings: page.settings,
            page_break_after: page.page_break_after,
            metrics: Some(page.metrics),
        }
    }
}
