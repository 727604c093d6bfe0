use std::sync::Arc;

use serde::Serialize;

use crate::enumerator::{CancellationToken, PageEnumerator};
use crate::error::PrintError;
use crate::geometry::Point;
use crate::job::{PageRange, PrintOptions};
use crate::metrics::{Dpi, PageMetrics};
use crate::page::{LogicalPage, PhysicalPage};
use crate::session::PrintDocument;

/// Slack (in DIP) under which content still counts as fitting on one page.
pub const DEFAULT_FIT_TOLERANCE: f64 = 0.5;

/// Splits a logical page into the physical pages needed to show all of its content.
///
/// Content taller than the page's content area yields one slice per page height, each
/// with a shifted content offset; the last slice is clamped so that it shows the bottom
/// of the content. Only the last slice inherits the page-break flag.
/// 內容高度超過可用區域時，依頁高切分為多個實體頁面。
pub fn expand_page(page: &LogicalPage, fit_tolerance: f64) -> PageSlices {
    let metrics = page.resolve_metrics();

    let scale = if metrics.content_scale() <= 0.0 {
        1.0
    } else {
        metrics.content_scale()
    };
    let available_width = metrics.content_rect().width / scale;
    let available_height = metrics.content_rect().height / scale;

    let visual_height = metrics.visual_bounds().height;
    // Unbounded content cannot be sliced.
    if available_width <= 0.0 || available_height <= 0.0 || !visual_height.is_finite() {
        return PageSlices::single(PhysicalPage::from_logical(page, metrics));
    }

    let base_offset = metrics.content_offset();
    let remaining_height = (visual_height - base_offset.y).max(0.0);

    if remaining_height <= available_height + fit_tolerance {
        return PageSlices::single(PhysicalPage::from_logical(page, metrics));
    }

    let page_count = ((remaining_height / available_height).ceil() as usize).max(1);
    let max_offset = (visual_height - available_height).max(0.0);

    PageSlices {
        inner: SliceState::Slices {
            page: page.clone(),
            metrics,
            base_offset,
            available_height,
            max_offset,
            page_count,
            next_index: 0,
        },
    }
}

/// Lazy, single-pass sequence of physical pages produced by [`expand_page`].
#[derive(Debug)]
pub struct PageSlices {
    inner: SliceState,
}

#[derive(Debug)]
enum SliceState {
    Single(Option<PhysicalPage>),
    Slices {
        page: LogicalPage,
        metrics: Arc<PageMetrics>,
        base_offset: Point,
        available_height: f64,
        max_offset: f64,
        page_count: usize,
        next_index: usize,
    },
}

impl PageSlices {
    fn single(page: PhysicalPage) -> Self {
        Self {
            inner: SliceState::Single(Some(page)),
        }
    }
}

impl Iterator for PageSlices {
    type Item = PhysicalPage;

    fn next(&mut self) -> Option<PhysicalPage> {
        match &mut self.inner {
            SliceState::Single(page) => page.take(),
            SliceState::Slices {
                page,
                metrics,
                base_offset,
                available_height,
                max_offset,
                page_count,
                next_index,
            } => {
                if *next_index >= *page_count {
                    return None;
                }
                let index = *next_index;
                *next_index += 1;

                let offset_y = (base_offset.y + index as f64 * *available_height).min(*max_offset);
                let offset = Point::new(base_offset.x, offset_y);
                let slice_metrics = if index == 0 && offset == metrics.content_offset() {
                    Arc::clone(metrics)
                } else {
                    Arc::new(metrics.with_content_offset(offset))
                };

                let is_last = index + 1 == *page_count;
                Some(PhysicalPage {
                    visual: Arc::clone(&page.visual),
                    settings: page.settings.clone(),
                    page_break_after: is_last && page.page_break_after,
                    metrics: slice_metrics,
                })
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match &self.inner {
            SliceState::Single(page) => usize::from(page.is_some()),
            SliceState::Slices {
                page_count,
                next_index,
                ..
            } => page_count.saturating_sub(*next_index),
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PageSlices {}

/// Counts gathered while paginating a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PaginationSummary {
    pub logical_pages: usize,
    /// Physical pages before page-range filtering.
    pub physical_pages: usize,
    pub selected_pages: usize,
}

/// Result from running the paginator.
/// 分頁器執行後的整體結果。
#[derive(Debug, Clone)]
pub struct PaginationResult {
    pub pages: Vec<PhysicalPage>,
    pub summary: PaginationSummary,
}

/// Contract implemented by the pagination engine.
/// 分頁引擎需實作的介面契約。
pub trait Paginator {
    fn paginate(
        &self,
        document: &PrintDocument,
        options: &PrintOptions,
        cancel: &CancellationToken,
    ) -> Result<PaginationResult, PrintError>;
}

/// Normalizes every logical page to a target DPI, splits it, then applies the page range.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPaginator {
    dpi: Dpi,
    fit_tolerance: f64,
}

impl Default for DefaultPaginator {
    fn default() -> Self {
        Self::new(Dpi::LOGICAL)
    }
}

impl DefaultPaginator {
    pub fn new(dpi: Dpi) -> Self {
        Self {
            dpi,
            fit_tolerance: DEFAULT_FIT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, fit_tolerance: f64) -> Self {
        self.fit_tolerance = fit_tolerance.max(0.0);
        self
    }

    pub fn dpi(&self) -> Dpi {
        self.dpi
    }

    /// Pulls every logical page and appends its slices; returns the logical page count.
    fn expand_all(
        &self,
        enumerator: &mut dyn PageEnumerator,
        expanded: &mut Vec<PhysicalPage>,
        cancel: &CancellationToken,
    ) -> Result<usize, PrintError> {
        let mut logical_pages = 0usize;
        while enumerator.move_next(cancel)? {
            let Some(page) = enumerator.current().cloned() else {
                continue;
            };
            cancel.check()?;
            logical_pages += 1;

            let normalized = page.normalized(self.dpi);
            expanded.extend(expand_page(&normalized, self.fit_tolerance));
        }
        Ok(logical_pages)
    }
}

impl Paginator for DefaultPaginator {
    fn paginate(
        &self,
        document: &PrintDocument,
        options: &PrintOptions,
        cancel: &CancellationToken,
    ) -> Result<PaginationResult, PrintError> {
        let mut enumerator = document.create_enumerator();
        let mut expanded = Vec::new();
        let outcome = self.expand_all(&mut enumerator, &mut expanded, cancel);
        enumerator.dispose();
        let logical_pages = outcome?;

        let physical_pages = expanded.len();
        let pages = match options.page_range {
            Some(range) => select_range(expanded, range),
            None => expanded,
        };

        tracing::debug!(
            logical_pages,
            physical_pages,
            selected_pages = pages.len(),
            "paginated document"
        );

        Ok(PaginationResult {
            summary: PaginationSummary {
                logical_pages,
                physical_pages,
                selected_pages: pages.len(),
            },
            pages,
        })
    }
}

/// Keeps the 1-based page numbers inside `range`, preserving order.
pub fn select_range(pages: Vec<PhysicalPage>, range: PageRange) -> Vec<PhysicalPage> {
    let mut selected = Vec::new();
    for (index, page) in pages.into_iter().enumerate() {
        let page_number = index as u32 + 1;
        if page_number > range.end() {
            break;
        }
        if range.contains(page_number) {
            selected.push(page);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rect, Size, Thickness};
    use crate::metrics::PageSettings;
    use crate::scene::SceneNode;
    use crate::visual::VisualRef;

    fn letter_settings() -> PageSettings {
        PageSettings::default()
            .with_target_size(Size::new(816.0, 1056.0))
            .with_margins(Thickness::uniform(48.0))
    }

    fn page_for(height: f64, settings: PageSettings, page_break_after: bool) -> LogicalPage {
        let visual: VisualRef = Arc::new(SceneNode::new(0.0, 0.0, 1600.0, height));
        LogicalPage::new(visual, settings, page_break_after)
    }

    #[test]
    fn tall_content_is_split_into_clamped_slices() {
        let page = page_for(1600.0, letter_settings(), true);
        let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].metrics.content_offset(), Point::new(0.0, 0.0));
        assert_eq!(slices[1].metrics.content_offset(), Point::new(0.0, 640.0));
        assert!(!slices[0].page_break_after);
        assert!(slices[1].page_break_after);
    }

    #[test]
    fn unbounded_content_falls_back_to_a_single_page() {
        for height in [f64::INFINITY, f64::NAN] {
            let page = page_for(height, letter_settings(), true);
            let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();

            assert_eq!(slices.len(), 1);
            assert_eq!(slices[0].metrics.content_offset(), Point::ZERO);
            assert!(slices[0].page_break_after);
        }
    }

    #[test]
    fn slice_count_matches_ceiling_of_content_over_area() {
        let page = page_for(5000.0, letter_settings(), false);
        let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();

        assert_eq!(slices.len(), 6);
        let offsets: Vec<f64> = slices
            .iter()
            .map(|slice| slice.metrics.content_offset().y)
            .collect();
        assert_eq!(offsets, vec![0.0, 960.0, 1920.0, 2880.0, 3840.0, 4040.0]);
        assert!(offsets.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(offsets.last().copied().unwrap_or_default() + 960.0 >= 5000.0);
    }

    #[test]
    fn scale_enlarges_the_available_height() {
        let page = page_for(1900.0, letter_settings().with_scale(0.5), false);
        let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();
        assert_eq!(slices.len(), 1);
    }

    #[test]
    fn content_within_tolerance_stays_on_one_page() {
        let page = page_for(960.4, letter_settings(), false);
        assert_eq!(expand_page(&page, DEFAULT_FIT_TOLERANCE).count(), 1);
        assert_eq!(expand_page(&page, 0.0).count(), 2);
    }

    #[test]
    fn fitting_page_keeps_its_metrics_allocation() {
        let page = page_for(500.0, letter_settings(), true).normalized(Dpi::LOGICAL);
        let original = page.metrics.clone().expect("normalized metrics");

        let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();
        assert_eq!(slices.len(), 1);
        assert!(Arc::ptr_eq(&slices[0].metrics, &original));
        assert_eq!(LogicalPage::from(slices[0].clone()), page);
    }

    #[test]
    fn first_slice_reuses_metrics_when_offset_is_unchanged() {
        let page = page_for(3000.0, letter_settings(), false).normalized(Dpi::LOGICAL);
        let original = page.metrics.clone().expect("normalized metrics");
        let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();
        assert!(Arc::ptr_eq(&slices[0].metrics, &original));
        assert!(!Arc::ptr_eq(&slices[1].metrics, &original));
    }

    #[test]
    fn zero_height_content_yields_one_page() {
        let page = page_for(0.0, letter_settings(), false);
        assert_eq!(expand_page(&page, DEFAULT_FIT_TOLERANCE).count(), 1);
    }

    #[test]
    fn empty_content_area_is_emitted_unsplit() {
        let settings = letter_settings().with_margins(Thickness::new(0.0, 600.0, 0.0, 600.0));
        let page = page_for(5000.0, settings, false);
        let slices: Vec<_> = expand_page(&page, DEFAULT_FIT_TOLERANCE).collect();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].metrics.content_rect().height, 0.0);
    }

    #[test]
    fn existing_offset_is_the_starting_point() {
        let base = page_for(3000.0, letter_settings(), false).normalized(Dpi::LOGICAL);
        let shifted_metrics = base
            .metrics
            .as_ref()
            .map(|metrics| metrics.with_content_offset(Point::new(5.0, 1500.0)))
            .expect("metrics");
        let page = base.clone().with_metrics(Arc::new(shifted_metrics));

        let offsets: Vec<Point> = expand_page(&page, DEFAULT_FIT_TOLERANCE)
            .map(|slice| slice.metrics.content_offset())
            .collect();
        assert_eq!(offsets, vec![Point::new(5.0, 1500.0), Point::new(5.0, 2040.0)]);
    }

    #[test]
    fn size_hint_tracks_remaining_slices() {
        let page = page_for(2000.0, letter_settings(), false);
        let mut slices = expand_page(&page, DEFAULT_FIT_TOLERANCE);
        assert_eq!(slices.len(), 3);
        slices.next();
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn range_selection_keeps_requested_pages_in_order() {
        let pages: Vec<PhysicalPage> = (0..5)
            .map(|index| {
                let visual: VisualRef = Arc::new(
                    SceneNode::new(0.0, 0.0, 10.0, 10.0).with_tag(format!("page-{}", index + 1)),
                );
                let metrics = PageMetrics::compute(
                    Rect::new(0.0, 0.0, 10.0, 10.0),
                    &PageSettings::default(),
                    Dpi::LOGICAL,
                );
                PhysicalPage {
                    visual,
                    settings: PageSettings::default(),
                    page_break_after: false,
                    metrics: Arc::new(metrics),
                }
            })
            .collect();

        let range = PageRange::new(2, 3).expect("valid range");
        let tags: Vec<String> = select_range(pages, range)
            .iter()
            .filter_map(|page| page.tag().map(str::to_string))
            .collect();
        assert_eq!(tags, vec!["page-2", "page-3"]);
    }
}
