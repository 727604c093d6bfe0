//! Pull-based page sources and the composite enumerator that merges them.
//! 以拉取方式提供頁面的來源，以及合併多個來源的複合列舉器。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PrintError;
use crate::metrics::{Dpi, PageMetrics, PageSettings};
use crate::page::LogicalPage;
use crate::visual::VisualRef;

/// Cooperative cancellation flag shared between a caller and a running operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns [`PrintError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<(), PrintError> {
        if self.is_cancelled() {
            Err(PrintError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Restartable-by-factory, single-pass sequence of logical pages.
///
/// [`PageEnumerator::dispose`] releases backend resources and must be idempotent.
pub trait PageEnumerator {
    /// Advances to the next page. `Ok(false)` means the sequence is exhausted.
    fn move_next(&mut self, cancel: &CancellationToken) -> Result<bool, PrintError>;

    /// Page produced by the last successful [`PageEnumerator::move_next`].
    fn current(&self) -> Option<&LogicalPage>;

    fn dispose(&mut self);
}

/// Yields exactly one page for a single visual.
#[derive(Debug)]
pub struct VisualPageEnumerator {
    visual: VisualRef,
    settings: PageSettings,
    page_break_after: bool,
    returned: bool,
    current: Option<LogicalPage>,
}

impl VisualPageEnumerator {
    pub fn new(visual: VisualRef, settings: PageSettings, page_break_after: bool) -> Self {
        Self {
            visual,
            settings,
            page_break_after,
            returned: false,
            current: None,
        }
    }
}

impl PageEnumerator for VisualPageEnumerator {
    fn move_next(&mut self, cancel: &CancellationToken) -> Result<bool, PrintError> {
        cancel.check()?;

        if self.returned {
            self.current = None;
            return Ok(false);
        }

        self.returned = true;
        let metrics = PageMetrics::for_visual(self.visual.as_ref(), &self.settings, Dpi::LOGICAL);
        self.current = Some(
            LogicalPage::new(
                Arc::clone(&self.visual),
                self.settings.clone(),
                self.page_break_after,
            )
            .with_metrics(Arc::new(metrics)),
        );
        Ok(true)
    }

    fn current(&self) -> Option<&LogicalPage> {
        self.current.as_ref()
    }

    fn dispose(&mut self) {
        self.current = None;
    }
}

/// Lifecycle of a [`CompositePageEnumerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumeratorState {
    NotStarted,
    /// Pulling from the source at this index.
    Enumerating(usize),
    /// Every source is exhausted; releasing buffered pages.
    Draining,
    Exhausted,
    Disposed,
}

/// Merges an ordered list of page sources into one logical stream.
///
/// Page breaks are flush boundaries: pages without a break are buffered until a page
/// with `page_break_after` is observed (or the last source ends), then released in FIFO
/// order. Sources are disposed as soon as they are exhausted.
pub struct CompositePageEnumerator {
    sources: VecDeque<Box<dyn PageEnumerator>>,
    active: Option<Box<dyn PageEnumerator>>,
    source_index: usize,
    buffered: VecDeque<LogicalPage>,
    ready: VecDeque<LogicalPage>,
    current: Option<LogicalPage>,
    state: EnumeratorState,
}

impl CompositePageEnumerator {
    pub fn new(sources: Vec<Box<dyn PageEnumerator>>) -> Self {
        Self {
            sources: sources.into(),
            active: None,
            source_index: 0,
            buffered: VecDeque::new(),
            ready: VecDeque::new(),
            current: None,
            state: EnumeratorState::NotStarted,
        }
    }

    pub fn state(&self) -> EnumeratorState {
        self.state
    }

    fn flush_buffer(&mut self) {
        self.ready.append(&mut self.buffered);
    }

    fn yield_ready(&mut self) -> bool {
        match self.ready.pop_front() {
            Some(page) => {
                self.current = Some(page);
                true
            }
            None => false,
        }
    }

    fn cancel_remaining(&mut self) -> PrintError {
        self.dispose();
        PrintError::Cancelled
    }
}

impl PageEnumerator for CompositePageEnumerator {
    fn move_next(&mut self, cancel: &CancellationToken) -> Result<bool, PrintError> {
        match self.state {
            EnumeratorState::Disposed => {
                return Err(PrintError::InvalidState("page enumerator was disposed"))
            }
            EnumeratorState::Exhausted => {
                self.current = None;
                return Ok(false);
            }
            _ => {}
        }

        if cancel.is_cancelled() {
            return Err(self.cancel_remaining());
        }

        if self.yield_ready() {
            return Ok(true);
        }

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancel_remaining());
            }

            let Some(active) = self.active.as_mut() else {
                match self.sources.pop_front() {
                    Some(next) => {
                        if self.state != EnumeratorState::NotStarted {
                            self.source_index += 1;
                        }
                        self.state = EnumeratorState::Enumerating(self.source_index);
                        self.active = Some(next);
                        continue;
                    }
                    None => {
                        self.state = EnumeratorState::Draining;
                        self.flush_buffer();
                        if self.yield_ready() {
                            return Ok(true);
                        }
                        self.state = EnumeratorState::Exhausted;
                        self.current = None;
                        return Ok(false);
                    }
                }
            };

            let advanced = match active.move_next(cancel) {
                Ok(advanced) => advanced,
                Err(PrintError::Cancelled) => return Err(self.cancel_remaining()),
                Err(err) => return Err(err),
            };

            if !advanced {
                if let Some(mut finished) = self.active.take() {
                    finished.dispose();
                }
                continue;
            }

            let Some(page) = active.current().cloned() else {
                continue;
            };

            let is_break = page.page_break_after;
            self.buffered.push_back(page);
            if is_break {
                self.flush_buffer();
                if self.yield_ready() {
                    return Ok(true);
                }
            }
        }
    }

    fn current(&self) -> Option<&LogicalPage> {
        match self.state {
            EnumeratorState::Disposed => None,
            _ => self.current.as_ref(),
        }
    }

    fn dispose(&mut self) {
        if self.state == EnumeratorState::Disposed {
            return;
        }

        if let Some(mut active) = self.active.take() {
            active.dispose();
        }
        while let Some(mut source) = self.sources.pop_front() {
            source.dispose();
        }
        self.buffered.clear();
        self.ready.clear();
        self.current = None;
        self.state = EnumeratorState::Disposed;
    }
}

impl Drop for CompositePageEnumerator {
    fn drop(&mut self) {
        self.dispose();
    }
}
