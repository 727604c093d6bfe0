use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PrintError;
use crate::geometry::Size;

/// Opaque identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PrintJobId(u64);

impl PrintJobId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PrintJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrintJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "print-job-{}", self.0)
    }
}

/// Orientation of a print page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    /// Landscape when the page is wider than it is tall.
    pub fn of(size: Size) -> Self {
        if size.width > size.height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

/// Inclusive, 1-based page range. `start >= 1` and `end >= start` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    start: u32,
    end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Result<Self, PrintError> {
        if start == 0 {
            return Err(PrintError::Configuration(
                "the first page must be greater than zero".into(),
            ));
        }
        if end < start {
            return Err(PrintError::Configuration(format!(
                "the last page ({end}) must not be less than the first page ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, page: u32) -> bool {
        self.start <= page && page <= self.end
    }
}

/// Options supplied when requesting a print job.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintOptions {
    pub show_dialog: bool,
    pub printer_name: Option<String>,
    pub job_name: Option<String>,
    pub page_range: Option<PageRange>,
    pub collect_preview_first: bool,
    pub pdf_output_path: Option<PathBuf>,
    /// Render through the vector PDF exporter instead of the native device loop.
    pub use_vector_exporter: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            show_dialog: true,
            printer_name: None,
            job_name: None,
            page_range: None,
            collect_preview_first: true,
            pdf_output_path: None,
            use_vector_exporter: false,
        }
    }
}

impl PrintOptions {
    /// PDF output path when one is set and not blank.
    pub fn pdf_path(&self) -> Option<&PathBuf> {
        self.pdf_output_path
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

/// Final state reported for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrintJobState {
    Completed,
    /// The user dismissed the native dialog.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_range_rejects_invalid_bounds() {
        assert!(matches!(
            PageRange::new(0, 3),
            Err(PrintError::Configuration(_))
        ));
        assert!(matches!(
            PageRange::new(4, 3),
            Err(PrintError::Configuration(_))
        ));
        let range = PageRange::new(2, 2).expect("single page range");
        assert!(range.contains(2));
        assert!(!range.contains(3));
    }

    #[test]
    fn orientation_follows_the_longer_side() {
        assert_eq!(Orientation::of(Size::new(816.0, 1056.0)), Orientation::Portrait);
        assert_eq!(Orientation::of(Size::new(1056.0, 816.0)), Orientation::Landscape);
    }

    #[test]
    fn blank_pdf_path_is_ignored() {
        let options = PrintOptions {
            pdf_output_path: Some(PathBuf::new()),
            ..PrintOptions::default()
        };
        assert!(options.pdf_path().is_none());
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(PrintJobId::new(), PrintJobId::new());
    }
}
