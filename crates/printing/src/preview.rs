use crate::error::{PrintError, RenderError};
use crate::page::PhysicalPage;
use crate::raster::PageBitmap;

/// Rendered preview of a print session: one bitmap per physical page.
#[derive(Debug, Clone)]
pub struct PrintPreview {
    pages: Vec<PhysicalPage>,
    images: Vec<PageBitmap>,
}

impl PrintPreview {
    pub fn new(pages: Vec<PhysicalPage>, images: Vec<PageBitmap>) -> Result<Self, PrintError> {
        if pages.len() != images.len() {
            return Err(PrintError::Configuration(format!(
                "the number of preview images ({}) must match the number of pages ({})",
                images.len(),
                pages.len()
            )));
        }
        Ok(Self { pages, images })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[PhysicalPage] {
        &self.pages
    }

    pub fn images(&self) -> &[PageBitmap] {
        &self.images
    }

    /// Page and bitmap pairs in print order.
    pub fn iter(&self) -> impl Iterator<Item = (&PhysicalPage, &PageBitmap)> {
        self.pages.iter().zip(self.images.iter())
    }

    /// PNG encoding of page `index`.
    pub fn png(&self, index: usize) -> Option<Result<Vec<u8>, RenderError>> {
        self.images.get(index).map(PageBitmap::encode_png)
    }

    pub fn into_parts(self) -> (Vec<PhysicalPage>, Vec<PageBitmap>) {
        (self.pages, self.images)
    }
}
