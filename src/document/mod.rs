//! Document sources.
//!
//! The pipeline only needs two things from a document: how many pages it has
//! and the text of a given page. [`PageSource`] captures that, so PDFs, text
//! already held in memory, or any other paged format can be streamed the same
//! way.

mod memory;
mod pdf;

pub use memory::InMemoryDocument;
pub use pdf::PdfDocument;

use crate::error::{Error, Result};

/// A paged document whose text can be read one page at a time.
pub trait PageSource: Send + Sync {
    /// Stable identity of the logical document, used in cache fingerprints.
    fn identity(&self) -> &str;

    /// Number of pages in the document.
    fn page_count(&self) -> u32;

    /// Read the text of the page at zero-based `index`.
    ///
    /// `Ok(None)` means the page has no text layer. An error means the page
    /// could not be read; callers skip such pages.
    fn page_text(&self, index: u32) -> Result<Option<String>>;
}

impl<T: PageSource + ?Sized> PageSource for &T {
    fn identity(&self) -> &str {
        (**self).identity()
    }

    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn page_text(&self, index: u32) -> Result<Option<String>> {
        (**self).page_text(index)
    }
}

impl<T: PageSource + ?Sized> PageSource for std::sync::Arc<T> {
    fn identity(&self) -> &str {
        (**self).identity()
    }

    fn page_count(&self) -> u32 {
        (**self).page_count()
    }

    fn page_text(&self, index: u32) -> Result<Option<String>> {
        (**self).page_text(index)
    }
}

/// Half-open range `[start, end)` of zero-based page indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PageRange {
    start: u32,
    end: u32,
}

impl PageRange {
    /// Create a range, checking `start < end <= page_count`.
    pub fn new(start: u32, end: u32, page_count: u32) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidPageRange(format!(
                "start {} must be below end {}",
                start, end
            )));
        }
        if end > page_count {
            return Err(Error::InvalidPageRange(format!(
                "end {} exceeds page count {}",
                end, page_count
            )));
        }
        Ok(Self { start, end })
    }

    /// First page index in the range.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last page index.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of pages in the range (always at least one).
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    /// Ranges are never empty; provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `index` falls inside the range.
    pub fn contains(&self, index: u32) -> bool {
        (self.start..self.end).contains(&index)
    }

    /// Iterate over the page indices in order.
    pub fn iter(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
