//! Page source over text already held in memory.

use crate::error::{Error, Result};

use super::PageSource;

/// A document whose page texts are already available.
///
/// `None` entries model pages without a text layer.
#[derive(Debug, Clone)]
pub struct InMemoryDocument {
    identity: String,
    pages: Vec<Option<String>>,
}

impl InMemoryDocument {
    /// Create a document from page texts.
    pub fn new(identity: impl Into<String>, pages: Vec<Option<String>>) -> Self {
        Self {
            identity: identity.into(),
            pages,
        }
    }

    /// Create a document where every page has text.
    pub fn from_pages<I, S>(identity: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(identity, pages.into_iter().map(|p| Some(p.into())).collect())
    }

    /// Append a page.
    pub fn push_page(&mut self, text: Option<String>) {
        self.pages.push(text);
    }
}

impl PageSource for InMemoryDocument {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, index: u32) -> Result<Option<String>> {
        self.pages
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::PageRead {
                page: index,
                reason: format!("document has {} pages", self.pages.len()),
            })
    }
}
