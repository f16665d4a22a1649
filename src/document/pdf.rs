//! PDF page source backed by lopdf.

use std::hash::Hasher;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use lopdf::Document as LopdfDocument;

use crate::detect::{detect_header, detect_header_from_path};
use crate::error::{Error, Result};

use super::PageSource;

/// A PDF document opened for page-by-page text extraction.
///
/// Opening validates the header and loads the object table. Every failure
/// here is a document error and happens before any batching starts.
pub struct PdfDocument {
    doc: LopdfDocument,
    identity: String,
    /// One-based page numbers in document order.
    page_numbers: Vec<u32>,
}

impl PdfDocument {
    /// Open a PDF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        detect_header_from_path(path)?;
        let doc = LopdfDocument::load(path).map_err(map_load_error)?;

        let meta = std::fs::metadata(path)?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let identity = format!("file:{}:{}:{}", path.display(), meta.len(), modified);

        Self::from_loaded(doc, identity)
    }

    /// Load a PDF from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        detect_header(data)?;
        let doc = LopdfDocument::load_mem(data).map_err(map_load_error)?;

        let mut hasher = ahash::AHasher::default();
        hasher.write(data);
        let identity = format!("mem:{:016x}:{}", hasher.finish(), data.len());

        Self::from_loaded(doc, identity)
    }

    /// Load a PDF from a reader.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    fn from_loaded(doc: LopdfDocument, identity: String) -> Result<Self> {
        if doc.is_encrypted() {
            return Err(Error::Encrypted);
        }

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        log::debug!("Opened {} with {} pages", identity, page_numbers.len());

        Ok(Self {
            doc,
            identity,
            page_numbers,
        })
    }

    /// PDF version string from the header.
    pub fn version(&self) -> &str {
        &self.doc.version
    }
}

fn map_load_error(err: lopdf::Error) -> Error {
    match err {
        lopdf::Error::Decryption(_) => Error::Encrypted,
        lopdf::Error::IO(e) => Error::Io(e),
        other => Error::Document(other.to_string()),
    }
}

impl PageSource for PdfDocument {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn page_count(&self) -> u32 {
        self.page_numbers.len() as u32
    }

    fn page_text(&self, index: u32) -> Result<Option<String>> {
        let number = *self
            .page_numbers
            .get(index as usize)
            .ok_or_else(|| Error::PageRead {
                page: index,
                reason: format!("document has {} pages", self.page_numbers.len()),
            })?;

        let text = self
            .doc
            .extract_text(&[number])
            .map_err(|e| Error::PageRead {
                page: index,
                reason: e.to_string(),
            })?;

        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("identity", &self.identity)
            .field("pages", &self.page_numbers.len())
            .finish()
    }
}
