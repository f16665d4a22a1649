//! Error types for streampdf.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streampdf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during extraction.
///
/// The extraction entry points return the document-level variants (see
/// [`Error::is_document_error`]), plus [`Error::PressureTimeout`] when the
/// pipeline is configured to fail on a pressure timeout. Page and cache
/// errors are absorbed inside the pipeline and only surface from the
/// lower-level components that produce them.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error when reading files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file format is not recognized as PDF.
    #[error("Unknown file format: not a valid PDF")]
    UnknownFormat,

    /// The PDF version is not supported.
    #[error("Unsupported PDF version: {0}")]
    UnsupportedVersion(String),

    /// Error parsing PDF structure.
    #[error("PDF parsing error: {0}")]
    PdfParse(String),

    /// The PDF document is encrypted.
    #[error("Document is encrypted")]
    Encrypted,

    /// The document could not be opened or validated.
    #[error("Document error: {0}")]
    Document(String),

    /// A single page could not be read.
    #[error("Failed to read page {page}: {reason}")]
    PageRead {
        /// Zero-based page index
        page: u32,
        /// Underlying failure
        reason: String,
    },

    /// An item is larger than the whole cache.
    #[error("Cache rejected item of {size} bytes (capacity {capacity} bytes)")]
    CacheRejected {
        /// Size of the rejected item in bytes
        size: usize,
        /// Total byte capacity of the cache
        capacity: usize,
    },

    /// Memory pressure did not clear within the configured wait bound.
    #[error("Memory pressure did not clear after {0:?}")]
    PressureTimeout(Duration),

    /// Invalid page range specification.
    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the document itself could not be used.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::UnknownFormat
                | Error::UnsupportedVersion(_)
                | Error::PdfParse(_)
                | Error::Encrypted
                | Error::Document(_)
        )
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        match err {
            lopdf::Error::IO(e) => Error::Io(e),
            lopdf::Error::Decryption(_) => Error::Encrypted,
            _ => Error::PdfParse(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
