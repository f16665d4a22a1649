//! Extraction options.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Options controlling a single extraction call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Normalize page text (line endings, Unicode NFC, blank runs, trim)
    pub preprocess_text: bool,

    /// Allow bounded parallel page reads on the direct path
    pub use_parallel_processing: bool,

    /// Upper bound on parallel page-read workers
    pub max_concurrent_operations: u32,

    /// Upper bound on pages per streaming batch
    pub max_batch_size: u32,
}

impl ExtractionOptions {
    /// Create new extraction options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable text preprocessing.
    pub fn with_preprocessing(mut self, enabled: bool) -> Self {
        self.preprocess_text = enabled;
        self
    }

    /// Keep page text exactly as the document returns it.
    pub fn raw(mut self) -> Self {
        self.preprocess_text = false;
        self
    }

    /// Enable or disable parallel page reads.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.use_parallel_processing = parallel;
        self
    }

    /// Set the worker bound for parallel reads.
    pub fn with_max_concurrent_operations(mut self, workers: u32) -> Self {
        self.max_concurrent_operations = workers.max(1);
        self
    }

    /// Set the maximum streaming batch size.
    pub fn with_max_batch_size(mut self, pages: u32) -> Self {
        self.max_batch_size = pages.max(1);
        self
    }

    /// Stable digest of every option, used in cache fingerprints.
    pub fn digest(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            preprocess_text: true,
            use_parallel_processing: false,
            max_concurrent_operations: 4,
            max_batch_size: 10,
        }
    }
}
