//! Execution of a single page batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::document::{PageRange, PageSource};
use crate::memory::MemorySampler;
use crate::options::ExtractionOptions;
use crate::text::{join_segments, prepare_page_text};

/// Batches with more pages than this yield to the scheduler once processed.
const YIELD_AFTER_PAGES: u32 = 3;

/// Outcome of one processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Position of the batch in the session
    pub batch_index: u32,
    /// Pages covered by the batch
    pub page_range: PageRange,
    /// Text of the readable pages, joined in page order
    pub extracted_text: String,
    /// Wall-clock time spent
    pub processing_time: Duration,
    /// Growth of resident memory while processing, never negative
    pub memory_delta: u64,
    /// Pages that produced text
    pub pages_with_text: u32,
}

/// Reads the pages of one batch.
#[derive(Clone)]
pub struct BatchProcessor {
    sampler: Arc<dyn MemorySampler>,
}

impl BatchProcessor {
    /// Create a processor measuring memory through `sampler`.
    pub fn new(sampler: Arc<dyn MemorySampler>) -> Self {
        Self { sampler }
    }

    /// Extract the text of every page in `range`.
    ///
    /// Pages without text or that fail to read are skipped; the batch itself
    /// never fails.
    pub async fn process<D>(
        &self,
        doc: &D,
        batch_index: u32,
        range: PageRange,
        options: &ExtractionOptions,
    ) -> BatchResult
    where
        D: PageSource + ?Sized,
    {
        let started = Instant::now();
        let memory_before = self.sampler.resident_bytes();

        let pages: Vec<String> = range
            .iter()
            .filter_map(|index| read_page(doc, index, options.preprocess_text))
            .collect();

        if range.len() > YIELD_AFTER_PAGES {
            tokio::task::yield_now().await;
        }

        let pages_with_text = pages.len() as u32;
        let extracted_text = join_segments(&pages);
        let memory_after = self.sampler.resident_bytes();

        BatchResult {
            batch_index,
            page_range: range,
            extracted_text,
            processing_time: started.elapsed(),
            memory_delta: memory_after.saturating_sub(memory_before),
            pages_with_text,
        }
    }
}

/// Read and prepare one page, logging and skipping read failures.
pub(crate) fn read_page<D>(doc: &D, index: u32, preprocess: bool) -> Option<String>
where
    D: PageSource + ?Sized,
{
    match doc.page_text(index) {
        Ok(Some(raw)) => prepare_page_text(raw, preprocess),
        Ok(None) => None,
        Err(e) => {
            log::warn!("Skipping page {}: {}", index, e);
            None
        }
    }
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor").finish_non_exhaustive()
    }
}
