//! Batch configuration and its pressure-aware calculation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::PageRange;
use crate::memory::PressureMonitor;

const MB: u64 = 1024 * 1024;

/// Hard upper bound on pages per batch after validation.
pub const MAX_BATCH_SIZE: u32 = 20;

/// Hard upper bound on concurrent batches after validation.
pub const MAX_CONCURRENT_BATCHES: u32 = 4;

/// Documents above this many pages get the smallest tier cap.
const LARGE_DOCUMENT_PAGES: u32 = 100;
/// Documents above this many pages get the medium tier cap.
const MEDIUM_DOCUMENT_PAGES: u32 = 20;
const LARGE_DOCUMENT_BATCH_CAP: u32 = 5;
const MEDIUM_DOCUMENT_BATCH_CAP: u32 = 8;

/// How a document is cut into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfiguration {
    /// Pages per batch
    pub max_batch_size: u32,
    /// Batches that may run at once
    pub max_concurrent_batches: u32,
    /// Memory budget for one extraction, in bytes
    pub memory_threshold_bytes: u64,
}

impl BatchConfiguration {
    /// Small batches, no concurrency.
    pub fn conservative() -> Self {
        Self {
            max_batch_size: 3,
            max_concurrent_batches: 1,
            memory_threshold_bytes: 100 * MB,
        }
    }

    /// Middle ground for medium documents.
    pub fn balanced() -> Self {
        Self {
            max_batch_size: 5,
            max_concurrent_batches: 2,
            memory_threshold_bytes: 200 * MB,
        }
    }

    /// Large batches for small documents.
    pub fn performance() -> Self {
        Self {
            max_batch_size: 10,
            max_concurrent_batches: 4,
            memory_threshold_bytes: 300 * MB,
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, pages: u32) -> Self {
        self.max_batch_size = pages;
        self
    }

    /// Number of batches needed for `page_count` pages.
    pub fn batch_count(&self, page_count: u32) -> u32 {
        page_count.div_ceil(self.max_batch_size.max(1))
    }
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        Self::performance()
    }
}

/// Turns pressure readings and document size into batch configurations.
#[derive(Debug, Clone)]
pub struct BatchConfigCalculator {
    monitor: Arc<PressureMonitor>,
}

impl BatchConfigCalculator {
    /// Create a calculator reading from `monitor`.
    pub fn new(monitor: Arc<PressureMonitor>) -> Self {
        Self { monitor }
    }

    /// Configuration for a document of `page_count` pages under current pressure.
    ///
    /// The batch size is the monitor's recommendation, capped by the
    /// document-size tier and by `base.max_batch_size`. Concurrency is the
    /// monitor's recommendation. The memory threshold comes from `base`.
    pub fn calculate(&self, page_count: u32, base: &BatchConfiguration) -> BatchConfiguration {
        let mut batch_size = self.monitor.recommended_batch_size();
        if let Some(cap) = tier_cap(page_count) {
            batch_size = batch_size.min(cap);
        }
        batch_size = batch_size.min(base.max_batch_size.max(1));

        self.validate(BatchConfiguration {
            max_batch_size: batch_size,
            max_concurrent_batches: self.monitor.recommended_concurrency(),
            memory_threshold_bytes: base.memory_threshold_bytes,
        })
    }

    /// Pre-flight configuration chosen from the page count alone.
    pub fn recommended_for_page_count(page_count: u32) -> BatchConfiguration {
        if page_count > LARGE_DOCUMENT_PAGES {
            BatchConfiguration::conservative()
        } else if page_count > MEDIUM_DOCUMENT_PAGES {
            BatchConfiguration::balanced()
        } else {
            BatchConfiguration::performance()
        }
    }

    /// Clamp a configuration into its safe envelope.
    ///
    /// The memory threshold is limited to half of the memory currently
    /// available, whatever the caller asked for.
    pub fn validate(&self, config: BatchConfiguration) -> BatchConfiguration {
        let available = self.monitor.snapshot().available_bytes();
        clamp_configuration(config, available)
    }
}

fn tier_cap(page_count: u32) -> Option<u32> {
    if page_count > LARGE_DOCUMENT_PAGES {
        Some(LARGE_DOCUMENT_BATCH_CAP)
    } else if page_count > MEDIUM_DOCUMENT_PAGES {
        Some(MEDIUM_DOCUMENT_BATCH_CAP)
    } else {
        None
    }
}

pub(crate) fn clamp_configuration(
    config: BatchConfiguration,
    available_bytes: u64,
) -> BatchConfiguration {
    let threshold_cap = (available_bytes / 2).max(1);
    BatchConfiguration {
        max_batch_size: config.max_batch_size.clamp(1, MAX_BATCH_SIZE),
        max_concurrent_batches: config.max_concurrent_batches.clamp(1, MAX_CONCURRENT_BATCHES),
        memory_threshold_bytes: config.memory_threshold_bytes.clamp(1, threshold_cap),
    }
}

/// Split `[0, page_count)` into contiguous ranges of at most `batch_size` pages.
pub fn partition(page_count: u32, batch_size: u32) -> Vec<PageRange> {
    partition_from(0, page_count, batch_size)
}

/// Split `[start, page_count)` into contiguous ranges of at most `batch_size` pages.
pub(crate) fn partition_from(start: u32, page_count: u32, batch_size: u32) -> Vec<PageRange> {
    let size = batch_size.max(1);
    let mut ranges = Vec::with_capacity((page_count.saturating_sub(start)).div_ceil(size) as usize);
    let mut cursor = start;
    while cursor < page_count {
        let end = cursor.saturating_add(size).min(page_count);
        // cursor < end <= page_count holds by construction
        if let Ok(range) = PageRange::new(cursor, end, page_count) {
            ranges.push(range);
        }
        cursor = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{EventBus, ManualSampler, PressureConfig};

    fn calculator(resident: u64, total: u64) -> (Arc<ManualSampler>, BatchConfigCalculator) {
        let sampler = Arc::new(ManualSampler::new(resident, total));
        let monitor = Arc::new(PressureMonitor::new(
            sampler.clone(),
            Arc::new(EventBus::new()),
            PressureConfig::default(),
        ));
        (sampler, BatchConfigCalculator::new(monitor))
    }

    #[test]
    fn test_tier_caps() {
        let (_s, calc) = calculator(10 * MB, 16 * 1024 * MB);
        let base = BatchConfiguration::default();
        assert_eq!(calc.calculate(150, &base).max_batch_size, 5);
        assert_eq!(calc.calculate(50, &base).max_batch_size, 8);
        assert_eq!(calc.calculate(10, &base).max_batch_size, 10);
        assert_eq!(calc.calculate(10, &base).max_concurrent_batches, 4);
    }

    #[test]
    fn test_pressure_shrinks_batches() {
        let (_s, calc) = calculator(350 * MB, 16 * 1024 * MB);
        let config = calc.calculate(10, &BatchConfiguration::default());
        assert_eq!(config.max_batch_size, 3);
        assert_eq!(config.max_concurrent_batches, 1);
    }

    #[test]
    fn test_base_batch_size_caps() {
        let (_s, calc) = calculator(10 * MB, 16 * 1024 * MB);
        let base = BatchConfiguration::default().with_batch_size(2);
        assert_eq!(calc.calculate(10, &base).max_batch_size, 2);
    }

    #[test]
    fn test_recommended_tiers() {
        assert_eq!(
            BatchConfigCalculator::recommended_for_page_count(101),
            BatchConfiguration::conservative()
        );
        assert_eq!(
            BatchConfigCalculator::recommended_for_page_count(21),
            BatchConfiguration::balanced()
        );
        assert_eq!(
            BatchConfigCalculator::recommended_for_page_count(20),
            BatchConfiguration::performance()
        );
    }

    #[test]
    fn test_validate_clamps_everything() {
        let (_s, calc) = calculator(0, 1000 * MB);
        let config = calc.validate(BatchConfiguration {
            max_batch_size: 500,
            max_concurrent_batches: 0,
            memory_threshold_bytes: u64::MAX,
        });
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.max_concurrent_batches, 1);
        assert_eq!(config.memory_threshold_bytes, 500 * MB);

        let config = calc.validate(BatchConfiguration {
            max_batch_size: 0,
            max_concurrent_batches: 99,
            memory_threshold_bytes: 0,
        });
        assert_eq!(config.max_batch_size, 1);
        assert_eq!(config.max_concurrent_batches, 4);
        assert_eq!(config.memory_threshold_bytes, 1);
    }

    #[test]
    fn test_validation_safety_for_many_inputs() {
        for available in [0u64, 1, 3, 1024, 7 * MB, 64 * 1024 * MB] {
            for batch in [0u32, 1, 19, 20, 21, u32::MAX] {
                for concurrency in [0u32, 1, 4, 5, u32::MAX] {
                    for threshold in [0u64, 1, MB, u64::MAX] {
                        let c = clamp_configuration(
                            BatchConfiguration {
                                max_batch_size: batch,
                                max_concurrent_batches: concurrency,
                                memory_threshold_bytes: threshold,
                            },
                            available,
                        );
                        assert!((1..=20).contains(&c.max_batch_size));
                        assert!((1..=4).contains(&c.max_concurrent_batches));
                        assert!(c.memory_threshold_bytes >= 1);
                        if available >= 2 {
                            assert!(c.memory_threshold_bytes <= available / 2);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_partition_covers_all_pages() {
        let ranges = partition(23, 5);
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[0].start(), 0);
        assert_eq!(ranges[4].start(), 20);
        assert_eq!(ranges[4].len(), 3);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
        assert!(partition(0, 5).is_empty());
        assert_eq!(partition(4, 0).len(), 4);
    }
}
