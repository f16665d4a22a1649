//! Batched streaming extraction.
//!
//! A document is cut into contiguous page ranges sized from the current
//! memory pressure, and the ranges are processed one after another by the
//! [`BatchCoordinator`].

mod config;
mod coordinator;
mod processor;
mod progress;

pub use config::{
    partition, BatchConfigCalculator, BatchConfiguration, MAX_BATCH_SIZE, MAX_CONCURRENT_BATCHES,
};
pub use coordinator::{BatchCoordinator, CoordinatorConfig, PressureWaitFallback};
pub use processor::{BatchProcessor, BatchResult};
pub(crate) use processor::read_page;
pub use progress::{
    ProcessingProgress, ProgressCallback, ProgressSession, ProgressStats, ProgressTracker,
};
