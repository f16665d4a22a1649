//! # streampdf
//!
//! Memory-aware streaming text extraction for PDF documents.
//!
//! Large documents are split into page batches whose size follows the
//! process's current memory pressure. Extraction pauses while pressure is
//! critical, re-plans when the pressure level shifts, and reports progress
//! after every batch. Small documents are read directly. Results are kept in
//! a bounded LRU cache that sheds entries when memory gets tight.
//!
//! ## Quick Start
//!
//! ```no_run
//! # async fn run() -> streampdf::Result<()> {
//! let text = streampdf::extract_text("document.pdf").await?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Long-running use
//!
//! ```no_run
//! use streampdf::{ExtractionOptions, PdfDocument, Pipeline};
//!
//! # async fn run() -> streampdf::Result<()> {
//! let pipeline = Pipeline::builder().build()?;
//! let _guard = pipeline.start();
//!
//! let doc = PdfDocument::open("large.pdf")?;
//! let text = pipeline
//!     .extract_with_progress(&doc, &ExtractionOptions::default(), &|p| {
//!         println!("{}/{} pages", p.completed_pages, p.total_pages);
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Pressure-sized batches**: batch size and concurrency follow the
//!   classified pressure level
//! - **Backpressure**: bounded waits while pressure is critical
//! - **Progress**: per-batch callback and a broadcast stream
//! - **Adaptive cache**: byte and item bounded LRU with pressure eviction
//! - **Strategy selection**: streaming for large documents, direct
//!   sequential or parallel reads for small ones

pub mod batch;
pub mod cache;
pub mod config;
pub mod detect;
pub mod document;
pub mod error;
pub mod memory;
pub mod options;
pub mod strategy;
pub mod text;

// Re-export commonly used types
pub use batch::{
    BatchConfigCalculator, BatchConfiguration, BatchCoordinator, BatchProcessor, BatchResult,
    CoordinatorConfig, PressureWaitFallback, ProcessingProgress, ProgressCallback, ProgressSession,
    ProgressStats, ProgressTracker,
};
pub use cache::{AdaptiveCache, CacheConfig, CacheStats, Fingerprint};
pub use config::PipelineConfig;
pub use detect::{detect_header, detect_header_from_path, is_pdf_bytes, PdfHeader};
pub use document::{InMemoryDocument, PageRange, PageSource, PdfDocument};
pub use error::{Error, Result};
pub use memory::{
    EventBus, ManualSampler, MemoryEvent, MemorySampler, MemoryTrend, PressureConfig,
    PressureLevel, PressureMonitor, PressureSnapshot, PressureThresholds, Subscription,
    SystemSampler, TaskHandle,
};
pub use options::ExtractionOptions;
pub use strategy::{ExtractionPlan, ExtractionStrategy, StrategyConfig, StrategySelector};
pub use text::{normalize_page_text, PAGE_SEPARATOR};

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

/// Extract the text of a PDF file with default options.
///
/// # Example
///
/// ```no_run
/// # async fn run() -> streampdf::Result<()> {
/// let text = streampdf::extract_text("document.pdf").await?;
/// # Ok(())
/// # }
/// ```
pub async fn extract_text<P: AsRef<Path>>(path: P) -> Result<String> {
    extract_text_with_options(path, &ExtractionOptions::default()).await
}

/// Extract the text of a PDF file with custom options.
///
/// # Example
///
/// ```no_run
/// use streampdf::{extract_text_with_options, ExtractionOptions};
///
/// # async fn run() -> streampdf::Result<()> {
/// let options = ExtractionOptions::new().raw().with_parallel(true);
/// let text = extract_text_with_options("document.pdf", &options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn extract_text_with_options<P: AsRef<Path>>(
    path: P,
    options: &ExtractionOptions,
) -> Result<String> {
    let pipeline = Pipeline::builder().build()?;
    let _guard = pipeline.start();
    pipeline.extract_file(path, options).await
}

/// The assembled extraction pipeline.
///
/// Owns the event bus, sampler, pressure monitor, result cache, progress
/// tracker, batch coordinator and strategy selector. Background loops only
/// run between [`Pipeline::start`] and dropping the returned guard.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    bus: Arc<EventBus>,
    monitor: Arc<PressureMonitor>,
    cache: Arc<AdaptiveCache>,
    tracker: Arc<ProgressTracker>,
    coordinator: Arc<BatchCoordinator>,
    selector: StrategySelector,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Launch the pressure sampling loop and the cache pressure listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> PipelineGuard {
        PipelineGuard {
            monitor: self.monitor.start(),
            cache: self.cache.attach(&self.bus),
        }
    }

    /// Extract all text from `doc`.
    ///
    /// Repeat extractions are answered from the result cache. Direct parallel
    /// reads run on a shared rayon pool and block the calling task for one
    /// chunk of pages at a time, yielding between chunks; on a current-thread
    /// runtime the sampling loop and cache listener only run at those points.
    pub async fn extract<D>(&self, doc: &D, options: &ExtractionOptions) -> Result<String>
    where
        D: PageSource + ?Sized,
    {
        self.selector.extract(doc, options, None).await
    }

    /// Extract all text from `doc`, calling `on_progress` after every batch.
    pub async fn extract_with_progress<D>(
        &self,
        doc: &D,
        options: &ExtractionOptions,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<String>
    where
        D: PageSource + ?Sized,
    {
        self.selector.extract(doc, options, Some(on_progress)).await
    }

    /// Open the PDF at `path` and extract its text.
    pub async fn extract_file<P: AsRef<Path>>(
        &self,
        path: P,
        options: &ExtractionOptions,
    ) -> Result<String> {
        let doc = PdfDocument::open(path)?;
        self.extract(&doc, options).await
    }

    /// Decide how `doc` would be extracted without extracting it.
    pub fn plan<D>(&self, doc: &D, options: &ExtractionOptions) -> ExtractionPlan
    where
        D: PageSource + ?Sized,
    {
        self.selector.plan(doc, options)
    }

    /// Subscribe to batch progress of streaming extractions.
    ///
    /// Overlapping extractions share the stream; `session` tells them apart.
    pub fn progress(&self) -> broadcast::Receiver<ProcessingProgress> {
        self.tracker.subscribe()
    }

    /// Latest pressure reading.
    pub fn snapshot(&self) -> PressureSnapshot {
        self.monitor.snapshot()
    }

    /// Timing statistics of the most recently finished streaming session.
    pub fn last_run(&self) -> ProgressStats {
        self.coordinator.last_run()
    }

    pub fn cache(&self) -> &Arc<AdaptiveCache> {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn monitor(&self) -> &Arc<PressureMonitor> {
        &self.monitor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Builder for [`Pipeline`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use streampdf::{ManualSampler, Pipeline, PipelineConfig};
///
/// let pipeline = Pipeline::builder()
///     .with_config(PipelineConfig::default())
///     .with_sampler(Arc::new(ManualSampler::new(0, 8 << 30)))
///     .build()?;
/// # Ok::<(), streampdf::Error>(())
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    sampler: Option<Arc<dyn MemorySampler>>,
    bus: Option<Arc<EventBus>>,
}

impl PipelineBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            sampler: None,
            bus: None,
        }
    }

    /// Use `config` for every component.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Measure memory with `sampler` instead of the operating system.
    pub fn with_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Share an existing event bus.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validate the configuration and wire the components together.
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(SystemSampler::new()) as Arc<dyn MemorySampler>);
        let bus = self.bus.unwrap_or_default();

        let monitor = Arc::new(PressureMonitor::new(
            Arc::clone(&sampler),
            Arc::clone(&bus),
            self.config.pressure.clone(),
        ));
        let cache = Arc::new(AdaptiveCache::new(self.config.cache.clone()));
        let tracker = Arc::new(ProgressTracker::new());
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::clone(&monitor),
            BatchProcessor::new(sampler),
            Arc::clone(&tracker),
            Arc::clone(&cache),
            self.config.coordinator.clone(),
        ));
        let selector = StrategySelector::new(
            Arc::clone(&monitor),
            Arc::clone(&coordinator),
            Arc::clone(&cache),
            self.config.strategy.clone(),
        );

        Ok(Pipeline {
            config: self.config,
            bus,
            monitor,
            cache,
            tracker,
            coordinator,
            selector,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the pipeline's background loops alive; they stop when dropped.
#[derive(Debug)]
pub struct PipelineGuard {
    monitor: TaskHandle,
    cache: TaskHandle,
}

impl PipelineGuard {
    /// Stop both background loops now.
    pub fn stop(self) {
        self.monitor.stop();
        self.cache.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MB: u64 = 1024 * 1024;

    fn pipeline(resident: u64) -> (Arc<ManualSampler>, Pipeline) {
        let sampler = Arc::new(ManualSampler::new(resident, 16 * 1024 * MB));
        let pipeline = Pipeline::builder()
            .with_sampler(sampler.clone())
            .build()
            .unwrap();
        (sampler, pipeline)
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.pressure.thresholds.low = config.pressure.thresholds.critical;
        let result = Pipeline::builder().with_config(config).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_shares_bus() {
        let bus = Arc::new(EventBus::new());
        let pipeline = Pipeline::builder()
            .with_bus(Arc::clone(&bus))
            .with_sampler(Arc::new(ManualSampler::new(0, 1024)))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(pipeline.bus(), &bus));
    }

    #[test]
    fn test_snapshot_reflects_sampler() {
        let (_sampler, pipeline) = pipeline(250 * MB);
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.level, PressureLevel::Medium);
        assert_eq!(snapshot.resident_bytes, 250 * MB);
    }

    #[tokio::test]
    async fn test_extract_in_memory_document() {
        let (_sampler, pipeline) = pipeline(0);
        let doc = InMemoryDocument::from_pages("doc", ["first", "second"]);
        let text = pipeline
            .extract(&doc, &ExtractionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "first\n\nsecond");
        assert_eq!(pipeline.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_plan_small_document_is_direct() {
        let (_sampler, pipeline) = pipeline(0);
        let doc = InMemoryDocument::from_pages("doc", ["text"]);
        let plan = pipeline.plan(&doc, &ExtractionOptions::default());
        assert_eq!(plan.strategy, ExtractionStrategy::DirectSequential);
        assert_eq!(plan.fingerprint, Fingerprint::of(&doc, &ExtractionOptions::default()));
    }

    #[tokio::test]
    async fn test_start_and_stop_guard() {
        let (_sampler, pipeline) = pipeline(0);
        let guard = pipeline.start();
        assert!(pipeline.bus().subscriber_count() >= 2);
        guard.stop();
    }

    #[tokio::test]
    async fn test_extract_text_rejects_non_pdf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<!DOCTYPE html><html></html>").unwrap();

        let result = extract_text(file.path()).await;
        assert!(matches!(result, Err(Error::UnknownFormat)));
    }

    #[tokio::test]
    async fn test_extract_text_missing_file() {
        let result = extract_text("/nonexistent/path/document.pdf").await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
