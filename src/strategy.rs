//! Choice between streaming and direct extraction.
//!
//! Small documents are read directly, page by page or with a few parallel
//! workers. Documents whose estimated footprint exceeds the streaming
//! threshold go through the [`BatchCoordinator`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::batch::{read_page, BatchCoordinator, ProgressCallback};
use crate::cache::{AdaptiveCache, Fingerprint};
use crate::document::PageSource;
use crate::error::Result;
use crate::memory::{PressureLevel, PressureMonitor};
use crate::options::ExtractionOptions;
use crate::text::join_segments;

const MB: u64 = 1024 * 1024;

/// Strategy selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Leading pages read to estimate text size
    pub sample_pages: u32,
    /// Assumed in-memory bytes per extracted character
    pub bytes_per_char: u64,
    /// Fixed cost added to every estimate, in bytes
    pub processing_overhead_bytes: u64,
    /// Estimates above this many bytes are streamed
    pub streaming_threshold_bytes: u64,
    /// Estimates remembered before the oldest half is dropped
    pub estimate_cache_cap: usize,
    /// Upper bound on direct parallel workers
    pub max_parallel_workers: u32,
    /// Direct sequential reads yield after this many pages
    pub yield_every: u32,
}

impl StrategyConfig {
    /// Set the streaming threshold in bytes.
    pub fn with_streaming_threshold(mut self, bytes: u64) -> Self {
        self.streaming_threshold_bytes = bytes;
        self
    }

    /// Set the fixed processing overhead in bytes.
    pub fn with_processing_overhead(mut self, bytes: u64) -> Self {
        self.processing_overhead_bytes = bytes;
        self
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            sample_pages: 5,
            bytes_per_char: 2,
            processing_overhead_bytes: 50 * MB,
            streaming_threshold_bytes: 200 * MB,
            estimate_cache_cap: 50,
            max_parallel_workers: 4,
            yield_every: 8,
        }
    }
}

/// How a document will be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExtractionStrategy {
    /// Batched extraction under pressure control
    Streaming,
    /// Every page in order on the calling task
    DirectSequential,
    /// Pages read by a bounded worker pool
    DirectParallel { workers: u32 },
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionStrategy::Streaming => f.write_str("streaming"),
            ExtractionStrategy::DirectSequential => f.write_str("direct (sequential)"),
            ExtractionStrategy::DirectParallel { workers } => {
                write!(f, "direct (parallel, {} workers)", workers)
            }
        }
    }
}

/// The decision made for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPlan {
    pub fingerprint: Fingerprint,
    /// Estimated peak memory of a direct extraction, in bytes
    pub estimated_bytes: u64,
    pub strategy: ExtractionStrategy,
}

/// Memory estimates keyed by fingerprint.
///
/// When more than `cap` estimates are held, the oldest half is dropped.
#[derive(Debug)]
struct EstimateCache {
    entries: HashMap<Fingerprint, (u64, u64)>,
    next_seq: u64,
    cap: usize,
}

impl EstimateCache {
    fn new(cap: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            cap: cap.max(1),
        }
    }

    fn get(&self, key: &Fingerprint) -> Option<u64> {
        self.entries.get(key).map(|&(estimate, _)| estimate)
    }

    fn insert(&mut self, key: Fingerprint, estimate: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key, (estimate, seq));

        if self.entries.len() > self.cap {
            let mut by_age: Vec<(u64, Fingerprint)> =
                self.entries.iter().map(|(k, &(_, seq))| (seq, *k)).collect();
            by_age.sort_unstable();
            let drop = by_age.len() / 2;
            for (_, key) in by_age.into_iter().take(drop) {
                self.entries.remove(&key);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Routes each document to streaming or direct extraction.
#[derive(Debug)]
pub struct StrategySelector {
    monitor: Arc<PressureMonitor>,
    coordinator: Arc<BatchCoordinator>,
    cache: Arc<AdaptiveCache>,
    config: StrategyConfig,
    estimates: Mutex<EstimateCache>,
    read_pools: Mutex<HashMap<u32, Arc<ThreadPool>>>,
}

impl StrategySelector {
    pub fn new(
        monitor: Arc<PressureMonitor>,
        coordinator: Arc<BatchCoordinator>,
        cache: Arc<AdaptiveCache>,
        config: StrategyConfig,
    ) -> Self {
        let estimates = Mutex::new(EstimateCache::new(config.estimate_cache_cap));
        Self {
            monitor,
            coordinator,
            cache,
            config,
            estimates,
            read_pools: Mutex::new(HashMap::new()),
        }
    }

    /// Estimate the memory a direct extraction of `doc` would need.
    ///
    /// The leading pages are read to find the average text size of a page
    /// with text; that average is extrapolated to the whole document and the
    /// fixed overhead is added. Results are remembered per fingerprint.
    pub fn estimate_memory<D>(&self, doc: &D, fingerprint: Fingerprint) -> u64
    where
        D: PageSource + ?Sized,
    {
        if let Some(estimate) = self.estimates.lock().get(&fingerprint) {
            return estimate;
        }

        let page_count = doc.page_count();
        let sampled = self.config.sample_pages.min(page_count);
        let (chars, pages_with_text) = (0..sampled)
            .filter_map(|index| doc.page_text(index).ok().flatten())
            .filter(|text| !text.trim().is_empty())
            .fold((0u64, 0u64), |(chars, pages), text| {
                (chars + text.chars().count() as u64, pages + 1)
            });

        let per_page = if pages_with_text == 0 {
            0
        } else {
            chars * self.config.bytes_per_char / pages_with_text
        };
        let estimate = per_page
            .saturating_mul(page_count as u64)
            .saturating_add(self.config.processing_overhead_bytes);

        log::debug!(
            "Estimated {} MB for {} ({} of {} sampled pages had text)",
            estimate / MB,
            doc.identity(),
            pages_with_text,
            sampled
        );
        self.estimates.lock().insert(fingerprint, estimate);
        estimate
    }

    /// Pick a strategy for an estimated footprint under current pressure.
    pub fn choose(&self, estimated_bytes: u64, options: &ExtractionOptions) -> ExtractionStrategy {
        if estimated_bytes > self.config.streaming_threshold_bytes {
            return ExtractionStrategy::Streaming;
        }

        let level = self.monitor.level();
        if options.use_parallel_processing && level <= PressureLevel::Low {
            let workers = options
                .max_concurrent_operations
                .min(level.recommended_concurrency())
                .min(self.config.max_parallel_workers)
                .max(1);
            ExtractionStrategy::DirectParallel { workers }
        } else {
            ExtractionStrategy::DirectSequential
        }
    }

    /// Estimate `doc` and choose how to extract it.
    pub fn plan<D>(&self, doc: &D, options: &ExtractionOptions) -> ExtractionPlan
    where
        D: PageSource + ?Sized,
    {
        let fingerprint = Fingerprint::of(doc, options);
        let estimated_bytes = self.estimate_memory(doc, fingerprint);
        let strategy = self.choose(estimated_bytes, options);
        log::debug!("Extracting {} with {} strategy", doc.identity(), strategy);

        ExtractionPlan {
            fingerprint,
            estimated_bytes,
            strategy,
        }
    }

    /// Serve `doc` from the result cache, or plan and run its extraction.
    ///
    /// A cache hit returns before any page is read or pressure is consulted.
    /// `on_progress` is called per batch on the streaming path only.
    pub async fn extract<D>(
        &self,
        doc: &D,
        options: &ExtractionOptions,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<String>
    where
        D: PageSource + ?Sized,
    {
        let fingerprint = Fingerprint::of(doc, options);
        if let Some(text) = self.cache.get(&fingerprint) {
            log::debug!("Cache hit for {} ({})", doc.identity(), fingerprint);
            return Ok(text);
        }

        let estimated_bytes = self.estimate_memory(doc, fingerprint);
        let strategy = self.choose(estimated_bytes, options);
        log::debug!("Extracting {} with {} strategy", doc.identity(), strategy);

        let text = match strategy {
            ExtractionStrategy::Streaming => {
                self.coordinator
                    .extract_uncached(doc, options, on_progress)
                    .await?
            }
            ExtractionStrategy::DirectParallel { workers } => {
                self.extract_parallel(doc, options, workers).await
            }
            ExtractionStrategy::DirectSequential => self.extract_sequential(doc, options).await,
        };

        if let Err(e) = self.cache.store(fingerprint, text.clone()) {
            log::debug!("Result for {} not cached: {}", doc.identity(), e);
        }
        Ok(text)
    }

    async fn extract_sequential<D>(&self, doc: &D, options: &ExtractionOptions) -> String
    where
        D: PageSource + ?Sized,
    {
        let yield_every = self.config.yield_every.max(1);
        let mut pages = Vec::with_capacity(doc.page_count() as usize);

        for index in 0..doc.page_count() {
            if let Some(text) = read_page(doc, index, options.preprocess_text) {
                pages.push(text);
            }
            if (index + 1) % yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        join_segments(&pages)
    }

    /// Read all pages on a pool of `workers` threads, keeping order.
    ///
    /// Pages are read in chunks of `workers * yield_every`. The calling task
    /// blocks while a chunk is read and yields between chunks.
    async fn extract_parallel<D>(&self, doc: &D, options: &ExtractionOptions, workers: u32) -> String
    where
        D: PageSource + ?Sized,
    {
        let preprocess = options.preprocess_text;
        let page_count = doc.page_count();
        let chunk = workers.max(1).saturating_mul(self.config.yield_every.max(1));
        let pool = self.read_pool(workers);

        let mut pages = Vec::with_capacity(page_count as usize);
        let mut start = 0;
        while start < page_count {
            let end = start.saturating_add(chunk).min(page_count);
            let read_chunk = || -> Vec<Option<String>> {
                (start..end)
                    .into_par_iter()
                    .map(|index| read_page(doc, index, preprocess))
                    .collect()
            };
            let read = match &pool {
                Some(pool) => pool.install(read_chunk),
                None => (start..end)
                    .map(|index| read_page(doc, index, preprocess))
                    .collect(),
            };
            pages.extend(read.into_iter().flatten());

            start = end;
            if start < page_count {
                tokio::task::yield_now().await;
            }
        }

        join_segments(&pages)
    }

    /// Shared read pool with `workers` threads, built on first use.
    fn read_pool(&self, workers: u32) -> Option<Arc<ThreadPool>> {
        let mut pools = self.read_pools.lock();
        if let Some(pool) = pools.get(&workers) {
            return Some(Arc::clone(pool));
        }

        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1) as usize)
            .thread_name(|i| format!("streampdf-read-{}", i))
            .build()
        {
            Ok(pool) => {
                let pool = Arc::new(pool);
                pools.insert(workers, Arc::clone(&pool));
                Some(pool)
            }
            Err(e) => {
                log::warn!("Failed to create read pool: {}. Reading sequentially.", e);
                None
            }
        }
    }

    /// Number of remembered estimates.
    pub fn estimate_count(&self) -> usize {
        self.estimates.lock().len()
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }
}
