//! Streaming extraction driven batch by batch under memory pressure.
//!
//! Each call to [`BatchCoordinator::extract`] runs its own session:
//!
//! 1. look up the result cache by fingerprint;
//! 2. sample pressure and size batches from the level and page count;
//! 3. before each batch, wait while pressure is critical;
//! 4. re-plan the remaining pages when the level has shifted;
//! 5. process the batch, report progress, let memory settle;
//! 6. join the batch texts in order and cache the result.
//!
//! Batches of a session run strictly one after another. Concurrent sessions
//! share the progress broadcast but keep their own counters.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cache::{AdaptiveCache, Fingerprint};
use crate::document::{PageRange, PageSource};
use crate::error::{Error, Result};
use crate::memory::{PressureLevel, PressureMonitor};
use crate::options::ExtractionOptions;
use crate::text::join_segments;

use super::config::{partition, partition_from, BatchConfigCalculator, BatchConfiguration};
use super::processor::{BatchProcessor, BatchResult};
use super::progress::{ProgressCallback, ProgressStats, ProgressTracker};

/// What to do when critical pressure outlasts the wait bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureWaitFallback {
    /// Log and run the batch anyway
    #[default]
    Proceed,
    /// Abort the extraction with [`Error::PressureTimeout`]
    Fail,
}

/// Coordinator timing and fallback settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Re-sampling period while waiting out critical pressure
    pub pressure_poll_interval_ms: u64,
    /// Longest wait before a batch; `None` waits indefinitely
    pub max_pressure_wait_ms: Option<u64>,
    /// Pause between consecutive batches
    pub settle_delay_ms: u64,
    /// Behavior once the wait bound is reached
    pub fallback: PressureWaitFallback,
}

impl CoordinatorConfig {
    pub fn pressure_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pressure_poll_interval_ms.max(1))
    }

    pub fn max_pressure_wait(&self) -> Option<Duration> {
        self.max_pressure_wait_ms.map(Duration::from_millis)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Bound the pressure wait, or remove the bound with `None`.
    pub fn with_max_pressure_wait(mut self, wait: Option<Duration>) -> Self {
        self.max_pressure_wait_ms = wait.map(|w| w.as_millis() as u64);
        self
    }

    /// Set the pause between batches.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the behavior once the wait bound is reached.
    pub fn with_fallback(mut self, fallback: PressureWaitFallback) -> Self {
        self.fallback = fallback;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pressure_poll_interval_ms: 500,
            max_pressure_wait_ms: Some(30_000),
            settle_delay_ms: 50,
            fallback: PressureWaitFallback::Proceed,
        }
    }
}

/// Runs streaming extraction sessions.
#[derive(Debug)]
pub struct BatchCoordinator {
    monitor: Arc<PressureMonitor>,
    calculator: BatchConfigCalculator,
    processor: BatchProcessor,
    tracker: Arc<ProgressTracker>,
    cache: Arc<AdaptiveCache>,
    config: CoordinatorConfig,
}

impl BatchCoordinator {
    pub fn new(
        monitor: Arc<PressureMonitor>,
        processor: BatchProcessor,
        tracker: Arc<ProgressTracker>,
        cache: Arc<AdaptiveCache>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            calculator: BatchConfigCalculator::new(Arc::clone(&monitor)),
            monitor,
            processor,
            tracker,
            cache,
            config,
        }
    }

    /// Extract the whole document, serving and filling the cache.
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

        let text = self.extract_uncached(doc, options, on_progress).await?;
        if let Err(e) = self.cache.store(fingerprint, text.clone()) {
            log::debug!("Result for {} not cached: {}", doc.identity(), e);
        }
        Ok(text)
    }

    /// Extract the whole document in batches, bypassing the cache.
    pub async fn extract_uncached<D>(
        &self,
        doc: &D,
        options: &ExtractionOptions,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<String>
    where
        D: PageSource + ?Sized,
    {
        let page_count = doc.page_count();
        let base = BatchConfiguration::default().with_batch_size(options.max_batch_size);

        let mut level = self.monitor.sample_now().level;
        let mut config = self.calculator.calculate(page_count, &base);
        let mut plan: VecDeque<PageRange> = partition(page_count, config.max_batch_size).into();

        log::debug!(
            "Extracting {} ({} pages) in {} batches of {} at {} pressure",
            doc.identity(),
            page_count,
            plan.len(),
            config.max_batch_size,
            level
        );
        let mut session = self.tracker.begin(page_count, plan.len() as u32);

        let mut results: Vec<BatchResult> = Vec::with_capacity(plan.len());
        while let Some(mut range) = plan.pop_front() {
            self.wait_for_pressure().await?;

            let current = self.monitor.level();
            if current != level {
                level = current;
                config = self.calculator.calculate(page_count, &base);
                plan = partition_from(range.start(), page_count, config.max_batch_size).into();
                let Some(next) = plan.pop_front() else {
                    break;
                };
                range = next;

                let total = results.len() + 1 + plan.len();
                session.set_total_batches(total as u32);
                log::debug!(
                    "Pressure now {}, re-planned from page {} with batches of {}",
                    level,
                    range.start(),
                    config.max_batch_size
                );
            }

            let batch_index = results.len() as u32;
            let result = self.processor.process(doc, batch_index, range, options).await;
            log::debug!(
                "Batch {} {} done in {:?}",
                batch_index,
                result.page_range,
                result.processing_time
            );
            if result.memory_delta > config.memory_threshold_bytes {
                log::warn!(
                    "Batch {} grew memory by {} bytes, over the {} byte budget",
                    batch_index,
                    result.memory_delta,
                    config.memory_threshold_bytes
                );
            }

            session.record(&result, on_progress);
            results.push(result);

            if !plan.is_empty() {
                let delay = self.config.settle_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(combine(results))
    }

    /// Wait while pressure is critical, within the configured bound.
    async fn wait_for_pressure(&self) -> Result<()> {
        if !self.monitor.requires_immediate_action() {
            return Ok(());
        }

        log::warn!("Critical memory pressure, pausing extraction");
        let started = Instant::now();
        let poll = self.config.pressure_poll_interval();

        loop {
            tokio::time::sleep(poll).await;
            let snapshot = self.monitor.sample_now();
            let waited = started.elapsed();

            if snapshot.level != PressureLevel::Critical {
                log::info!("Memory pressure eased to {}, resuming after {:?}", snapshot.level, waited);
                return Ok(());
            }

            if let Some(max_wait) = self.config.max_pressure_wait() {
                if waited >= max_wait {
                    return match self.config.fallback {
                        PressureWaitFallback::Proceed => {
                            log::warn!("Memory pressure still critical after {:?}, proceeding", waited);
                            Ok(())
                        }
                        PressureWaitFallback::Fail => Err(Error::PressureTimeout(waited)),
                    };
                }
            }
        }
    }

    /// Timing statistics of the most recently finished session.
    pub fn last_run(&self) -> ProgressStats {
        self.tracker.stats()
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

/// Join batch texts in batch order, skipping empty batches.
fn combine(mut results: Vec<BatchResult>) -> String {
    results.sort_by_key(|r| r.batch_index);
    join_segments(results.iter().map(|r| r.extracted_text.as_str()))
}
