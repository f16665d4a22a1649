//! Memory pressure classification and monitoring.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

use super::events::{EventBus, MemoryEvent, TaskHandle};
use super::sampler::MemorySampler;

const MB: u64 = 1024 * 1024;

/// Number of samples in each of the two windows compared by [`PressureMonitor::trend`].
const TREND_WINDOW: usize = 5;

/// Relative change between trend windows that counts as a trend.
const TREND_THRESHOLD: f64 = 0.05;

/// Ordered classification of memory pressure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// Plenty of headroom
    #[default]
    Normal,
    /// Slightly elevated usage
    Low,
    /// Noticeable usage, throttle batch sizes
    Medium,
    /// Heavy usage, minimal batches and caching
    High,
    /// Work must wait for memory to be reclaimed
    Critical,
}

impl PressureLevel {
    /// All levels from least to most severe.
    pub const ALL: [PressureLevel; 5] = [
        PressureLevel::Normal,
        PressureLevel::Low,
        PressureLevel::Medium,
        PressureLevel::High,
        PressureLevel::Critical,
    ];

    /// Pages per batch recommended at this level.
    pub fn recommended_batch_size(self) -> u32 {
        match self {
            PressureLevel::Normal => 10,
            PressureLevel::Low => 8,
            PressureLevel::Medium => 5,
            PressureLevel::High => 3,
            PressureLevel::Critical => 1,
        }
    }

    /// Concurrent operations recommended at this level.
    pub fn recommended_concurrency(self) -> u32 {
        match self {
            PressureLevel::Normal => 4,
            PressureLevel::Low => 3,
            PressureLevel::Medium => 2,
            PressureLevel::High | PressureLevel::Critical => 1,
        }
    }

    /// Lowercase name of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Low => "low",
            PressureLevel::Medium => "medium",
            PressureLevel::High => "high",
            PressureLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resident-memory boundaries between pressure levels, in bytes.
///
/// A reading at or above a boundary belongs to that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureThresholds {
    /// Lower bound of [`PressureLevel::Low`]
    pub low: u64,
    /// Lower bound of [`PressureLevel::Medium`]
    pub medium: u64,
    /// Lower bound of [`PressureLevel::High`]
    pub high: u64,
    /// Lower bound of [`PressureLevel::Critical`]
    pub critical: u64,
}

impl PressureThresholds {
    /// Create thresholds, checking that they strictly increase.
    pub fn new(low: u64, medium: u64, high: u64, critical: u64) -> Result<Self> {
        let thresholds = Self {
            low,
            medium,
            high,
            critical,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Thresholds expressed in megabytes.
    pub fn from_megabytes(low: u64, medium: u64, high: u64, critical: u64) -> Result<Self> {
        Self::new(low * MB, medium * MB, high * MB, critical * MB)
    }

    /// Check that the boundaries strictly increase.
    pub fn validate(&self) -> Result<()> {
        if self.low < self.medium && self.medium < self.high && self.high < self.critical {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "pressure thresholds must increase: {} < {} < {} < {}",
                self.low, self.medium, self.high, self.critical
            )))
        }
    }

    /// Classify a resident-memory reading.
    pub fn classify(&self, resident_bytes: u64) -> PressureLevel {
        if resident_bytes >= self.critical {
            PressureLevel::Critical
        } else if resident_bytes >= self.high {
            PressureLevel::High
        } else if resident_bytes >= self.medium {
            PressureLevel::Medium
        } else if resident_bytes >= self.low {
            PressureLevel::Low
        } else {
            PressureLevel::Normal
        }
    }
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            low: 100 * MB,
            medium: 200 * MB,
            high: 300 * MB,
            critical: 400 * MB,
        }
    }
}

/// Pressure monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    /// Level boundaries
    pub thresholds: PressureThresholds,
    /// Sampling period of the background loop, in milliseconds
    pub sample_interval_ms: u64,
    /// Number of samples kept for trend analysis
    pub history_len: usize,
}

impl PressureConfig {
    /// Sampling period of the background loop.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    /// Set the level boundaries.
    pub fn with_thresholds(mut self, thresholds: PressureThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the sampling period.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_ms = interval.as_millis() as u64;
        self
    }
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            thresholds: PressureThresholds::default(),
            sample_interval_ms: 1000,
            history_len: 60,
        }
    }
}

/// Direction of recent memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    /// Usage grew by at least 5%
    Increasing,
    /// Usage shrank by at least 5%
    Decreasing,
    /// Neither, or not enough samples yet
    Stable,
}

/// Immutable view of the most recent pressure reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureSnapshot {
    /// Classified level
    pub level: PressureLevel,
    /// Resident memory of this process
    pub resident_bytes: u64,
    /// Total physical memory
    pub total_bytes: u64,
    /// `resident / total`
    pub usage_fraction: f64,
    /// `1 - usage_fraction`, clamped to `[0, 1]`
    pub available_fraction: f64,
    /// When the reading was taken
    pub sampled_at: DateTime<Utc>,
}

impl PressureSnapshot {
    fn from_reading(level: PressureLevel, resident_bytes: u64, total_bytes: u64) -> Self {
        let usage_fraction = if total_bytes == 0 {
            1.0
        } else {
            resident_bytes as f64 / total_bytes as f64
        };

        Self {
            level,
            resident_bytes,
            total_bytes,
            usage_fraction,
            available_fraction: (1.0 - usage_fraction).clamp(0.0, 1.0),
            sampled_at: Utc::now(),
        }
    }

    /// Physical memory not used by this process.
    pub fn available_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.resident_bytes)
    }
}

/// Periodically samples memory usage and classifies pressure.
///
/// Readers always see a complete [`PressureSnapshot`]; level and figures are
/// published together. Level changes are broadcast on the [`EventBus`].
pub struct PressureMonitor {
    sampler: Arc<dyn MemorySampler>,
    bus: Arc<EventBus>,
    config: PressureConfig,
    snapshot: watch::Sender<PressureSnapshot>,
    history: Mutex<VecDeque<u64>>,
}

impl PressureMonitor {
    /// Create a monitor and take an initial sample.
    pub fn new(sampler: Arc<dyn MemorySampler>, bus: Arc<EventBus>, config: PressureConfig) -> Self {
        let resident = sampler.resident_bytes();
        let total = sampler.total_bytes();
        let level = config.thresholds.classify(resident);
        let (snapshot, _) = watch::channel(PressureSnapshot::from_reading(level, resident, total));

        let history_len = config.history_len.max(2 * TREND_WINDOW);
        let mut history = VecDeque::with_capacity(history_len);
        history.push_back(resident);

        Self {
            sampler,
            bus,
            config,
            snapshot,
            history: Mutex::new(history),
        }
    }

    /// Take a sample now, publish it and return it.
    pub fn sample_now(&self) -> PressureSnapshot {
        let resident = self.sampler.resident_bytes();
        let total = self.sampler.total_bytes();
        let level = self.config.thresholds.classify(resident);

        {
            let mut history = self.history.lock();
            if history.len() == self.history_capacity() {
                history.pop_front();
            }
            history.push_back(resident);
        }

        let next = PressureSnapshot::from_reading(level, resident, total);
        self.publish(next);
        next
    }

    /// Jump straight to [`PressureLevel::Critical`] without waiting for a sample.
    pub fn escalate_to_critical(&self) {
        let current = self.snapshot();
        if current.level == PressureLevel::Critical {
            return;
        }
        self.publish(PressureSnapshot {
            level: PressureLevel::Critical,
            sampled_at: Utc::now(),
            ..current
        });
    }

    fn publish(&self, next: PressureSnapshot) {
        let previous = self.snapshot.send_replace(next);
        if previous.level != next.level {
            if next.level > previous.level {
                log::info!(
                    "Memory pressure raised: {} -> {} ({} MB resident)",
                    previous.level,
                    next.level,
                    next.resident_bytes / MB
                );
            } else {
                log::debug!("Memory pressure eased: {} -> {}", previous.level, next.level);
            }
            self.bus.publish(MemoryEvent::PressureChanged {
                previous: previous.level,
                current: next.level,
            });
        }
    }

    fn history_capacity(&self) -> usize {
        self.config.history_len.max(2 * TREND_WINDOW)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> PressureSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<PressureSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current pressure level.
    pub fn level(&self) -> PressureLevel {
        self.snapshot.borrow().level
    }

    /// Fraction of physical memory not used by this process, in `[0, 1]`.
    pub fn available_fraction(&self) -> f64 {
        self.snapshot.borrow().available_fraction
    }

    /// Batch size recommended for the current level.
    pub fn recommended_batch_size(&self) -> u32 {
        self.level().recommended_batch_size()
    }

    /// Concurrency recommended for the current level.
    pub fn recommended_concurrency(&self) -> u32 {
        self.level().recommended_concurrency()
    }

    /// True only at [`PressureLevel::Critical`].
    pub fn requires_immediate_action(&self) -> bool {
        self.level() == PressureLevel::Critical
    }

    /// Compare the mean of the latest five samples with the five before.
    pub fn trend(&self) -> MemoryTrend {
        let history = self.history.lock();
        if history.len() < 2 * TREND_WINDOW {
            return MemoryTrend::Stable;
        }

        let recent = window_mean(history.iter().rev().take(TREND_WINDOW));
        let previous = window_mean(history.iter().rev().skip(TREND_WINDOW).take(TREND_WINDOW));

        if previous == 0.0 {
            return if recent > 0.0 {
                MemoryTrend::Increasing
            } else {
                MemoryTrend::Stable
            };
        }

        let change = (recent - previous) / previous;
        if change >= TREND_THRESHOLD {
            MemoryTrend::Increasing
        } else if change <= -TREND_THRESHOLD {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }

    /// Resident-memory samples, oldest first.
    pub fn history(&self) -> Vec<u64> {
        self.history.lock().iter().copied().collect()
    }

    /// Configured level boundaries.
    pub fn thresholds(&self) -> &PressureThresholds {
        &self.config.thresholds
    }

    /// Bus this monitor publishes on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Start the sampling loop on the current tokio runtime.
    ///
    /// The loop samples every `sample_interval` and escalates to critical as
    /// soon as a low-memory warning arrives on the bus.
    pub fn start(self: &Arc<Self>) -> TaskHandle {
        let monitor = Arc::clone(self);
        let mut events = self.bus.subscribe();
        let interval = self.config.sample_interval();

        TaskHandle::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.sample_now();
                    }
                    event = events.recv() => match event {
                        Some(MemoryEvent::LowMemoryWarning) => monitor.escalate_to_critical(),
                        Some(MemoryEvent::PressureChanged { .. }) => {}
                        None => break,
                    },
                }
            }
        }))
    }
}

fn window_mean<'a>(samples: impl Iterator<Item = &'a u64>) -> f64 {
    samples.map(|&s| s as f64).sum::<f64>() / TREND_WINDOW as f64
}

impl std::fmt::Debug for PressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureMonitor")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
