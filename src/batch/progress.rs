//! Progress reporting and time estimation for extraction sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::BatchResult;

/// Batch durations averaged for the remaining-time estimate.
const MOVING_AVERAGE_WINDOW: usize = 5;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Callback invoked after every completed batch.
///
/// The lifetime lets callbacks borrow caller-owned state.
pub type ProgressCallback<'a> = dyn Fn(&ProcessingProgress) + Send + Sync + 'a;

/// Progress of an extraction session after a completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingProgress {
    /// Session the update belongs to
    pub session: u64,
    /// Pages processed so far
    pub completed_pages: u32,
    /// Pages in the document
    pub total_pages: u32,
    /// One-based number of the batch just completed
    pub current_batch: u32,
    /// Batches planned for the session
    pub total_batches: u32,
    /// Estimated time until the session finishes
    pub estimated_time_remaining: Duration,
}

impl ProcessingProgress {
    /// Completed share of pages in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            1.0
        } else {
            self.completed_pages as f64 / self.total_pages as f64
        }
    }

    /// Whether every page has been processed.
    pub fn is_complete(&self) -> bool {
        self.completed_pages >= self.total_pages
    }
}

/// Aggregate timing statistics for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    /// Batches completed in the session
    pub completed_batches: u32,
    /// Mean batch duration
    pub average_batch_time: Duration,
    /// Shortest batch
    pub fastest_batch_time: Duration,
    /// Longest batch
    pub slowest_batch_time: Duration,
    /// Time since the session began
    pub total_elapsed: Duration,
}

/// Publishes [`ProcessingProgress`] for any number of concurrent sessions.
///
/// Each extraction opens its own [`ProgressSession`] with [`begin`](Self::begin);
/// updates from every session share one broadcast stream and carry the
/// session id so observers can tell them apart.
#[derive(Debug)]
pub struct ProgressTracker {
    sender: broadcast::Sender<ProcessingProgress>,
    next_session: AtomicU64,
    last_finished: Mutex<ProgressStats>,
}

impl ProgressTracker {
    /// Create an idle tracker.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            sender,
            next_session: AtomicU64::new(1),
            last_finished: Mutex::new(ProgressStats::default()),
        }
    }

    /// Open a session for one extraction.
    ///
    /// The session's statistics become [`stats`](Self::stats) when it is dropped.
    pub fn begin(&self, total_pages: u32, total_batches: u32) -> ProgressSession<'_> {
        ProgressSession {
            tracker: self,
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            total_pages,
            total_batches,
            completed_pages: 0,
            durations: Vec::with_capacity(total_batches as usize),
            started: Instant::now(),
        }
    }

    /// Subscribe to progress updates of every session.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingProgress> {
        self.sender.subscribe()
    }

    /// Timing statistics of the most recently finished session.
    pub fn stats(&self) -> ProgressStats {
        *self.last_finished.lock()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress state of a single extraction.
#[derive(Debug)]
pub struct ProgressSession<'a> {
    tracker: &'a ProgressTracker,
    id: u64,
    total_pages: u32,
    total_batches: u32,
    completed_pages: u32,
    durations: Vec<Duration>,
    started: Instant,
}

impl ProgressSession<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Change the planned batch count after a re-plan.
    pub fn set_total_batches(&mut self, total_batches: u32) {
        self.total_batches = total_batches.max(self.durations.len() as u32);
    }

    /// Record a completed batch and emit progress.
    pub fn record(
        &mut self,
        result: &BatchResult,
        callback: Option<&ProgressCallback<'_>>,
    ) -> ProcessingProgress {
        self.durations.push(result.processing_time);
        self.completed_pages = (self.completed_pages + result.page_range.len()).min(self.total_pages);

        let completed_batches = self.durations.len() as u32;
        self.total_batches = self.total_batches.max(completed_batches);

        let progress = ProcessingProgress {
            session: self.id,
            completed_pages: self.completed_pages,
            total_pages: self.total_pages,
            current_batch: completed_batches,
            total_batches: self.total_batches,
            estimated_time_remaining: self.estimated_time_remaining(),
        };

        if let Some(callback) = callback {
            callback(&progress);
        }
        // No subscribers is fine.
        let _ = self.tracker.sender.send(progress);

        progress
    }

    /// Remaining time from the average of the last five batches.
    pub fn estimated_time_remaining(&self) -> Duration {
        let completed = self.durations.len() as u32;
        let remaining = self.total_batches.saturating_sub(completed);
        if remaining == 0 || self.durations.is_empty() {
            return Duration::ZERO;
        }

        let window = &self.durations[self.durations.len().saturating_sub(MOVING_AVERAGE_WINDOW)..];
        let average = window.iter().sum::<Duration>() / window.len() as u32;
        average * remaining
    }

    /// Timing statistics so far.
    pub fn stats(&self) -> ProgressStats {
        let completed = self.durations.len() as u32;
        if completed == 0 {
            return ProgressStats {
                total_elapsed: self.started.elapsed(),
                ..ProgressStats::default()
            };
        }

        ProgressStats {
            completed_batches: completed,
            average_batch_time: self.durations.iter().sum::<Duration>() / completed,
            fastest_batch_time: self.durations.iter().copied().min().unwrap_or_default(),
            slowest_batch_time: self.durations.iter().copied().max().unwrap_or_default(),
            total_elapsed: self.started.elapsed(),
        }
    }
}

impl Drop for ProgressSession<'_> {
    fn drop(&mut self) {
        *self.tracker.last_finished.lock() = self.stats();
    }
}
