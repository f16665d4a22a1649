//! Bounded LRU cache for extracted document text.
//!
//! The cache is bounded both in bytes and in item count. Under memory
//! pressure it sheds a fraction of its least recently used entries; see
//! [`AdaptiveCache::evict_for_pressure`] and [`AdaptiveCache::attach`].

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::document::PageSource;
use crate::error::{Error, Result};
use crate::memory::{EventBus, MemoryEvent, PressureLevel, TaskHandle};
use crate::options::ExtractionOptions;

const MB: usize = 1024 * 1024;

/// Cache key derived from document identity, page count and options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of a document extracted with `options`.
    pub fn new(identity: &str, page_count: u32, options: &ExtractionOptions) -> Self {
        let mut hasher = ahash::AHasher::default();
        identity.hash(&mut hasher);
        page_count.hash(&mut hasher);
        options.digest().hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Fingerprint of `doc` extracted with `options`.
    pub fn of<D: PageSource + ?Sized>(doc: &D, options: &ExtractionOptions) -> Self {
        Self::new(doc.identity(), doc.page_count(), options)
    }

    /// Raw hash value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Cache limits and eviction policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte capacity
    pub max_bytes: usize,
    /// Item capacity
    pub max_items: usize,
    /// Share of entries evicted per pressure pass
    pub eviction_fraction: f64,
    /// Upper bound on evictions per pressure pass
    pub max_evictions_per_pass: usize,
    /// Lowest level that triggers pressure eviction
    pub eviction_level: PressureLevel,
}

impl CacheConfig {
    /// Set the byte capacity.
    pub fn with_max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = bytes;
        self
    }

    /// Set the item capacity.
    pub fn with_max_items(mut self, items: usize) -> Self {
        self.max_items = items;
        self
    }

    /// Set the pressure eviction share and per-pass cap.
    pub fn with_eviction(mut self, fraction: f64, max_per_pass: usize) -> Self {
        self.eviction_fraction = fraction.clamp(0.0, 1.0);
        self.max_evictions_per_pass = max_per_pass;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * MB,
            max_items: 100,
            eviction_fraction: 0.25,
            max_evictions_per_pass: 10,
            eviction_level: PressureLevel::High,
        }
    }
}

/// Counters reported by [`AdaptiveCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub items: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before the first lookup
    pub hit_ratio: f64,
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    size_bytes: usize,
    tick: u64,
    last_access: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    // access tick -> key, oldest first
    recency: BTreeMap<u64, Fingerprint>,
    next_tick: u64,
    total_bytes: usize,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, key: Fingerprint) {
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(&key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.last_access = Instant::now();
            self.recency.insert(tick, key);
        }
    }

    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<Fingerprint> {
        let (_, key) = self.recency.pop_first()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.total_bytes -= entry.size_bytes;
        }
        Some(key)
    }
}

/// Memory-bounded LRU cache mapping [`Fingerprint`]s to extracted text.
#[derive(Debug)]
pub struct AdaptiveCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl AdaptiveCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &Fingerprint) -> Option<String> {
        let mut state = self.state.lock();
        if state.entries.contains_key(key) {
            state.hits += 1;
            state.touch(*key);
            state.entries.get(key).map(|e| e.value.clone())
        } else {
            state.misses += 1;
            None
        }
    }

    /// Look up `key` without touching recency or counters.
    pub fn peek(&self, key: &Fingerprint) -> Option<String> {
        self.state.lock().entries.get(key).map(|e| e.value.clone())
    }

    /// Whether `key` is cached. Does not touch recency or counters.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Insert or replace the text stored under `key`.
    ///
    /// Values larger than the byte capacity are rejected with
    /// [`Error::CacheRejected`]. Otherwise least recently used entries are
    /// evicted until both capacities hold.
    pub fn store(&self, key: Fingerprint, value: String) -> Result<()> {
        let size_bytes = value.len();
        if size_bytes > self.config.max_bytes || self.config.max_items == 0 {
            return Err(Error::CacheRejected {
                size: size_bytes,
                capacity: self.config.max_bytes,
            });
        }

        let mut state = self.state.lock();
        state.remove(&key);

        let mut evicted = 0usize;
        while state.entries.len() >= self.config.max_items
            || state.total_bytes + size_bytes > self.config.max_bytes
        {
            if state.evict_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            log::debug!("Cache evicted {} entries to fit {} bytes", evicted, size_bytes);
        }

        let tick = state.bump();
        state.recency.insert(tick, key);
        state.total_bytes += size_bytes;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                tick,
                last_access: Instant::now(),
            },
        );
        Ok(())
    }

    /// Remove `key`, returning its text.
    pub fn remove(&self, key: &Fingerprint) -> Option<String> {
        self.state.lock().remove(key).map(|e| e.value)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.total_bytes = 0;
    }

    /// Shed least recently used entries when `level` is severe enough.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_for_pressure(&self, level: PressureLevel) -> usize {
        if level < self.config.eviction_level {
            return 0;
        }

        let mut state = self.state.lock();
        if state.entries.is_empty() {
            return 0;
        }

        let share = (state.entries.len() as f64 * self.config.eviction_fraction) as usize;
        let target = share.max(1).min(self.config.max_evictions_per_pass);

        let mut evicted = 0;
        while evicted < target && state.evict_oldest().is_some() {
            evicted += 1;
        }

        if evicted > 0 {
            log::info!(
                "Evicted {} cache entries under {} memory pressure",
                evicted,
                level
            );
        }
        evicted
    }

    /// Remove entries not accessed within `max_age`.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let stale: Vec<Fingerprint> = state
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_access) > max_age)
            .map(|(k, _)| *k)
            .collect();

        for key in &stale {
            state.remove(key);
        }
        stale.len()
    }

    /// Periodic upkeep: sweep stale entries, then apply pressure eviction.
    pub fn run_maintenance(&self, max_age: Duration, level: PressureLevel) -> usize {
        self.sweep_older_than(max_age) + self.evict_for_pressure(level)
    }

    /// Evict on worsening pressure events from `bus` until the handle is dropped.
    ///
    /// A low-memory warning runs one pass. A running monitor answers the same
    /// warning with a change to critical, which is not counted again.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> TaskHandle {
        let cache = Arc::clone(self);
        let mut events = bus.subscribe();

        TaskHandle::new(tokio::spawn(async move {
            let mut after_warning = false;
            while let Some(event) = events.recv().await {
                match event {
                    MemoryEvent::LowMemoryWarning => {
                        after_warning = true;
                        cache.evict_for_pressure(event.level());
                    }
                    MemoryEvent::PressureChanged {
                        current: PressureLevel::Critical,
                        ..
                    } if after_warning => after_warning = false,
                    _ => {
                        after_warning = false;
                        if event.is_worsening() {
                            cache.evict_for_pressure(event.level());
                        }
                    }
                }
            }
        }))
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            items: state.entries.len(),
            total_bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Zero the hit and miss counters, keeping contents.
    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        state.hits = 0;
        state.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by cached values.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Default for AdaptiveCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
