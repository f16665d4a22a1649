//! Process and system memory sampling.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of memory usage readings.
pub trait MemorySampler: Send + Sync {
    /// Resident memory of the current process, in bytes.
    fn resident_bytes(&self) -> u64;

    /// Total physical memory of the machine, in bytes.
    fn total_bytes(&self) -> u64;

    /// Physical memory not used by this process, in bytes.
    fn available_bytes(&self) -> u64 {
        self.total_bytes().saturating_sub(self.resident_bytes())
    }
}

/// Sampler backed by the operating system via `sysinfo`.
pub struct SystemSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemSampler {
    /// Create a sampler for the current process.
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Cannot determine current pid, resident memory will read as 0: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemSampler {
    fn resident_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    fn total_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.total_memory()
    }
}

/// Sampler whose readings are set by the caller.
///
/// Useful on platforms without process statistics and for driving the
/// pressure monitor deterministically.
#[derive(Debug)]
pub struct ManualSampler {
    resident: AtomicU64,
    total: AtomicU64,
}

impl ManualSampler {
    /// Create a sampler with fixed initial readings.
    pub fn new(resident_bytes: u64, total_bytes: u64) -> Self {
        Self {
            resident: AtomicU64::new(resident_bytes),
            total: AtomicU64::new(total_bytes),
        }
    }

    /// Set the resident reading.
    pub fn set_resident(&self, bytes: u64) {
        self.resident.store(bytes, Ordering::SeqCst);
    }

    /// Set the total memory reading.
    pub fn set_total(&self, bytes: u64) {
        self.total.store(bytes, Ordering::SeqCst);
    }
}

impl MemorySampler for ManualSampler {
    fn resident_bytes(&self) -> u64 {
        self.resident.load(Ordering::SeqCst)
    }

    fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}
