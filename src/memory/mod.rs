//! Memory sampling, pressure classification and the memory event bus.

mod events;
mod pressure;
mod sampler;

pub use events::{EventBus, MemoryEvent, Subscription, TaskHandle};
pub use pressure::{
    MemoryTrend, PressureConfig, PressureLevel, PressureMonitor, PressureSnapshot,
    PressureThresholds,
};
pub use sampler::{ManualSampler, MemorySampler, SystemSampler};
