//! Pipeline configuration.
//!
//! Every policy knob of the pipeline lives in [`PipelineConfig`]. All
//! sections have defaults, so a JSON file only needs the values it changes:
//!
//! ```json
//! {
//!   "pressure": { "thresholds": { "low": 104857600, "medium": 209715200,
//!                                 "high": 314572800, "critical": 419430400 } },
//!   "coordinator": { "max_pressure_wait_ms": null, "fallback": "fail" },
//!   "cache": { "max_items": 20 }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::batch::CoordinatorConfig;
use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::memory::PressureConfig;
use crate::strategy::StrategyConfig;

/// Configuration for a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pressure thresholds and sampling
    pub pressure: PressureConfig,
    /// Result cache limits
    pub cache: CacheConfig,
    /// Batch pacing and pressure waits
    pub coordinator: CoordinatorConfig,
    /// Streaming versus direct extraction
    pub strategy: StrategyConfig,
}

impl PipelineConfig {
    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_json_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config in {}: {}", path.display(), e)))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.pressure.thresholds.validate()?;
        if !(0.0..=1.0).contains(&self.cache.eviction_fraction) {
            return Err(Error::Config(format!(
                "cache eviction fraction must be within [0, 1], got {}",
                self.cache.eviction_fraction
            )));
        }
        Ok(())
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_pressure(mut self, pressure: PressureConfig) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }
}
