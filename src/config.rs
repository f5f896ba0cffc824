//! Engine tunables, loadable from a JSON file.
//!
//! Every section falls back to its defaults, so a config file only needs the
//! keys it wants to change.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub range: RangeConfig,
    pub finetune: FinetuneConfig,
    pub timing: TimingConfig,
    pub device: DeviceConfig,
}

/// Range (rotation) calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Full rotations required per stick for 50% progress.
    pub required_cycles: u32,
    /// Radius a bucket must exceed to count as "at the extreme".
    pub extreme_threshold: f64,
    /// Fraction of extreme buckets that completes one rotation.
    pub fill_threshold: f64,
    pub poll_interval_ms: u64,
    /// Countdown before the session unlocks regardless of progress.
    pub unlock_seconds: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            required_cycles: 4,
            extreme_threshold: 0.95,
            fill_threshold: 0.95,
            poll_interval_ms: 100,
            unlock_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinetuneConfig {
    pub default_step_size: u32,
    pub repeat_initial_delay_ms: u64,
    pub repeat_interval_ms: u64,
    /// Raw adjustment applied to the axis limits at slider position 100.
    pub slack_max_adjustment: f64,
    /// Histogram radius change per raw slack unit.
    pub slack_histogram_scale: f64,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            default_step_size: 5,
            repeat_initial_delay_ms: 400,
            repeat_interval_ms: 150,
            slack_max_adjustment: 175.0,
            slack_histogram_scale: 0.00085,
        }
    }
}

impl FinetuneConfig {
    pub fn repeat_initial_delay(&self) -> Duration {
        Duration::from_millis(self.repeat_initial_delay_ms)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub capacity: usize,
    pub window: usize,
    pub min_samples: usize,
    /// Gaps longer than this are treated as pauses and dropped.
    pub max_interval_ms: f64,
    pub stats_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            window: 100,
            min_samples: 10,
            max_interval_ms: 1000.0,
            stats_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub request_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Load from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("[CONFIG] Loaded {}", path.display());
        Ok(config)
    }
}
