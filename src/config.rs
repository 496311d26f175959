//! Tunable constants (§6 "Tunable constants" / SPEC_FULL.md §10)
//!
//! Every constant the specification names explicitly (`W`,
//! `MONITOR_INTERVAL_MS`, `WARMUP_PERIOD`, `RDMA_THRESHOLD`,
//! `CONGESTION_THRESHOLD`, the dispatcher's `window_size` and
//! `max_pattern_size`, and `IO_DEPTH`/`NUM_JOBS`) lives on one
//! `Tunables` struct with `Default` matching the spec's literal values,
//! following the teacher's former `config::mod.rs` shape: a plain struct
//! with `#[serde(default = "...")]` per field and a separate `validate()`
//! pass that `anyhow::bail!`s with a descriptive message per out-of-range
//! field.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// All tunables for one cache instance's split controller and dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tunables {
    /// Moving-average window size, `W` in the spec.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Controller tick period, `MONITOR_INTERVAL_MS`.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Minimum time spent in Warmup before transitioning to Stable.
    #[serde(default = "default_warmup_period")]
    pub warmup_period: Duration,

    /// Throughput at or below which the controller forces Idle mode.
    #[serde(default = "default_rdma_threshold")]
    pub rdma_threshold: u64,

    /// Per-mille drop from the high-water mark that triggers Congestion.
    #[serde(default = "default_congestion_threshold_permil")]
    pub congestion_threshold_permil: u64,

    /// Dispatcher pattern-rebuild window, in requests.
    #[serde(default = "default_dispatcher_window_size")]
    pub dispatcher_window_size: u64,

    /// Upper bound on the dispatcher's repeating pattern length.
    #[serde(default = "default_max_pattern_size")]
    pub max_pattern_size: u64,

    /// Queue depth used for bandwidth-table lookups.
    #[serde(default = "default_io_depth")]
    pub io_depth: u32,

    /// Job count used for bandwidth-table lookups.
    #[serde(default = "default_num_jobs")]
    pub num_jobs: u32,
}

fn default_window() -> usize {
    20
}
fn default_monitor_interval_ms() -> u64 {
    1000
}
fn default_warmup_period() -> Duration {
    Duration::from_secs(10)
}
fn default_rdma_threshold() -> u64 {
    100
}
fn default_congestion_threshold_permil() -> u64 {
    90
}
fn default_dispatcher_window_size() -> u64 {
    10_000
}
fn default_max_pattern_size() -> u64 {
    10
}
fn default_io_depth() -> u32 {
    16
}
fn default_num_jobs() -> u32 {
    1
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            window: default_window(),
            monitor_interval_ms: default_monitor_interval_ms(),
            warmup_period: default_warmup_period(),
            rdma_threshold: default_rdma_threshold(),
            congestion_threshold_permil: default_congestion_threshold_permil(),
            dispatcher_window_size: default_dispatcher_window_size(),
            max_pattern_size: default_max_pattern_size(),
            io_depth: default_io_depth(),
            num_jobs: default_num_jobs(),
        }
    }
}

impl Tunables {
    /// Parse tunables from a TOML document, filling in spec defaults for
    /// any field left unspecified.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let tunables: Self = toml::from_str(s)?;
        tunables.validate()?;
        Ok(tunables)
    }

    /// Reject configurations that cannot possibly satisfy the spec's
    /// invariants (e.g. a zero-size moving-average window would make
    /// `avg = sum / count` divide by zero the first time it's computed).
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            bail!("window (W) must be at least 1, got {}", self.window);
        }
        if self.monitor_interval_ms == 0 {
            bail!("monitor_interval_ms must be nonzero");
        }
        if self.congestion_threshold_permil > 1000 {
            bail!(
                "congestion_threshold_permil must be a per-mille value in 0..=1000, got {}",
                self.congestion_threshold_permil
            );
        }
        if self.dispatcher_window_size == 0 {
            bail!("dispatcher_window_size must be at least 1");
        }
        if self.max_pattern_size == 0 {
            bail!("max_pattern_size must be at least 1");
        }
        if self.io_depth == 0 {
            bail!("io_depth must be at least 1");
        }
        if self.num_jobs == 0 {
            bail!("num_jobs must be at least 1");
        }
        Ok(())
    }
}
