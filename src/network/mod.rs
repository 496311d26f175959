//! Network monitor (C2)
//!
//! Samples RDMA latency/throughput and derives IOPS from cumulative
//! counters exposed by the cache layer and the underlying device. All
//! counter reads are failure-tolerant: on any read or parse error the
//! monitor returns 0 and leaves its prior baseline untouched, so a
//! transient failure never produces a negative delta or corrupts the
//! next sample.
//!
//! Translated from the original kernel module's `measure_performance`,
//! `measure_iops_using_opencas_stats`, `measure_iops_using_disk_stats`,
//! and `read_rdma_metrics` — here the two counter text files become a
//! [`MetricSource`] trait so tests and the demo binary can supply
//! synthetic readings instead of touching `/sys`.

use std::time::{Duration, Instant};

/// A single RDMA performance sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RdmaMetrics {
    pub latency: u64,
    pub throughput: u64,
}

/// Source of the two RDMA counters the original module reads as text
/// files under `/sys/kernel/rdma_metrics/`. Implementations must be
/// failure-tolerant themselves (return `None` rather than panicking);
/// [`NetworkMonitor`] treats a `None` the same as a zero reading.
pub trait MetricSource: Send {
    /// Read the current cumulative latency counter, or `None` if it
    /// could not be read/parsed.
    fn read_latency(&self) -> Option<u64>;
    /// Read the current cumulative throughput counter, or `None` if it
    /// could not be read/parsed.
    fn read_throughput(&self) -> Option<u64>;
}

/// Reads the two RDMA counters from plain text files (the real-world
/// shape: `/sys/kernel/rdma_metrics/{latency,throughput}` in the
/// original module). Any I/O or parse error yields `None`.
#[derive(Debug, Clone)]
pub struct SysfsMetricSource {
    latency_path: std::path::PathBuf,
    throughput_path: std::path::PathBuf,
}

impl SysfsMetricSource {
    pub fn new(
        latency_path: impl Into<std::path::PathBuf>,
        throughput_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            latency_path: latency_path.into(),
            throughput_path: throughput_path.into(),
        }
    }

    fn read_counter(path: &std::path::Path) -> Option<u64> {
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl MetricSource for SysfsMetricSource {
    fn read_latency(&self) -> Option<u64> {
        Self::read_counter(&self.latency_path)
    }

    fn read_throughput(&self) -> Option<u64> {
        Self::read_counter(&self.throughput_path)
    }
}

/// A cumulative-counter delta-over-time tracker with "first call
/// establishes baseline" semantics, shared by the cache-side and
/// device-side IOPS diagnostics below.
#[derive(Debug, Clone, Default)]
struct DeltaCounter {
    baseline: Option<(u64, Instant)>,
}

impl DeltaCounter {
    fn new() -> Self {
        Self { baseline: None }
    }

    /// Compute IOPS from a fresh cumulative reading. Returns 0 (and
    /// records the new baseline) on the first call, on a read failure,
    /// or whenever the computed delta would be negative (a counter
    /// reset) — the delta is never allowed to go negative.
    fn sample(&mut self, reading: Option<u64>) -> u64 {
        let Some(curr) = reading else {
            return 0;
        };
        let now = Instant::now();
        let Some((prev, prev_time)) = self.baseline else {
            self.baseline = Some((curr, now));
            return 0;
        };
        if curr < prev {
            // Counter went backwards (reset/wrap): re-baseline, report 0.
            self.baseline = Some((curr, now));
            return 0;
        }
        let elapsed = now.duration_since(prev_time);
        self.baseline = Some((curr, now));
        iops_from_delta(curr - prev, elapsed)
    }
}

fn iops_from_delta(delta: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis() as u64;
    if millis == 0 {
        return 0;
    }
    (delta * 1000) / millis
}

/// Cumulative read counters as reported by the cache layer, for the
/// "measure IOPS from cache-engine read counters" diagnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheReadCounters {
    pub reads_from_cache: u64,
    pub reads_from_core: u64,
}

/// Cumulative read/write counters as reported by a device-level stats
/// source (e.g. a block device's `/sys/block/<dev>/stat`), for the
/// "measure IOPS from device-level cumulative stats" diagnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStatCounters {
    pub reads: u64,
    pub writes: u64,
}

/// Samples RDMA performance and derives IOPS from two independent
/// cumulative-counter sources. Owns its own baselines; a single monitor
/// is meant to live for the lifetime of one [`crate::SplitController`].
pub struct NetworkMonitor {
    source: Box<dyn MetricSource>,
    opencas_counter: DeltaCounter,
    disk_counter: DeltaCounter,
}

impl NetworkMonitor {
    pub fn new(source: Box<dyn MetricSource>) -> Self {
        Self {
            source,
            opencas_counter: DeltaCounter::new(),
            disk_counter: DeltaCounter::new(),
        }
    }

    /// Return the most recent RDMA sample. A counter read failure yields
    /// 0 for that field rather than propagating an error — the spec
    /// requires the monitor to be failure-tolerant end to end.
    pub fn measure_performance(&self) -> RdmaMetrics {
        RdmaMetrics {
            latency: self.source.read_latency().unwrap_or(0),
            throughput: self.source.read_throughput().unwrap_or(0),
        }
    }

    /// IOPS computed from the cache layer's own read counters
    /// (`reads_from_cache + reads_from_core` deltas). Returns 0 on the
    /// first call for a given monitor instance.
    pub fn measure_iops_from_cache_counters(&mut self, counters: CacheReadCounters) -> u64 {
        let total = counters.reads_from_cache.saturating_add(counters.reads_from_core);
        self.opencas_counter.sample(Some(total))
    }

    /// IOPS computed from a device-level cumulative stats source
    /// (`reads + writes` deltas).
    pub fn measure_iops_from_device_counters(&mut self, counters: DeviceStatCounters) -> u64 {
        let total = counters.reads.saturating_add(counters.writes);
        self.disk_counter.sample(Some(total))
    }
}
