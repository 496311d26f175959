//! Lock-free counters for the engines' error/fallback/promotion stats.
//!
//! Real accounting (the "stats counters" external collaborator in §6)
//! lives outside this crate; what's here is the small set of counters the
//! MFCWT engines themselves increment while running the state machine
//! (cache/backend error counts, pass-through fallbacks, promotions,
//! backfills). [`AlignedCounter`] is kept near-verbatim from the
//! teacher's `stats::AlignedCounter`: cache-line padded to avoid false
//! sharing between worker threads hammering independent counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache-line aligned atomic counter to prevent false sharing.
///
/// On most modern CPUs, cache lines are 64 bytes. When multiple threads
/// update adjacent memory locations, the whole cache line is invalidated
/// on every write, even for unrelated counters. Aligning each counter to
/// a cache-line boundary and padding it to 64 bytes gives each counter
/// its own line.
#[repr(align(64))]
#[derive(Debug)]
pub struct AlignedCounter {
    value: AtomicU64,
    _padding: [u8; 56],
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; 56],
        }
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for AlignedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters the MFCWT read/write engines maintain across the lifetime of
/// a cache instance.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Requests routed to the pass-through engine after a cache I/O error
    /// or an unsafe promotion (read-locked line on a miss).
    pub fallbacks: AlignedCounter,
    /// Backend I/O errors (drives the invalidate path).
    pub backend_errors: AlignedCounter,
    /// Cache I/O errors.
    pub cache_errors: AlignedCounter,
    /// Successful promotions scheduled for backfill.
    pub promotions: AlignedCounter,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }
}
