//! Load-admit dispatcher (C4)
//!
//! A per-request deterministic splitter. Given the controller's current
//! split ratio `R` (0-100, percent of reads destined for cache), `decide`
//! returns a `ToCache`/`ToBackend` decision whose empirical fraction of
//! `ToCache` tracks `R` with low discrepancy at steady state (P6-P8).
//!
//! No file in the retrieved original source implements this algorithm;
//! unlike the controller and monitor, it is built directly from the
//! specification's pseudocode. Its stateful-struct-with-a-`decide`-method
//! shape otherwise mirrors the teacher's former
//! `distribution::zipf::ZipfDistribution`: one long-lived mutable struct,
//! no internal locking, designed to be driven by a single caller (the
//! specification's §5 "serialize to a single logical context" requirement
//! — callers must route all `decide` calls through one thread or a
//! `Mutex<Dispatcher>`; the type itself is `Send` but not `Sync`-friendly
//! by convention, since concurrent calls would corrupt the quota state).
//!
//! ## Scale
//!
//! The specification leaves `R`'s scale as an open question (0-100 vs.
//! 0-`window_size`). This crate fixes `R` at 0-100 everywhere else and
//! rescales it against the dispatcher's own `window_size` denominator
//! right here, at [`Dispatcher::rebuild_pattern`] — the one place the
//! two scales meet.

use crate::config::Tunables;
use crate::request::LoadAdmitDecision;

/// Per-request splitter state (`DispatcherState` in the spec).
///
/// Not `Sync`: callers are responsible for serializing access (a single
/// submitter thread, or an external `Mutex`), per §5's concurrency model.
/// `decide` is O(1) and non-blocking, so the spec does not require
/// internal locking for high-throughput concurrent dispatch.
pub struct Dispatcher {
    window_size: u64,
    max_pattern_size: u64,

    initialized: bool,
    request_counter: u64,
    total: u64,
    cache_count: u64,
    backend_count: u64,
    cache_quota: u64,
    backend_quota: u64,
    pattern_position: u64,
    pattern_size: u64,
    pattern_cache: u64,
    #[allow(dead_code)] // kept for symmetry with pattern_cache / spec naming
    pattern_backend: u64,
    last_to_cache: bool,
}

impl Dispatcher {
    pub fn new(tunables: &Tunables) -> Self {
        Self {
            window_size: tunables.dispatcher_window_size,
            max_pattern_size: tunables.max_pattern_size,
            initialized: false,
            request_counter: 0,
            total: 0,
            cache_count: 0,
            backend_count: 0,
            cache_quota: 0,
            backend_quota: 0,
            pattern_position: 0,
            pattern_size: 1,
            pattern_cache: 0,
            pattern_backend: 0,
            last_to_cache: false,
        }
    }

    /// Rescale a 0-100 split-ratio percentage onto this dispatcher's
    /// `window_size` denominator.
    fn scale(&self, split_ratio_percent: u8) -> u64 {
        (split_ratio_percent.min(100) as u64 * self.window_size) / 100
    }

    /// Rebuild the short repeating pattern and reset all window counters.
    /// Called on the first ever call to `decide` and every time the
    /// window of `window_size` requests is exhausted.
    fn rebuild_pattern(&mut self, split_ratio_percent: u8) {
        let a = self.scale(split_ratio_percent);
        let b = self.window_size - a;
        let g = gcd_treat_zero_as_one(a, b);

        self.pattern_size = (self.window_size / g).max(1).min(self.max_pattern_size);
        self.pattern_cache = (a * self.pattern_size) / self.window_size;
        self.pattern_backend = self.pattern_size - self.pattern_cache;

        self.total = 0;
        self.cache_count = 0;
        self.backend_count = 0;
        self.pattern_position = 0;
        self.cache_quota = a;
        self.backend_quota = self.window_size - a;
        self.initialized = true;
    }

    /// Decide whether the current request should be routed to cache or
    /// backend, given the controller's published split ratio (0-100).
    pub fn decide(&mut self, split_ratio_percent: u8) -> LoadAdmitDecision {
        if !self.initialized || self.total >= self.window_size {
            self.rebuild_pattern(split_ratio_percent);
        }

        self.request_counter += 1;
        self.total += 1;

        let r_scaled = self.scale(split_ratio_percent);
        let expected_cache = (self.total * r_scaled) / self.window_size;
        let expected_backend = self.total - expected_cache;

        let decision = if self.cache_count < expected_cache {
            LoadAdmitDecision::ToCache
        } else if self.backend_count < expected_backend {
            LoadAdmitDecision::ToBackend
        } else if self.pattern_position < self.pattern_size {
            let d = if self.pattern_position >= self.pattern_cache {
                LoadAdmitDecision::ToBackend
            } else {
                LoadAdmitDecision::ToCache
            };
            self.pattern_position = (self.pattern_position + 1) % self.pattern_size;
            d
        } else if self.cache_quota == 0 {
            LoadAdmitDecision::ToBackend
        } else if self.backend_quota == 0 {
            LoadAdmitDecision::ToCache
        } else if self.last_to_cache {
            LoadAdmitDecision::ToBackend
        } else {
            LoadAdmitDecision::ToCache
        };

        match decision {
            LoadAdmitDecision::ToCache => {
                self.cache_quota = self.cache_quota.saturating_sub(1);
                self.cache_count += 1;
                self.last_to_cache = true;
            }
            LoadAdmitDecision::ToBackend => {
                self.backend_quota = self.backend_quota.saturating_sub(1);
                self.backend_count += 1;
                self.last_to_cache = false;
            }
        }

        decision
    }

    pub fn cache_count(&self) -> u64 {
        self.cache_count
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn pattern_size(&self) -> u64 {
        self.pattern_size
    }

    pub fn pattern_cache(&self) -> u64 {
        self.pattern_cache
    }
}

fn gcd_treat_zero_as_one(a: u64, b: u64) -> u64 {
    let mut a = if a == 0 { 1 } else { a };
    let mut b = if b == 0 { 1 } else { b };
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
