//! Admission-source boundary (§6 "Boundary toggle" / SPEC_FULL.md §9
//! design note).
//!
//! The specification's source carries a process-wide boolean selecting
//! between two controller implementations ("simple monitor" vs
//! "netCAS"), with every call site querying whichever is active through
//! the same two functions. The design notes call that boolean a seam for
//! A/B evaluation and recommend modeling it as a polymorphic interface
//! instead: this module is that interface. [`crate::engine_mfcwt::EngineContext`]
//! holds an `Arc<dyn AdmissionSource>`, so the choice of implementation
//! is made once, at cache-instance construction, with no runtime branch
//! anywhere on the request path.

/// The two admission queries every read/write engine consults: whether
/// a cache miss may be promoted ([`AdmissionSource::query_data_admit`])
/// and the percentage of reads the dispatcher should steer to cache
/// ([`AdmissionSource::query_optimal_split_ratio`]).
pub trait AdmissionSource: Send + Sync {
    /// Whether a cache miss is currently allowed to be promoted.
    fn query_data_admit(&self) -> bool;

    /// The currently published cache/backend split ratio, 0-100.
    fn query_optimal_split_ratio(&self) -> u8;
}

impl AdmissionSource for crate::controller::SplitController {
    fn query_data_admit(&self) -> bool {
        crate::controller::SplitController::query_data_admit(self)
    }

    fn query_optimal_split_ratio(&self) -> u8 {
        crate::controller::SplitController::query_optimal_split_ratio(self)
    }
}

/// The "simple monitor" implementation: a fixed split ratio and a fixed
/// data-admit flag, set once at construction (or updated externally via
/// [`StaticAdmission::set_split_ratio`]/[`StaticAdmission::set_data_admit`])
/// with no mode machine, no moving average, and no background thread.
/// Exists as the non-netCAS half of the boundary toggle the
/// specification describes: a cache instance that wants static behavior
/// (e.g. always split 50/50, or always force pass-through by setting
/// `data_admit = false`) constructs this instead of a
/// [`crate::controller::SplitController`], with the same trait object
/// type flowing into the engines either way.
pub struct StaticAdmission {
    split_ratio: std::sync::atomic::AtomicU8,
    data_admit: std::sync::atomic::AtomicBool,
}

impl StaticAdmission {
    pub fn new(split_ratio: u8, data_admit: bool) -> Self {
        Self {
            split_ratio: std::sync::atomic::AtomicU8::new(split_ratio.min(100)),
            data_admit: std::sync::atomic::AtomicBool::new(data_admit),
        }
    }

    pub fn set_split_ratio(&self, ratio: u8) {
        self.split_ratio
            .store(ratio.min(100), std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_data_admit(&self, admit: bool) {
        self.data_admit.store(admit, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for StaticAdmission {
    /// Matches the spec's Idle-mode defaults: all reads to cache, misses
    /// always admitted for promotion.
    fn default() -> Self {
        Self::new(100, true)
    }
}

impl AdmissionSource for StaticAdmission {
    fn query_data_admit(&self) -> bool {
        self.data_admit.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn query_optimal_split_ratio(&self) -> u8 {
        self.split_ratio.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::BandwidthTable;
    use crate::config::Tunables;
    use crate::controller::SplitController;

    #[test]
    fn fixed_admission_reports_constructed_values() {
        let source = StaticAdmission::new(42, false);
        assert_eq!(source.query_optimal_split_ratio(), 42);
        assert!(!source.query_data_admit());
    }

    #[test]
    fn fixed_admission_clamps_ratio_to_100() {
        let source = StaticAdmission::new(250, true);
        assert_eq!(source.query_optimal_split_ratio(), 100);
    }

    #[test]
    fn fixed_admission_default_matches_idle_defaults() {
        let source = StaticAdmission::default();
        assert_eq!(source.query_optimal_split_ratio(), 100);
        assert!(source.query_data_admit());
    }

    #[test]
    fn fixed_admission_mutates_after_construction() {
        let source = StaticAdmission::default();
        source.set_split_ratio(10);
        source.set_data_admit(false);
        assert_eq!(source.query_optimal_split_ratio(), 10);
        assert!(!source.query_data_admit());
    }

    #[test]
    fn split_controller_implements_the_same_trait() {
        fn assert_is_admission_source<T: AdmissionSource>(_: &T) {}
        let controller = SplitController::new(Tunables::default(), BandwidthTable::default_table());
        assert_is_admission_source(&controller);

        let source: std::sync::Arc<dyn AdmissionSource> = std::sync::Arc::new(controller);
        assert_eq!(source.query_optimal_split_ratio(), 100);
        assert!(source.query_data_admit());
    }
}
