//! Resolution statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated on the resolve path with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    total_resolutions: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    construction_failures: AtomicU64,
    failure_replays: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_resolution(&self) {
        self.total_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// A memoized instance was returned.
    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A factory ran and produced an instance.
    pub(crate) fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A factory ran and failed.
    pub(crate) fn record_construction_failure(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.construction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A memoized failure was replayed without running the factory.
    pub(crate) fn record_failure_replay(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.failure_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        registered_services: usize,
        named_services: usize,
        resolved_services: usize,
        failed_services: usize,
    ) -> RegistryStats {
        RegistryStats {
            total_resolutions: self.total_resolutions.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            failure_replays: self.failure_replays.load(Ordering::Relaxed),
            registered_services,
            named_services,
            resolved_services,
            failed_services,
        }
    }
}

/// Point-in-time snapshot of a registry's resolution counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Resolutions attempted, including unknown-key lookups.
    pub total_resolutions: u64,
    /// Resolutions served from a memoized outcome (instance or failure).
    pub cache_hits: u64,
    /// Resolutions that invoked a factory.
    pub cache_misses: u64,
    /// Factory invocations that failed (subset of `cache_misses`).
    pub construction_failures: u64,
    /// Memoized failures replayed (subset of `cache_hits`).
    pub failure_replays: u64,
    /// Factories currently registered.
    pub registered_services: usize,
    /// Names currently bound.
    pub named_services: usize,
    /// Keys holding a memoized instance.
    pub resolved_services: usize,
    /// Keys holding a memoized failure.
    pub failed_services: usize,
}

impl RegistryStats {
    /// Fraction of memoized-outcome resolutions among all resolutions that
    /// reached a registered key.
    pub fn hit_rate(&self) -> f64 {
        let served = self.cache_hits + self.cache_misses;
        if served == 0 {
            0.0
        } else {
            self.cache_hits as f64 / served as f64
        }
    }

    /// One-line summary suitable for logging.
    pub fn summary(&self) -> String {
        format!(
            "resolutions: {} (hits: {}, misses: {}, hit rate: {:.1}%), services: {} registered, {} named, {} resolved, {} failed",
            self.total_resolutions,
            self.cache_hits,
            self.cache_misses,
            self.hit_rate() * 100.0,
            self.registered_services,
            self.named_services,
            self.resolved_services,
            self.failed_services,
        )
    }
}
