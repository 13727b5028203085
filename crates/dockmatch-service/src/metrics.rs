//! Global atomic counters for the match service.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    matches_computed: AtomicU64,
    cache_hits: AtomicU64,
    cache_joins: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            matches_computed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_joins: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// A match ran to completion on a worker.
    pub fn inc_matches_computed(&self) {
        self.matches_computed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "matches_computed", "counter incremented");
    }

    /// A request was answered from a finished cache entry.
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    /// A request joined a computation already in flight.
    pub fn inc_cache_joins(&self) {
        self.cache_joins.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_joins", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            matches_computed = self.matches_computed(),
            cache_hits = self.cache_hits(),
            cache_joins = self.cache_joins(),
            timeouts = self.timeouts(),
            failures = self.failures(),
        );
    }

    pub fn matches_computed(&self) -> u64 {
        self.matches_computed.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_joins(&self) -> u64 {
        self.cache_joins.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.matches_computed.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_joins.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_matches_computed();
        m.inc_matches_computed();
        assert_eq!(m.matches_computed(), 2);

        m.inc_cache_hits();
        m.inc_cache_joins();
        m.inc_cache_joins();
        assert_eq!(m.cache_hits(), 1);
        assert_eq!(m.cache_joins(), 2);

        m.inc_timeouts();
        m.inc_failures();
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_matches_computed();
        m.inc_cache_hits();
        m.inc_timeouts();
        m.reset();
        assert_eq!(m.matches_computed(), 0);
        assert_eq!(m.cache_hits(), 0);
        assert_eq!(m.timeouts(), 0);
    }
}
