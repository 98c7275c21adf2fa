use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-cache counters, updated with relaxed atomics
#[derive(Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    waits: AtomicU64,
    preemptions: AtomicU64,
    fetches: AtomicU64,
    prefetches_scheduled: AtomicU64,
    prefetch_failures: AtomicU64,
    evictions: AtomicU64,
}

impl StatCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prefetch_scheduled(&self) {
        self.prefetches_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prefetch_failure(&self) {
        self.prefetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            prefetches_scheduled: self.prefetches_scheduled.load(Ordering::Relaxed),
            prefetch_failures: self.prefetch_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a cache's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served straight from a completed entry
    pub hits: u64,
    /// Requests that had no entry and no load registered
    pub misses: u64,
    /// Requests that blocked on another thread's running load
    pub waits: u64,
    /// Queued prefetches taken over by the requesting thread
    pub preemptions: u64,
    /// Calls into the page source
    pub fetches: u64,
    pub prefetches_scheduled: u64,
    pub prefetch_failures: u64,
    pub evictions: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} waits={} preemptions={} fetches={} prefetched={} prefetch_failures={} evictions={}",
            self.hits,
            self.misses,
            self.waits,
            self.preemptions,
            self.fetches,
            self.prefetches_scheduled,
            self.prefetch_failures,
            self.evictions
        )
    }
}
