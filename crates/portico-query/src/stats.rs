//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently in the cache.
    pub entries: usize,
    /// Invocations served from a settled entry.
    pub hits: u64,
    /// Invocations that started a new execution.
    pub misses: u64,
    /// Invocations that joined an in-flight execution.
    pub dedup_joins: u64,
    /// Executions started, whatever their outcome.
    pub executions: u64,
    /// Completions discarded because the entry had moved on.
    pub stale_discards: u64,
    /// Entries removed by the retention policy.
    pub evictions: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) dedup_joins: AtomicU64,
    pub(crate) executions: AtomicU64,
    pub(crate) stale_discards: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
