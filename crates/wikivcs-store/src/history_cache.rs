//! In-memory cache of translated version histories.
//!
//! Walking a document's commit history is the expensive part of every
//! historical read, so the translated revision list is cached per document
//! identity and dropped whenever that document is written.
//!
//! Fills are guarded by a ticket taken at lookup time: a history computed
//! before an invalidation can never be installed after it, so a reader racing
//! a writer cannot resurrect a stale list once the write has returned.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::types::{DocumentId, Revision};

/// A fully materialized history, newest revision first.
pub type History = Arc<[Revision]>;

/// Proof of the cache state observed by a missed lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillTicket(u64);

/// Result of a cache lookup.
#[derive(Clone, Debug)]
pub enum CacheLookup {
    /// The cached history.
    Hit(History),
    /// No entry; the ticket authorizes one fill.
    Miss(FillTicket),
}

/// Cache of per-document histories, injected into the stores.
pub trait HistoryCache: Send + Sync {
    /// Looks up the history of `id`.
    fn lookup(&self, id: &DocumentId) -> CacheLookup;

    /// Installs `history` for `id` unless an invalidation happened since `ticket`
    /// was issued. Returns whether the entry was installed.
    fn put(&self, id: &DocumentId, ticket: FillTicket, history: History) -> bool;

    /// Drops the entry for `id`.
    fn invalidate(&self, id: &DocumentId);

    /// Returns the cached history, if any.
    fn get(&self, id: &DocumentId) -> Option<History> {
        match self.lookup(id) {
            CacheLookup::Hit(history) => Some(history),
            CacheLookup::Miss(_) => None,
        }
    }
}

/// Configuration for the in-memory history cache.
#[derive(Clone, Debug)]
pub struct HistoryCacheConfig {
    /// Maximum number of cached histories.
    pub max_entries: usize,
}

impl Default for HistoryCacheConfig {
    fn default() -> Self {
        Self { max_entries: 4096 }
    }
}

/// History cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryCacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to walk the log.
    pub misses: u64,
    /// Histories installed.
    pub inserts: u64,
    /// Fills refused because an invalidation intervened.
    pub rejected_fills: u64,
    /// Entries dropped by writes.
    pub invalidations: u64,
    /// Entries dropped to stay under `max_entries`.
    pub evictions: u64,
}

struct Entry {
    history: History,
    inserted: u64,
}

struct Inner {
    entries: HashMap<DocumentId, Entry>,
    epoch: u64,
    next_seq: u64,
    stats: HistoryCacheStats,
}

/// Bounded in-memory [`HistoryCache`].
pub struct MemoryHistoryCache {
    config: HistoryCacheConfig,
    inner: Mutex<Inner>,
}

impl MemoryHistoryCache {
    /// Creates an empty cache.
    pub fn new(config: HistoryCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                epoch: 0,
                next_seq: 0,
                stats: HistoryCacheStats::default(),
            }),
        }
    }

    /// Number of cached histories.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> HistoryCacheStats {
        self.inner.lock().stats.clone()
    }

    /// Hit ratio in 0.0-1.0.
    pub fn hit_ratio(&self) -> f64 {
        let inner = self.inner.lock();
        let total = inner.stats.hits + inner.stats.misses;
        if total == 0 {
            return 0.0;
        }
        inner.stats.hits as f64 / total as f64
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        inner.entries.clear();
    }
}

impl Default for MemoryHistoryCache {
    fn default() -> Self {
        Self::new(HistoryCacheConfig::default())
    }
}

impl HistoryCache for MemoryHistoryCache {
    fn lookup(&self, id: &DocumentId) -> CacheLookup {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(id) {
            let history = entry.history.clone();
            inner.stats.hits += 1;
            return CacheLookup::Hit(history);
        }
        inner.stats.misses += 1;
        CacheLookup::Miss(FillTicket(inner.epoch))
    }

    fn put(&self, id: &DocumentId, ticket: FillTicket, history: History) -> bool {
        if self.config.max_entries == 0 {
            return false;
        }

        let mut inner = self.inner.lock();
        if ticket.0 != inner.epoch {
            inner.stats.rejected_fills += 1;
            trace!(document = %id, "history fill rejected after invalidation");
            return false;
        }

        if !inner.entries.contains_key(id) && inner.entries.len() >= self.config.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                inner.entries.remove(&key);
                inner.stats.evictions += 1;
            }
        }

        let inserted = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(id.clone(), Entry { history, inserted });
        inner.stats.inserts += 1;
        true
    }

    fn invalidate(&self, id: &DocumentId) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        if inner.entries.remove(id).is_some() {
            inner.stats.invalidations += 1;
        }
    }
}

/// Cache that never stores anything; every lookup walks the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHistoryCache;

impl HistoryCache for NoopHistoryCache {
    fn lookup(&self, _id: &DocumentId) -> CacheLookup {
        CacheLookup::Miss(FillTicket(0))
    }

    fn put(&self, _id: &DocumentId, _ticket: FillTicket, _history: History) -> bool {
        false
    }

    fn invalidate(&self, _id: &DocumentId) {}
}
