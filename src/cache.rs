//! Query cache (C3): memoizes pattern-executor invocations keyed by a
//! fingerprint over `(language, pattern, search-root contents, options)`.
//!
//! Bounded by both entry count and total byte size, with a wall-clock TTL
//! on each entry. A single `parking_lot::Mutex` guards the whole structure;
//! contention is not expected to matter because callers already serialize
//! through the worker pool for CPU-bound work and through the applicator's
//! project lock for writes.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::adapter::Match;

/// Opaque cache key produced by [`crate::adapter::fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub String);

#[derive(Debug)]
struct Entry {
    matches: Vec<Match>,
    inserted_at: Instant,
    byte_size: u64,
}

fn estimate_byte_size(matches: &[Match]) -> u64 {
    matches
        .iter()
        .map(|m| (m.text.len() + m.file.as_os_str().len() + 64) as u64)
        .sum()
}

/// Bounded, TTL'd cache of matcher results. Insertion order is tracked so
/// the oldest entry can be evicted first once a bound is exceeded (a plain
/// LRU would also touch entries on `get`; here entries are immutable once
/// inserted, so insertion order and access order coincide until eviction).
#[derive(Debug)]
pub struct QueryCache {
    inner: Mutex<QueryCacheInner>,
    max_entries: usize,
    max_bytes: u64,
    ttl: Duration,
}

#[derive(Debug)]
struct QueryCacheInner {
    entries: IndexMap<CacheKey, Entry>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
}

/// Point-in-time hit/miss counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub total_bytes: u64,
}

impl QueryCache {
    pub fn new(max_entries: usize, max_bytes: u64, ttl_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(QueryCacheInner {
                entries: IndexMap::new(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
            }),
            max_entries,
            max_bytes,
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// Look up a cached result, treating an expired entry as a miss (and
    /// evicting it eagerly rather than waiting for the next insert).
    pub fn get(&self, key: &CacheKey) -> Option<Vec<Match>> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if expired {
            if let Some(removed) = inner.entries.shift_remove(key) {
                inner.total_bytes -= removed.byte_size;
            }
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        inner.entries.get(key).map(|e| e.matches.clone())
    }

    /// Insert (or replace) an entry, evicting oldest entries first until
    /// both bounds are satisfied.
    pub fn put(&self, key: CacheKey, matches: Vec<Match>) {
        let byte_size = estimate_byte_size(&matches);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.shift_remove(&key) {
            inner.total_bytes -= old.byte_size;
        }

        inner.entries.insert(
            key,
            Entry {
                matches,
                inserted_at: Instant::now(),
                byte_size,
            },
        );
        inner.total_bytes += byte_size;

        while (inner.entries.len() > self.max_entries || inner.total_bytes > self.max_bytes)
            && !inner.entries.is_empty()
        {
            if let Some((_, evicted)) = inner.entries.shift_remove_index(0) {
                inner.total_bytes -= evicted.byte_size;
            }
        }
    }

    /// Remove every entry whose key satisfies `predicate`, used by the
    /// applicator's commit step to invalidate results touching rewritten
    /// files without waiting for their TTL.
    pub fn invalidate<F>(&self, predicate: F)
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut inner = self.inner.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(removed) = inner.entries.shift_remove(&key) {
                inner.total_bytes -= removed.byte_size;
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
        }
    }
}

/// Tracks which cache keys were produced against which source files, so
/// `invalidate` can be called with a closure over a small set of touched
/// paths rather than scanning file contents again. Backed by `DashMap`
/// rather than a single mutex since every `run_pattern` call records into
/// it concurrently while the applicator may read from it mid-run.
#[derive(Debug, Default)]
pub struct KeyFileIndex {
    keys_by_file: DashMap<std::path::PathBuf, Vec<CacheKey>>,
}

impl KeyFileIndex {
    pub fn record(&self, key: &CacheKey, files: &[std::path::PathBuf]) {
        for file in files {
            self.keys_by_file.entry(file.clone()).or_default().push(key.clone());
        }
    }

    pub fn keys_touching(&self, files: &[std::path::PathBuf]) -> Vec<CacheKey> {
        let mut out = Vec::new();
        for file in files {
            if let Some(keys) = self.keys_by_file.get(file) {
                out.extend(keys.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_match(text: &str) -> Match {
        Match {
            file: PathBuf::from("a.py"),
            range: crate::adapter::MatchRange {
                start: crate::adapter::MatchPosition { line: 1, column: 0, byte: 0 },
                end: crate::adapter::MatchPosition { line: 1, column: 5, byte: 5 },
            },
            text: text.to_string(),
            meta_vars: Default::default(),
        }
    }

    #[test]
    fn miss_then_hit() {
        let cache = QueryCache::new(10, 1024 * 1024, 3600);
        let key = CacheKey("k1".into());
        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), vec![sample_match("x")]);
        assert_eq!(cache.get(&key).unwrap().len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn evicts_oldest_when_entry_count_exceeded() {
        let cache = QueryCache::new(2, 1024 * 1024, 3600);
        cache.put(CacheKey("a".into()), vec![sample_match("a")]);
        cache.put(CacheKey("b".into()), vec![sample_match("b")]);
        cache.put(CacheKey("c".into()), vec![sample_match("c")]);

        assert!(cache.get(&CacheKey("a".into())).is_none());
        assert!(cache.get(&CacheKey("b".into())).is_some());
        assert!(cache.get(&CacheKey("c".into())).is_some());
    }

    #[test]
    fn ttl_of_zero_elapsed_expires_immediately() {
        let cache = QueryCache::new(10, 1024 * 1024, 0);
        let key = CacheKey("k".into());
        cache.put(key.clone(), vec![sample_match("x")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn invalidate_removes_matching_keys_only() {
        let cache = QueryCache::new(10, 1024 * 1024, 3600);
        cache.put(CacheKey("keep".into()), vec![sample_match("x")]);
        cache.put(CacheKey("drop".into()), vec![sample_match("y")]);

        cache.invalidate(|k| k.0 == "drop");

        assert!(cache.get(&CacheKey("keep".into())).is_some());
        assert!(cache.get(&CacheKey("drop".into())).is_none());
    }

    #[test]
    fn key_file_index_round_trips() {
        let index = KeyFileIndex::default();
        let key = CacheKey("k1".into());
        let files = vec![PathBuf::from("a.py"), PathBuf::from("b.py")];
        index.record(&key, &files);

        let touching = index.keys_touching(&[PathBuf::from("a.py")]);
        assert_eq!(touching, vec![key]);
    }
}
