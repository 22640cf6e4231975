//! Page caches fronting SST file I/O.
//!
//! Pages are keyed by `(path, offset, length, is_index)` so index pages and
//! data pages can live in separate caches with different sizes and eviction
//! priorities. The default wiring is a pass-through [`NoCache`]; a real
//! policy ([`FifoCache`], S3-FIFO) can be substituted behind the same
//! trait. [`FifoCache`] additionally guarantees single-flight loads: for
//! concurrent misses on one key the supplier runs at most once and every
//! caller observes the same bytes.

use std::cmp::min;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::Result;
use crate::slice::Slice;

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY_LIMIT: u8 = 3;

/// Identifies one cached page: a byte range of a file, tagged with whether
/// it belongs to the index or a data block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub offset: u64,
    pub length: usize,
    pub is_index: bool,
}

impl CacheKey {
    pub fn for_position(
        path: impl Into<PathBuf>,
        offset: u64,
        length: usize,
        is_index: bool,
    ) -> Self {
        Self { path: path.into(), offset, length, is_index }
    }
}

/// Loads a page on cache miss.
pub type PageSupplier<'a> = &'a mut dyn FnMut(&CacheKey) -> Result<Slice>;

/// A page cache. Implementations must be safe for concurrent `get` calls.
pub trait Cache: Send + Sync {
    /// Returns the page for `key`, loading it through `supplier` on miss.
    fn get(&self, key: &CacheKey, supplier: PageSupplier) -> Result<Slice>;

    fn put(&self, key: CacheKey, value: Slice);

    fn invalidate(&self, key: &CacheKey);

    fn invalidate_all(&self);

    /// A snapshot of the resident pages.
    fn snapshot(&self) -> HashMap<CacheKey, Slice>;
}

/// Pass-through cache: every `get` invokes the supplier, nothing is
/// retained.
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, key: &CacheKey, supplier: PageSupplier) -> Result<Slice> {
        supplier(key)
    }

    fn put(&self, _key: CacheKey, _value: Slice) {}

    fn invalidate(&self, _key: &CacheKey) {}

    fn invalidate_all(&self) {}

    fn snapshot(&self) -> HashMap<CacheKey, Slice> {
        HashMap::new()
    }
}

struct Page {
    value: Slice,
    freq: u8,
}

struct Inner {
    max_cache_size: usize,
    max_main_size: usize,
    /// New entries are added to this queue.
    small: VecDeque<CacheKey>,
    /// Entries that have been accessed at least twice are moved to this queue.
    main: VecDeque<CacheKey>,
    /// Entries evicted from small before being accessed twice are remembered
    /// here by key only, so a re-insert goes straight to main.
    ghost: VecDeque<CacheKey>,
    /// Resident pages.
    pages: HashMap<CacheKey, Page>,
}

impl Inner {
    fn lookup(&mut self, key: &CacheKey) -> Option<Slice> {
        let page = self.pages.get_mut(key)?;
        page.freq = min(page.freq + 1, MAX_FREQUENCY_LIMIT);
        Some(page.value.clone())
    }

    fn insert(&mut self, key: CacheKey, value: Slice) {
        if self.pages.contains_key(&key) {
            self.pages.insert(key, Page { value, freq: 0 });
            return;
        }
        self.evict();

        if let Some(pos) = self.ghost.iter().position(|k| k == &key) {
            self.ghost.remove(pos);
            self.main.push_back(key.clone());
        } else {
            self.small.push_back(key.clone());
        }
        self.pages.insert(key, Page { value, freq: 0 });
    }

    fn remove(&mut self, key: &CacheKey) {
        // Queues are cleaned lazily during eviction.
        self.pages.remove(key);
    }

    fn evict(&mut self) {
        while self.pages.len() >= self.max_cache_size {
            if self.main.len() >= self.max_main_size || self.small.is_empty() {
                self.evict_main();
            } else {
                self.evict_small();
            }
        }
    }

    fn evict_main(&mut self) {
        while let Some(key) = self.main.pop_front() {
            let Some(page) = self.pages.get_mut(&key) else {
                continue; // invalidated, drop the stale queue entry
            };
            if page.freq > 0 {
                page.freq -= 1;
                self.main.push_back(key);
            } else {
                self.pages.remove(&key);
                break;
            }
        }
    }

    fn evict_small(&mut self) {
        while let Some(key) = self.small.pop_front() {
            let Some(page) = self.pages.get(&key) else {
                continue;
            };
            if page.freq > 1 {
                self.main.push_back(key);
            } else {
                self.pages.remove(&key);
                self.push_ghost(key);
                break;
            }
        }
    }

    fn push_ghost(&mut self, key: CacheKey) {
        if self.ghost.len() >= self.max_cache_size {
            self.ghost.pop_back();
        }
        self.ghost.push_front(key);
    }
}

/// Latch published to concurrent callers waiting on one in-flight load.
struct Latch {
    result: Mutex<Option<Result<Slice>>>,
    loaded: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self { result: Mutex::new(None), loaded: Condvar::new() }
    }
}

/// S3-FIFO page cache with single-flight loads.
///
/// New pages enter a small probationary queue; pages accessed at least
/// twice before probation ends get promoted into the main queue, which
/// evicts by frequency-decayed FIFO. Keys of prematurely evicted pages are
/// kept in a ghost queue so their next insert skips probation. Capacity is
/// counted in entries.
pub struct FifoCache {
    inner: Mutex<Inner>,
    inflight: Mutex<HashMap<CacheKey, Arc<Latch>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl FifoCache {
    pub fn new(max_cache_size: usize) -> Self {
        let max_cache_size = max_cache_size.max(1);
        let max_small_size = max_cache_size / 10;
        let max_main_size = max_cache_size - max_small_size;
        Self {
            inner: Mutex::new(Inner {
                max_cache_size,
                max_main_size,
                small: VecDeque::new(),
                main: VecDeque::new(),
                ghost: VecDeque::new(),
                pages: HashMap::new(),
            }),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// (hits, misses) observed so far.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.load(Ordering::SeqCst), self.misses.load(Ordering::SeqCst))
    }

    fn lookup(&self, key: &CacheKey) -> Result<Option<Slice>> {
        Ok(self.inner.lock()?.lookup(key))
    }
}

impl Cache for FifoCache {
    fn get(&self, key: &CacheKey, supplier: PageSupplier) -> Result<Slice> {
        if let Some(value) = self.lookup(key)? {
            self.hits.fetch_add(1, Ordering::SeqCst);
            return Ok(value);
        }

        let (latch, leader) = {
            let mut inflight = self.inflight.lock()?;
            // Recheck under the in-flight lock: a finishing leader removes
            // its latch only after populating the cache.
            if let Some(value) = self.lookup(key)? {
                self.hits.fetch_add(1, Ordering::SeqCst);
                return Ok(value);
            }
            match inflight.get(key) {
                Some(latch) => (latch.clone(), false),
                None => {
                    let latch = Arc::new(Latch::new());
                    inflight.insert(key.clone(), latch.clone());
                    (latch, true)
                }
            }
        };

        if !leader {
            let mut result = latch.result.lock()?;
            while result.is_none() {
                result = latch.loaded.wait(result)?;
            }
            self.hits.fetch_add(1, Ordering::SeqCst);
            return (*result).clone().unwrap();
        }

        self.misses.fetch_add(1, Ordering::SeqCst);
        let loaded = supplier(key);
        if let Ok(value) = &loaded {
            if let Ok(mut inner) = self.inner.lock() {
                inner.insert(key.clone(), value.clone());
            }
        }
        // Publish to waiters and retire the latch even on supplier failure,
        // so no follower blocks forever.
        if let Ok(mut result) = latch.result.lock() {
            *result = Some(loaded.clone());
        }
        latch.loaded.notify_all();
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(key);
        }
        loaded
    }

    fn put(&self, key: CacheKey, value: Slice) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(key, value);
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(key);
        }
    }

    fn invalidate_all(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pages.clear();
            inner.small.clear();
            inner.main.clear();
            inner.ghost.clear();
        }
    }

    fn snapshot(&self) -> HashMap<CacheKey, Slice> {
        match self.inner.lock() {
            Ok(inner) => {
                inner.pages.iter().map(|(k, p)| (k.clone(), p.value.clone())).collect()
            }
            Err(_) => HashMap::new(),
        }
    }
}

/// Holds the index and data page caches for a set of readers.
pub struct CacheManager {
    index_cache: Arc<dyn Cache>,
    data_cache: Arc<dyn Cache>,
}

impl CacheManager {
    /// Pass-through caches for both page kinds.
    pub fn new() -> Self {
        Self { index_cache: Arc::new(NoCache), data_cache: Arc::new(NoCache) }
    }

    pub fn with_caches(index_cache: Arc<dyn Cache>, data_cache: Arc<dyn Cache>) -> Self {
        Self { index_cache, data_cache }
    }

    /// Returns the page for `key`, routed to the index or data cache.
    pub fn get_page(&self, key: &CacheKey, loader: PageSupplier) -> Result<Slice> {
        let cache = if key.is_index { &self.index_cache } else { &self.data_cache };
        cache.get(key, loader)
    }

    pub fn invalidate_page(&self, key: &CacheKey) {
        if key.is_index {
            self.index_cache.invalidate(key);
        } else {
            self.data_cache.invalidate(key);
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::for_position("test.sst", name.len() as u64, 10, false)
    }

    fn page(contents: &str) -> Slice {
        Slice::from(contents.as_bytes())
    }

    fn keyed(offset: u64) -> CacheKey {
        CacheKey::for_position("test.sst", offset, 10, false)
    }

    #[test]
    fn test_cache_key_equality() {
        let a = CacheKey::for_position("x.sst", 0, 10, false);
        let b = CacheKey::for_position("x.sst", 0, 10, false);
        assert_eq!(a, b);

        assert_ne!(a, CacheKey::for_position("y.sst", 0, 10, false));
        assert_ne!(a, CacheKey::for_position("x.sst", 1, 10, false));
        assert_ne!(a, CacheKey::for_position("x.sst", 0, 11, false));
        assert_ne!(a, CacheKey::for_position("x.sst", 0, 10, true));
    }

    #[test]
    fn test_no_cache_always_loads() {
        let cache = NoCache;
        let mut calls = 0;
        for _ in 0..3 {
            let value = cache
                .get(&key("a"), &mut |_| {
                    calls += 1;
                    Ok(page("v"))
                })
                .unwrap();
            assert_eq!(value.as_bytes(), b"v");
        }
        assert_eq!(calls, 3);
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn test_push_and_read() {
        let cache = FifoCache::new(2);
        cache.put(keyed(1), page("red"));
        cache.put(keyed(2), page("yellow"));

        let mut load = |_: &CacheKey| -> Result<Slice> { panic!("unexpected load") };
        assert_eq!(cache.get(&keyed(1), &mut load).unwrap().as_bytes(), b"red");
        assert_eq!(cache.get(&keyed(2), &mut load).unwrap().as_bytes(), b"yellow");
        assert_eq!(cache.stats(), (2, 0));
    }

    #[test]
    fn test_insert_evicts_oldest() {
        let cache = FifoCache::new(2);
        for offset in 1..=5 {
            cache.put(keyed(offset), page("v"));
        }

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.contains_key(&keyed(1)));
        assert!(snapshot.contains_key(&keyed(4)));
        assert!(snapshot.contains_key(&keyed(5)));
    }

    #[test]
    fn test_ghost_reinsert_promotes_to_main() {
        let cache = FifoCache::new(2);
        cache.put(keyed(1), page("a"));
        cache.put(keyed(2), page("b"));
        cache.put(keyed(3), page("c")); // evicts 1 into the ghost queue
        cache.put(keyed(1), page("a")); // ghosted key goes straight to main

        let mut load = |_: &CacheKey| -> Result<Slice> { panic!("unexpected load") };
        assert_eq!(cache.get(&keyed(1), &mut load).unwrap().as_bytes(), b"a");
    }

    #[test]
    fn test_get_loads_once_then_hits() {
        let cache = FifoCache::new(4);
        let mut calls = 0;
        for _ in 0..3 {
            let value = cache
                .get(&keyed(7), &mut |_| {
                    calls += 1;
                    Ok(page("loaded"))
                })
                .unwrap();
            assert_eq!(value.as_bytes(), b"loaded");
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_invalidate() {
        let cache = FifoCache::new(4);
        cache.put(keyed(1), page("v"));
        cache.invalidate(&keyed(1));

        let mut calls = 0;
        cache
            .get(&keyed(1), &mut |_| {
                calls += 1;
                Ok(page("v2"))
            })
            .unwrap();
        assert_eq!(calls, 1);

        cache.invalidate_all();
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn test_load_errors_are_not_cached() {
        let cache = FifoCache::new(4);
        let result = cache.get(&keyed(1), &mut |_| errcorrupt!("bad page"));
        assert!(result.is_err());

        let mut calls = 0;
        let value = cache
            .get(&keyed(1), &mut |_| {
                calls += 1;
                Ok(page("ok"))
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(value.as_bytes(), b"ok");
    }

    #[test]
    fn test_single_flight_coalesces_concurrent_loads() {
        let cache = Arc::new(FifoCache::new(4));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(thread::spawn(move || {
                let value = cache
                    .get(&keyed(9), &mut |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(page("shared"))
                    })
                    .unwrap();
                value.as_bytes().to_vec()
            }));
        }

        for handle in handles {
            assert_eq!(handle.join().unwrap(), b"shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manager_routes_by_page_kind() {
        let index = Arc::new(FifoCache::new(4));
        let data = Arc::new(FifoCache::new(4));
        let manager = CacheManager::with_caches(index.clone(), data.clone());

        let index_key = CacheKey::for_position("f.sst", 0, 8, true);
        let data_key = CacheKey::for_position("f.sst", 0, 8, false);
        manager.get_page(&index_key, &mut |_| Ok(page("i"))).unwrap();
        manager.get_page(&data_key, &mut |_| Ok(page("d"))).unwrap();

        assert_eq!(index.snapshot().len(), 1);
        assert_eq!(data.snapshot().len(), 1);

        manager.invalidate_page(&index_key);
        assert!(index.snapshot().is_empty());
        assert_eq!(data.snapshot().len(), 1);
    }
}
