//! Decoded-page cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sysinfo::System;

use arbor_common::{ArborError, CachePolicy, PageIdentity, Result};

/// Shared handle to a cached page.
///
/// Pages are mutated in place behind the lock; every handle observes the
/// same state.
pub type SharedPage<P> = Arc<RwLock<P>>;

struct CacheInner<P> {
    map: HashMap<PageIdentity, SharedPage<P>>,
    /// Insertion order, oldest first. Kept in sync with `map`.
    order: VecDeque<PageIdentity>,
}

/// Bounded cache mapping page identities to decoded pages.
///
/// Misses are filled through a caller-supplied loader so the cache stays
/// independent of any particular file format. At full capacity a miss
/// either fails ([`CachePolicy::Fatal`]) or drops the oldest entry in
/// insertion order ([`CachePolicy::Evict`]).
pub struct PageCache<P> {
    capacity: usize,
    policy: CachePolicy,
    inner: Mutex<CacheInner<P>>,
}

impl<P> PageCache<P> {
    /// Creates a cache holding at most `capacity` pages.
    pub fn new(capacity: usize, policy: CachePolicy) -> Self {
        Self {
            capacity,
            policy,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Creates a cache sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and allocates 25% of it,
    /// counted in pages of `page_size` bytes. Minimum 1,000 pages so that
    /// caching stays useful on low-memory systems.
    pub fn auto_sized(policy: CachePolicy, page_size: usize) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4; // 25% of available RAM
        let capacity = (target_bytes / page_size).max(1_000);

        Self::new(capacity, policy)
    }

    /// Returns the maximum number of pages this cache holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the configured full-cache policy.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Returns the number of cached pages.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if no pages are cached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Returns true if `pid` is currently cached.
    pub fn contains(&self, pid: PageIdentity) -> bool {
        self.inner.lock().map.contains_key(&pid)
    }

    /// Returns the cached page for `pid`, if present.
    pub fn get(&self, pid: PageIdentity) -> Option<SharedPage<P>> {
        self.inner.lock().map.get(&pid).cloned()
    }

    /// Returns the cached page for `pid`, loading it on a miss.
    ///
    /// The loader runs without the cache lock held, so concurrent misses
    /// for different pages do not serialize on each other. If two threads
    /// race on the same page, one load wins and the other is dropped.
    pub fn get_or_load<F>(&self, pid: PageIdentity, loader: F) -> Result<SharedPage<P>>
    where
        F: FnOnce() -> Result<P>,
    {
        if let Some(page) = self.get(pid) {
            return Ok(page);
        }

        let loaded = loader()?;

        let mut inner = self.inner.lock();
        if let Some(page) = inner.map.get(&pid) {
            return Ok(Arc::clone(page));
        }

        if inner.map.len() >= self.capacity {
            match self.policy {
                CachePolicy::Fatal => {
                    return Err(ArborError::CacheFull {
                        capacity: self.capacity,
                    });
                }
                CachePolicy::Evict => {
                    if let Some(oldest) = inner.order.pop_front() {
                        inner.map.remove(&oldest);
                    }
                }
            }
        }

        let page = Arc::new(RwLock::new(loaded));
        inner.map.insert(pid, Arc::clone(&page));
        inner.order.push_back(pid);
        Ok(page)
    }

    /// Removes `pid` from the cache.
    ///
    /// Used when a page's on-disk content is about to be rewritten out of
    /// band, so a later fetch re-reads the file instead of serving stale
    /// memory.
    pub fn discard(&self, pid: PageIdentity) {
        let mut inner = self.inner.lock();
        if inner.map.remove(&pid).is_some() {
            inner.order.retain(|p| *p != pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::PageCategory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_cache(capacity: usize, policy: CachePolicy) -> PageCache<u32> {
        PageCache::new(capacity, policy)
    }

    fn pid(page_no: u32) -> PageIdentity {
        PageIdentity::new(1, page_no, PageCategory::Leaf)
    }

    #[test]
    fn test_cache_new() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        assert_eq!(cache.capacity(), 10);
        assert_eq!(cache.policy(), CachePolicy::Fatal);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_miss_returns_none() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        assert!(cache.get(pid(1)).is_none());
    }

    #[test]
    fn test_get_or_load_loads_once() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        let loads = AtomicUsize::new(0);

        let page = cache
            .get_or_load(pid(1), || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .unwrap();
        assert_eq!(*page.read(), 42);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let page = cache
            .get_or_load(pid(1), || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(99)
            })
            .unwrap();
        assert_eq!(*page.read(), 42);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_after_load() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        cache.get_or_load(pid(3), || Ok(7)).unwrap();

        let page = cache.get(pid(3)).unwrap();
        assert_eq!(*page.read(), 7);
        assert!(cache.contains(pid(3)));
    }

    #[test]
    fn test_discard_forces_reload() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        cache.get_or_load(pid(1), || Ok(1)).unwrap();

        cache.discard(pid(1));
        assert!(cache.get(pid(1)).is_none());
        assert_eq!(cache.len(), 0);

        let page = cache.get_or_load(pid(1), || Ok(2)).unwrap();
        assert_eq!(*page.read(), 2);
    }

    #[test]
    fn test_fatal_policy_when_full() {
        let cache = create_test_cache(2, CachePolicy::Fatal);
        cache.get_or_load(pid(1), || Ok(1)).unwrap();
        cache.get_or_load(pid(2), || Ok(2)).unwrap();

        let err = cache.get_or_load(pid(3), || Ok(3)).unwrap_err();
        assert!(matches!(err, ArborError::CacheFull { capacity: 2 }));

        // Existing entries unaffected
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(pid(1)));
        assert!(cache.contains(pid(2)));
    }

    #[test]
    fn test_evict_policy_drops_oldest() {
        let cache = create_test_cache(2, CachePolicy::Evict);
        cache.get_or_load(pid(1), || Ok(1)).unwrap();
        cache.get_or_load(pid(2), || Ok(2)).unwrap();
        cache.get_or_load(pid(3), || Ok(3)).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(pid(1)).is_none());
        assert!(cache.contains(pid(2)));
        assert!(cache.contains(pid(3)));
    }

    #[test]
    fn test_eviction_is_insertion_order_not_access_order() {
        let cache = create_test_cache(2, CachePolicy::Evict);
        cache.get_or_load(pid(1), || Ok(1)).unwrap();
        cache.get_or_load(pid(2), || Ok(2)).unwrap();

        // Touching page 1 does not protect it; order is FIFO.
        assert!(cache.get(pid(1)).is_some());
        cache.get_or_load(pid(3), || Ok(3)).unwrap();

        assert!(cache.get(pid(1)).is_none());
        assert!(cache.contains(pid(2)));
        assert!(cache.contains(pid(3)));
    }

    #[test]
    fn test_discarded_entry_does_not_count_toward_capacity() {
        let cache = create_test_cache(2, CachePolicy::Fatal);
        cache.get_or_load(pid(1), || Ok(1)).unwrap();
        cache.get_or_load(pid(2), || Ok(2)).unwrap();

        cache.discard(pid(1));
        cache.get_or_load(pid(3), || Ok(3)).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_loader_error_propagates() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        let err = cache
            .get_or_load(pid(1), || Err(ArborError::ReadPastEnd { page_no: 1 }))
            .unwrap_err();
        assert!(matches!(err, ArborError::ReadPastEnd { page_no: 1 }));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_shared_mutation_visible_through_all_handles() {
        let cache = create_test_cache(10, CachePolicy::Fatal);
        let first = cache.get_or_load(pid(1), || Ok(10)).unwrap();

        *first.write() = 20;

        let second = cache.get(pid(1)).unwrap();
        assert_eq!(*second.read(), 20);
    }

    #[test]
    fn test_auto_sized_has_floor() {
        let cache: PageCache<u32> = PageCache::auto_sized(CachePolicy::Fatal, 4096);
        assert!(cache.capacity() >= 1_000);
    }
}
