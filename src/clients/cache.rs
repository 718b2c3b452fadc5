//! Bounded per-client response cache with in-flight deduplication.
//!
//! Keys map to a shared cell; the first caller for a key runs the fetch
//! while concurrent callers for the same key await the same cell instead of
//! issuing their own request (no thundering herd). Capacity is bounded with
//! LRU eviction so long scans cannot grow memory without limit.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Default per-client cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

pub struct RequestCache<K, V> {
    slots: Mutex<LruCache<K, Arc<OnceCell<V>>>>,
}

impl<K, V> RequestCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }

    /// Return the cached value for `key`, or run `fetch` to produce it.
    ///
    /// Concurrent calls with the same key share a single in-flight fetch.
    /// If the fetch fails (returns `None` from the init future's error path),
    /// the slot stays empty and the next caller retries.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            match slots.get(&key) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot = Arc::new(OnceCell::new());
                    slots.put(key, Arc::clone(&slot));
                    slot
                }
            }
        };
        slot.get_or_try_init(fetch).await.cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_caches_successful_fetch() {
        let cache: RequestCache<String, u32> = RequestCache::new(10);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u32, ()> = cache
                .get_or_fetch("key".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(value, Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache: RequestCache<String, u32> = RequestCache::new(10);
        let calls = AtomicUsize::new(0);

        let first: Result<u32, &str> = cache
            .get_or_fetch("key".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom")
            })
            .await;
        assert!(first.is_err());

        let second: Result<u32, &str> = cache
            .get_or_fetch("key".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(second, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache: Arc<RequestCache<String, u32>> = Arc::new(RequestCache::new(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let value: Result<u32, ()> = cache
                    .get_or_fetch("key".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the in-flight slot long enough for the others
                        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                        Ok(9)
                    })
                    .await;
                value.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache: RequestCache<u32, u32> = RequestCache::new(2);
        for key in 0..5u32 {
            let _: Result<u32, ()> = cache.get_or_fetch(key, || async move { Ok(key) }).await;
        }
        assert_eq!(cache.len(), 2);
    }
}
