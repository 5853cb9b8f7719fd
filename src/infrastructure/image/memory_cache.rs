//! In-memory LRU image cache bounded by decoded byte cost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, DecodedImage};

/// Default cost budget (50 MiB of decoded pixels).
pub const DEFAULT_MAX_COST: usize = 50 * 1024 * 1024;

/// Platform low-memory notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWarning;

struct Entry {
    image: DecodedImage,
    cost: usize,
}

struct State {
    entries: LruCache<CacheKey, Entry>,
    total_cost: usize,
    max_cost: usize,
}

impl State {
    fn trim_to(&mut self, target: usize) -> usize {
        let mut evicted = 0;
        while self.total_cost > target {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_cost -= entry.cost;
            evicted += 1;
            trace!(key = %key, cost = entry.cost, "Evicted image from memory cache");
        }
        evicted
    }

    fn trim_to_budget(&mut self) -> usize {
        if self.max_cost == 0 {
            let evicted = self.entries.len();
            self.entries.clear();
            self.total_cost = 0;
            return evicted;
        }
        let max_cost = self.max_cost;
        self.trim_to(max_cost)
    }
}

/// In-memory LRU cache for decoded images.
///
/// Every operation takes a short, non-async lock, so it is safe to call from
/// any thread or task.
pub struct MemoryImageCache {
    state: Mutex<State>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the given cost budget in bytes.
    #[must_use]
    pub fn new(max_cost: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: LruCache::unbounded(),
                total_cost: 0,
                max_cost,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default budget.
    #[must_use]
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MAX_COST)
    }

    /// Returns an image and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<DecodedImage> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<DecodedImage> {
        let state = self.state.lock();
        state.entries.peek(key).map(|entry| entry.image.clone())
    }

    /// Returns true if the key is cached, without promoting it.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Inserts or replaces an image, then evicts least recently used entries
    /// until the total cost fits the budget.
    pub fn set(&self, key: CacheKey, image: DecodedImage, cost: usize) {
        let mut state = self.state.lock();
        trace!(key = %key, cost = cost, "Storing image in memory cache");
        if let Some(previous) = state.entries.put(key, Entry { image, cost }) {
            state.total_cost -= previous.cost;
        }
        state.total_cost += cost;
        let evicted = state.trim_to_budget();
        if evicted > 0 {
            debug!(
                evicted = evicted,
                total_cost = state.total_cost,
                max_cost = state.max_cost,
                "Memory cache over budget, evicted entries"
            );
        }
    }

    /// Removes an image.
    pub fn remove(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.pop(key) {
            state.total_cost -= entry.cost;
            debug!(key = %key, "Removed image from memory cache");
        }
    }

    /// Removes all images.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    /// Changes the budget and trims immediately.
    pub fn set_max_cost(&self, max_cost: usize) {
        let mut state = self.state.lock();
        state.max_cost = max_cost;
        state.trim_to_budget();
    }

    /// Current budget in bytes.
    pub fn max_cost(&self) -> usize {
        self.state.lock().max_cost
    }

    /// Sum of the costs of all cached images.
    pub fn total_cost(&self) -> usize {
        self.state.lock().total_cost
    }

    /// Number of cached images.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts least recently used entries until the total cost is at most `target`.
    pub fn trim_to(&self, target: usize) {
        let evicted = self.state.lock().trim_to(target);
        debug!(target = target, evicted = evicted, "Trimmed memory cache");
    }

    /// Sheds three quarters of the budget in response to memory pressure.
    pub fn handle_memory_warning(&self) {
        let target = self.max_cost() / 4;
        self.trim_to(target);
    }

    /// Trims the cache whenever a warning arrives on `warnings`.
    ///
    /// The listener holds only a weak reference and stops once the cache is
    /// dropped or the sender closes.
    pub fn spawn_pressure_listener(
        self: &Arc<Self>,
        mut warnings: broadcast::Receiver<MemoryWarning>,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match warnings.recv().await {
                    Ok(MemoryWarning) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        cache.handle_memory_warning();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
            total_cost: state.total_cost,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current total cost in bytes.
    pub total_cost: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn image() -> DecodedImage {
        DecodedImage::new(image::DynamicImage::new_rgb8(1, 1))
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name)
    }

    #[test]
    fn test_set_then_get_and_remove() {
        let cache = MemoryImageCache::new(100);
        let img = image();

        cache.set(key("a"), img.clone(), 10);
        let retrieved = cache.get(&key("a")).unwrap();
        assert!(retrieved.ptr_eq(&img));

        cache.remove(&key("a"));
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_evicts_least_recently_used_until_within_budget() {
        let cache = MemoryImageCache::new(30);

        cache.set(key("a"), image(), 10);
        cache.set(key("b"), image(), 10);
        cache.set(key("c"), image(), 10);

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get(&key("a")).is_some());

        cache.set(key("d"), image(), 15);

        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("c")).is_none());
        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("d")).is_some());
        assert_eq!(cache.total_cost(), 25);
    }

    #[test]
    fn test_replace_adjusts_total_cost() {
        let cache = MemoryImageCache::new(100);
        cache.set(key("a"), image(), 40);
        cache.set(key("a"), image(), 15);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 15);
    }

    #[test]
    fn test_total_cost_never_exceeds_budget() {
        let cache = MemoryImageCache::new(64);
        for i in 0..200usize {
            cache.set(key(&format!("k{i}")), image(), (i * 7) % 23 + 1);
            if i % 3 == 0 {
                let _ = cache.get(&key(&format!("k{}", i / 2)));
            }
            assert!(cache.total_cost() <= 64);
        }
    }

    #[test]
    fn test_zero_budget_evicts_everything() {
        let cache = MemoryImageCache::new(100);
        cache.set(key("a"), image(), 0);
        cache.set(key("b"), image(), 10);

        cache.set_max_cost(0);
        assert!(cache.is_empty());

        cache.set(key("c"), image(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shrinking_budget_retrims() {
        let cache = MemoryImageCache::new(100);
        cache.set(key("a"), image(), 40);
        cache.set(key("b"), image(), 40);

        cache.set_max_cost(50);
        assert!(cache.peek(&key("a")).is_none());
        assert!(cache.peek(&key("b")).is_some());
        assert_eq!(cache.max_cost(), 50);
    }

    #[test]
    fn test_memory_warning_trims_to_quarter() {
        let cache = MemoryImageCache::new(100);
        for name in ["a", "b", "c", "d"] {
            cache.set(key(name), image(), 20);
        }

        cache.handle_memory_warning();

        assert!(cache.total_cost() <= 25);
        assert!(cache.peek(&key("d")).is_some());
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(20);
        cache.set(key("a"), image(), 10);
        cache.set(key("b"), image(), 10);

        let _ = cache.peek(&key("a"));
        cache.set(key("c"), image(), 10);

        assert!(cache.peek(&key("a")).is_none());
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(100);
        cache.set(key("a"), image(), 3);

        let _ = cache.get(&key("a"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.total_cost, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_respect_budget() {
        let cache = Arc::new(MemoryImageCache::new(500));
        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    cache.set(key(&format!("{task}-{i}")), image(), 7);
                    let _ = cache.get(&key(&format!("{task}-{}", i / 2)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(cache.total_cost() <= 500);
        assert_eq!(cache.total_cost(), cache.len() * 7);
    }

    #[tokio::test]
    async fn test_pressure_listener_trims_on_warning() {
        let cache = Arc::new(MemoryImageCache::new(100));
        for name in ["a", "b", "c", "d", "e"] {
            cache.set(key(name), image(), 20);
        }
        let (tx, rx) = broadcast::channel(4);
        let listener = cache.spawn_pressure_listener(rx);

        tx.send(MemoryWarning).unwrap();
        for _ in 0..50 {
            if cache.total_cost() <= 25 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.total_cost() <= 25);

        drop(tx);
        listener.await.unwrap();
    }
}
