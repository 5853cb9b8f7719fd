//! Fire-and-forget cache warming.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use tokio::task::AbortHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::domain::entities::{CacheKey, CachePolicy, PrefetchPriority, RequestPriority, TargetSize};

use super::loader::ImageLoader;

struct PrefetchTask {
    id: Uuid,
    abort: AbortHandle,
}

type TaskMap = Arc<Mutex<HashMap<CacheKey, PrefetchTask>>>;

/// Loads images in the background so later loads hit the cache.
///
/// At most one prefetch runs per URL. Failures are logged and dropped.
pub struct Prefetcher {
    loader: Arc<ImageLoader>,
    tasks: TaskMap,
}

impl Prefetcher {
    /// Creates a prefetcher feeding `loader`'s caches.
    #[must_use]
    pub fn new(loader: Arc<ImageLoader>) -> Self {
        Self {
            loader,
            tasks: Arc::default(),
        }
    }

    /// Prefetches at native size with a coarse priority.
    pub fn prefetch<I, S>(&self, urls: I, cache_policy: CachePolicy, priority: PrefetchPriority)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.prefetch_sized(urls, cache_policy, priority.into(), None, 1.0);
    }

    /// Prefetches, decoding for the given target size and scale.
    ///
    /// Does nothing for `CachePolicy::NoCache` or in low-bandwidth mode.
    /// URLs whose target tier already holds the image are skipped.
    pub fn prefetch_sized<I, S>(
        &self,
        urls: I,
        cache_policy: CachePolicy,
        priority: RequestPriority,
        target_size: Option<TargetSize>,
        scale: f32,
    ) where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if cache_policy == CachePolicy::NoCache {
            return;
        }
        if self.loader.is_low_bandwidth() {
            trace!("Low-bandwidth mode, skipping prefetch");
            return;
        }

        let mut options = self
            .loader
            .default_options()
            .with_cache_policy(cache_policy)
            .with_priority(priority)
            .with_log_context("prefetch");
        options.target_size = target_size;
        options.processors.clear();

        for raw in urls {
            let raw = raw.as_ref();
            let Ok(url) = Url::parse(raw) else {
                debug!(url = raw, "Skipping prefetch of invalid URL");
                continue;
            };
            let memory_key = CacheKey::for_size(&url, target_size, scale);
            if cache_policy.uses_memory() && self.loader.memory_cache().contains(&memory_key) {
                continue;
            }

            let key = CacheKey::for_url(&url);
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(&key) {
                continue;
            }

            let id = Uuid::new_v4();
            let loader = Arc::clone(&self.loader);
            let task_map = Arc::clone(&self.tasks);
            let task_key = key.clone();
            let options = options.clone();
            let handle = tokio::spawn(async move {
                let already_on_disk = cache_policy == CachePolicy::DiskOnly
                    && loader.disk_cache().contains(&task_key).await;
                if !already_on_disk
                    && let Err(e) = loader.load(task_key.as_str(), scale, &options).await
                {
                    debug!(key = %task_key, error = %e, "Prefetch failed");
                }
                let mut tasks = task_map.lock();
                if tasks.get(&task_key).is_some_and(|task| task.id == id) {
                    tasks.remove(&task_key);
                }
            });
            tasks.insert(
                key,
                PrefetchTask {
                    id,
                    abort: handle.abort_handle(),
                },
            );
        }
    }

    /// Aborts prefetches for the given URLs.
    pub fn cancel<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tasks = self.tasks.lock();
        for raw in urls {
            let Ok(url) = Url::parse(raw.as_ref()) else {
                continue;
            };
            if let Some(task) = tasks.remove(&CacheKey::for_url(&url)) {
                task.abort.abort();
                trace!(url = %url, "Cancelled prefetch");
            }
        }
    }

    /// Aborts every running prefetch.
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock();
        let count = tasks.len();
        for (_, task) in tasks.drain() {
            task.abort.abort();
        }
        if count > 0 {
            debug!(count = count, "Cancelled all prefetches");
        }
    }

    /// Number of prefetches still running.
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true if a prefetch for `url` is running.
    pub fn is_prefetching(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| self.tasks.lock().contains_key(&CacheKey::for_url(&url)))
    }
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::domain::entities::{ImageSource, LoadOptions};
    use crate::domain::errors::{LoadError, LoadResult};
    use crate::domain::ports::{FetchRequest, HttpResponse, Transport};
    use crate::infrastructure::image::decoder::png_bytes;
    use crate::infrastructure::image::disk_cache::{DiskCacheConfig, DiskImageCache};

    struct SlowTransport {
        latency: Duration,
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn fetch(&self, _request: FetchRequest) -> LoadResult<HttpResponse> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            if self.fail {
                return Err(LoadError::transport("offline"));
            }
            Ok(HttpResponse::new(
                200,
                Vec::<(String, String)>::new(),
                png_bytes(8, 8),
            ))
        }
    }

    async fn setup(latency_ms: u64, fail: bool) -> (Prefetcher, Arc<ImageLoader>, Arc<SlowTransport>, TempDir) {
        let transport = Arc::new(SlowTransport {
            latency: Duration::from_millis(latency_ms),
            fetches: AtomicUsize::new(0),
            fail,
        });
        let dir = TempDir::new().unwrap();
        let disk = DiskImageCache::new(dir.path().to_path_buf(), DiskCacheConfig::default())
            .await
            .unwrap();
        let loader = Arc::new(ImageLoader::builder(transport.clone(), Arc::new(disk)).build());
        (Prefetcher::new(Arc::clone(&loader)), loader, transport, dir)
    }

    async fn wait_idle(prefetcher: &Prefetcher) {
        for _ in 0..200 {
            if prefetcher.pending_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("prefetches did not finish");
    }

    const A: &str = "https://images.example.com/a.png";
    const B: &str = "https://images.example.com/b.png";

    #[tokio::test]
    async fn test_prefetch_warms_memory_and_disk() {
        let (prefetcher, loader, transport, _dir) = setup(5, false).await;

        prefetcher.prefetch([A, B], CachePolicy::MemoryAndDisk, PrefetchPriority::Low);
        wait_idle(&prefetcher).await;

        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
        assert!(loader.memory_cache().contains(&CacheKey::new(A)));
        assert!(loader.disk_cache().contains(&CacheKey::new(B)).await);

        let loaded = loader
            .load(A, 1.0, &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(loaded.metrics.source(), ImageSource::Memory);
    }

    #[tokio::test]
    async fn test_duplicate_urls_prefetch_once() {
        let (prefetcher, _loader, transport, _dir) = setup(30, false).await;

        prefetcher.prefetch([A, A], CachePolicy::MemoryAndDisk, PrefetchPriority::Low);
        prefetcher.prefetch([A], CachePolicy::MemoryAndDisk, PrefetchPriority::High);
        assert_eq!(prefetcher.pending_count(), 1);
        wait_idle(&prefetcher).await;

        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_urls_are_skipped() {
        let (prefetcher, loader, transport, _dir) = setup(5, false).await;
        loader
            .load(A, 1.0, &LoadOptions::default())
            .await
            .unwrap();

        prefetcher.prefetch([A], CachePolicy::MemoryAndDisk, PrefetchPriority::Low);

        assert_eq!(prefetcher.pending_count(), 0);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_cache_and_low_bandwidth_are_no_ops() {
        let (prefetcher, loader, transport, _dir) = setup(5, false).await;

        prefetcher.prefetch([A], CachePolicy::NoCache, PrefetchPriority::Low);
        loader.set_low_bandwidth(true);
        prefetcher.prefetch([B], CachePolicy::MemoryAndDisk, PrefetchPriority::Low);

        assert_eq!(prefetcher.pending_count(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_specific_prefetch() {
        let (prefetcher, loader, _transport, _dir) = setup(50, false).await;

        prefetcher.prefetch([A, B], CachePolicy::MemoryAndDisk, PrefetchPriority::Low);
        tokio::time::sleep(Duration::from_millis(5)).await;
        prefetcher.cancel([A]);

        assert!(!prefetcher.is_prefetching(A));
        assert!(prefetcher.is_prefetching(B));
        wait_idle(&prefetcher).await;

        assert!(!loader.memory_cache().contains(&CacheKey::new(A)));
        assert!(loader.memory_cache().contains(&CacheKey::new(B)));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (prefetcher, loader, _transport, _dir) = setup(50, false).await;

        prefetcher.prefetch([A, B], CachePolicy::MemoryAndDisk, PrefetchPriority::Low);
        prefetcher.cancel_all();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(prefetcher.pending_count(), 0);
        assert!(loader.memory_cache().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let (prefetcher, loader, transport, _dir) = setup(5, true).await;

        prefetcher.prefetch([A], CachePolicy::MemoryAndDisk, PrefetchPriority::Normal);
        wait_idle(&prefetcher).await;

        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert!(loader.memory_cache().is_empty());
    }

    #[tokio::test]
    async fn test_sized_prefetch_uses_sized_memory_key() {
        let (prefetcher, loader, _transport, _dir) = setup(5, false).await;

        prefetcher.prefetch_sized(
            [A],
            CachePolicy::MemoryOnly,
            RequestPriority::Low,
            Some(TargetSize::new(4.0, 4.0)),
            2.0,
        );
        wait_idle(&prefetcher).await;

        assert!(loader.memory_cache().contains(&CacheKey::new(format!("{A}@4x4@2.00"))));
        assert!(!loader.memory_cache().contains(&CacheKey::new(A)));
    }
}
