//! Async image loading orchestrator.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network. Disk entries
//! past their `max-age` are revalidated with `If-None-Match` when an `ETag`
//! was stored; a 304 reuses the stored bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Url;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, info, trace, warn};
use uuid::Uuid;

use crate::domain::entities::{
    CacheKey, CachePolicy, CostFn, DecodedImage, ImageSource, LoadMetrics, LoadOptions,
    LoadedImage, RequestPriority, TargetSize, estimate_cost,
};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{FetchRequest, HttpResponse, Transport};
use crate::infrastructure::config::LoaderConfig;
use crate::infrastructure::http::ReqwestTransport;

use super::coordinator::{RequestCoordinator, SharedResponse};
use super::decoder::{DEFAULT_MAX_CONCURRENT_DECODES, ImageDecoder};
use super::disk_cache::{DiskCacheConfig, DiskCacheError, DiskEntry, DiskImageCache, DiskMeta};
use super::memory_cache::{CacheStats, DEFAULT_MAX_COST, MemoryImageCache, MemoryWarning};

/// Bodies at or below this size never get a preview decode.
const PREVIEW_MIN_BYTES: usize = 2048;
/// Bounding box of a preview, in pixels.
const PREVIEW_SIZE: TargetSize = TargetSize::new(240.0, 240.0);

/// Called with the URL and metrics of every successful load.
pub type MetricsObserver = Arc<dyn Fn(&Url, &LoadMetrics) + Send + Sync>;

/// Errors raised while constructing a loader.
#[derive(Debug, Error)]
pub enum LoaderInitError {
    /// The disk cache could not be opened.
    #[error("failed to open disk cache: {0}")]
    DiskCache(#[from] DiskCacheError),
    /// The network transport could not be created.
    #[error("failed to create transport: {0}")]
    Transport(#[from] LoadError),
}

/// Builder for [`ImageLoader`].
pub struct ImageLoaderBuilder {
    transport: Arc<dyn Transport>,
    disk: Arc<DiskImageCache>,
    memory_budget: usize,
    max_concurrent_decodes: usize,
    cost_fn: CostFn,
    default_options: LoadOptions,
    low_bandwidth: bool,
    observer: Option<MetricsObserver>,
}

impl ImageLoaderBuilder {
    /// Sets the memory cache budget in cost units.
    #[must_use]
    pub const fn memory_budget(mut self, budget: usize) -> Self {
        self.memory_budget = budget;
        self
    }

    /// Sets the decode concurrency limit.
    #[must_use]
    pub const fn max_concurrent_decodes(mut self, limit: usize) -> Self {
        self.max_concurrent_decodes = limit;
        self
    }

    /// Replaces the memory cost estimate.
    #[must_use]
    pub const fn cost_fn(mut self, cost_fn: CostFn) -> Self {
        self.cost_fn = cost_fn;
        self
    }

    /// Sets the options used by [`ImageLoader::load_sized`] and the prefetcher.
    #[must_use]
    pub fn default_options(mut self, options: LoadOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Starts in low-bandwidth mode.
    #[must_use]
    pub const fn low_bandwidth(mut self, enabled: bool) -> Self {
        self.low_bandwidth = enabled;
        self
    }

    /// Installs a metrics observer.
    #[must_use]
    pub fn metrics_observer(mut self, observer: MetricsObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Builds the loader.
    #[must_use]
    pub fn build(self) -> ImageLoader {
        ImageLoader {
            memory: Arc::new(MemoryImageCache::new(self.memory_budget)),
            disk: self.disk,
            decoder: ImageDecoder::new(self.max_concurrent_decodes),
            coordinator: RequestCoordinator::new(),
            transport: self.transport,
            cost_fn: self.cost_fn,
            low_bandwidth: AtomicBool::new(self.low_bandwidth),
            default_options: RwLock::new(self.default_options),
            observer: RwLock::new(self.observer),
        }
    }
}

/// Orchestrates image loading from memory, disk, and network.
///
/// Constructed once and shared behind an `Arc`; every knob can be changed
/// while loads are running.
pub struct ImageLoader {
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    decoder: ImageDecoder,
    coordinator: RequestCoordinator,
    transport: Arc<dyn Transport>,
    cost_fn: CostFn,
    low_bandwidth: AtomicBool,
    default_options: RwLock<LoadOptions>,
    observer: RwLock<Option<MetricsObserver>>,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("memory", &self.memory.stats())
            .field("cache_dir", &self.disk.cache_dir())
            .field("decoder", &self.decoder)
            .field("coordinator", &self.coordinator)
            .field("low_bandwidth", &self.is_low_bandwidth())
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Starts building a loader around a transport and disk cache.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>, disk: Arc<DiskImageCache>) -> ImageLoaderBuilder {
        ImageLoaderBuilder {
            transport,
            disk,
            memory_budget: DEFAULT_MAX_COST,
            max_concurrent_decodes: DEFAULT_MAX_CONCURRENT_DECODES,
            cost_fn: estimate_cost,
            default_options: LoadOptions::default(),
            low_bandwidth: false,
            observer: None,
        }
    }

    /// Creates a loader from configuration, with a reqwest transport and a
    /// disk cache in the configured or platform cache directory.
    ///
    /// # Errors
    /// Returns error if disk cache or HTTP client cannot be created.
    pub async fn from_config(config: &LoaderConfig) -> Result<Self, LoaderInitError> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let disk = match &config.cache_dir {
            Some(dir) => DiskImageCache::new(dir.clone(), config.disk).await?,
            None => DiskImageCache::default_location(config.disk).await?,
        };

        Ok(Self::builder(transport, Arc::new(disk))
            .memory_budget(config.memory_budget_bytes)
            .max_concurrent_decodes(config.max_concurrent_decodes)
            .default_options(config.defaults.to_load_options())
            .low_bandwidth(config.low_bandwidth)
            .build())
    }

    /// Creates a loader with default configuration.
    ///
    /// # Errors
    /// Returns error if disk cache or HTTP client cannot be created.
    pub async fn with_defaults() -> Result<Self, LoaderInitError> {
        Self::from_config(&LoaderConfig::default()).await
    }

    /// Loads an image, checking caches first.
    ///
    /// Dropping the returned future cancels this load only; a network fetch
    /// shared with other callers keeps running for them.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for unusable URLs, `Transport`/`Timeout` once
    /// retries are exhausted, `BadStatus` for non-success responses and
    /// `Decode` for undecodable bodies.
    pub async fn load(&self, url: &str, scale: f32, options: &LoadOptions) -> LoadResult<LoadedImage> {
        self.load_traced(url, scale, options, None).await
    }

    /// Like [`load`](Self::load), but hands a small preview to `on_preview`
    /// before the full decode when the image comes from the network.
    ///
    /// # Errors
    /// Same as [`load`](Self::load).
    pub async fn load_with_preview<F>(
        &self,
        url: &str,
        scale: f32,
        options: &LoadOptions,
        on_preview: F,
    ) -> LoadResult<LoadedImage>
    where
        F: Fn(DecodedImage) + Send + Sync,
    {
        self.load_traced(url, scale, options, Some(&on_preview)).await
    }

    /// Loads with the default options, overriding size, policy and priority.
    ///
    /// # Errors
    /// Same as [`load`](Self::load).
    pub async fn load_sized(
        &self,
        url: &str,
        target_size: Option<TargetSize>,
        scale: f32,
        cache_policy: CachePolicy,
        priority: RequestPriority,
    ) -> LoadResult<LoadedImage> {
        let mut options = self
            .default_options()
            .with_cache_policy(cache_policy)
            .with_priority(priority);
        options.target_size = target_size;
        self.load(url, scale, &options).await
    }

    async fn load_traced(
        &self,
        url: &str,
        scale: f32,
        options: &LoadOptions,
        on_preview: Option<&(dyn Fn(DecodedImage) + Send + Sync)>,
    ) -> LoadResult<LoadedImage> {
        let span = debug_span!(
            "image_load",
            trace_id = %Uuid::new_v4(),
            url = %url,
            ctx = options.log_context.as_deref().unwrap_or("-"),
        );
        async {
            let result = self.load_inner(url, scale, options, on_preview).await;
            match &result {
                Ok(loaded) => {
                    debug!(metrics = %loaded.metrics, "Image loaded");
                    self.notify_observer(url, &loaded.metrics);
                }
                Err(e) => warn!(error = %e, "Image load failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn load_inner(
        &self,
        raw_url: &str,
        scale: f32,
        options: &LoadOptions,
        on_preview: Option<&(dyn Fn(DecodedImage) + Send + Sync)>,
    ) -> LoadResult<LoadedImage> {
        let started_at = Instant::now();
        let url = parse_url(raw_url)?;
        let policy = options.cache_policy;
        let memory_key = CacheKey::for_request(&url, options.target_size, scale, &options.processors);
        let disk_key = CacheKey::for_url(&url);

        if policy.uses_memory()
            && let Some(image) = self.memory.get(&memory_key)
        {
            trace!(key = %memory_key, "Memory cache hit");
            return Ok(LoadedImage {
                image,
                metrics: LoadMetrics::memory_hit(started_at),
            });
        }

        let mut stored = if policy.uses_disk() {
            self.disk.get(&disk_key).await
        } else {
            None
        };

        if let Some(entry) = stored.as_ref().filter(|entry| !entry.is_expired()) {
            match self.decode_and_process(entry.data.clone(), options, scale).await {
                Ok((image, decode_time)) => {
                    self.populate_memory(policy, memory_key, &image);
                    return Ok(LoadedImage {
                        image,
                        metrics: LoadMetrics::new(
                            ImageSource::Disk,
                            started_at,
                            Instant::now(),
                            None,
                            Some(decode_time),
                            Some(entry.data.len()),
                        ),
                    });
                }
                Err(e) => {
                    warn!(key = %disk_key, error = %e, "Discarding undecodable disk entry");
                    self.disk.remove(&disk_key).await;
                    stored = None;
                }
            }
        }

        let etag = stored.as_ref().and_then(DiskEntry::etag).map(String::from);
        let network_start = Instant::now();
        let shared = self
            .fetch_with_retry(&disk_key, &url, options, etag.as_deref())
            .await?;
        // One disk-backed waiter per physical fetch writes to disk.
        let persist = policy.uses_disk() && shared.claim();
        let response = shared.response;

        let (data, source) = match (response.is_not_modified(), stored) {
            (true, Some(entry)) => {
                trace!(key = %disk_key, "Stored entry revalidated");
                if persist {
                    let now = Utc::now();
                    let meta = entry.meta.as_ref().map_or_else(
                        || DiskMeta::from_response(&response, now),
                        |meta| meta.revalidated(&response, now),
                    );
                    self.disk.update_meta(&disk_key, &meta).await;
                }
                (entry.data, ImageSource::Disk)
            }
            (true, None) => {
                // Joined another caller's conditional fetch without bytes of our own.
                debug!(key = %disk_key, "Shared 304 without stored bytes, refetching");
                let response = self
                    .transport
                    .fetch(FetchRequest::new(url.clone(), options.priority))
                    .await?;
                (
                    self.accept_body(&disk_key, response, policy.uses_disk()).await?,
                    ImageSource::Network,
                )
            }
            (false, _) => (
                self.accept_body(&disk_key, response, persist).await?,
                ImageSource::Network,
            ),
        };
        let network_time = network_start.elapsed();

        if source == ImageSource::Network
            && data.len() > PREVIEW_MIN_BYTES
            && let Some(on_preview) = on_preview
        {
            match self
                .decoder
                .decode_downsampled(data.clone(), Some(PREVIEW_SIZE), scale)
                .await
            {
                Ok(preview) => on_preview(preview),
                Err(e) => debug!(error = %e, "Preview decode failed"),
            }
        }

        let downloaded = data.len();
        let (image, decode_time) = self.decode_and_process(data, options, scale).await?;
        self.populate_memory(policy, memory_key, &image);

        Ok(LoadedImage {
            image,
            metrics: LoadMetrics::new(
                source,
                started_at,
                Instant::now(),
                Some(network_time),
                Some(decode_time),
                Some(downloaded),
            ),
        })
    }

    async fn fetch_with_retry(
        &self,
        disk_key: &CacheKey,
        url: &Url,
        options: &LoadOptions,
        etag: Option<&str>,
    ) -> LoadResult<SharedResponse> {
        let max_attempts = options.max_attempts();
        let mut attempt = 1;
        loop {
            let mut request = FetchRequest::new(url.clone(), options.priority);
            if let Some(etag) = etag {
                request = request.with_header("If-None-Match", etag);
            }
            let transport = Arc::clone(&self.transport);
            let result = self
                .coordinator
                .fetch(disk_key, move || async move { transport.fetch(request).await })
                .await;

            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt = attempt, max_attempts = max_attempts, error = %e, "Retrying image fetch");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Validates a full response and persists it when `persist` is set.
    async fn accept_body(
        &self,
        disk_key: &CacheKey,
        response: HttpResponse,
        persist: bool,
    ) -> LoadResult<Bytes> {
        if !response.is_success() {
            return Err(LoadError::BadStatus {
                status: response.status,
            });
        }
        if persist {
            let meta = DiskMeta::from_response(&response, Utc::now());
            self.disk
                .set(disk_key, response.body.clone(), Some(&meta))
                .await;
        }
        Ok(response.body)
    }

    async fn decode_and_process(
        &self,
        data: Bytes,
        options: &LoadOptions,
        scale: f32,
    ) -> LoadResult<(DecodedImage, Duration)> {
        let start = Instant::now();
        let decoded = self
            .decoder
            .decode_downsampled(data, options.target_size, scale)
            .await?;
        if options.processors.is_empty() {
            return Ok((decoded, start.elapsed()));
        }

        let processors = options.processors.clone();
        let source = decoded.into_dynamic();
        let processed = tokio::task::spawn_blocking(move || {
            processors
                .iter()
                .fold(source, |image, processor| processor.process(image))
        })
        .await
        .map_err(|e| LoadError::decode(format!("Processor task panicked: {e}")))?;

        Ok((DecodedImage::new(processed), start.elapsed()))
    }

    fn populate_memory(&self, policy: CachePolicy, key: CacheKey, image: &DecodedImage) {
        if policy.uses_memory() {
            let cost = (self.cost_fn)(image.as_dynamic());
            self.memory.set(key, image.clone(), cost);
        }
    }

    fn notify_observer(&self, url: &str, metrics: &LoadMetrics) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer
            && let Ok(url) = Url::parse(url)
        {
            observer(&url, metrics);
        }
    }

    /// Memory tier.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<MemoryImageCache> {
        &self.memory
    }

    /// Disk tier.
    #[must_use]
    pub fn disk_cache(&self) -> &Arc<DiskImageCache> {
        &self.disk
    }

    /// Number of physical network fetches started so far.
    pub fn network_fetch_count(&self) -> u64 {
        self.coordinator.physical_fetch_count()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Changes the memory budget, evicting immediately if needed.
    pub fn set_memory_budget(&self, budget: usize) {
        self.memory.set_max_cost(budget);
    }

    /// Changes the disk limits, trimming immediately.
    pub async fn set_disk_config(&self, config: DiskCacheConfig) {
        self.disk.set_config(config).await;
    }

    /// Changes the decode concurrency limit.
    pub fn set_max_concurrent_decodes(&self, limit: usize) {
        self.decoder.set_max_concurrent(limit);
    }

    /// Turns low-bandwidth mode on or off. Prefetching is suppressed while on.
    pub fn set_low_bandwidth(&self, enabled: bool) {
        self.low_bandwidth.store(enabled, Ordering::Relaxed);
        debug!(enabled = enabled, "Low-bandwidth mode changed");
    }

    /// Returns true if low-bandwidth mode is on.
    pub fn is_low_bandwidth(&self) -> bool {
        self.low_bandwidth.load(Ordering::Relaxed)
    }

    /// Options used when a caller does not supply its own.
    #[must_use]
    pub fn default_options(&self) -> LoadOptions {
        self.default_options.read().clone()
    }

    /// Replaces the default options.
    pub fn set_default_options(&self, options: LoadOptions) {
        *self.default_options.write() = options;
    }

    /// Installs or removes the metrics observer.
    pub fn set_metrics_observer(&self, observer: Option<MetricsObserver>) {
        *self.observer.write() = observer;
    }

    /// Trims the memory tier whenever a warning arrives on `warnings`.
    pub fn spawn_memory_pressure_listener(
        &self,
        warnings: broadcast::Receiver<MemoryWarning>,
    ) -> JoinHandle<()> {
        self.memory.spawn_pressure_listener(warnings)
    }

    /// Clears all caches.
    pub async fn clear_all_caches(&self) {
        self.memory.clear();
        if let Err(e) = self.disk.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }
}

fn parse_url(raw: &str) -> LoadResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| LoadError::invalid_request(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(LoadError::invalid_request(format!(
            "unsupported URL scheme '{scheme}'"
        ))),
    }
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;
