//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with cost-bounded LRU eviction
//! - Disk caching with revalidation metadata
//! - Request coalescing and bounded-concurrency decoding
//! - The async loading pipeline and prefetcher

pub mod coordinator;
pub mod decoder;
pub mod disk_cache;
pub mod loader;
pub mod memory_cache;
pub mod prefetcher;
pub mod processors;

pub use coordinator::{RequestCoordinator, SharedResponse};
pub use decoder::{DEFAULT_MAX_CONCURRENT_DECODES, ImageDecoder};
pub use disk_cache::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_CACHE_SIZE, DiskCacheConfig, DiskCacheError, DiskEntry,
    DiskImageCache, DiskMeta, DiskUsage, TrimReport, default_cache_dir,
};
pub use loader::{ImageLoader, ImageLoaderBuilder, LoaderInitError, MetricsObserver};
pub use memory_cache::{CacheStats, DEFAULT_MAX_COST, MemoryImageCache, MemoryWarning};
pub use prefetcher::Prefetcher;
pub use processors::{Blur, CenterCrop, Resize, RoundCorners};
