//! Infrastructure layer with caches, transport and configuration adapters.

/// Loader configuration.
pub mod config;
/// Network transport.
pub mod http;
/// Image handling (caching, decoding, loading, prefetching).
pub mod image;

pub use config::{CliArgs, ConfigStore, LoaderConfig, LogLevel};
pub use http::ReqwestTransport;
pub use image::{
    CacheStats, DiskCacheConfig, DiskImageCache, ImageDecoder, ImageLoader, MemoryImageCache,
    MemoryWarning, Prefetcher, RequestCoordinator,
};
