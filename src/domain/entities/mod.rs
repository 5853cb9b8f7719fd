//! Domain entity definitions.

mod cache_key;
mod image;
mod load_metrics;
mod load_options;

pub use cache_key::CacheKey;
pub use image::{CostFn, DecodedImage, ImageSource, TargetSize, estimate_cost};
pub use load_metrics::{LoadMetrics, LoadedImage};
pub use load_options::{CachePolicy, LoadOptions, PrefetchPriority, RequestPriority, Transition};
