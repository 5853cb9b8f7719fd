//! Per-call load configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::image::TargetSize;
use crate::domain::ports::ImageProcessor;

/// Which cache tiers a load may read from and write to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Use both memory and disk.
    #[default]
    MemoryAndDisk,
    /// Use only the memory tier.
    MemoryOnly,
    /// Use only the disk tier.
    DiskOnly,
    /// Bypass both tiers.
    NoCache,
}

impl CachePolicy {
    /// Returns true if the memory tier participates.
    #[must_use]
    pub const fn uses_memory(self) -> bool {
        matches!(self, Self::MemoryAndDisk | Self::MemoryOnly)
    }

    /// Returns true if the disk tier participates.
    #[must_use]
    pub const fn uses_disk(self) -> bool {
        matches!(self, Self::MemoryAndDisk | Self::DiskOnly)
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryAndDisk => write!(f, "memory-and-disk"),
            Self::MemoryOnly => write!(f, "memory-only"),
            Self::DiskOnly => write!(f, "disk-only"),
            Self::NoCache => write!(f, "no-cache"),
        }
    }
}

/// Network priority tier passed through to the transport.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RequestPriority {
    /// Background work.
    VeryLow,
    /// Prefetching.
    Low,
    /// On-screen content.
    #[default]
    Normal,
    /// Content the user is waiting on.
    High,
    /// Blocking content.
    VeryHigh,
}

impl RequestPriority {
    /// Relative weight in `0.0..=1.0`, for transports that support weighting.
    #[must_use]
    pub const fn weight(self) -> f32 {
        match self {
            Self::VeryLow => 0.05,
            Self::Low => 0.2,
            Self::Normal => 0.5,
            Self::High => 0.8,
            Self::VeryHigh => 1.0,
        }
    }
}

/// Coarse priority used by the prefetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrefetchPriority {
    /// Default for prefetching.
    #[default]
    Low,
    /// Same as a regular load.
    Normal,
    /// Ahead of regular loads.
    High,
}

impl From<PrefetchPriority> for RequestPriority {
    fn from(priority: PrefetchPriority) -> Self {
        match priority {
            PrefetchPriority::Low => Self::Low,
            PrefetchPriority::Normal => Self::Normal,
            PrefetchPriority::High => Self::High,
        }
    }
}

/// Presentation hint for the caller. The loader never interprets it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Transition {
    /// Show immediately.
    #[default]
    None,
    /// Cross-fade over the given duration.
    Fade(Duration),
}

/// Immutable options for a single load.
#[derive(Clone)]
pub struct LoadOptions {
    /// Tiers the load may use.
    pub cache_policy: CachePolicy,
    /// Network priority.
    pub priority: RequestPriority,
    /// Downsample target, in points.
    pub target_size: Option<TargetSize>,
    /// Post-processors, applied in order after decoding.
    pub processors: Vec<Arc<dyn ImageProcessor>>,
    /// Extra network attempts after the first failure.
    pub retry_count: u32,
    /// Presentation hint.
    pub transition: Transition,
    /// Tag attached to log records for this load.
    pub log_context: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            cache_policy: CachePolicy::default(),
            priority: RequestPriority::default(),
            target_size: None,
            processors: Vec::new(),
            retry_count: 0,
            transition: Transition::None,
            log_context: None,
        }
    }
}

impl LoadOptions {
    /// Sets the cache policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Sets the request priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the downsample target.
    #[must_use]
    pub const fn with_target_size(mut self, target_size: TargetSize) -> Self {
        self.target_size = Some(target_size);
        self
    }

    /// Appends a post-processor.
    #[must_use]
    pub fn with_processor(mut self, processor: impl ImageProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Uses a fade transition.
    #[must_use]
    pub const fn with_fade(mut self, duration: Duration) -> Self {
        self.transition = Transition::Fade(duration);
        self
    }

    /// Sets the log context tag.
    #[must_use]
    pub fn with_log_context(mut self, context: impl Into<String>) -> Self {
        self.log_context = Some(context.into());
        self
    }

    /// Total network attempts for this load.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let processors: Vec<String> = self.processors.iter().map(|p| p.identifier()).collect();
        f.debug_struct("LoadOptions")
            .field("cache_policy", &self.cache_policy)
            .field("priority", &self.priority)
            .field("target_size", &self.target_size)
            .field("processors", &processors)
            .field("retry_count", &self.retry_count)
            .field("transition", &self.transition)
            .field("log_context", &self.log_context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(CachePolicy::MemoryAndDisk, true, true ; "memory_and_disk")]
    #[test_case(CachePolicy::MemoryOnly, true, false ; "memory_only")]
    #[test_case(CachePolicy::DiskOnly, false, true ; "disk_only")]
    #[test_case(CachePolicy::NoCache, false, false ; "no_cache")]
    fn test_policy_tiers(policy: CachePolicy, memory: bool, disk: bool) {
        assert_eq!(policy.uses_memory(), memory);
        assert_eq!(policy.uses_disk(), disk);
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(LoadOptions::default().max_attempts(), 1);
        assert_eq!(LoadOptions::default().with_retry_count(2).max_attempts(), 3);
        assert_eq!(
            LoadOptions::default().with_retry_count(u32::MAX).max_attempts(),
            u32::MAX
        );
    }

    #[test]
    fn test_policy_serializes_kebab_case() {
        let json = serde_json::to_string(&CachePolicy::MemoryAndDisk).unwrap();
        assert_eq!(json, "\"memory-and-disk\"");
    }

    #[test]
    fn test_prefetch_priority_mapping() {
        assert_eq!(RequestPriority::from(PrefetchPriority::Low), RequestPriority::Low);
        assert_eq!(RequestPriority::from(PrefetchPriority::High), RequestPriority::High);
    }
}
