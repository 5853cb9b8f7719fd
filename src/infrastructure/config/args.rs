use super::app_config::LogLevel;
use crate::domain::entities::{CachePolicy, RequestPriority};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "pixfetch",
    version,
    about = "Fetch, cache and decode images",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", env = "PIXFETCH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache budget in bytes.
    #[arg(long, value_name = "BYTES")]
    pub memory_budget: Option<usize>,

    /// Maximum concurrent decodes.
    #[arg(long)]
    pub max_concurrent_decodes: Option<usize>,

    /// Suppress prefetching.
    #[arg(long)]
    pub low_bandwidth: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load one image and report where it came from.
    Load {
        /// Image URL.
        url: String,

        /// Target width in points.
        #[arg(long, requires = "height")]
        width: Option<f32>,

        /// Target height in points.
        #[arg(long, requires = "width")]
        height: Option<f32>,

        /// Display scale.
        #[arg(long, default_value_t = 1.0)]
        scale: f32,

        /// Cache policy.
        #[arg(long, value_enum)]
        policy: Option<CachePolicy>,

        /// Request priority.
        #[arg(long, value_enum)]
        priority: Option<RequestPriority>,

        /// Extra network attempts.
        #[arg(long)]
        retries: Option<u32>,

        /// Write the decoded image to this file.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Warm the caches for several images.
    Prefetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Cache policy.
        #[arg(long, value_enum, default_value_t = CachePolicy::MemoryAndDisk)]
        policy: CachePolicy,
    },

    /// Trim the disk cache.
    Trim {
        /// Size limit in bytes. Defaults to the configured limit.
        #[arg(long, value_name = "BYTES")]
        max_bytes: Option<u64>,

        /// Age limit in seconds. Defaults to the configured limit.
        #[arg(long, value_name = "SECS")]
        max_age_secs: Option<u64>,
    },

    /// Remove every cached image.
    Clear,
}
