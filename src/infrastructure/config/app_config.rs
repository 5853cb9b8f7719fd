//! Loader configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::args::CliArgs;
use crate::domain::entities::{CachePolicy, LoadOptions, RequestPriority};
use crate::infrastructure::image::{DEFAULT_MAX_CONCURRENT_DECODES, DEFAULT_MAX_COST, DiskCacheConfig};

pub(super) const APP_NAME: &str = "pixfetch";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Loader configuration, persisted as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Disk cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache budget in bytes.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: usize,

    /// Maximum concurrent decodes.
    #[serde(default = "default_max_concurrent_decodes")]
    pub max_concurrent_decodes: usize,

    /// Network request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Suppress prefetching.
    #[serde(default)]
    pub low_bandwidth: bool,

    /// Disk cache limits.
    #[serde(default)]
    pub disk: DiskCacheConfig,

    /// Options applied to loads that do not supply their own.
    #[serde(default)]
    pub defaults: DefaultLoadOptions,
}

/// Serializable subset of `LoadOptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultLoadOptions {
    /// Cache policy.
    #[serde(default)]
    pub cache_policy: CachePolicy,

    /// Request priority.
    #[serde(default)]
    pub priority: RequestPriority,

    /// Extra network attempts.
    #[serde(default)]
    pub retry_count: u32,
}

impl DefaultLoadOptions {
    /// Builds load options from these defaults.
    #[must_use]
    pub fn to_load_options(self) -> LoadOptions {
        LoadOptions::default()
            .with_cache_policy(self.cache_policy)
            .with_priority(self.priority)
            .with_retry_count(self.retry_count)
    }
}

const fn default_memory_budget() -> usize {
    DEFAULT_MAX_COST
}

const fn default_max_concurrent_decodes() -> usize {
    DEFAULT_MAX_CONCURRENT_DECODES
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl LoaderConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(memory_budget) = args.memory_budget {
            self.memory_budget_bytes = memory_budget;
        }
        if let Some(decodes) = args.max_concurrent_decodes {
            self.max_concurrent_decodes = decodes;
        }
        if let Some(low_bandwidth) = args.low_bandwidth {
            self.low_bandwidth = low_bandwidth;
        }
    }

    /// Network request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("pixfetch.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            cache_dir: None,
            memory_budget_bytes: DEFAULT_MAX_COST,
            max_concurrent_decodes: DEFAULT_MAX_CONCURRENT_DECODES,
            request_timeout_secs: default_request_timeout_secs(),
            low_bandwidth: false,
            disk: DiskCacheConfig::default(),
            defaults: DefaultLoadOptions::default(),
        }
    }
}
