//! Disk-based cache of raw image bytes with revalidation metadata.
//!
//! Each entry is a data file named by the SHA-256 digest of its key plus an
//! optional `<digest>.meta.json` sidecar. Both are written to a temp file and
//! renamed into place, so readers never observe partial content.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::HttpResponse;

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Maximum entry age (30 days default).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

const META_SUFFIX: &str = ".meta.json";
const TEMP_PREFIX: &str = ".tmp";
const MAX_WRITES_BEFORE_TRIM: u32 = 25;
const MIN_TRIM_INTERVAL: Duration = Duration::from_secs(20);

/// Errors surfaced by disk cache maintenance operations.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    /// Platform cache directory could not be determined.
    #[error("failed to determine cache directory")]
    CacheDirNotFound,
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for disk cache maintenance.
pub type DiskCacheResult<T> = Result<T, DiskCacheError>;

/// Size and age limits for the disk cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Maximum total size in bytes. Zero empties the cache on every trim.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Maximum entry age in seconds.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl DiskCacheConfig {
    /// Maximum entry age.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_CACHE_SIZE,
            max_age_secs: DEFAULT_MAX_AGE.as_secs(),
        }
    }
}

const fn default_max_size_bytes() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE.as_secs()
}

/// Revalidation metadata stored next to an entry's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskMeta {
    /// Validator sent back as `If-None-Match`.
    pub etag: Option<String>,
    /// When the entry was stored or last revalidated.
    pub cached_at: DateTime<Utc>,
    /// Absolute expiry derived from `Cache-Control: max-age`.
    pub expires_at: Option<DateTime<Utc>>,
    /// Response content type.
    pub content_type: Option<String>,
}

impl DiskMeta {
    /// Builds metadata from a full response.
    #[must_use]
    pub fn from_response(response: &HttpResponse, cached_at: DateTime<Utc>) -> Self {
        Self {
            etag: response.header("etag").map(String::from),
            cached_at,
            expires_at: expires_at(response, cached_at),
            content_type: response.header("content-type").map(String::from),
        }
    }

    /// Refreshes this metadata from a 304 response, keeping known values the
    /// server did not resend.
    #[must_use]
    pub fn revalidated(&self, response: &HttpResponse, cached_at: DateTime<Utc>) -> Self {
        Self {
            etag: response
                .header("etag")
                .map(String::from)
                .or_else(|| self.etag.clone()),
            cached_at,
            expires_at: expires_at(response, cached_at),
            content_type: response
                .header("content-type")
                .map(String::from)
                .or_else(|| self.content_type.clone()),
        }
    }

    /// True iff an expiry is set and has passed. Entries without an expiry
    /// never expire by TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Extracts `max-age` seconds from a `Cache-Control` value.
#[must_use]
pub fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim().to_ascii_lowercase();
        let value = directive.strip_prefix("max-age=")?;
        value.trim().trim_matches('"').parse::<i64>().ok()
    })
}

fn expires_at(response: &HttpResponse, cached_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let seconds = parse_max_age(response.header("cache-control")?)?;
    cached_at.checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

/// Bytes and metadata read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    /// Raw response body.
    pub data: Bytes,
    /// Sidecar metadata, if any was stored.
    pub meta: Option<DiskMeta>,
}

impl DiskEntry {
    /// True if metadata says the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.meta.as_ref().is_some_and(DiskMeta::is_expired)
    }

    /// Stored validator, if any.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.meta.as_ref()?.etag.as_deref()
    }
}

/// Outcome of a trim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Entries deleted.
    pub removed_entries: usize,
    /// Bytes deleted.
    pub removed_bytes: u64,
    /// Bytes left on disk.
    pub remaining_bytes: u64,
}

/// Entry count and size on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Number of entries.
    pub entries: usize,
    /// Total bytes including sidecars.
    pub bytes: u64,
}

struct TrimSchedule {
    writes_since_last_trim: u32,
    last_trim: Option<Instant>,
}

/// Disk-based image cache that persists raw image bytes.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    config: RwLock<DiskCacheConfig>,
    schedule: Mutex<TrimSchedule>,
}

impl DiskImageCache {
    /// Creates a new disk cache in the specified directory.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub async fn new(cache_dir: PathBuf, config: DiskCacheConfig) -> DiskCacheResult<Self> {
        fs::create_dir_all(&cache_dir).await?;
        debug!(path = %cache_dir.display(), "Opened disk cache");
        Ok(Self {
            cache_dir,
            config: RwLock::new(config),
            schedule: Mutex::new(TrimSchedule {
                writes_since_last_trim: 0,
                last_trim: None,
            }),
        })
    }

    /// Creates a cache in the platform cache directory.
    ///
    /// # Errors
    /// Returns error if the directory cannot be determined or created.
    pub async fn default_location(config: DiskCacheConfig) -> DiskCacheResult<Self> {
        let cache_dir = default_cache_dir().ok_or(DiskCacheError::CacheDirNotFound)?;
        Self::new(cache_dir, config).await
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Current size and age limits.
    #[must_use]
    pub fn config(&self) -> DiskCacheConfig {
        *self.config.read()
    }

    /// Replaces the limits and trims immediately.
    pub async fn set_config(&self, config: DiskCacheConfig) {
        *self.config.write() = config;
        if let Err(e) = self.trim_if_needed().await {
            warn!(error = %e, "Failed to trim disk cache after config change");
        }
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.digest())
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}{META_SUFFIX}", key.digest()))
    }

    /// Reads an entry's bytes and metadata.
    pub async fn get(&self, key: &CacheKey) -> Option<DiskEntry> {
        let Ok(data) = fs::read(self.data_path(key)).await else {
            trace!(key = %key, "Disk cache miss");
            return None;
        };
        trace!(key = %key, size = data.len(), "Disk cache hit");
        let meta = self.read_meta(key).await;
        Some(DiskEntry {
            data: Bytes::from(data),
            meta,
        })
    }

    /// Reads only the bytes of an entry.
    pub async fn get_data(&self, key: &CacheKey) -> Option<Bytes> {
        fs::read(self.data_path(key)).await.ok().map(Bytes::from)
    }

    /// Reads only the metadata of an entry.
    pub async fn get_meta(&self, key: &CacheKey) -> Option<DiskMeta> {
        self.read_meta(key).await
    }

    async fn read_meta(&self, key: &CacheKey) -> Option<DiskMeta> {
        let raw = fs::read(self.meta_path(key)).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable cache metadata");
                None
            }
        }
    }

    /// Checks if an entry's bytes are cached.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.data_path(key)).await.unwrap_or(false)
    }

    /// Stores bytes and metadata. Storing without metadata drops any previous sidecar.
    ///
    /// Failures are logged and the entry is simply left uncached.
    pub async fn set(&self, key: &CacheKey, data: Bytes, meta: Option<&DiskMeta>) {
        let size = data.len();
        if let Err(e) = self.write_entry(key, data, meta).await {
            warn!(key = %key, error = %e, "Failed to write disk cache entry");
            return;
        }
        debug!(key = %key, size = size, "Stored image in disk cache");
        self.maybe_schedule_trim();
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        data: Bytes,
        meta: Option<&DiskMeta>,
    ) -> DiskCacheResult<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        // New bytes must never sit next to an old validator.
        remove_if_exists(&self.meta_path(key)).await?;
        write_atomic(self.data_path(key), data).await?;
        if let Some(meta) = meta {
            self.write_meta(key, meta).await?;
        }
        Ok(())
    }

    /// Replaces only the metadata of an existing entry, leaving its bytes untouched.
    pub async fn update_meta(&self, key: &CacheKey, meta: &DiskMeta) {
        if !self.contains(key).await {
            return;
        }
        if let Err(e) = self.write_meta(key, meta).await {
            warn!(key = %key, error = %e, "Failed to update disk cache metadata");
        } else {
            trace!(key = %key, "Revalidated disk cache entry");
        }
    }

    async fn write_meta(&self, key: &CacheKey, meta: &DiskMeta) -> DiskCacheResult<()> {
        let encoded = serde_json::to_vec(meta).map_err(std::io::Error::other)?;
        write_atomic(self.meta_path(key), Bytes::from(encoded)).await?;
        Ok(())
    }

    /// Removes an entry.
    pub async fn remove(&self, key: &CacheKey) {
        for path in [self.data_path(key), self.meta_path(key)] {
            if let Err(e) = remove_if_exists(&path).await {
                warn!(key = %key, error = %e, "Failed to remove from disk cache");
            }
        }
        debug!(key = %key, "Removed from disk cache");
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn clear(&self) -> DiskCacheResult<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        let mut entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await.is_ok_and(|t| t.is_file())
                && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Reports the number of entries and bytes on disk.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn usage(&self) -> DiskCacheResult<DiskUsage> {
        let scan = scan_directory(&self.cache_dir).await?;
        Ok(DiskUsage {
            entries: scan.groups.len(),
            bytes: scan.groups.iter().map(|g| g.size).sum(),
        })
    }

    /// Trims using the current configuration.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn trim_if_needed(&self) -> DiskCacheResult<TrimReport> {
        let config = self.config();
        trim_directory(&self.cache_dir, config.max_size_bytes, config.max_age()).await
    }

    /// Deletes entries older than `max_age`, then the oldest remaining
    /// entries until the total is at most `max_bytes`.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn trim(&self, max_bytes: u64, max_age: Duration) -> DiskCacheResult<TrimReport> {
        trim_directory(&self.cache_dir, max_bytes, max_age).await
    }

    /// Writes recorded since the last opportunistic trim.
    pub fn writes_since_trim(&self) -> u32 {
        self.schedule.lock().writes_since_last_trim
    }

    fn maybe_schedule_trim(&self) {
        let now = Instant::now();
        {
            let mut schedule = self.schedule.lock();
            schedule.writes_since_last_trim += 1;
            let enough_writes = schedule.writes_since_last_trim >= MAX_WRITES_BEFORE_TRIM;
            let enough_time = schedule
                .last_trim
                .is_none_or(|last| now.duration_since(last) >= MIN_TRIM_INTERVAL);
            if !(enough_writes && enough_time) {
                return;
            }
            schedule.writes_since_last_trim = 0;
            schedule.last_trim = Some(now);
        }

        let dir = self.cache_dir.clone();
        let config = self.config();
        tokio::spawn(async move {
            match trim_directory(&dir, config.max_size_bytes, config.max_age()).await {
                Ok(report) => debug!(
                    removed_entries = report.removed_entries,
                    removed_bytes = report.removed_bytes,
                    "Background disk cache trim complete"
                ),
                Err(e) => warn!(error = %e, "Background disk cache trim failed"),
            }
        });
    }
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.cache_dir)
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "linuxmobile", "pixfetch")
        .map(|dirs| dirs.cache_dir().join("images"))
}

async fn write_atomic(path: PathBuf, contents: Bytes) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::other("Invalid path"))?;
        let mut temp_file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)?;
        temp_file.write_all(&contents)?;
        temp_file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Files belonging to one key.
struct FileGroup {
    paths: Vec<PathBuf>,
    modified: SystemTime,
    size: u64,
}

struct DirectoryScan {
    groups: Vec<FileGroup>,
    temp_files: Vec<(PathBuf, SystemTime)>,
}

async fn scan_directory(dir: &Path) -> std::io::Result<DirectoryScan> {
    let mut groups: HashMap<String, FileGroup> = HashMap::new();
    let mut temp_files = Vec::new();

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let path = entry.path();
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.starts_with(TEMP_PREFIX) {
            temp_files.push((path, modified));
            continue;
        }

        let stem = name.strip_suffix(META_SUFFIX).unwrap_or(&name).to_string();
        let group = groups.entry(stem).or_insert_with(|| FileGroup {
            paths: Vec::new(),
            modified: SystemTime::UNIX_EPOCH,
            size: 0,
        });
        group.paths.push(path);
        group.modified = group.modified.max(modified);
        group.size += meta.len();
    }

    Ok(DirectoryScan {
        groups: groups.into_values().collect(),
        temp_files,
    })
}

async fn remove_group(group: &FileGroup) {
    for path in &group.paths {
        if let Err(e) = remove_if_exists(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
        }
    }
}

async fn trim_directory(
    dir: &Path,
    max_bytes: u64,
    max_age: Duration,
) -> DiskCacheResult<TrimReport> {
    fs::create_dir_all(dir).await?;
    let scan = scan_directory(dir).await?;
    let now = SystemTime::now();
    let is_stale = |modified: SystemTime| {
        now.duration_since(modified)
            .is_ok_and(|age| age > max_age)
    };

    for (path, modified) in &scan.temp_files {
        if is_stale(*modified) {
            let _ = remove_if_exists(path).await;
        }
    }

    let mut report = TrimReport::default();
    let mut remaining = Vec::with_capacity(scan.groups.len());
    for group in scan.groups {
        if is_stale(group.modified) {
            remove_group(&group).await;
            report.removed_entries += 1;
            report.removed_bytes += group.size;
        } else {
            remaining.push(group);
        }
    }

    let mut total: u64 = remaining.iter().map(|g| g.size).sum();
    if max_bytes == 0 || total > max_bytes {
        remaining.sort_by_key(|g| g.modified);
        for group in &remaining {
            if max_bytes > 0 && total <= max_bytes {
                break;
            }
            remove_group(group).await;
            total -= group.size;
            report.removed_entries += 1;
            report.removed_bytes += group.size;
        }
    }
    report.remaining_bytes = total;

    debug!(
        removed_entries = report.removed_entries,
        removed_bytes = report.removed_bytes,
        remaining_bytes = report.remaining_bytes,
        "Disk cache trim complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    async fn create_test_cache() -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), DiskCacheConfig::default())
            .await
            .unwrap();
        (cache, temp_dir)
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(format!("https://example.com/{name}"))
    }

    fn sample_meta() -> DiskMeta {
        DiskMeta {
            etag: Some("\"abc\"".to_string()),
            cached_at: Utc::now(),
            expires_at: Some(Utc::now() + TimeDelta::seconds(60)),
            content_type: Some("image/png".to_string()),
        }
    }

    fn backdate(cache: &DiskImageCache, key: &CacheKey, age: Duration) {
        let when = SystemTime::now() - age;
        for path in [cache.data_path(key), cache.meta_path(key)] {
            if let Ok(file) = std::fs::File::options().write(true).open(&path) {
                file.set_modified(when).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_failed_data_write_drops_stale_meta() {
        let (cache, _temp) = create_test_cache().await;
        let k = key("stale");
        cache.write_meta(&k, &sample_meta()).await.unwrap();
        // A non-empty directory at the data path makes the rename fail.
        std::fs::create_dir_all(cache.data_path(&k).join("blocker")).unwrap();

        let mut fresh = sample_meta();
        fresh.etag = Some("\"new\"".to_string());
        cache.set(&k, Bytes::from_static(b"new bytes"), Some(&fresh)).await;

        assert!(!cache.meta_path(&k).exists());
        assert!(cache.get_meta(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_set_and_get_round_trip() {
        let (cache, _temp) = create_test_cache().await;
        let data = Bytes::from_static(b"\x89PNG\r\n\x1a\n binary \x00\xff");
        let meta = sample_meta();

        cache.set(&key("a"), data.clone(), Some(&meta)).await;
        let entry = cache.get(&key("a")).await.unwrap();

        assert_eq!(entry.data, data);
        assert_eq!(entry.meta, Some(meta));
        assert_eq!(entry.etag(), Some("\"abc\""));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        {
            let cache = DiskImageCache::new(dir.clone(), DiskCacheConfig::default())
                .await
                .unwrap();
            cache
                .set(&key("a"), Bytes::from_static(b"persisted"), None)
                .await;
        }

        let reopened = DiskImageCache::new(dir, DiskCacheConfig::default())
            .await
            .unwrap();
        let data = reopened.get_data(&key("a")).await.unwrap();
        assert_eq!(&data[..], b"persisted");
    }

    #[tokio::test]
    async fn test_layout_uses_digest_and_sidecar() {
        let (cache, temp) = create_test_cache().await;
        let k = key("layout");
        cache
            .set(&k, Bytes::from_static(b"x"), Some(&sample_meta()))
            .await;

        let digest = k.digest();
        assert!(temp.path().join(&digest).exists());
        assert!(temp.path().join(format!("{digest}.meta.json")).exists());

        let raw = std::fs::read_to_string(temp.path().join(format!("{digest}.meta.json"))).unwrap();
        assert!(raw.contains("\"cachedAt\""));
        assert!(raw.contains("\"contentType\""));
    }

    #[tokio::test]
    async fn test_set_without_meta_drops_sidecar() {
        let (cache, _temp) = create_test_cache().await;
        cache
            .set(&key("a"), Bytes::from_static(b"1"), Some(&sample_meta()))
            .await;
        cache.set(&key("a"), Bytes::from_static(b"2"), None).await;

        let entry = cache.get(&key("a")).await.unwrap();
        assert_eq!(&entry.data[..], b"2");
        assert!(entry.meta.is_none());
    }

    #[tokio::test]
    async fn test_update_meta_keeps_bytes() {
        let (cache, _temp) = create_test_cache().await;
        cache
            .set(&key("a"), Bytes::from_static(b"body"), Some(&sample_meta()))
            .await;

        let mut refreshed = sample_meta();
        refreshed.etag = Some("\"def\"".to_string());
        cache.update_meta(&key("a"), &refreshed).await;

        let entry = cache.get(&key("a")).await.unwrap();
        assert_eq!(&entry.data[..], b"body");
        assert_eq!(entry.etag(), Some("\"def\""));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (cache, _temp) = create_test_cache().await;
        cache
            .set(&key("a"), Bytes::from_static(b"a"), Some(&sample_meta()))
            .await;
        cache.set(&key("b"), Bytes::from_static(b"b"), None).await;

        cache.remove(&key("a")).await;
        assert!(!cache.contains(&key("a")).await);
        assert!(cache.get_meta(&key("a")).await.is_none());
        assert!(cache.contains(&key("b")).await);

        cache.clear().await.unwrap();
        assert_eq!(cache.usage().await.unwrap(), DiskUsage::default());
    }

    #[tokio::test]
    async fn test_trim_removes_entries_older_than_max_age() {
        let (cache, _temp) = create_test_cache().await;
        cache
            .set(&key("old"), Bytes::from_static(b"old"), Some(&sample_meta()))
            .await;
        cache.set(&key("new"), Bytes::from_static(b"new"), None).await;
        backdate(&cache, &key("old"), Duration::from_secs(3 * 24 * 3600));

        let report = cache
            .trim(u64::MAX, Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        assert_eq!(report.removed_entries, 1);
        assert!(!cache.contains(&key("old")).await);
        assert!(cache.get_meta(&key("old")).await.is_none());
        assert!(cache.contains(&key("new")).await);
    }

    #[tokio::test]
    async fn test_trim_removes_oldest_first_until_under_budget() {
        let (cache, _temp) = create_test_cache().await;
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.set(&key(name), Bytes::from(vec![0u8; 100]), None).await;
            backdate(&cache, &key(name), Duration::from_secs(100 - i as u64 * 10));
        }

        let report = cache.trim(250, DEFAULT_MAX_AGE).await.unwrap();

        assert!(report.remaining_bytes <= 250);
        assert!(!cache.contains(&key("a")).await);
        assert!(!cache.contains(&key("b")).await);
        assert!(cache.contains(&key("c")).await);
        assert!(cache.contains(&key("d")).await);
        assert!(cache.usage().await.unwrap().bytes <= 250);
    }

    #[tokio::test]
    async fn test_trim_with_zero_budget_removes_everything() {
        let (cache, _temp) = create_test_cache().await;
        cache.set(&key("a"), Bytes::from_static(b"a"), None).await;
        cache
            .set(&key("b"), Bytes::from_static(b"b"), Some(&sample_meta()))
            .await;

        cache.trim(0, DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(cache.usage().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_set_config_retrims() {
        let (cache, _temp) = create_test_cache().await;
        cache.set(&key("a"), Bytes::from(vec![1u8; 64]), None).await;

        cache
            .set_config(DiskCacheConfig {
                max_size_bytes: 0,
                max_age_secs: 60,
            })
            .await;

        assert!(!cache.contains(&key("a")).await);
    }

    #[tokio::test]
    async fn test_unreadable_meta_is_ignored() {
        let (cache, temp) = create_test_cache().await;
        let k = key("a");
        cache.set(&k, Bytes::from_static(b"a"), None).await;
        std::fs::write(temp.path().join(format!("{}.meta.json", k.digest())), b"{not json").unwrap();

        let entry = cache.get(&k).await.unwrap();
        assert!(entry.meta.is_none());
    }

    #[test]
    fn test_meta_json_round_trip() {
        let meta = sample_meta();
        let encoded = serde_json::to_string(&meta).unwrap();
        let decoded: DiskMeta = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_expiry() {
        let now = Utc::now();
        let mut meta = sample_meta();
        meta.expires_at = None;
        assert!(!meta.is_expired_at(now));

        meta.expires_at = Some(now);
        assert!(meta.is_expired_at(now));

        meta.expires_at = Some(now + TimeDelta::seconds(1));
        assert!(!meta.is_expired_at(now));
    }

    #[test_case("max-age=60", Some(60) ; "plain")]
    #[test_case("public, max-age=3600, immutable", Some(3600) ; "among_directives")]
    #[test_case("Max-Age=5", Some(5) ; "case_insensitive")]
    #[test_case("no-cache", None ; "absent")]
    #[test_case("max-age=soon", None ; "unparseable")]
    #[test_case("", None ; "empty")]
    fn test_parse_max_age(value: &str, expected: Option<i64>) {
        assert_eq!(parse_max_age(value), expected);
    }

    #[test]
    fn test_meta_from_response() {
        let cached_at = Utc::now();
        let response = HttpResponse::new(
            200,
            [
                ("ETag", "\"v1\""),
                ("Cache-Control", "max-age=120"),
                ("Content-Type", "image/jpeg"),
            ],
            Bytes::new(),
        );

        let meta = DiskMeta::from_response(&response, cached_at);

        assert_eq!(meta.etag.as_deref(), Some("\"v1\""));
        assert_eq!(meta.expires_at, Some(cached_at + TimeDelta::seconds(120)));
        assert_eq!(meta.content_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_revalidated_keeps_previous_validator() {
        let previous = sample_meta();
        let response = HttpResponse::new(304, [("cache-control", "max-age=10")], Bytes::new());
        let cached_at = Utc::now();

        let meta = previous.revalidated(&response, cached_at);

        assert_eq!(meta.etag, previous.etag);
        assert_eq!(meta.content_type, previous.content_type);
        assert_eq!(meta.cached_at, cached_at);
        assert_eq!(meta.expires_at, Some(cached_at + TimeDelta::seconds(10)));
    }
}
