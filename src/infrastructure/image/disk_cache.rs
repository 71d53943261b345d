//! Disk cache for fetched image bytes with "last fetched" sidecar files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::domain::entities::ResourceKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Extension of cached image bodies.
pub const DATA_EXTENSION: &str = "img";
/// Extension of the sidecar holding the fetch time in Unix milliseconds.
pub const STAMP_EXTENSION: &str = "stamp";

/// Disk-based cache that persists raw image bytes between sessions.
///
/// Every method is synchronous so the foreground can consult the cache
/// directly; background jobs call it from `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_age: Option<Duration>,
}

/// One cached body as seen by [`DiskImageCache::entries`].
#[derive(Debug, Clone, Serialize)]
pub struct DiskEntry {
    /// Path of the cached body.
    pub path: PathBuf,
    /// Size of the body in bytes.
    pub size: u64,
    /// When the body was last fetched or refreshed, if a sidecar exists.
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Outcome of a staleness purge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Number of cached bodies removed.
    pub removed: usize,
    /// Bytes freed by removing bodies.
    pub freed_bytes: u64,
    /// Sidecars that could not be parsed and were left alone.
    pub skipped: usize,
}

impl std::fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "removed {} cached images ({} bytes), skipped {}",
            self.removed, self.freed_bytes, self.skipped
        )
    }
}

impl DiskImageCache {
    /// Creates a disk cache in the specified directory.
    ///
    /// Bodies whose sidecar is older than `max_age` are treated as misses.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub fn new(cache_dir: PathBuf, max_age: Option<Duration>) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .map_err(|e| CacheError::io(format!("Failed to create cache dir: {e}")))?;
        Ok(Self { cache_dir, max_age })
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the cached body for `key`.
    #[must_use]
    pub fn data_path(&self, key: &ResourceKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{DATA_EXTENSION}", key.digest()))
    }

    /// Path of the sidecar for `key`.
    #[must_use]
    pub fn stamp_path(&self, key: &ResourceKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{STAMP_EXTENSION}", key.digest()))
    }

    /// Reads the cached body for `key` unless it is missing or stale.
    #[must_use]
    pub fn load(&self, key: &ResourceKey) -> Option<Vec<u8>> {
        if let (Some(max_age), Some(fetched_at)) = (self.max_age, self.fetched_at(key))
            && is_older_than(fetched_at, max_age)
        {
            trace!(key = %key, fetched_at = %fetched_at, "Disk cache entry is stale");
            return None;
        }

        let path = self.data_path(key);
        if let Ok(bytes) = fs::read(&path) {
            trace!(key = %key, path = %path.display(), "Disk cache hit");
            Some(bytes)
        } else {
            trace!(key = %key, "Disk cache miss");
            None
        }
    }

    /// Stores a body and stamps it with the current time.
    ///
    /// The body is written to a temporary file and renamed into place, so a
    /// concurrent [`Self::load`] sees either the previous body or the whole new one.
    ///
    /// # Errors
    /// Returns error if either file cannot be written.
    pub fn store(&self, key: &ResourceKey, bytes: &[u8]) -> CacheResult<()> {
        let path = self.data_path(key);
        let mut temp_file = tempfile::NamedTempFile::new_in(&self.cache_dir)
            .map_err(|e| CacheError::io(format!("Failed to create cache file: {e}")))?;
        temp_file
            .write_all(bytes)
            .map_err(|e| CacheError::io(format!("Failed to write cache file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| CacheError::io(format!("Failed to move cache file into place: {}", e.error)))?;

        self.touch(key)?;
        debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored image in disk cache");
        Ok(())
    }

    /// Refreshes the sidecar of `key` to the current time.
    ///
    /// # Errors
    /// Returns error if the sidecar cannot be written.
    pub fn touch(&self, key: &ResourceKey) -> CacheResult<()> {
        self.touch_at(key, Utc::now())
    }

    /// Writes the sidecar of `key` with an explicit fetch time.
    ///
    /// # Errors
    /// Returns error if the sidecar cannot be written.
    pub fn touch_at(&self, key: &ResourceKey, at: DateTime<Utc>) -> CacheResult<()> {
        fs::write(self.stamp_path(key), at.timestamp_millis().to_string())
            .map_err(|e| CacheError::io(format!("Failed to write sidecar: {e}")))
    }

    /// When `key` was last fetched or refreshed.
    #[must_use]
    pub fn fetched_at(&self, key: &ResourceKey) -> Option<DateTime<Utc>> {
        read_stamp(&self.stamp_path(key))
    }

    /// Checks if a body is cached for `key`.
    #[must_use]
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.data_path(key).is_file()
    }

    /// Removes the body and sidecar of `key`.
    pub fn evict(&self, key: &ResourceKey) {
        for path in [self.data_path(key), self.stamp_path(key)] {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(key = %key, path = %path.display(), error = %e, "Failed to evict from disk cache");
            }
        }
        debug!(key = %key, "Evicted from disk cache");
    }

    /// Lists every cached body.
    ///
    /// # Errors
    /// Returns `DirectoryUnavailable` if the cache directory cannot be read.
    pub fn entries(&self) -> CacheResult<Vec<DiskEntry>> {
        let mut entries = Vec::new();
        for path in self.read_dir()? {
            if path.extension().is_none_or(|ext| ext != DATA_EXTENSION) {
                continue;
            }
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let fetched_at = read_stamp(&path.with_extension(STAMP_EXTENSION));
            entries.push(DiskEntry {
                path,
                size,
                fetched_at,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Removes every body whose sidecar is older than `max_age`.
    ///
    /// Bodies without a sidecar are left alone.
    ///
    /// # Errors
    /// Returns `DirectoryUnavailable` if the cache directory cannot be read.
    pub fn purge_older_than(&self, max_age: Duration) -> CacheResult<PurgeReport> {
        let mut report = PurgeReport::default();

        for stamp in self.read_dir()? {
            if stamp.extension().is_none_or(|ext| ext != STAMP_EXTENSION) {
                continue;
            }
            let Some(fetched_at) = read_stamp(&stamp) else {
                warn!(path = %stamp.display(), "Unreadable cache sidecar");
                report.skipped += 1;
                continue;
            };
            if !is_older_than(fetched_at, max_age) {
                continue;
            }

            let data = stamp.with_extension(DATA_EXTENSION);
            let size = fs::metadata(&data).map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&data) {
                Ok(()) => {
                    report.removed += 1;
                    report.freed_bytes += size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %data.display(), error = %e, "Failed to remove stale cache file");
                    continue;
                }
            }
            if let Err(e) = fs::remove_file(&stamp) {
                warn!(path = %stamp.display(), error = %e, "Failed to remove cache sidecar");
            }
            debug!(path = %data.display(), fetched_at = %fetched_at, "Removed stale cache file");
        }

        debug!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            "Disk cache purge complete"
        );
        Ok(report)
    }

    /// Removes every body fetched more than `hours:minutes:seconds` ago.
    ///
    /// # Errors
    /// Returns `DirectoryUnavailable` if the cache directory cannot be read.
    pub fn purge_older_than_hms(
        &self,
        hours: u64,
        minutes: u64,
        seconds: u64,
    ) -> CacheResult<PurgeReport> {
        let secs = hours
            .saturating_mul(3600)
            .saturating_add(minutes.saturating_mul(60))
            .saturating_add(seconds);
        self.purge_older_than(Duration::from_secs(secs))
    }

    fn read_dir(&self) -> CacheResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| CacheError::directory_unavailable(&self.cache_dir, e.to_string()))?;
        Ok(entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .collect())
    }
}

fn read_stamp(path: &Path) -> Option<DateTime<Utc>> {
    let text = fs::read_to_string(path).ok()?;
    let millis = text.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

fn is_older_than(fetched_at: DateTime<Utc>, max_age: Duration) -> bool {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .is_some_and(|cutoff| fetched_at < cutoff)
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "texcache", "texcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("texcache")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
