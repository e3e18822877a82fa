//! Tile asset retrieval with a local on-disk cache.
//!
//! Assets are cached under a name derived from their URL (see
//! [`cache_file_name`]), so a second request for the same href is served
//! from disk without touching the network.
//!
//! ## Thread Safety
//!
//! [`HttpAssetCache`] is shared by the materializer's worker threads:
//! - Different assets are downloaded in parallel
//! - Threads requesting the same asset coordinate, with only one performing
//!   the download while the others wait
//! - Downloads land in a temporary file that is renamed into place, so a
//!   concurrent reader sees either no file or a complete one

use crate::FetchError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default HTTP timeout for one asset download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of retries after a failed download.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 2;

/// Resolves an asset href to a local file.
///
/// Implementations must be idempotent and safe to call concurrently for
/// distinct hrefs.
pub trait AssetFetcher: Send + Sync {
    /// Local path of the asset, retrieving it if necessary.
    fn fetch(&self, href: &str) -> Result<PathBuf, FetchError>;
}

/// Cache file name of an href: the first 16 hex digits of its SHA-256,
/// a dash, and the sanitized final path segment.
pub fn cache_file_name(href: &str) -> String {
    let digest = hex::encode(Sha256::digest(href.as_bytes()));
    let segment = tilefuse_catalog::href_file_name(href);
    let sanitized: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    let name = if sanitized.is_empty() { "asset" } else { sanitized };
    format!("{}-{}", &digest[..16], name)
}

/// Local path of an href that already points at the filesystem, if any.
fn local_path(href: &str) -> Option<PathBuf> {
    if let Some(path) = href.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if href.contains("://") {
        return None;
    }
    Some(PathBuf::from(href))
}

/// Status of a download in progress.
#[derive(Clone)]
enum DownloadStatus {
    /// Download is in progress.
    InProgress,
    /// Download completed successfully.
    Complete,
    /// Download failed with an error message.
    Failed(String),
}

/// One tracked download and the threads waiting on it.
struct InFlight {
    status: DownloadStatus,
    /// Threads blocked on this download that have not read its outcome yet.
    waiters: usize,
}

/// Tracks in-flight downloads to prevent duplicate requests.
///
/// An entry lives only while its download runs or while some waiter has
/// not yet collected the outcome, so a failed href is retried by the next
/// request instead of replaying a stale error.
struct DownloadTracker {
    /// Cache file names currently being downloaded.
    in_flight: HashMap<String, InFlight>,
}

impl DownloadTracker {
    fn new() -> Self {
        Self {
            in_flight: HashMap::new(),
        }
    }

    /// Record the outcome of a download, dropping the entry if no one waits for it.
    fn finish(&mut self, key: &str, status: DownloadStatus) {
        match self.in_flight.get_mut(key) {
            Some(entry) if entry.waiters > 0 => entry.status = status,
            _ => {
                self.in_flight.remove(key);
            }
        }
    }

    /// Collect the outcome of a finished download as one of its waiters.
    fn collect(&mut self, key: &str) -> Option<DownloadStatus> {
        let entry = self.in_flight.get_mut(key)?;
        entry.waiters = entry.waiters.saturating_sub(1);
        let status = entry.status.clone();
        if entry.waiters == 0 {
            self.in_flight.remove(key);
        }
        Some(status)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.in_flight.len()
    }
}

/// Download statistics of an [`HttpAssetCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of assets downloaded this session.
    pub assets_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
    /// Number of requests served from the cache.
    pub cache_hits: usize,
}

/// HTTP asset fetcher with an on-disk cache.
///
/// `file://` hrefs and plain paths are served from the filesystem as-is.
pub struct HttpAssetCache {
    /// Cache directory.
    cache_dir: PathBuf,
    /// HTTP client.
    client: reqwest::blocking::Client,
    /// Retries after the first failed attempt.
    max_retries: u32,
    /// Tracks which assets are currently being downloaded.
    download_tracker: Mutex<DownloadTracker>,
    /// Condition variable for waiting on downloads.
    download_complete: Condvar,
    /// Number of assets downloaded this session.
    assets_downloaded: AtomicUsize,
    /// Total bytes downloaded this session.
    bytes_downloaded: AtomicU64,
    /// Requests served from disk.
    cache_hits: AtomicUsize,
}

impl std::fmt::Debug for HttpAssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAssetCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpAssetCache {
    /// Create a cache in `cache_dir` with default timeout and retries.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self, FetchError> {
        Self::with_options(cache_dir, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_DOWNLOAD_RETRIES)
    }

    /// Create a cache with an explicit timeout and retry budget.
    pub fn with_options<P: AsRef<Path>>(cache_dir: P, timeout: Duration, max_retries: u32) -> Result<Self, FetchError> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tilefuse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            cache_dir,
            client,
            max_retries,
            download_tracker: Mutex::new(DownloadTracker::new()),
            download_complete: Condvar::new(),
            assets_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            cache_hits: AtomicUsize::new(0),
        })
    }

    /// The cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `href` is (or would be) cached.
    pub fn cache_path(&self, href: &str) -> PathBuf {
        self.cache_dir.join(cache_file_name(href))
    }

    /// Whether `href` is already cached.
    pub fn is_cached(&self, href: &str) -> bool {
        self.cache_path(href).exists()
    }

    /// Download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            assets_downloaded: self.assets_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Reset download statistics.
    pub fn reset_download_stats(&self) {
        self.assets_downloaded.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }

    fn fetch_remote(&self, href: &str) -> Result<PathBuf, FetchError> {
        let key = cache_file_name(href);
        let cache_path = self.cache_dir.join(&key);

        // Fast path: no locking needed for a file existence check
        if cache_path.exists() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cache_path);
        }

        // Check if another thread is already downloading this asset
        {
            let mut tracker = self.download_tracker.lock().map_err(|_| FetchError::CacheLockPoisoned)?;
            match tracker.in_flight.get_mut(&key) {
                Some(entry) => {
                    entry.waiters += 1;
                    while matches!(
                        tracker.in_flight.get(&key).map(|e| &e.status),
                        Some(DownloadStatus::InProgress)
                    ) {
                        tracker = self
                            .download_complete
                            .wait(tracker)
                            .map_err(|_| FetchError::CacheLockPoisoned)?;
                    }
                    return match tracker.collect(&key) {
                        Some(DownloadStatus::Failed(reason)) => Err(FetchError::DownloadFailed {
                            href: href.to_string(),
                            reason,
                        }),
                        _ if cache_path.exists() => Ok(cache_path),
                        _ => Err(FetchError::DownloadFailed {
                            href: href.to_string(),
                            reason: "download finished without a cached file".to_string(),
                        }),
                    };
                }
                None => {
                    // Might have been completed and cleared since the fast path
                    if cache_path.exists() {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(cache_path);
                    }
                    tracker.in_flight.insert(
                        key.clone(),
                        InFlight {
                            status: DownloadStatus::InProgress,
                            waiters: 0,
                        },
                    );
                }
            }
        }

        // We are responsible for this download; other assets proceed concurrently
        let result = self.download_with_retries(href, &cache_path);

        {
            let mut tracker = self.download_tracker.lock().map_err(|_| FetchError::CacheLockPoisoned)?;
            let status = match &result {
                Ok(_) => DownloadStatus::Complete,
                Err(e) => DownloadStatus::Failed(e.to_string()),
            };
            tracker.finish(&key, status);
        }
        self.download_complete.notify_all();

        result
    }

    fn download_with_retries(&self, href: &str, cache_path: &Path) -> Result<PathBuf, FetchError> {
        let mut attempt = 0;
        loop {
            match self.download(href, cache_path) {
                Ok(path) => return Ok(path),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                    warn!(href, attempt, error = %e, "retrying asset download in {:?}", delay);
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn download(&self, href: &str, cache_path: &Path) -> Result<PathBuf, FetchError> {
        let mut response = self.client.get(href).send()?;
        if !response.status().is_success() {
            return Err(FetchError::DownloadFailed {
                href: href.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let file_name = cache_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        let partial = cache_path.with_file_name(format!(".{}.{}.part", file_name, std::process::id()));

        let written = (|| -> Result<u64, FetchError> {
            let mut file = fs::File::create(&partial)?;
            let written = response.copy_to(&mut file)?;
            file.sync_all()?;
            Ok(written)
        })();
        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };
        fs::rename(&partial, cache_path)?;

        self.assets_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(written, Ordering::Relaxed);
        info!(href, bytes = written, "downloaded asset");
        Ok(cache_path.to_path_buf())
    }
}

impl AssetFetcher for HttpAssetCache {
    fn fetch(&self, href: &str) -> Result<PathBuf, FetchError> {
        if let Some(path) = local_path(href) {
            debug!(href, "serving local asset");
            return if path.exists() { Ok(path) } else { Err(FetchError::NotFound(path)) };
        }
        self.fetch_remote(href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_file_name() {
        let href = "https://data.geo.admin.ch/ch.swisstopo.swissalti3d/x/swissalti3d_2019_2532-1152_2_2056_5728.tif";
        let name = cache_file_name(href);
        assert_eq!(name.len(), 16 + 1 + "swissalti3d_2019_2532-1152_2_2056_5728.tif".len());
        assert!(name.ends_with("-swissalti3d_2019_2532-1152_2_2056_5728.tif"));
        assert!(name[..16].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, cache_file_name(href));
    }

    #[test]
    fn test_cache_file_name_distinguishes_same_segment() {
        assert_ne!(cache_file_name("https://a/x/tile.tif"), cache_file_name("https://b/x/tile.tif"));
    }

    #[test]
    fn test_cache_file_name_sanitizes() {
        let name = cache_file_name("https://a/x/we ird%20name.tif?sig=abc");
        assert!(name.ends_with("-we_ird_20name.tif"));
        assert!(cache_file_name("https://a/").ends_with("-asset"));
    }

    #[test]
    fn test_local_paths_bypass_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpAssetCache::new(dir.path().join("cache")).unwrap();
        let file = dir.path().join("tile.tif");
        fs::write(&file, b"x").unwrap();

        assert_eq!(cache.fetch(file.to_str().unwrap()).unwrap(), file);
        let url = format!("file://{}", file.display());
        assert_eq!(cache.fetch(&url).unwrap(), file);
        assert!(matches!(
            cache.fetch(dir.path().join("missing.tif").to_str().unwrap()),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn test_cached_asset_is_not_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpAssetCache::new(dir.path()).unwrap();
        let href = "https://invalid.example/tile.tif";
        fs::write(cache.cache_path(href), b"cached").unwrap();

        assert!(cache.is_cached(href));
        assert_eq!(cache.fetch(href).unwrap(), cache.cache_path(href));
        assert_eq!(cache.download_stats().cache_hits, 1);
        assert_eq!(cache.download_stats().assets_downloaded, 0);
    }

    #[test]
    fn test_failed_download_is_retried_by_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpAssetCache::with_options(dir.path(), Duration::from_secs(2), 0).unwrap();
        let href = "http://127.0.0.1:1/tile.tif";

        assert!(cache.fetch(href).is_err());
        assert_eq!(cache.download_tracker.lock().unwrap().len(), 0);

        // A second request goes back to the network rather than replaying the failure
        let again = cache.fetch(href);
        assert!(!matches!(again, Err(FetchError::DownloadFailed { .. })), "{:?}", again);
        assert_eq!(cache.download_tracker.lock().unwrap().len(), 0);

        fs::write(cache.cache_path(href), b"cached").unwrap();
        assert_eq!(cache.fetch(href).unwrap(), cache.cache_path(href));
    }

    #[test]
    fn test_tracker_keeps_outcome_until_waiters_collect_it() {
        let mut tracker = DownloadTracker::new();
        tracker.in_flight.insert(
            "a".to_string(),
            InFlight {
                status: DownloadStatus::InProgress,
                waiters: 2,
            },
        );
        tracker.finish("a", DownloadStatus::Failed("HTTP 404".to_string()));
        assert!(matches!(tracker.collect("a"), Some(DownloadStatus::Failed(_))));
        assert_eq!(tracker.len(), 1);
        assert!(matches!(tracker.collect("a"), Some(DownloadStatus::Failed(_))));
        assert_eq!(tracker.len(), 0);
        assert!(tracker.collect("a").is_none());

        tracker.in_flight.insert(
            "b".to_string(),
            InFlight {
                status: DownloadStatus::InProgress,
                waiters: 0,
            },
        );
        tracker.finish("b", DownloadStatus::Complete);
        assert_eq!(tracker.len(), 0);
    }
}
