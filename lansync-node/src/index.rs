//! File index: cached snapshot of the shared directory, rescanned after `scan_interval`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lansync_core::{scan_directory, Listing};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

struct Cached {
    listing: Arc<Listing>,
    last_scan_at: Option<Instant>,
}

/// Shared by the transfer server (LIST) and the engine (local diff).
/// The lock is held across a scan, so only one scan runs at a time and
/// concurrent readers get the result of that scan.
pub struct FileIndex {
    dir: PathBuf,
    block_size: u64,
    scan_interval: Duration,
    cache: Mutex<Cached>,
}

impl FileIndex {
    pub fn new(dir: impl Into<PathBuf>, block_size: u64, scan_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            block_size: lansync_core::chunk::effective_block_size(block_size),
            scan_interval,
            cache: Mutex::new(Cached {
                listing: Arc::new(Listing::new()),
                last_scan_at: None,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Path of `filename` inside the shared directory. `filename` must already be validated.
    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Cached listing if fresh, else a full rescan that replaces it.
    /// A failed scan keeps the previous (possibly empty) listing.
    pub async fn snapshot(&self) -> Arc<Listing> {
        let mut cache = self.cache.lock().await;
        if let Some(at) = cache.last_scan_at {
            if at.elapsed() < self.scan_interval {
                return cache.listing.clone();
            }
        }

        let dir = self.dir.clone();
        let block_size = self.block_size;
        debug!(dir = %dir.display(), "scanning shared directory");
        match tokio::task::spawn_blocking(move || scan_directory(&dir, block_size)).await {
            Ok(Ok(scan)) => {
                for (name, e) in &scan.skipped {
                    warn!(file = %name, error = %e, "skipping unreadable file");
                }
                if scan.records.len() != cache.listing.len() {
                    info!(files = scan.records.len(), "local file list updated");
                }
                cache.listing = Arc::new(scan.records);
            }
            Ok(Err(e)) => {
                error!(dir = %self.dir.display(), error = %e, "cannot read shared directory, keeping last snapshot");
            }
            Err(e) => {
                error!(error = %e, "directory scan task failed, keeping last snapshot");
            }
        }
        cache.last_scan_at = Some(Instant::now());
        cache.listing.clone()
    }

    /// Force the next `snapshot` to rescan. Called after a transfer installs a file.
    pub async fn invalidate(&self) {
        self.cache.lock().await.last_scan_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lansync_core::integrity::hash_hex;

    #[tokio::test]
    async fn cached_until_interval_elapses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let index = FileIndex::new(dir.path(), 1024, Duration::from_secs(3600));

        let first = index.snapshot().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first["a.txt"].hash, hash_hex(b"hello"));

        std::fs::write(dir.path().join("b.txt"), b"later").unwrap();
        let second = index.snapshot().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn zero_interval_always_rescans() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path(), 1024, Duration::ZERO);
        assert!(index.snapshot().await.is_empty());
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        assert_eq!(index.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path(), 1024, Duration::from_secs(3600));
        assert!(index.snapshot().await.is_empty());
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        index.invalidate().await;
        assert_eq!(index.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_directory_keeps_last_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        std::fs::create_dir(&shared).unwrap();
        std::fs::write(shared.join("a.txt"), b"x").unwrap();
        let index = FileIndex::new(&shared, 1024, Duration::ZERO);
        assert_eq!(index.snapshot().await.len(), 1);

        std::fs::remove_dir_all(&shared).unwrap();
        let after = index.snapshot().await;
        assert_eq!(after.len(), 1);
        assert!(after.contains_key("a.txt"));
    }

    #[tokio::test]
    async fn staging_files_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".tmp.abc.a.txt"), b"partial").unwrap();
        let index = FileIndex::new(dir.path(), 1024, Duration::ZERO);
        assert!(index.snapshot().await.is_empty());
    }
}
