//! On-disk thumbnail cache
//!
//! Thumbnails live directly inside the cache directory as `<key>.<ext>`.
//! Entries are never expired actively: a stale or undersized file is simply
//! reported as not fresh and gets overwritten by the next render.

use crate::key::cache_key;
use crate::{KeyStrategy, Result, ThumbError};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Returns whether `path` holds a cached file that may be reused.
///
/// Fails closed: a missing path, a directory or a stat error all count as
/// "not fresh". Files smaller than `min_size` (and empty files in any case)
/// are rejected. A zero `max_age` disables the age check.
pub async fn is_fresh(path: &Path, max_age: Duration, min_size: u64) -> bool {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(_) => return false,
    };

    if metadata.is_dir() {
        return false;
    }

    let size = metadata.len();
    if size == 0 || size < min_size {
        return false;
    }

    if max_age.is_zero() {
        return true;
    }

    match metadata.modified() {
        Ok(modified) => match modified.checked_add(max_age) {
            Some(expires) => SystemTime::now() < expires,
            None => true,
        },
        Err(_) => false,
    }
}

/// File naming and file IO for one cache directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    directory: PathBuf,
    strategy: KeyStrategy,
}

impl CacheStore {
    pub fn new(directory: impl Into<PathBuf>, strategy: KeyStrategy) -> Self {
        Self {
            directory: directory.into(),
            strategy,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn key(&self, url: &str) -> String {
        cache_key(url, self.strategy)
    }

    /// `<key>.<extension>`
    pub fn file_name(&self, url: &str, extension: &str) -> String {
        format!("{}.{}", self.key(url), extension)
    }

    /// Full path of the cache file for `url`. The file may not exist.
    pub fn path(&self, url: &str, extension: &str) -> PathBuf {
        self.directory.join(self.file_name(url, extension))
    }

    /// Opens `path` for writing, truncating any stale content.
    pub async fn create(&self, path: &Path) -> Result<File> {
        fs::create_dir_all(&self.directory).await?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o640);

        Ok(options.open(path).await?)
    }

    /// Writes `data` to `path`. On failure the partial file is removed so
    /// that a later probe cannot mistake it for a valid thumbnail.
    pub async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let written = async {
            let mut file = self.create(path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            Ok::<(), ThumbError>(())
        }
        .await;

        if written.is_err() {
            self.discard(path).await;
        }
        written
    }

    /// Best-effort removal of a partially written file.
    pub async fn discard(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => debug!("Removed partial cache file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial cache file {}: {}", path.display(), e),
        }
    }
}
