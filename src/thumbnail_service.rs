//! The thumbnail pipeline
//!
//! `ThumbnailService` ties the cache, the renderer, the sanitizer and the
//! direct fetcher together: probe the cache, and on a miss either download
//! the image or render the page and store the cleaned-up result.

use crate::{
    check_key_length, classify, is_fresh, validate_url, CacheStore, Config, HttpFetcher,
    ImageFetcher, Metrics, OutputSanitizer, PageRenderer, RenderRequest, Result, ThumbError,
    UrlKind, WkHtmlToImage,
};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};

type InFlightTable = DashMap<PathBuf, Arc<Mutex<()>>>;

/// A claim on the single-flight lock for one cache path.
///
/// Dropping it, including when the owning future is cancelled, removes the
/// table entry once no other caller holds or waits on it.
struct InFlight<'a> {
    table: &'a InFlightTable,
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(table: &'a InFlightTable, path: &Path) -> Self {
        let lock = Arc::clone(&table.entry(path.to_path_buf()).or_default());
        Self {
            table,
            path: path.to_path_buf(),
            lock,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        drop(std::mem::take(&mut self.lock));
        self.table
            .remove_if(&self.path, |_, entry| Arc::strong_count(entry) == 1);
    }
}

/// Where a returned thumbnail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbSource {
    /// An existing, fresh cache file.
    Cache,
    /// Freshly rendered from the page.
    Rendered,
    /// Downloaded verbatim from an image URL.
    Fetched,
}

/// A thumbnail file ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub file_name: String,
    pub path: PathBuf,
    pub source: ThumbSource,
    pub size: u64,
}

/// Produces and caches page thumbnails.
///
/// Cloning is cheap and clones share the single-flight table, so a clone per
/// task still renders each cache file only once.
///
/// # Examples
///
/// ```rust,no_run
/// use pagethumb::{Config, ThumbSource, ThumbnailService};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = ThumbnailService::new(Config::default())?;
///
///     let first = service.thumbnail("https://example.com/").await?;
///     let second = service.thumbnail("https://example.com/").await?;
///     assert_eq!(first.path, second.path);
///     assert_eq!(second.source, ThumbSource::Cache);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ThumbnailService {
    config: Config,
    cache: CacheStore,
    renderer: Arc<dyn PageRenderer>,
    fetcher: Arc<dyn ImageFetcher>,
    sanitizer: OutputSanitizer,
    metrics: Metrics,
    in_flight: Arc<InFlightTable>,
}

impl ThumbnailService {
    /// Creates a service backed by `wkhtmltoimage` and a plain HTTP client.
    ///
    /// A missing renderer binary is not an error here; it is reported by
    /// every [`ThumbnailService::thumbnail`] call instead.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let renderer = Arc::new(WkHtmlToImage::from_config(&config));
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
        Ok(Self::with_backends(config, renderer, fetcher))
    }

    pub fn with_backends(
        config: Config,
        renderer: Arc<dyn PageRenderer>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        let cache = CacheStore::new(config.cache_directory.clone(), config.key_strategy);
        let sanitizer = OutputSanitizer::new(config.min_image_size, config.max_garbage_prefix);

        Self {
            config,
            cache,
            renderer,
            fetcher,
            sanitizer,
            metrics: Metrics::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn renderer_available(&self) -> bool {
        self.renderer.is_available()
    }

    /// Cache path for `url`. The file may not exist yet.
    ///
    /// Direct-fetch URLs keep their own image extension; everything else
    /// uses the configured output format. Surrounding whitespace is not part
    /// of the URL.
    pub fn path_file(&self, url: &str) -> PathBuf {
        let url = url.trim();
        self.cache.path(url, &self.extension_for(url))
    }

    /// Final component of [`ThumbnailService::path_file`].
    pub fn file_name(&self, url: &str) -> String {
        let url = url.trim();
        self.cache.file_name(url, &self.extension_for(url))
    }

    /// Whether a fresh cache file exists for `url`, without producing one.
    pub async fn is_cached(&self, url: &str) -> bool {
        let url = url.trim();
        let min_size = self.min_size_for(url);
        is_fresh(&self.path_file(url), self.config.max_age, min_size).await
    }

    fn min_size_for(&self, url: &str) -> u64 {
        match validate_url(url).map(|parsed| classify(&parsed)) {
            Ok(kind) => self.min_size(&kind),
            Err(_) => self.config.min_image_size,
        }
    }

    /// Downloaded images are kept as served, so any non-empty file counts.
    fn min_size(&self, kind: &UrlKind) -> u64 {
        match kind {
            UrlKind::Image(_) => 1,
            _ => self.config.min_image_size,
        }
    }

    fn extension_for(&self, url: &str) -> String {
        match validate_url(url).map(|parsed| classify(&parsed)) {
            Ok(UrlKind::Image(extension)) => extension,
            _ => self.config.format.extension().to_string(),
        }
    }

    /// Returns the thumbnail for `url`, reusing a fresh cache file or
    /// producing a new one.
    pub async fn thumbnail(&self, url: &str) -> Result<Thumbnail> {
        let url = url.trim();
        let result = self.produce(url).await;
        if let Err(e) = &result {
            debug!("Thumbnail for {} failed: {}", url, e);
            self.metrics.record_failure(e);
        }
        result
    }

    async fn produce(&self, url: &str) -> Result<Thumbnail> {
        if !self.renderer.is_available() {
            return Err(ThumbError::Config("page renderer is not available".to_string()));
        }

        let parsed = validate_url(url)?;
        let kind = classify(&parsed);
        let extension = match &kind {
            UrlKind::Unsupported(extension) => {
                return Err(ThumbError::UnsupportedContent(format!(
                    "{url}: .{extension} files cannot be thumbnailed"
                )));
            }
            UrlKind::Image(extension) => extension.clone(),
            UrlKind::Page => self.config.format.extension().to_string(),
        };

        let key = self.cache.key(url);
        check_key_length(&key)?;
        let file_name = format!("{key}.{extension}");
        let path = self.cache.directory().join(&file_name);

        let result = {
            let entry = InFlight::enter(&self.in_flight, &path);
            let _guard = entry.lock.lock().await;
            self.produce_locked(url, &kind, &path).await
        };

        let (source, size) = result?;
        Ok(Thumbnail {
            file_name,
            path,
            source,
            size,
        })
    }

    async fn produce_locked(&self, url: &str, kind: &UrlKind, path: &Path) -> Result<(ThumbSource, u64)> {
        if is_fresh(path, self.config.max_age, self.min_size(kind)).await {
            debug!("Cache hit for {} at {}", url, path.display());
            self.metrics.record_cache_hit();
            let size = tokio::fs::metadata(path).await?.len();
            return Ok((ThumbSource::Cache, size));
        }

        match kind {
            UrlKind::Image(_) => self.fetch(url, path).await,
            _ => self.render(url, path).await,
        }
    }

    async fn fetch(&self, url: &str, path: &Path) -> Result<(ThumbSource, u64)> {
        let mut file = self.cache.create(path).await?;
        let written = match self.fetcher.fetch_into(url, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                self.cache.discard(path).await;
                return Err(e);
            }
        };

        self.metrics.record_fetch();
        info!("Fetched {} ({} bytes) into {}", url, written, path.display());
        Ok((ThumbSource::Fetched, written))
    }

    async fn render(&self, url: &str, path: &Path) -> Result<(ThumbSource, u64)> {
        let request = RenderRequest::from_config(url, &self.config);
        let start_time = Instant::now();
        let raw = self.renderer.render(&request).await?;
        let elapsed = start_time.elapsed();

        let sanitizer = self.sanitizer.clone();
        let (format, quality) = (request.format, request.quality);
        let image = tokio::task::spawn_blocking(move || sanitizer.sanitize(&raw, format, quality))
            .await
            .map_err(|e| ThumbError::Render(format!("sanitizer task failed: {e}")))??;

        if image.is_empty() {
            return Err(ThumbError::InvalidImage(format!(
                "renderer output for {url} contains no {format} image"
            )));
        }

        self.cache.write(path, &image).await?;
        self.metrics.record_render(elapsed);
        info!(
            "Rendered {} ({} bytes, {:?}) into {}",
            url,
            image.len(),
            elapsed,
            path.display()
        );
        Ok((ThumbSource::Rendered, image.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageFormat, KeyStrategy, MockPageRenderer};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Never finishes within a test's patience.
    struct StalledRenderer;

    #[async_trait]
    impl PageRenderer for StalledRenderer {
        fn is_available(&self) -> bool {
            true
        }

        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn service(dir: &TempDir, format: ImageFormat) -> ThumbnailService {
        let config = Config {
            cache_directory: dir.path().to_path_buf(),
            format,
            ..Default::default()
        };
        let mut renderer = MockPageRenderer::new();
        renderer.expect_is_available().return_const(true);
        renderer.expect_render().never();
        ThumbnailService::with_backends(
            config,
            Arc::new(renderer),
            Arc::new(HttpFetcher::with_client(reqwest::Client::new())),
        )
    }

    #[test]
    fn test_path_file_uses_configured_format() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ImageFormat::Jpg);

        assert_eq!(
            service.path_file("http://example.com/"),
            dir.path().join("httpexamplecom.jpg")
        );
        assert_eq!(service.file_name("http://example.com/"), "httpexamplecom.jpg");
    }

    #[test]
    fn test_path_file_keeps_image_extension() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ImageFormat::Jpg);

        assert_eq!(
            service.file_name("http://example.com/logo.png"),
            "httpexamplecomlogopng.png"
        );
    }

    #[test]
    fn test_path_file_with_base64_keys() {
        let dir = TempDir::new().unwrap();
        let mut service = service(&dir, ImageFormat::Png);
        service.cache = CacheStore::new(dir.path(), KeyStrategy::Base64);

        let name = service.file_name("http://example.com/");
        let key = name.strip_suffix(".png").unwrap();
        assert_eq!(crate::decode_key(key).as_deref(), Some("http://example.com/"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ImageFormat::Png);

        let result = service.thumbnail("ftp://example.com/file").await;
        assert!(matches!(result, Err(ThumbError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_in_flight_entries_are_released() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ImageFormat::Png);
        let url = "http://example.com/";
        std::fs::write(service.path_file(url), vec![1u8; 8192]).unwrap();

        let thumbnail = service.thumbnail(url).await.unwrap();
        assert_eq!(thumbnail.source, ThumbSource::Cache);
        assert_eq!(thumbnail.size, 8192);
        assert!(service.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_requests_release_in_flight_entries() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            cache_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let service = ThumbnailService::with_backends(
            config,
            Arc::new(StalledRenderer),
            Arc::new(HttpFetcher::with_client(reqwest::Client::new())),
        );

        for i in 0..50 {
            let url = format!("http://example.com/page/{i}");
            let result =
                tokio::time::timeout(Duration::from_millis(5), service.thumbnail(&url)).await;
            assert!(result.is_err());
        }
        assert!(service.in_flight.is_empty());

        // One holder and several waiters on the same path, all cancelled.
        let calls = (0..8).map(|_| {
            tokio::time::timeout(Duration::from_millis(20), service.thumbnail("http://example.com/"))
        });
        for result in futures::future::join_all(calls).await {
            assert!(result.is_err());
        }
        assert!(service.in_flight.is_empty());
        assert!(!service.path_file("http://example.com/").exists());
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ImageFormat::Png);

        assert_eq!(
            service.file_name("  http://example.com/\n"),
            service.file_name("http://example.com/")
        );
        assert_eq!(
            service.file_name(" http://example.com/logo.png "),
            "httpexamplecomlogopng.png"
        );
    }
}
