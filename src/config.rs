//! Configuration management with serde serialization/deserialization
//!
//! This module holds the settings of a thumbnail service: where thumbnails
//! are cached, how long they stay fresh, how the renderer is invoked and how
//! its output is validated. A `Config` is a plain value owned by a
//! [`ThumbnailService`](crate::ThumbnailService), so several differently
//! configured services can live in one process.

use crate::{Result, ThumbError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Smallest rendered thumbnail, in bytes, that is accepted as a real page
/// image. Anything smaller is treated as a blank or broken render.
pub const DEFAULT_MIN_IMAGE_SIZE: u64 = 4096;

/// Upper bound on the number of leading bytes stripped from renderer output
/// while looking for the embedded image.
pub const DEFAULT_MAX_GARBAGE_PREFIX: usize = 16 * 1024;

/// Main configuration structure for the thumbnail service
///
/// # Examples
///
/// ```rust
/// use pagethumb::{Config, ImageFormat};
/// use std::time::Duration;
///
/// let config = Config {
///     format: ImageFormat::Jpg,
///     max_age: Duration::from_secs(3600),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the cached thumbnails (default: current directory)
    ///
    /// Always stored as an absolute path when set through
    /// [`Config::set_cache_directory`].
    pub cache_directory: PathBuf,

    /// Maximum age of a cached thumbnail (default: zero)
    ///
    /// Zero disables the age check: once a thumbnail exists it is reused
    /// forever, which is usually what you want for "how did the page look
    /// when I linked to it".
    pub max_age: Duration,

    /// Output format of rendered thumbnails (default: PNG)
    pub format: ImageFormat,

    /// Width in pixels of the renderer's virtual screen (default: 1024)
    pub width: u32,

    /// Height in pixels of the renderer's virtual screen (default: 742)
    ///
    /// Zero lets the renderer use the full page height.
    pub height: u32,

    /// Image quality passed to the renderer and the JPEG encoder (default: 100)
    pub quality: u8,

    /// Whether the renderer executes JavaScript (default: true)
    pub javascript: bool,

    /// Custom User-Agent header sent by the renderer (default: renderer default)
    pub user_agent: Option<String>,

    /// Path to the `wkhtmltoimage` executable (default: looked up in `PATH`)
    pub renderer_path: Option<PathBuf>,

    /// Directory the renderer may use for its own web cache (default: none)
    pub renderer_cache_dir: Option<PathBuf>,

    /// Deadline for one renderer invocation (default: 30 seconds)
    pub render_timeout: Duration,

    /// Timeout for direct image downloads (default: 30 seconds)
    pub fetch_timeout: Duration,

    /// Minimum size in bytes of a valid rendered thumbnail (default: 4096)
    pub min_image_size: u64,

    /// Maximum number of leading garbage bytes stripped from renderer output
    /// (default: 16 KiB)
    pub max_garbage_prefix: usize,

    /// How URLs are turned into cache file names (default: sanitize)
    pub key_strategy: KeyStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_age: Duration::ZERO,
            format: ImageFormat::Png,
            width: 1024,
            height: 742,
            quality: 100,
            javascript: true,
            user_agent: None,
            renderer_path: None,
            renderer_cache_dir: None,
            render_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
            min_image_size: DEFAULT_MIN_IMAGE_SIZE,
            max_garbage_prefix: DEFAULT_MAX_GARBAGE_PREFIX,
            key_strategy: KeyStrategy::Sanitize,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file; missing fields keep their
    /// defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.cache_directory = absolutize(&config.cache_directory)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.render_timeout.is_zero() {
            return Err(ThumbError::Config(
                "render timeout must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(ThumbError::Config(
                "fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.quality > 100 {
            return Err(ThumbError::Config(format!(
                "quality must be between 0 and 100, got {}",
                self.quality
            )));
        }

        if self.cache_directory.as_os_str().is_empty() {
            return Err(ThumbError::Config("cache directory is not set".to_string()));
        }

        Ok(())
    }

    pub fn cache_directory(&self) -> &Path {
        &self.cache_directory
    }

    /// Sets the thumbnail directory, resolving it to an absolute path.
    pub fn set_cache_directory(&mut self, directory: impl AsRef<Path>) -> Result<()> {
        self.cache_directory = absolutize(directory.as_ref())?;
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn set_max_age(&mut self, max_age: Duration) {
        self.max_age = max_age;
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Sets the output format from its name; `jpeg` is stored as `jpg`.
    pub fn set_format(&mut self, format: &str) -> Result<()> {
        self.format = format.parse()?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn set_width(&mut self, width: u32) {
        self.width = width;
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height;
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Sets the image quality, clamped to 100.
    pub fn set_quality(&mut self, quality: u8) {
        self.quality = quality.min(100);
    }

    pub fn javascript(&self) -> bool {
        self.javascript
    }

    pub fn set_javascript(&mut self, enabled: bool) {
        self.javascript = enabled;
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Sets the User-Agent; an empty string restores the renderer default.
    pub fn set_user_agent(&mut self, user_agent: &str) {
        let user_agent = user_agent.trim();
        self.user_agent = if user_agent.is_empty() {
            None
        } else {
            Some(user_agent.to_string())
        };
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ThumbError::Config("cache directory is empty".to_string()));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Supported thumbnail formats
///
/// - PNG: lossless, scales best, the default
/// - GIF: palette based, small files for simple pages
/// - JPG: lossy, honours the configured quality
/// - SVG: passed through from the renderer untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Gif,
    #[serde(alias = "jpeg")]
    Jpg,
    Svg,
}

impl ImageFormat {
    /// File extension, also the value of the renderer's `--format` flag.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Svg => "svg",
        }
    }

    /// The `image` crate format used to decode and re-encode, `None` for SVG.
    pub fn raster(&self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::Gif => Some(image::ImageFormat::Gif),
            ImageFormat::Jpg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Svg => None,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ThumbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "gif" => Ok(ImageFormat::Gif),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
            "svg" => Ok(ImageFormat::Svg),
            other => Err(ThumbError::Config(format!("unknown image format: {other}"))),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Strategy for deriving cache file names from URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Keep only ASCII letters and digits. Lossy: URLs that differ only in
    /// punctuation share a key.
    Sanitize,
    /// URL-safe base64 of the URL bytes. Reversible, longer names.
    Base64,
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self::Sanitize
    }
}

/// One render request, derived from a [`Config`] and a URL.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Tags the renderer's log lines and errors for this request.
    pub id: String,
    pub url: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub javascript: bool,
    pub user_agent: Option<String>,
}

impl RenderRequest {
    pub fn from_config(url: &str, config: &Config) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            format: config.format,
            width: config.width,
            height: config.height,
            quality: config.quality,
            javascript: config.javascript,
            user_agent: config.user_agent.clone(),
        }
    }
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self::from_config("", &Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_age, Duration::ZERO);
        assert_eq!(config.format, ImageFormat::Png);
        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 742);
        assert_eq!(config.quality, 100);
        assert!(config.javascript);
        assert_eq!(config.render_timeout, Duration::from_secs(30));
        assert_eq!(config.min_image_size, DEFAULT_MIN_IMAGE_SIZE);
        assert!(config.cache_directory.is_absolute());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_format_normalizes_jpeg() {
        let mut config = Config::default();
        config.set_format("JPEG").unwrap();
        assert_eq!(config.format(), ImageFormat::Jpg);
        assert_eq!(config.format().extension(), "jpg");

        assert!(matches!(config.set_format("bmp"), Err(ThumbError::Config(_))));
        assert_eq!(config.format(), ImageFormat::Jpg);
    }

    #[test]
    fn test_set_cache_directory_is_absolute() {
        let mut config = Config::default();
        config.set_cache_directory("thumbs").unwrap();
        assert!(config.cache_directory().is_absolute());
        assert!(config.cache_directory().ends_with("thumbs"));

        assert!(config.set_cache_directory("").is_err());
    }

    #[test]
    fn test_setters() {
        let mut config = Config::default();
        config.set_quality(250);
        assert_eq!(config.quality(), 100);

        config.set_user_agent("  Mozilla/5.0 thumbs  ");
        assert_eq!(config.user_agent(), Some("Mozilla/5.0 thumbs"));
        config.set_user_agent("");
        assert_eq!(config.user_agent(), None);

        config.set_max_age(Duration::from_secs(60));
        assert_eq!(config.max_age(), Duration::from_secs(60));

        config.set_javascript(false);
        assert!(!config.javascript());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = Config {
            render_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ThumbError::Config(_))));

        let config = Config {
            fetch_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"format": "jpeg", "key_strategy": "base64", "width": 800}"#)
                .unwrap();
        assert_eq!(config.format, ImageFormat::Jpg);
        assert_eq!(config.key_strategy, KeyStrategy::Base64);
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 742);
    }

    #[test]
    fn test_render_request_from_config() {
        let config = Config {
            format: ImageFormat::Gif,
            user_agent: Some("thumbs/1.0".to_string()),
            javascript: false,
            ..Default::default()
        };
        let request = RenderRequest::from_config("http://example.com/", &config);
        assert!(!request.id.is_empty());
        assert_eq!(request.url, "http://example.com/");
        assert_eq!(request.format, ImageFormat::Gif);
        assert_eq!(request.user_agent.as_deref(), Some("thumbs/1.0"));
        assert!(!request.javascript);
    }
}
