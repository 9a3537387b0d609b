//! Direct downloads for URLs that already point at an image
//!
//! Rendering a PNG file through a headless browser only produces a picture
//! of a picture, so image URLs are downloaded verbatim instead. URLs naming
//! documents the renderer cannot show (archives, office files, media,
//! executables) are refused before any work is done.

use crate::{Result, ThumbError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

/// Extensions downloaded as-is instead of rendered.
pub const IMAGE_EXTENSIONS: &[&str] = &["gif", "jpeg", "jpg", "png", "svg"];

/// Extensions that are never rendered nor downloaded.
pub const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    // archives
    "7z", "bz2", "gz", "rar", "tar", "tgz", "xz", "zip",
    // documents
    "doc", "docx", "odp", "ods", "odt", "pdf", "ppt", "pptx", "rtf", "xls", "xlsx",
    // audio and video
    "avi", "flac", "m4a", "mkv", "mov", "mp3", "mp4", "mpeg", "mpg", "ogg", "wav", "webm", "wmv",
    // executables and disk images
    "apk", "bin", "deb", "dll", "dmg", "exe", "iso", "msi", "rpm",
];

/// What a URL points at, judging by the extension of its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlKind {
    /// A web page, handed to the renderer.
    Page,
    /// An image file; carries the lower-cased extension.
    Image(String),
    /// A known non-renderable document; carries the lower-cased extension.
    Unsupported(String),
}

pub fn classify(url: &Url) -> UrlKind {
    let Some(extension) = path_extension(url) else {
        return UrlKind::Page;
    };

    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        UrlKind::Image(extension)
    } else if UNSUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        UrlKind::Unsupported(extension)
    } else {
        UrlKind::Page
    }
}

fn path_extension(url: &Url) -> Option<String> {
    let file_name = url.path_segments()?.last()?;
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Downloads a resource into a writer.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Streams the body of `url` into `sink`, returning the bytes written.
    async fn fetch_into(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64>;
}

/// Plain HTTP GET with an explicit timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ThumbError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch_into(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        match response.content_length() {
            Some(length) if length > 0 => debug!("Downloading {} bytes from {}", length, url),
            _ => {
                return Err(ThumbError::Network(format!("{url} returned no content length")));
            }
        }

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;

        Ok(written)
    }
}
