//! Invocation of the external HTML-to-image renderer
//!
//! The renderer is `wkhtmltoimage`, run once per thumbnail with the image
//! written to its standard output. Each run is bounded by a deadline; the
//! child process is killed when the deadline passes or the caller goes away.

use crate::{Config, RenderRequest, Result, ThumbError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Name of the renderer executable looked up in `PATH`.
pub const RENDERER_BINARY: &str = "wkhtmltoimage";

/// Something that turns a page URL into encoded image bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Whether the renderer can run at all. An unavailable renderer fails
    /// every call with [`ThumbError::Config`].
    fn is_available(&self) -> bool;

    /// Renders `request`, returning the raw (unsanitized) output.
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>>;
}

/// `wkhtmltoimage` run as a child process.
#[derive(Debug, Clone)]
pub struct WkHtmlToImage {
    binary: Option<PathBuf>,
    timeout: Duration,
    cache_dir: Option<PathBuf>,
}

impl WkHtmlToImage {
    /// Resolves the renderer binary once: `config.renderer_path` when set,
    /// otherwise a `PATH` lookup.
    pub fn from_config(config: &Config) -> Self {
        let binary = match &config.renderer_path {
            Some(path) => which::which(path).ok(),
            None => which::which(RENDERER_BINARY).ok(),
        };

        match &binary {
            Some(path) => debug!("Using renderer at {}", path.display()),
            None => warn!("{} not found; thumbnails cannot be rendered", RENDERER_BINARY),
        }

        Self {
            binary,
            timeout: config.render_timeout,
            cache_dir: config.renderer_cache_dir.clone(),
        }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

#[async_trait]
impl PageRenderer for WkHtmlToImage {
    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        let Some(binary) = &self.binary else {
            return Err(ThumbError::Config(format!("{RENDERER_BINARY} executable not found")));
        };

        let args = build_args(request, self.cache_dir.as_deref());
        debug!("[{}] Running {} {}", request.id, binary.display(), args.join(" "));

        let mut cmd = Command::new(binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start_time = Instant::now();
        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(io_error)) => {
                return Err(ThumbError::Render(format!(
                    "[{}] failed to run {}: {}",
                    request.id,
                    binary.display(),
                    io_error
                )));
            }
            Err(_elapsed) => {
                warn!(
                    "[{}] Renderer timed out after {:?} for {}",
                    request.id, self.timeout, request.url
                );
                return Err(ThumbError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.stdout.is_empty() {
                return Err(ThumbError::Render(format!(
                    "[{}] {} exited with {}: {}",
                    request.id,
                    RENDERER_BINARY,
                    output.status,
                    stderr.trim()
                )));
            }
            warn!(
                "[{}] Renderer exited with {} for {}, salvaging {} bytes of output",
                request.id,
                output.status,
                request.url,
                output.stdout.len()
            );
        }

        debug!(
            "[{}] Renderer produced {} bytes for {} in {:?}",
            request.id,
            output.stdout.len(),
            request.url,
            start_time.elapsed()
        );
        Ok(output.stdout)
    }
}

/// Builds the renderer command line for `request`.
///
/// The last two arguments are always the URL and `-`, which makes the
/// renderer write the image to stdout instead of a file.
pub fn build_args(request: &RenderRequest, cache_dir: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-q".to_string(),
        "--disable-plugins".to_string(),
        "--disable-smart-width".to_string(),
        "--format".to_string(),
        request.format.extension().to_string(),
    ];

    if let Some(user_agent) = &request.user_agent {
        args.push("--custom-header".to_string());
        args.push("User-Agent".to_string());
        args.push(user_agent.clone());
    }

    if let Some(dir) = cache_dir {
        args.push("--cache-dir".to_string());
        args.push(dir.display().to_string());
    }

    if request.height > 0 {
        args.push("--height".to_string());
        args.push(request.height.to_string());
    }

    if request.width > 0 {
        args.push("--width".to_string());
        args.push(request.width.to_string());
    }

    if (1..=100).contains(&request.quality) {
        args.push("--quality".to_string());
        args.push(request.quality.to_string());
    }

    args.push(if request.javascript {
        "--enable-javascript".to_string()
    } else {
        "--disable-javascript".to_string()
    });

    args.push(request.url.clone());
    args.push("-".to_string());
    args
}
