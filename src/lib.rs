//! # pagethumb
//!
//! Cached web page thumbnails rendered by `wkhtmltoimage`.
//!
//! A thumbnail request goes through a short pipeline:
//!
//! 1. The URL is turned into a filesystem-safe cache key, and the cache file
//!    `<cache_directory>/<key>.<ext>` is checked. A file that exists, is big
//!    enough to be a real render and is younger than the configured maximum
//!    age is returned as is.
//! 2. URLs that already point at an image (`.png`, `.jpg`, ...) are
//!    downloaded verbatim. URLs naming archives, office documents, media or
//!    executables are refused.
//! 3. Everything else is rendered by `wkhtmltoimage` under a deadline. The
//!    renderer output is stripped of leading diagnostic text, re-encoded,
//!    checked against a minimum size and written to the cache.
//!
//! Concurrent requests for the same cache file are serialized, so a page is
//! rendered once even when many callers ask for it at the same time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagethumb::{Config, ThumbnailService};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.set_cache_directory("/var/cache/thumbs")?;
//!     config.set_max_age(Duration::from_secs(7 * 24 * 3600));
//!
//!     let service = ThumbnailService::new(config)?;
//!     let thumbnail = service.thumbnail("https://example.com/").await?;
//!     println!("{} ({:?})", thumbnail.path.display(), thumbnail.source);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! pagethumb --cache-dir thumbs render https://example.com/
//! pagethumb --cache-dir thumbs batch --input urls.txt --concurrency 4
//! pagethumb --cache-dir thumbs probe https://example.com/
//! ```

/// Configuration, formats and render requests
pub mod config;

/// Error types
pub mod error;

/// Cache key derivation
pub mod key;

/// Cache freshness probe and cache file IO
pub mod cache;

/// External renderer invocation
pub mod renderer;

/// Renderer output clean-up and re-encoding
pub mod sanitizer;

/// Direct image downloads and URL classification
pub mod fetch;

/// The thumbnail pipeline
pub mod thumbnail_service;

/// Bounded-concurrency batch processing
pub mod worker;

/// Command-line interface implementation
pub mod cli;

/// Metrics recording and Prometheus exposition
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use self::cache::*;
pub use self::cli::*;
pub use self::config::*;
pub use self::error::*;
pub use self::fetch::*;
pub use self::key::*;
pub use self::metrics::*;
pub use self::renderer::*;
pub use self::sanitizer::*;
pub use self::thumbnail_service::*;
pub use self::utils::*;
pub use self::worker::*;
