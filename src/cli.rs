use crate::{
    format_bytes, format_duration, install_prometheus, parse_url_list, BatchProcessor,
    BatchStats, Config, ErrorSeverity, ProgressTracker, ThumbSource, ThumbnailService, RENDERER_BINARY,
};
use anyhow::{bail, Context};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pagethumb")]
#[command(about = "Cached web page thumbnails rendered by wkhtmltoimage")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Thumbnail cache directory")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Maximum thumbnail age in seconds (0 = never expires)")]
    pub max_age: Option<u64>,

    #[arg(long, global = true, help = "Output format (png, gif, jpg, svg)")]
    pub format: Option<String>,

    #[arg(long, global = true, help = "Renderer screen width")]
    pub width: Option<u32>,

    #[arg(long, global = true, help = "Renderer screen height")]
    pub height: Option<u32>,

    #[arg(long, global = true, help = "Image quality (0-100)")]
    pub quality: Option<u8>,

    #[arg(long, global = true, help = "Disable JavaScript in the renderer")]
    pub no_javascript: bool,

    #[arg(long, global = true, help = "User-Agent sent by the renderer")]
    pub user_agent: Option<String>,

    #[arg(long, global = true, help = "wkhtmltoimage executable path")]
    pub renderer: Option<PathBuf>,

    #[arg(long, global = true, help = "Render timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Produce (or reuse) the thumbnail of a URL and print its path
    Render {
        #[arg(help = "Page or image URL")]
        url: String,
    },

    /// Produce thumbnails for URLs from a file
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, default_value = "0", help = "Concurrency level (0 = one per CPU)")]
        concurrency: usize,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,

        #[arg(long, help = "Print Prometheus metrics when done")]
        metrics: bool,
    },

    /// Print the cache path of a URL without rendering
    Path {
        #[arg(help = "Page or image URL")]
        url: String,
    },

    /// Report whether the cached thumbnail of a URL is fresh
    Probe {
        #[arg(help = "Page or image URL")]
        url: String,
    },

    /// Check renderer availability and the cache directory
    Check,

    /// Validate a configuration file
    Validate {
        #[arg(help = "Configuration file to validate")]
        file: PathBuf,
    },
}

impl Cli {
    /// Loads the configuration file, if any, and applies command-line
    /// overrides on top of it.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => Config::default(),
        };

        self.apply_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(dir) = &self.cache_dir {
            config.set_cache_directory(dir)?;
        }
        if let Some(max_age) = self.max_age {
            config.set_max_age(Duration::from_secs(max_age));
        }
        if let Some(format) = &self.format {
            config.set_format(format)?;
        }
        if let Some(width) = self.width {
            config.set_width(width);
        }
        if let Some(height) = self.height {
            config.set_height(height);
        }
        if let Some(quality) = self.quality {
            config.set_quality(quality);
        }
        if self.no_javascript {
            config.set_javascript(false);
        }
        if let Some(user_agent) = &self.user_agent {
            config.set_user_agent(user_agent);
        }
        if let Some(renderer) = &self.renderer {
            config.renderer_path = Some(renderer.clone());
        }
        if let Some(timeout) = self.timeout {
            config.render_timeout = Duration::from_secs(timeout);
        }
        Ok(())
    }
}

pub struct CliRunner {
    pub config: Config,
    pub service: ThumbnailService,
}

impl CliRunner {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let service = ThumbnailService::new(config.clone())?;
        Ok(Self { config, service })
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Render { url } => self.run_render(&url).await,
            Commands::Batch {
                input,
                concurrency,
                progress_interval,
                metrics,
            } => {
                self.run_batch(&input, concurrency, progress_interval, metrics)
                    .await
            }
            Commands::Path { url } => {
                println!("{}", self.service.path_file(&url).display());
                Ok(())
            }
            Commands::Probe { url } => self.run_probe(&url).await,
            Commands::Check => self.run_check().await,
            Commands::Validate { file } => validate_config(&file),
        }
    }

    pub async fn run_render(&self, url: &str) -> anyhow::Result<()> {
        let thumbnail = self.service.thumbnail(url).await?;
        info!(
            "{} thumbnail for {} ({})",
            match thumbnail.source {
                ThumbSource::Cache => "Cached",
                ThumbSource::Rendered => "Rendered",
                ThumbSource::Fetched => "Fetched",
            },
            url,
            format_bytes(thumbnail.size)
        );
        println!("{}", thumbnail.path.display());
        Ok(())
    }

    pub async fn run_batch(
        &self,
        input: &Path,
        concurrency: usize,
        progress_interval: Option<u64>,
        metrics: bool,
    ) -> anyhow::Result<()> {
        let handle = if metrics {
            Some(install_prometheus()?)
        } else {
            None
        };

        let content = fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        let urls = parse_url_list(&content);
        info!("Loaded {} URLs from {}", urls.len(), input.display());

        let progress = Arc::new(ProgressTracker::new(urls.len()));
        let reporter = progress_interval.filter(|secs| *secs > 0).map(|secs| {
            let tracker = progress.clone();
            tokio::spawn(report_progress(tracker, Duration::from_secs(secs)))
        });

        let mut processor = BatchProcessor::new(self.service.clone(), concurrency);
        let outcomes = processor.process_with_progress(urls, progress).await;
        if let Some(reporter) = reporter {
            reporter.abort();
        }

        for outcome in &outcomes {
            match &outcome.result {
                Ok(thumbnail) => println!("{}\t{}", outcome.url, thumbnail.path.display()),
                Err(e) => match e.severity() {
                    ErrorSeverity::Low => warn!("{}: {}", outcome.url, e),
                    _ => error!("{}: {}", outcome.url, e),
                },
            }
        }

        let stats = BatchStats::from_outcomes(&outcomes);
        println!(
            "Done: {} rendered, {} fetched, {} cached, {} failed",
            stats.rendered, stats.fetched, stats.cached, stats.errors
        );

        if let Some(handle) = handle {
            print!("{}", handle.render());
        }

        if stats.errors > 0 {
            bail!("{} of {} URLs failed", stats.errors, outcomes.len());
        }
        Ok(())
    }

    pub async fn run_probe(&self, url: &str) -> anyhow::Result<()> {
        let path = self.service.path_file(url);
        let fresh = self.service.is_cached(url).await;

        println!("Path: {}", path.display());
        println!("Fresh: {}", if fresh { "yes" } else { "no" });

        match fs::metadata(&path).await {
            Ok(metadata) => {
                println!("  Size: {}", format_bytes(metadata.len()));
                if let Ok(modified) = metadata.modified() {
                    let modified: DateTime<Local> = modified.into();
                    println!("  Modified: {}", modified.format("%Y-%m-%d %H:%M:%S %z"));
                }
            }
            Err(_) => println!("  (not cached)"),
        }

        Ok(())
    }

    pub async fn run_check(&self) -> anyhow::Result<()> {
        println!("System Check");
        println!("============");

        let available = self.service.renderer_available();
        println!("Renderer:");
        match &self.config.renderer_path {
            Some(path) => println!("  Configured path: {}", path.display()),
            None => println!("  Looked up in PATH: {RENDERER_BINARY}"),
        }
        println!("  Available: {}", if available { "yes" } else { "no" });

        let directory = self.config.cache_directory();
        println!("\nCache:");
        println!("  Directory: {}", directory.display());
        let exists = match fs::metadata(directory).await {
            Ok(metadata) => metadata.is_dir(),
            Err(_) => false,
        };
        println!("  Exists: {}", if exists { "yes" } else { "no (created on first write)" });
        if self.config.max_age.is_zero() {
            println!("  Max age: never expires");
        } else {
            println!("  Max age: {}", format_duration(self.config.max_age));
        }

        if !available {
            bail!("{} is not available", RENDERER_BINARY);
        }
        Ok(())
    }
}

async fn report_progress(tracker: Arc<ProgressTracker>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    while !tracker.is_complete() {
        interval.tick().await;
        let progress = tracker.get_progress();
        eprintln!(
            "Progress: {}/{} ({:.1}%) - Success: {}, Errors: {}, Rate: {:.1}/s, ETA: {}",
            progress.completed,
            progress.total,
            (progress.completed as f64 / progress.total as f64) * 100.0,
            progress.success,
            progress.errors,
            progress.rate,
            progress
                .eta
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string())
        );
    }
}

pub fn validate_config(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());

    let config = Config::from_json_file(path)?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Cache directory: {}", config.cache_directory.display());
    println!("  Format: {}", config.format);
    println!("  Screen: {}x{}", config.width, config.height);
    println!("  Quality: {}", config.quality);
    println!("  JavaScript: {}", config.javascript);
    println!("  Render timeout: {:?}", config.render_timeout);
    println!("  Key strategy: {:?}", config.key_strategy);

    Ok(())
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
