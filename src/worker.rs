use crate::{Result, ThumbSource, Thumbnail, ThumbnailService};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one URL in a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub url: String,
    pub result: Result<Thumbnail>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs many thumbnail requests with bounded concurrency.
///
/// Requests for the same cache file are still rendered only once, since
/// every task goes through the same [`ThumbnailService`].
pub struct BatchProcessor {
    service: ThumbnailService,
    concurrency: usize,
    progress: Arc<ProgressTracker>,
}

impl BatchProcessor {
    /// A zero `concurrency` selects one task per CPU.
    pub fn new(service: ThumbnailService, concurrency: usize) -> Self {
        let concurrency = if concurrency == 0 {
            num_cpus::get()
        } else {
            concurrency
        };

        Self {
            service,
            concurrency,
            progress: Arc::new(ProgressTracker::new(0)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Tracker of the most recent batch.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    /// Processes `urls`, returning one outcome per input in completion order.
    pub async fn process_urls(&mut self, urls: Vec<String>) -> Vec<BatchOutcome> {
        let progress = Arc::new(ProgressTracker::new(urls.len()));
        self.process_with_progress(urls, progress).await
    }

    /// Like [`BatchProcessor::process_urls`], recording completions in a
    /// caller-supplied tracker.
    pub async fn process_with_progress(
        &mut self,
        urls: Vec<String>,
        progress: Arc<ProgressTracker>,
    ) -> Vec<BatchOutcome> {
        info!(
            "Processing batch of {} URLs with concurrency {}",
            urls.len(),
            self.concurrency
        );
        self.progress = progress.clone();

        let outcomes: Vec<BatchOutcome> = stream::iter(urls)
            .map(|url| {
                let service = self.service.clone();
                let progress = progress.clone();
                async move {
                    let result = service.thumbnail(&url).await;
                    match &result {
                        Ok(thumbnail) => debug!("{} -> {}", url, thumbnail.path.display()),
                        Err(e) => warn!("Failed to produce thumbnail for {}: {}", url, e),
                    }
                    progress.record_completion(result.is_ok());
                    BatchOutcome { url, result }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let stats = BatchStats::from_outcomes(&outcomes);
        info!(
            "Batch processing completed. Rendered: {}, Fetched: {}, Cached: {}, Errors: {}",
            stats.rendered, stats.fetched, stats.cached, stats.errors
        );

        outcomes
    }
}

/// Summary counts of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub rendered: usize,
    pub fetched: usize,
    pub cached: usize,
    pub errors: usize,
}

impl BatchStats {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut stats, outcome| {
                match &outcome.result {
                    Ok(thumbnail) => match thumbnail.source {
                        ThumbSource::Rendered => stats.rendered += 1,
                        ThumbSource::Fetched => stats.fetched += 1,
                        ThumbSource::Cache => stats.cached += 1,
                    },
                    Err(_) => stats.errors += 1,
                }
                stats
            })
    }

    pub fn succeeded(&self) -> usize {
        self.rendered + self.fetched + self.cached
    }
}

pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let seconds = elapsed.as_secs_f64();

        let rate = if seconds > 0.0 {
            completed as f64 / seconds
        } else {
            0.0
        };

        let eta = if completed > 0 && rate > 0.0 {
            let remaining = self.total.saturating_sub(completed);
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed.saturating_sub(errors),
            elapsed,
            rate,
            eta,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}
