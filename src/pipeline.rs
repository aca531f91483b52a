use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::discovery::{self, Pagination};
use crate::error::{ItemError, PersistenceError};
use crate::extract::Extractor;
use crate::fetch::Fetch;
use crate::progress::ProgressStore;
use crate::sink::{FlushReport, RecordSink};

/// Counts for one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub discovered: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures written to progress (never retried).
    pub failures_recorded: usize,
    pub interrupted: bool,
    pub flushed: FlushReport,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batches, {} discovered, {} skipped, {} ok, {} failed ({} will not be retried)",
            self.batches,
            self.discovered,
            self.skipped,
            self.succeeded,
            self.failed,
            self.failures_recorded
        )
    }
}

/// Discovery -> dedup -> concurrent fetch+extract -> persist -> commit.
///
/// Fetches of one batch run concurrently on the current task; results are
/// consumed one at a time by the loop in `process_batch`, which is the only
/// code that touches the sink and the progress store. A batch is always
/// drained before the next one is discovered.
pub struct Pipeline<F, X> {
    fetcher: F,
    extractor: X,
    progress: ProgressStore,
    sink: Box<dyn RecordSink>,
    settings: Settings,
    stop: Arc<AtomicBool>,
    dispatched: HashSet<String>,
    progress_bar: ProgressBar,
}

impl<F: Fetch, X: Extractor> Pipeline<F, X> {
    pub fn new(
        fetcher: F,
        extractor: X,
        progress: ProgressStore,
        sink: Box<dyn RecordSink>,
        settings: Settings,
    ) -> Self {
        Pipeline {
            fetcher,
            extractor,
            progress,
            sink,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
            dispatched: HashSet::new(),
            progress_bar: ProgressBar::hidden(),
        }
    }

    /// Flag checked between batches. Setting it lets the current batch
    /// finish, then the run flushes and returns.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress_bar(mut self, pb: ProgressBar) -> Self {
        self.progress_bar = pb;
        self
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Walk listing pages until the page ceiling or the empty-page limit,
    /// processing each page as one batch.
    pub async fn run_paginated(&mut self) -> Result<RunSummary, PersistenceError> {
        let mut summary = RunSummary::default();
        let mut pages = Pagination::new(self.settings.max_pages, self.settings.max_empty_pages);

        while let Some(page) = pages.next_page() {
            if self.stop_requested() {
                break;
            }
            let items = match discovery::list_page(&self.fetcher, &self.settings, page).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("Listing page {} failed: {}", page, e);
                    Vec::new()
                }
            };
            pages.observe(items.len());
            if items.is_empty() {
                continue;
            }
            self.process_batch(items, &mut summary).await?;
        }

        if pages.exhausted_by_empty_pages() {
            info!(
                "Stopping discovery after {} consecutive empty pages",
                self.settings.max_empty_pages
            );
        }
        self.finish(summary)
    }

    /// Process a fixed list of URLs as a single batch.
    pub async fn run_static(&mut self, urls: Vec<String>) -> Result<RunSummary, PersistenceError> {
        let mut summary = RunSummary::default();
        if !self.stop_requested() && !urls.is_empty() {
            self.process_batch(urls, &mut summary).await?;
        }
        self.finish(summary)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn process_batch(
        &mut self,
        items: Vec<String>,
        summary: &mut RunSummary,
    ) -> Result<(), PersistenceError> {
        summary.batches += 1;
        summary.discovered += items.len();

        let mut pending = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for url in items {
            if self.progress.contains(&url) || self.dispatched.contains(&url) {
                debug!("Skipping {} (already processed)", url);
                skipped += 1;
            } else {
                self.dispatched.insert(url.clone());
                pending.push(url);
            }
        }
        summary.skipped += skipped;
        if pending.is_empty() {
            debug!("Batch {}: nothing new", summary.batches);
            return Ok(());
        }
        info!(
            "Batch {}: fetching {} products ({} skipped)",
            summary.batches,
            pending.len(),
            skipped
        );
        self.progress_bar.inc_length(pending.len() as u64);

        let fetcher = &self.fetcher;
        let extractor = &self.extractor;
        let mut results = stream::iter(pending)
            .map(move |url| async move {
                let outcome = match fetcher.fetch(&url).await {
                    Ok(html) => extractor.extract(&url, &html).map_err(ItemError::from),
                    Err(e) => Err(ItemError::from(e)),
                };
                (url, outcome)
            })
            .buffer_unordered(self.settings.concurrency);

        while let Some((url, outcome)) = results.next().await {
            match outcome {
                Ok(record) => {
                    // Row is durable before the URL is committed.
                    self.sink.append(&record)?;
                    self.progress.record(&url)?;
                    summary.succeeded += 1;
                    debug!("Saved {}", url);
                }
                Err(e) => {
                    summary.failed += 1;
                    match &e {
                        ItemError::Shape(_) => warn!("No product found at {}", url),
                        ItemError::Fetch(_) => warn!("Fetch failed for {}: {}", url, e),
                    }
                    if self.settings.retry_policy.records_failure(e.is_transient()) {
                        self.progress.record(&url)?;
                        summary.failures_recorded += 1;
                    }
                }
            }
            self.progress_bar.inc(1);
        }
        Ok(())
    }

    fn finish(&mut self, mut summary: RunSummary) -> Result<RunSummary, PersistenceError> {
        summary.interrupted = self.stop_requested();
        if self.sink.pending() > 0 {
            info!("Flushing {} buffered records", self.sink.pending());
        }
        summary.flushed = self.sink.finish()?;
        self.progress_bar.finish_and_clear();
        info!("Run finished: {}", summary);
        Ok(summary)
    }
}
