//! Batch download entry points.
//!
//! [`download_work`] is the primary API: select the requested pages, drop
//! the ones already on disk, fetch the rest concurrently and return a
//! [`BatchReport`]. It returns only after every page has an outcome, or as
//! soon as one page hits a fatal condition (403, no response).
//!
//! Use [`crate::stream::page_stream`] instead to see pages as they finish
//! without the abort policy.

use crate::catalog::{Catalog, CatalogEntry};
use crate::config::DownloadConfig;
use crate::error::TileBookError;
use crate::pipeline::resume;
use crate::pipeline::source::{HttpTileSource, TileSource};
use crate::pipeline::stitch::{PageContext, PageOutcome};
use crate::storage::{WorkDir, WorkMetadata};
use crate::stream::{page_stream, PageReport};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a batch ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The scheduler ran (possibly over zero pages).
    Downloaded,
    /// Every requested page was already on disk; nothing was fetched.
    SkippedComplete,
}

/// Aggregate result of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    /// Pages selected by the config (range + covers).
    pub requested: usize,
    /// Requested pages already on disk.
    pub skipped: usize,
    pub saved: usize,
    /// Saved pages that needed more than one attempt. Included in `saved`.
    pub recovered: usize,
    pub empty: usize,
    /// Covers/inserts with missing tiles.
    pub skipped_incomplete: usize,
    /// Numbered pages still incomplete after the last attempt.
    pub incomplete: usize,
    /// Pages that could not be written locally.
    pub failed: usize,
    pub tiles_fetched: usize,
    pub duration_ms: u64,
}

impl BatchReport {
    fn new(requested: usize, skipped: usize) -> Self {
        Self {
            status: BatchStatus::Downloaded,
            requested,
            skipped,
            saved: 0,
            recovered: 0,
            empty: 0,
            skipped_incomplete: 0,
            incomplete: 0,
            failed: 0,
            tiles_fetched: 0,
            duration_ms: 0,
        }
    }

    /// Count one non-fatal page outcome.
    fn record(&mut self, outcome: &PageOutcome) {
        match outcome {
            PageOutcome::Saved { retried, .. } => {
                self.saved += 1;
                if *retried {
                    self.recovered += 1;
                }
            }
            PageOutcome::Empty => self.empty += 1,
            PageOutcome::SkippedIncomplete { .. } => self.skipped_incomplete += 1,
            PageOutcome::Incomplete { .. } => self.incomplete += 1,
            PageOutcome::Failed(_) => self.failed += 1,
            PageOutcome::Cancelled
            | PageOutcome::AccessDenied
            | PageOutcome::ConnectionTimeout { .. } => {}
        }
    }

    /// Pages that ended without being written.
    pub fn missing(&self) -> usize {
        self.incomplete + self.failed
    }
}

/// Download every requested page of `catalog` over HTTP.
///
/// # Errors
/// - [`TileBookError::AccessDenied`] / [`TileBookError::ConnectionTimeout`]
///   for the first fatal page; the rest of the batch is cancelled.
/// - [`TileBookError::InvalidCatalog`], [`TileBookError::Io`] for bad input
///   or an unusable output directory.
///
/// Incomplete, empty and locally failed pages are not errors; they are
/// counted in the report.
pub async fn download_work(
    catalog: &Catalog,
    config: &DownloadConfig,
) -> Result<BatchReport, TileBookError> {
    let source = HttpTileSource::new(config.tile_timeout_secs, &config.user_agent)
        .map_err(|e| TileBookError::Internal(format!("Failed to build HTTP client: {}", e)))?;
    download_with_source(catalog, config, Arc::new(source)).await
}

/// [`download_work`] with a caller-supplied tile source.
pub async fn download_with_source(
    catalog: &Catalog,
    config: &DownloadConfig,
    source: Arc<dyn TileSource>,
) -> Result<BatchReport, TileBookError> {
    let start = Instant::now();
    catalog.validate()?;
    info!(
        "Starting download: {} ({} pages in catalog)",
        catalog.media_id,
        catalog.pages.len()
    );

    // ── Step 1: Work directory ───────────────────────────────────────────
    let work = WorkDir::for_catalog(catalog, config);
    work.ensure_dirs().await?;

    // ── Step 2: Select and filter ────────────────────────────────────────
    let requested = config.select(&catalog.pages);
    let plan = resume::filter_existing(&work, &requested)?;
    let mut report = BatchReport::new(requested.len(), plan.skipped.len());

    if plan.is_complete() {
        info!(
            "All {} requested pages of {} are already downloaded",
            report.requested, catalog.media_id
        );
        report.status = BatchStatus::SkippedComplete;
        report.duration_ms = start.elapsed().as_millis() as u64;
        return Ok(report);
    }

    let pending: Vec<CatalogEntry> = plan.pending.into_iter().cloned().collect();
    let total = pending.len();
    debug!("{} pages to fetch into {}", total, work.path().display());

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total, report.skipped);
    }

    // ── Step 3: Fetch ────────────────────────────────────────────────────
    let ctx = Arc::new(PageContext::new(catalog, config, work.clone(), source));
    let mut pages = page_stream(pending, Arc::clone(&ctx), config.workers);
    let mut completed = 0;

    while let Some(page) = pages.next().await {
        if page.outcome.is_fatal() {
            ctx.cancel();
            drop(pages);
            let err = fatal_error(catalog, page);
            warn!("Stopping {}: {}", catalog.media_id, err);
            return Err(err);
        }
        completed += 1;
        report.record(&page.outcome);
    }

    report.tiles_fetched = ctx.tiles_fetched();

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(completed, total);
    }

    // ── Step 4: Metadata ─────────────────────────────────────────────────
    WorkMetadata::from_catalog(catalog, config.folder_name.clone())
        .write(&work)
        .await?;

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Download complete: {} saved, {} skipped, {} missing, {}ms",
        report.saved,
        report.skipped,
        report.missing(),
        report.duration_ms
    );
    Ok(report)
}

/// Synchronous wrapper around [`download_work`].
///
/// Creates a temporary tokio runtime internally.
pub fn download_sync(
    catalog: &Catalog,
    config: &DownloadConfig,
) -> Result<BatchReport, TileBookError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TileBookError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(download_work(catalog, config))
}

fn fatal_error(catalog: &Catalog, page: PageReport) -> TileBookError {
    let label = page.label;
    let outcome = page.outcome.to_string();
    page.outcome
        .into_fatal_error(catalog, &label)
        .unwrap_or_else(|| TileBookError::Internal(format!("Page {}: {} is not fatal", label, outcome)))
}
