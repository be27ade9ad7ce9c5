//! Page fetch-and-stitch: download every tile of one page and assemble it.
//!
//! ## Scan order and failure classes
//!
//! Tiles are requested one after another in row-major order. The first
//! request that gets no response, or a 403, ends the scan: the same thing
//! would happen to every later tile and every later page. Any other tile
//! failure (5xx, 404, undecodable body) leaves a hole and the scan goes on;
//! holes are detected by counting tiles afterwards.
//!
//! ## Incomplete pages
//!
//! A numbered page with holes is fetched again from scratch, up to
//! `max_page_attempts` times in total. Covers and inserts with holes are
//! accepted as skipped; many works simply do not have all of them.
//!
//! The tile buffer is a plain `Vec` owned by the task handling the page.

use super::grid::{TileGrid, TilePolicy};
use super::region::build_region;
use super::source::{TileResponse, TileSource};
use crate::catalog::{Catalog, CatalogEntry, PageKey};
use crate::config::DownloadConfig;
use crate::error::{PageError, TileBookError};
use crate::progress::ProgressCallback;
use crate::storage::{persist_jpeg, WorkDir};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Final result of fetching one page.
#[derive(Debug, Clone, Serialize)]
pub enum PageOutcome {
    /// The page was stitched and written. `retried` marks a page that came
    /// back incomplete at first and was recovered by a later attempt.
    Saved {
        width: u32,
        height: u32,
        retried: bool,
    },
    /// Not a single tile came back: there is no such page.
    Empty,
    /// A cover or insert with missing tiles; nothing was written.
    SkippedIncomplete { fetched: usize, expected: usize },
    /// A numbered page still had missing tiles after the last attempt.
    Incomplete {
        fetched: usize,
        expected: usize,
        attempts: u32,
    },
    /// The remote service answered 403. Fatal for the batch.
    AccessDenied,
    /// A tile request got no response. Fatal for the batch.
    ConnectionTimeout { url: String, detail: String },
    /// The batch was cancelled before the page finished.
    Cancelled,
    /// Stitching or writing failed locally.
    Failed(PageError),
}

impl PageOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, PageOutcome::Saved { .. })
    }

    /// Outcomes that stop the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PageOutcome::AccessDenied | PageOutcome::ConnectionTimeout { .. }
        )
    }

    /// The batch-level error for a fatal outcome; `None` otherwise.
    pub fn into_fatal_error(self, catalog: &Catalog, label: &str) -> Option<TileBookError> {
        match self {
            PageOutcome::ConnectionTimeout { url, detail } => {
                Some(TileBookError::ConnectionTimeout {
                    page: label.to_string(),
                    url,
                    detail,
                })
            }
            PageOutcome::AccessDenied => Some(TileBookError::AccessDenied {
                media_id: catalog.media_id.clone(),
                access: catalog.access.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for PageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageOutcome::Saved {
                width,
                height,
                retried,
            } => {
                write!(f, "saved {}x{}", width, height)?;
                if *retried {
                    f.write_str(" after retry")?;
                }
                Ok(())
            }
            PageOutcome::Empty => f.write_str("finished, no more pages"),
            PageOutcome::SkippedIncomplete { fetched, expected } => {
                write!(f, "skipped ({}/{} tiles)", fetched, expected)
            }
            PageOutcome::Incomplete {
                fetched,
                expected,
                attempts,
            } => write!(
                f,
                "incomplete ({}/{} tiles after {} attempts)",
                fetched, expected, attempts
            ),
            PageOutcome::AccessDenied => f.write_str("access denied"),
            PageOutcome::ConnectionTimeout { detail, .. } => {
                write!(f, "no response: {}", detail)
            }
            PageOutcome::Cancelled => f.write_str("cancelled"),
            PageOutcome::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Everything a fetch unit needs, shared by all workers of one batch.
pub struct PageContext {
    pub source: Arc<dyn TileSource>,
    pub policy: TilePolicy,
    pub work: WorkDir,
    /// Digits used for numbered page labels.
    pub key_width: usize,
    pub resize_percent: Option<u32>,
    pub jpeg_quality: u8,
    pub max_page_attempts: u32,
    pub echo_urls: bool,
    pub echo_errors: bool,
    pub callback: Option<ProgressCallback>,
    cancelled: AtomicBool,
    tiles_fetched: AtomicUsize,
}

impl PageContext {
    pub fn new(
        catalog: &Catalog,
        config: &DownloadConfig,
        work: WorkDir,
        source: Arc<dyn TileSource>,
    ) -> Self {
        Self {
            source,
            policy: TilePolicy::for_catalog(catalog),
            work,
            key_width: catalog.category.page_key_width(),
            resize_percent: config.resize_percent,
            jpeg_quality: config.jpeg_quality,
            max_page_attempts: config.max_page_attempts.max(1),
            echo_urls: config.echo_urls,
            echo_errors: config.echo_errors,
            callback: config.progress_callback.clone(),
            cancelled: AtomicBool::new(false),
            tiles_fetched: AtomicUsize::new(0),
        }
    }

    pub fn label(&self, key: PageKey) -> String {
        key.label(self.key_width)
    }

    /// Stop issuing tile requests in every fetch unit using this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Tiles decoded so far, across all pages.
    pub fn tiles_fetched(&self) -> usize {
        self.tiles_fetched.load(Ordering::Relaxed)
    }

    fn tile_failed(&self, page: &str, column: u32, row: u32, error: &str) {
        debug!("Page {}: tile {},{} failed: {}", page, column, row, error);
        if self.echo_errors {
            if let Some(cb) = &self.callback {
                cb.on_tile_error(page, column, row, error);
            }
        }
    }
}

/// A decoded tile and its grid position.
pub struct Tile {
    pub column: u32,
    pub row: u32,
    pub image: DynamicImage,
}

/// Tiles collected for one attempt at a page.
pub struct TileSet {
    pub tiles: Vec<Tile>,
    pub expected: usize,
    /// Sum of the widths of the row-0 tiles.
    pub total_width: u32,
    /// Sum of the heights of the column-0 tiles.
    pub total_height: u32,
    pub row0_tiles: u32,
    pub column0_tiles: u32,
}

impl TileSet {
    pub fn new(grid: &TileGrid) -> Self {
        Self {
            tiles: Vec::with_capacity(grid.tile_count()),
            expected: grid.tile_count(),
            total_width: 0,
            total_height: 0,
            row0_tiles: 0,
            column0_tiles: 0,
        }
    }

    pub fn push(&mut self, column: u32, row: u32, image: DynamicImage) {
        let (w, h) = image.dimensions();
        if row == 0 {
            self.total_width += w;
            self.row0_tiles += 1;
        }
        if column == 0 {
            self.total_height += h;
            self.column0_tiles += 1;
        }
        self.tiles.push(Tile { column, row, image });
    }

    pub fn is_complete(&self) -> bool {
        self.tiles.len() == self.expected
    }
}

/// Paste every tile at `(column × tile width, row × tile height)` on a canvas
/// of `total_width × total_height`.
pub fn stitch(set: &TileSet, policy: TilePolicy) -> RgbImage {
    let mut canvas = RgbImage::new(set.total_width, set.total_height);
    for tile in &set.tiles {
        let x = i64::from(tile.column) * i64::from(policy.tile_width);
        let y = i64::from(tile.row) * i64::from(policy.tile_height);
        imageops::replace(&mut canvas, &tile.image.to_rgb8(), x, y);
    }
    canvas
}

/// Downscale to `percent` of the original size (no-op at 100 or above).
pub fn resize_to_percent(image: RgbImage, percent: u32) -> RgbImage {
    if percent >= 100 {
        return image;
    }
    let (w, h) = image.dimensions();
    let nw = (u64::from(w) * u64::from(percent) / 100).max(1) as u32;
    let nh = (u64::from(h) * u64::from(percent) / 100).max(1) as u32;
    imageops::resize(&image, nw, nh, FilterType::Lanczos3)
}

/// Fetch, stitch and persist one page.
///
/// Never returns an error: every failure is a [`PageOutcome`] the scheduler
/// can act on.
pub async fn fetch_page(ctx: &PageContext, entry: &CatalogEntry) -> PageOutcome {
    let label = ctx.label(entry.key);
    let mut attempt = 1;

    loop {
        let set = match scan_page(ctx, entry, &label).await {
            Ok(set) => set,
            Err(abort) => return abort,
        };

        // Only a first pass with no tiles means the page does not exist.
        if set.tiles.is_empty() && attempt == 1 {
            info!("Page {}: finished, no more pages", label);
            return PageOutcome::Empty;
        }

        if set.is_complete() {
            return save_page(ctx, &label, set, attempt > 1).await;
        }

        let fetched = set.tiles.len();
        let expected = set.expected;

        if entry.key.is_cover() {
            info!(
                "Page {}: {}/{} tiles, skipping cover/insert",
                label, fetched, expected
            );
            return PageOutcome::SkippedIncomplete { fetched, expected };
        }

        if attempt >= ctx.max_page_attempts {
            warn!(
                "Page {}: failed with {}/{} tiles after {} attempts",
                label, fetched, expected, attempt
            );
            return PageOutcome::Incomplete {
                fetched,
                expected,
                attempts: attempt,
            };
        }

        attempt += 1;
        warn!(
            "Page {}: failed ({}/{} tiles), retrying",
            label, fetched, expected
        );
        if let Some(cb) = &ctx.callback {
            cb.on_page_retry(&label, attempt, fetched, expected);
        }
    }
}

/// One row-major pass over the page's tile grid.
///
/// `Err` carries the outcome that ended the scan early.
async fn scan_page(
    ctx: &PageContext,
    entry: &CatalogEntry,
    label: &str,
) -> Result<TileSet, PageOutcome> {
    let grid = TileGrid::compute(entry.width, entry.height, ctx.policy);
    let mut set = TileSet::new(&grid);
    debug!(
        "Page {}: {}x{} px → {}x{} tiles",
        label,
        entry.width,
        entry.height,
        grid.columns(),
        grid.rows()
    );

    for (column, row) in grid.cells() {
        if ctx.is_cancelled() {
            return Err(PageOutcome::Cancelled);
        }

        let region = build_region(
            &entry.tile_source,
            column,
            row,
            ctx.policy,
            entry.width,
            entry.height,
        );
        if ctx.echo_urls {
            if let Some(cb) = &ctx.callback {
                cb.on_tile_url(label, &region.url);
            }
        }

        match ctx.source.fetch(&region.url).await {
            TileResponse::NoResponse(detail) => {
                warn!("Page {}: no response for {}", label, region.url);
                return Err(PageOutcome::ConnectionTimeout {
                    url: region.url,
                    detail,
                });
            }
            response if response.is_forbidden() => {
                warn!("Page {}: access denied for {}", label, region.url);
                return Err(PageOutcome::AccessDenied);
            }
            TileResponse::Status(code) => {
                ctx.tile_failed(label, column, row, &format!("HTTP {}", code));
            }
            TileResponse::BrokenBody(detail) => {
                ctx.tile_failed(label, column, row, &detail);
            }
            TileResponse::Body(bytes) => match image::load_from_memory(&bytes) {
                Ok(image) => {
                    ctx.tiles_fetched.fetch_add(1, Ordering::Relaxed);
                    set.push(column, row, image);
                }
                Err(e) => ctx.tile_failed(label, column, row, &format!("not an image: {}", e)),
            },
        }
    }

    Ok(set)
}

async fn save_page(ctx: &PageContext, label: &str, set: TileSet, retried: bool) -> PageOutcome {
    let path = ctx.work.artifact_path(label);
    let policy = ctx.policy;
    let resize = ctx.resize_percent;
    let quality = ctx.jpeg_quality;
    let page = label.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let mut image = stitch(&set, policy);
        drop(set);
        if let Some(percent) = resize {
            image = resize_to_percent(image, percent);
        }
        persist_jpeg(&image, &path, quality, &page)?;
        Ok::<_, PageError>(image.dimensions())
    })
    .await;

    match result {
        Ok(Ok((width, height))) => {
            info!("Saved page {} ({}x{})", label, width, height);
            PageOutcome::Saved {
                width,
                height,
                retried,
            }
        }
        Ok(Err(e)) => {
            warn!("{}", e);
            PageOutcome::Failed(e)
        }
        Err(e) => PageOutcome::Failed(PageError::StitchFailed {
            page: label.to_string(),
            detail: format!("stitch task panicked: {}", e),
        }),
    }
}
