//! Streaming download API: emit page reports as fetch units finish.
//!
//! [`page_stream`] runs up to `workers` fetch units at once and yields a
//! [`PageReport`] for each page in completion order (not catalog order).
//! It applies no abort policy of its own: a fatal outcome is just another
//! report. [`crate::download::download_work`] consumes this stream and stops
//! at the first fatal report; callers that want per-page results as they
//! arrive can drive it directly.
//!
//! The stream is lazy. A page is only started when the stream is polled and
//! a worker slot is free, so dropping the stream stops new pages from
//! starting.

use crate::catalog::{CatalogEntry, PageKey};
use crate::pipeline::stitch::{fetch_page, PageContext, PageOutcome};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::debug;

/// The outcome of one page, tagged with its key and file label.
#[derive(Debug, Clone)]
pub struct PageReport {
    pub key: PageKey,
    pub label: String,
    pub outcome: PageOutcome,
}

/// A boxed stream of page reports.
pub type PageStream = Pin<Box<dyn Stream<Item = PageReport> + Send>>;

/// Fetch `entries` with at most `workers` pages in flight.
///
/// A page that would start after [`PageContext::cancel`] reports
/// [`PageOutcome::Cancelled`] without issuing any request.
///
/// # Example
/// ```rust,no_run
/// use futures::StreamExt;
/// use std::sync::Arc;
/// use tilebook::pipeline::stitch::PageContext;
/// use tilebook::{page_stream, Catalog, DownloadConfig, HttpTileSource, WorkDir};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = Catalog::from_json_file("catalog.json")?;
/// let config = DownloadConfig::default();
/// let work = WorkDir::for_catalog(&catalog, &config);
/// work.ensure_dirs().await?;
/// let source = Arc::new(HttpTileSource::new(30, "Mozilla/5.0")?);
/// let ctx = Arc::new(PageContext::new(&catalog, &config, work, source));
///
/// let mut pages = page_stream(catalog.pages.clone(), ctx, 4);
/// while let Some(report) = pages.next().await {
///     println!("{}: {}", report.label, report.outcome);
/// }
/// # Ok(())
/// # }
/// ```
pub fn page_stream(entries: Vec<CatalogEntry>, ctx: Arc<PageContext>, workers: usize) -> PageStream {
    let workers = workers.max(1);
    debug!("Streaming {} pages with {} workers", entries.len(), workers);

    let s = stream::iter(entries.into_iter().map(move |entry| {
        let ctx = Arc::clone(&ctx);
        async move {
            let label = ctx.label(entry.key);
            if ctx.is_cancelled() {
                return PageReport {
                    key: entry.key,
                    label,
                    outcome: PageOutcome::Cancelled,
                };
            }

            if let Some(cb) = &ctx.callback {
                cb.on_page_start(&label);
            }
            let outcome = fetch_page(&ctx, &entry).await;
            if let Some(cb) = &ctx.callback {
                cb.on_page_complete(&label, &outcome);
            }

            PageReport {
                key: entry.key,
                label,
                outcome,
            }
        }
    }))
    .buffer_unordered(workers);

    Box::pin(s)
}
