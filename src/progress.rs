//! Progress-callback trait for download and assembly events.
//!
//! Inject an [`Arc<dyn DownloadProgressCallback>`] via
//! [`crate::config::DownloadConfigBuilder::progress_callback`] to receive
//! events as the scheduler works through the pages of a work.
//!
//! The fetch units and the scheduler never print; everything a terminal,
//! log file or web page wants to show arrives here. Pages are processed
//! concurrently, so every method may be called from several tasks at once.
//!
//! # Example
//!
//! ```rust
//! use tilebook::{DownloadConfig, DownloadProgressCallback, PageOutcome};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter {
//!     saved: AtomicUsize,
//! }
//!
//! impl DownloadProgressCallback for Counter {
//!     fn on_page_complete(&self, page: &str, outcome: &PageOutcome) {
//!         if outcome.is_saved() {
//!             self.saved.fetch_add(1, Ordering::SeqCst);
//!         }
//!         eprintln!("{page}: {outcome}");
//!     }
//! }
//!
//! let config = DownloadConfig::builder()
//!     .progress_callback(Arc::new(Counter { saved: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::stitch::PageOutcome;
use std::path::Path;
use std::sync::Arc;

/// Receives events from the download engine and the document assembler.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page identifiers are the padded file-name labels
/// (`"0007"`, `"C1"`).
pub trait DownloadProgressCallback: Send + Sync {
    /// Called once after the resume filter, before any page is fetched.
    ///
    /// * `total`   — pages that will be fetched
    /// * `skipped` — requested pages already on disk
    fn on_batch_start(&self, total: usize, skipped: usize) {
        let _ = (total, skipped);
    }

    /// Called when a worker picks up a page.
    fn on_page_start(&self, page: &str) {
        let _ = page;
    }

    /// Called for every region request when URL echo is enabled.
    fn on_tile_url(&self, page: &str, url: &str) {
        let _ = (page, url);
    }

    /// Called for every failed tile when error echo is enabled.
    fn on_tile_error(&self, page: &str, column: u32, row: u32, error: &str) {
        let _ = (page, column, row, error);
    }

    /// Called when a numbered page came back incomplete and will be fetched
    /// again.
    fn on_page_retry(&self, page: &str, attempt: u32, fetched: usize, expected: usize) {
        let _ = (page, attempt, fetched, expected);
    }

    /// Called once per page with its final outcome.
    fn on_page_complete(&self, page: &str, outcome: &PageOutcome) {
        let _ = (page, outcome);
    }

    /// Called once when the batch ends without a fatal error.
    fn on_batch_complete(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }

    /// Called for each page as it is handed to the document encoder.
    fn on_document_page(&self, page: &str, index: usize, total: usize) {
        let _ = (page, index, total);
    }

    /// Called after the document has been written and verified.
    fn on_document_complete(&self, path: &Path, pages: usize) {
        let _ = (path, pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DownloadProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DownloadConfig`].
pub type ProgressCallback = Arc<dyn DownloadProgressCallback>;
