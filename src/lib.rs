//! # tilebook
//!
//! Download scanned works from an IIIF tile service and assemble them into
//! PDFs.
//!
//! A page of a scanned book is served as a grid of small image regions,
//! never as one file. This crate fetches every region of every requested
//! page, stitches each page back into one JPEG, keeps those JPEGs on disk so
//! an interrupted run can resume, and finally binds the pages into a single
//! document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Catalog
//!  │
//!  ├─ 1. Select   page range + optional covers/inserts
//!  ├─ 2. Resume   skip pages whose <label>.jpg already exists
//!  ├─ 3. Fetch    N pages in parallel, tiles row-major within a page
//!  ├─ 4. Stitch   paste tiles, optional resize, atomic JPEG write
//!  └─ 5. Build    order pages, verify/recover, encode one PDF
//! ```
//!
//! A 403 or an unanswered tile request stops the whole batch; every other
//! tile problem only makes its page incomplete, and incomplete numbered
//! pages are fetched once more.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tilebook::{build_document, download_work, Catalog, DownloadConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Catalog::from_json_file("digibok_2008040300039.json")?;
//!     let config = DownloadConfig::builder()
//!         .output_root("downloads")
//!         .include_covers(true)
//!         .build()?;
//!
//!     let report = download_work(&catalog, &config).await?;
//!     eprintln!("{} pages saved, {} already there", report.saved, report.skipped);
//!
//!     let doc = build_document(&catalog, &config, None).await?;
//!     println!("{}", doc.path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tilebook` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! tilebook = { version = "0.3", default-features = false }
//! ```
//!
//! ## Tile sizes
//!
//! | Work | Tile |
//! |------|------|
//! | restricted | 512 × 512 |
//! | books, newspapers, periodicals | 1024 × 1024 |
//! | everything else | 4096 × 4096 |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod storage;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{Catalog, CatalogEntry, CoverKind, MediaCategory, PageKey};
pub use config::{DownloadConfig, DownloadConfigBuilder, PageRange};
pub use download::{download_sync, download_with_source, download_work, BatchReport, BatchStatus};
pub use error::{PageError, TileBookError};
pub use pipeline::assemble::{build_document, build_document_with, order_artifacts, DocumentReport};
pub use pipeline::encode::{DocumentEncoder, PdfEncoder};
pub use pipeline::grid::{TileClass, TileGrid, TilePolicy};
pub use pipeline::source::{HttpTileSource, TileResponse, TileSource};
pub use pipeline::stitch::PageOutcome;
pub use progress::{DownloadProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{WorkDir, WorkMetadata};
pub use stream::{page_stream, PageReport, PageStream};
