//! Error types for the tilebook library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TileBookError`] — **Fatal**: the batch or the document build cannot
//!   proceed (access denied, remote unreachable, corrupt artifact that could
//!   not be recovered, bad catalog). Returned as `Err(TileBookError)` from the
//!   top-level `download_*` / `build_document` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page could not be written
//!   (disk full, stitching glitch) but its siblings are unaffected. Stored
//!   inside [`crate::pipeline::stitch::PageOutcome::Failed`].
//!
//! Tile-level problems (a 500 for one region, an undecodable body) are not
//! errors at all; they only surface as an incomplete grid.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the tilebook library.
#[derive(Debug, Error)]
pub enum TileBookError {
    // ── Remote errors ─────────────────────────────────────────────────────
    /// The remote service answered 403 for a tile. Later pages would fail
    /// identically, so the whole batch stops.
    #[error("Access to '{media_id}' was denied by the remote service (access level: {access})")]
    AccessDenied { media_id: String, access: String },

    /// No response at all for a tile request.
    #[error("No response for page {page} within the timeout: {detail}\nLast request: {url}")]
    ConnectionTimeout {
        page: String,
        url: String,
        detail: String,
    },

    // ── Assembly errors ───────────────────────────────────────────────────
    /// A saved page failed to decode and could not be regenerated.
    #[error("Page {page} is corrupt on disk ('{path}'): {detail}")]
    CorruptArtifact {
        page: String,
        path: PathBuf,
        detail: String,
    },

    /// There is nothing to put in the document.
    #[error("No page images found for '{media_id}'")]
    NoPages { media_id: String },

    /// The document encoder reported a failure or left no output.
    #[error("Failed to write document '{path}': {detail}")]
    EncodeFailed { path: PathBuf, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The catalog could not be parsed or violates an invariant.
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TileBookError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TileBookError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The stitched page could not be encoded or persisted.
    #[error("Page {page}: failed to write '{path}': {detail}")]
    WriteFailed {
        page: String,
        path: PathBuf,
        detail: String,
    },

    /// Stitching or resizing failed.
    #[error("Page {page}: stitching failed: {detail}")]
    StitchFailed { page: String, detail: String },
}
