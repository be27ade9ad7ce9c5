//! Pipeline stages for downloading and assembling a tiled work.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! catalog ──▶ resume ──▶ grid ──▶ region ──▶ source ──▶ stitch ──▶ assemble ──▶ encode
//!           (skip done) (tiles)   (URL)      (HTTP)   (1 page)    (order)      (PDF)
//! ```
//!
//! 1. [`resume`] — drop requested pages whose image is already on disk
//! 2. [`grid`]   — tile size per work and the tile grid of one page
//! 3. [`region`] — IIIF region URL for one grid cell
//! 4. [`source`] — the HTTP seam; a four-way [`source::TileResponse`]
//! 5. [`stitch`] — the fetch unit: scan, retry, paste, persist
//! 6. [`assemble`] — document order and corrupt-page recovery
//! 7. [`encode`] — the [`encode::DocumentEncoder`] seam and the PDF writer
//!
//! Scheduling across pages lives in [`crate::stream`] and
//! [`crate::download`].

pub mod assemble;
pub mod encode;
pub mod grid;
pub mod region;
pub mod resume;
pub mod source;
pub mod stitch;
