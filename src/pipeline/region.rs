//! Region request construction (IIIF Image API).
//!
//! Edge tiles are clamped to the page bounds: asking for a region that
//! reaches past the page makes some services answer 400 and others return
//! padded bytes, both of which would break stitching.

use super::grid::TilePolicy;
use serde::Serialize;

/// One region request for a tile, plus the size the tile should have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionRequest {
    pub url: String,
    pub column: u32,
    pub row: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Build the request for tile `(column, row)` of a `page_width` × `page_height` page.
///
/// The cell must lie inside the page's tile grid.
pub fn build_region(
    tile_source: &str,
    column: u32,
    row: u32,
    policy: TilePolicy,
    page_width: u32,
    page_height: u32,
) -> RegionRequest {
    let x = column * policy.tile_width;
    let y = row * policy.tile_height;
    let width = policy.tile_width.min(page_width.saturating_sub(x));
    let height = policy.tile_height.min(page_height.saturating_sub(y));

    let url = format!(
        "{}/{},{},{},{}/full/0/native.jpg",
        tile_source.trim_end_matches('/'),
        x,
        y,
        width,
        height
    );

    RegionRequest {
        url,
        column,
        row,
        x,
        y,
        width,
        height,
    }
}
