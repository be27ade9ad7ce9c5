//! Tile policy and tile grid computation.
//!
//! The remote image service hands out rectangular regions of a page. How big
//! those regions are is a fixed policy per tile class: restricted works get
//! small tiles, long-form media medium tiles, everything else large ones.

use crate::catalog::{Catalog, MediaCategory};
use serde::{Deserialize, Serialize};

/// Row key of the tile policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileClass {
    /// Access-restricted works.
    Restricted,
    /// Books, newspapers and periodicals.
    LongForm,
    /// Maps, photos, manuscripts and anything unrecognised.
    Large,
}

impl TileClass {
    pub fn for_work(category: MediaCategory, restricted: bool) -> Self {
        if restricted {
            TileClass::Restricted
        } else if category.is_long_form() {
            TileClass::LongForm
        } else {
            TileClass::Large
        }
    }

    pub fn policy(self) -> TilePolicy {
        TILE_POLICIES
            .iter()
            .find(|(class, _)| *class == self)
            .map(|(_, policy)| *policy)
            .unwrap_or(TilePolicy::new(1024, 1024))
    }
}

/// Tile size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePolicy {
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TilePolicy {
    pub const fn new(tile_width: u32, tile_height: u32) -> Self {
        Self {
            tile_width,
            tile_height,
        }
    }

    /// Policy for a whole work.
    pub fn for_catalog(catalog: &Catalog) -> Self {
        TileClass::for_work(catalog.category, catalog.restricted).policy()
    }
}

/// Tile size per class.
pub const TILE_POLICIES: [(TileClass, TilePolicy); 3] = [
    (TileClass::Restricted, TilePolicy::new(512, 512)),
    (TileClass::LongForm, TilePolicy::new(1024, 1024)),
    (TileClass::Large, TilePolicy::new(4096, 4096)),
];

/// Highest column and row index of a page's tile grid (both inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub max_column: u32,
    pub max_row: u32,
}

impl TileGrid {
    /// `max = ceil(size / tile) - 1` on each axis.
    ///
    /// Both sizes must be positive and the policy's tile size non-zero.
    pub fn compute(width: u32, height: u32, policy: TilePolicy) -> Self {
        Self {
            max_column: width.div_ceil(policy.tile_width).saturating_sub(1),
            max_row: height.div_ceil(policy.tile_height).saturating_sub(1),
        }
    }

    pub fn columns(&self) -> u32 {
        self.max_column + 1
    }

    pub fn rows(&self) -> u32 {
        self.max_row + 1
    }

    /// Number of tiles a complete page consists of.
    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    /// Every `(column, row)` cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..=self.max_row).flat_map(move |row| (0..=self.max_column).map(move |col| (col, row)))
    }
}
