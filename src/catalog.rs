//! Catalog data: the page list of one work as reported by the remote library.
//!
//! The catalog is produced by an external lookup (manifest service, search
//! API, hand-written JSON) and is immutable for the whole session. This
//! module defines the shape the download engine consumes plus two local
//! loaders: a plain JSON catalog and an IIIF Presentation 2 manifest that
//! has already been fetched by the caller.

use crate::error::TileBookError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

// ── Page keys ────────────────────────────────────────────────────────────

/// A cover or insert page, identified by a reserved token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverKind {
    /// `C1`
    FrontCover,
    /// `I1`
    InnerFrontInsert,
    /// `I3`
    InnerBackInsert,
    /// `C2`
    SecondBackCover,
    /// `C3`
    BackCover,
}

impl CoverKind {
    /// Covers placed before the numbered pages, in document order.
    pub const FRONT_MATTER: [CoverKind; 2] = [CoverKind::FrontCover, CoverKind::InnerFrontInsert];

    /// Covers placed after the numbered pages, in document order.
    pub const BACK_MATTER: [CoverKind; 3] = [
        CoverKind::InnerBackInsert,
        CoverKind::SecondBackCover,
        CoverKind::BackCover,
    ];

    pub fn token(self) -> &'static str {
        match self {
            CoverKind::FrontCover => "C1",
            CoverKind::InnerFrontInsert => "I1",
            CoverKind::InnerBackInsert => "I3",
            CoverKind::SecondBackCover => "C2",
            CoverKind::BackCover => "C3",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "C1" => Some(CoverKind::FrontCover),
            "I1" => Some(CoverKind::InnerFrontInsert),
            "I3" => Some(CoverKind::InnerBackInsert),
            "C2" => Some(CoverKind::SecondBackCover),
            "C3" => Some(CoverKind::BackCover),
            _ => None,
        }
    }
}

/// Identifies one page of a work: a numbered page or a cover/insert.
///
/// Numeric keys compare by value, so `"0001"` and `"1"` are the same key.
/// The zero-padded form used in file names depends on the media category
/// and is produced by [`PageKey::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PageKey {
    Numeric(u32),
    Cover(CoverKind),
}

impl PageKey {
    pub fn is_cover(&self) -> bool {
        matches!(self, PageKey::Cover(_))
    }

    pub fn number(&self) -> Option<u32> {
        match self {
            PageKey::Numeric(n) => Some(*n),
            PageKey::Cover(_) => None,
        }
    }

    /// File-name label: numeric keys zero-padded to `width` digits.
    pub fn label(&self, width: usize) -> String {
        match self {
            PageKey::Numeric(n) => format!("{:0width$}", n, width = width),
            PageKey::Cover(kind) => kind.token().to_string(),
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageKey::Numeric(n) => write!(f, "{}", n),
            PageKey::Cover(kind) => f.write_str(kind.token()),
        }
    }
}

impl FromStr for PageKey {
    type Err = TileBookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(kind) = CoverKind::from_token(s) {
            return Ok(PageKey::Cover(kind));
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u32>()
                .map(PageKey::Numeric)
                .map_err(|e| TileBookError::InvalidCatalog(format!("page key '{}': {}", s, e)));
        }
        Err(TileBookError::InvalidCatalog(format!(
            "'{}' is neither a page number nor a cover token",
            s
        )))
    }
}

impl TryFrom<String> for PageKey {
    type Error = TileBookError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PageKey> for String {
    fn from(key: PageKey) -> Self {
        key.to_string()
    }
}

// ── Media categories ─────────────────────────────────────────────────────

/// The kind of work, taken from the remote media-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaCategory {
    #[default]
    Book,
    Newspaper,
    Periodical,
    Map,
    Photo,
    Manuscript,
    Other,
}

impl MediaCategory {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "digibok" | "book" | "bok" => MediaCategory::Book,
            "digavis" | "newspaper" | "avis" => MediaCategory::Newspaper,
            "digitidsskrift" | "periodical" | "tidsskrift" => MediaCategory::Periodical,
            "digikart" | "map" | "kart" => MediaCategory::Map,
            "digifoto" | "photo" | "foto" => MediaCategory::Photo,
            "digimanus" | "manuscript" | "manus" => MediaCategory::Manuscript,
            _ => MediaCategory::Other,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            MediaCategory::Book => "digibok",
            MediaCategory::Newspaper => "digavis",
            MediaCategory::Periodical => "digitidsskrift",
            MediaCategory::Map => "digikart",
            MediaCategory::Photo => "digifoto",
            MediaCategory::Manuscript => "digimanus",
            MediaCategory::Other => "other",
        }
    }

    /// Serial media number their pages with three digits, everything else four.
    pub fn page_key_width(self) -> usize {
        match self {
            MediaCategory::Newspaper | MediaCategory::Periodical => 3,
            _ => 4,
        }
    }

    pub fn is_serial(self) -> bool {
        matches!(self, MediaCategory::Newspaper | MediaCategory::Periodical)
    }

    pub fn is_long_form(self) -> bool {
        matches!(
            self,
            MediaCategory::Book | MediaCategory::Newspaper | MediaCategory::Periodical
        )
    }
}

impl From<String> for MediaCategory {
    fn from(tag: String) -> Self {
        MediaCategory::from_tag(&tag)
    }
}

impl From<MediaCategory> for String {
    fn from(category: MediaCategory) -> Self {
        category.tag().to_string()
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────

/// One page as described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: PageKey,
    pub width: u32,
    pub height: u32,
    /// IIIF image service base, e.g. `https://host/iiif/URN:NBN:no-nb_digibok_123_0001`.
    pub tile_source: String,
}

/// The page list of one work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub media_id: String,
    #[serde(default)]
    pub category: MediaCategory,
    /// Access-level label, only used in diagnostics.
    #[serde(default)]
    pub access: String,
    /// Restricted works are fetched with small tiles.
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub title: Option<String>,
    pub pages: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parse and validate a JSON catalog.
    pub fn from_json_str(json: &str) -> Result<Self, TileBookError> {
        let catalog: Catalog = serde_json::from_str(json)
            .map_err(|e| TileBookError::InvalidCatalog(format!("JSON: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read, parse and validate a JSON catalog file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TileBookError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TileBookError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Build a catalog from an IIIF Presentation 2 manifest.
    ///
    /// The page key is taken from the canvas `@id`: its last `_`-separated
    /// segment, or the second-to-last for serial media whose ids end in a
    /// section suffix. Canvases whose id does not yield a page key are
    /// skipped with a warning.
    pub fn from_iiif_manifest(
        media_id: impl Into<String>,
        category: MediaCategory,
        manifest: &serde_json::Value,
    ) -> Result<Self, TileBookError> {
        let canvases = manifest
            .pointer("/sequences/0/canvases")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                TileBookError::InvalidCatalog("manifest has no sequences[0].canvases".into())
            })?;

        let mut pages = Vec::with_capacity(canvases.len());
        for canvas in canvases {
            let id = canvas.get("@id").and_then(|v| v.as_str()).unwrap_or("");
            let key = match canvas_page_key(id, category) {
                Some(key) => key,
                None => {
                    warn!("Skipping canvas without a page key: '{}'", id);
                    continue;
                }
            };
            let width = canvas.get("width").and_then(|v| v.as_u64()).unwrap_or(0);
            let height = canvas.get("height").and_then(|v| v.as_u64()).unwrap_or(0);
            let tile_source = canvas
                .pointer("/images/0/resource/service/@id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    TileBookError::InvalidCatalog(format!("canvas '{}' has no image service", id))
                })?;

            pages.push(CatalogEntry {
                key,
                width: u32::try_from(width).unwrap_or(u32::MAX),
                height: u32::try_from(height).unwrap_or(u32::MAX),
                tile_source: tile_source.to_string(),
            });
        }

        let catalog = Catalog {
            media_id: media_id.into(),
            category,
            access: String::new(),
            restricted: false,
            title: manifest
                .get("label")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            pages,
        };
        catalog.validate()?;
        debug!(
            "Manifest for {} yielded {} pages",
            catalog.media_id,
            catalog.pages.len()
        );
        Ok(catalog)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), TileBookError> {
        if self.media_id.trim().is_empty() {
            return Err(TileBookError::InvalidCatalog("empty media id".into()));
        }
        let mut seen = HashSet::with_capacity(self.pages.len());
        for entry in &self.pages {
            if !seen.insert(entry.key) {
                return Err(TileBookError::InvalidCatalog(format!(
                    "duplicate page key '{}'",
                    entry.key
                )));
            }
            if entry.width == 0 || entry.height == 0 {
                return Err(TileBookError::InvalidCatalog(format!(
                    "page '{}' has zero size {}x{}",
                    entry.key, entry.width, entry.height
                )));
            }
            if entry.tile_source.trim().is_empty() {
                return Err(TileBookError::InvalidCatalog(format!(
                    "page '{}' has no tile source",
                    entry.key
                )));
            }
        }
        Ok(())
    }

    pub fn entry(&self, key: PageKey) -> Option<&CatalogEntry> {
        self.pages.iter().find(|e| e.key == key)
    }

    /// File-name label of `key` for this work.
    pub fn label(&self, key: PageKey) -> String {
        key.label(self.category.page_key_width())
    }

    pub fn numeric_page_count(&self) -> usize {
        self.pages.iter().filter(|e| !e.key.is_cover()).count()
    }
}

fn canvas_page_key(id: &str, category: MediaCategory) -> Option<PageKey> {
    let mut segments = id.trim_end_matches('/').rsplit('_');
    let last = segments.next()?;
    let candidate = if category.is_serial() {
        segments.next()?
    } else {
        last
    };
    // Ids may carry a trailing path such as "/canvas".
    let candidate = candidate.split('/').next()?;
    candidate.parse().ok()
}
