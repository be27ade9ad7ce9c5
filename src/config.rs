//! Configuration types for a download / document-build run.
//!
//! All run behaviour is controlled through [`DownloadConfig`], built via its
//! [`DownloadConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across workers and to log it as a unit.

use crate::catalog::{CatalogEntry, PageKey};
use crate::error::TileBookError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for downloading a work and assembling its document.
///
/// # Example
/// ```rust
/// use tilebook::{DownloadConfig, PageRange};
///
/// let config = DownloadConfig::builder()
///     .output_root("downloads")
///     .include_covers(true)
///     .pages(PageRange::new(Some(1), Some(20)))
///     .resize_percent(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.resize_percent, Some(50));
/// ```
#[derive(Clone)]
pub struct DownloadConfig {
    /// Directory under which one folder per work is created. Default: `.`.
    pub output_root: PathBuf,

    /// Folder name for the work. Default: the catalog's media id.
    ///
    /// Sanitised before use (see [`crate::storage::sanitize_folder_name`]).
    pub folder_name: Option<String>,

    /// Name the work folder after the catalog title when no
    /// `folder_name` is given. Works without a title keep the media id.
    /// Default: false.
    pub folder_from_title: bool,

    /// Fetch cover and insert pages (`C1`, `I1`, `I3`, `C2`, `C3`) and put
    /// them in the document. Default: false.
    pub include_covers: bool,

    /// Numeric pages to fetch. Default: all.
    pub pages: PageRange,

    /// Downscale saved pages to this percentage (1–100). Default: None.
    pub resize_percent: Option<u32>,

    /// JPEG quality for saved pages (1–100). Default: 90.
    pub jpeg_quality: u8,

    /// Number of pages fetched concurrently. Default: 2 × available CPUs.
    ///
    /// Tiles inside a page are always fetched one after another, so this is
    /// also the upper bound on concurrent HTTP requests.
    pub workers: usize,

    /// Per-tile request timeout in seconds. Default: 30.
    pub tile_timeout_secs: u64,

    /// Total attempts for a numbered page whose tile grid came back
    /// incomplete. Default: 2 (one retry).
    pub max_page_attempts: u32,

    /// User-Agent header sent with tile requests. Default: `Mozilla/5.0`.
    pub user_agent: String,

    /// Emit every generated region URL to the progress callback. Default: false.
    pub echo_urls: bool,

    /// Emit every tile-level failure to the progress callback. Default: false.
    pub echo_errors: bool,

    /// Optional event sink. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            folder_name: None,
            folder_from_title: false,
            include_covers: false,
            pages: PageRange::default(),
            resize_percent: None,
            jpeg_quality: 90,
            workers: default_workers(),
            tile_timeout_secs: 30,
            max_page_attempts: 2,
            user_agent: "Mozilla/5.0".to_string(),
            echo_urls: false,
            echo_errors: false,
            progress_callback: None,
        }
    }
}

/// Two workers per available CPU, at least two.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
        .max(2)
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("output_root", &self.output_root)
            .field("folder_name", &self.folder_name)
            .field("folder_from_title", &self.folder_from_title)
            .field("include_covers", &self.include_covers)
            .field("pages", &self.pages)
            .field("resize_percent", &self.resize_percent)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("workers", &self.workers)
            .field("tile_timeout_secs", &self.tile_timeout_secs)
            .field("max_page_attempts", &self.max_page_attempts)
            .field("echo_urls", &self.echo_urls)
            .field("echo_errors", &self.echo_errors)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DownloadProgressCallback>"),
            )
            .finish()
    }
}

impl DownloadConfig {
    /// Create a new builder for `DownloadConfig`.
    pub fn builder() -> DownloadConfigBuilder {
        DownloadConfigBuilder {
            config: Self::default(),
        }
    }

    /// Catalog entries this run asks for, in catalog order.
    ///
    /// Numbered pages are kept when inside [`Self::pages`]; covers and
    /// inserts only when [`Self::include_covers`] is set.
    pub fn select<'a>(&self, entries: &'a [CatalogEntry]) -> Vec<&'a CatalogEntry> {
        entries
            .iter()
            .filter(|e| match e.key {
                PageKey::Numeric(n) => self.pages.contains(n),
                PageKey::Cover(_) => self.include_covers,
            })
            .collect()
    }
}

/// Builder for [`DownloadConfig`].
#[derive(Debug)]
pub struct DownloadConfigBuilder {
    config: DownloadConfig,
}

impl DownloadConfigBuilder {
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn folder_name(mut self, name: impl Into<String>) -> Self {
        self.config.folder_name = Some(name.into());
        self
    }

    pub fn folder_from_title(mut self, v: bool) -> Self {
        self.config.folder_from_title = v;
        self
    }

    pub fn include_covers(mut self, v: bool) -> Self {
        self.config.include_covers = v;
        self
    }

    pub fn pages(mut self, range: PageRange) -> Self {
        self.config.pages = range;
        self
    }

    pub fn resize_percent(mut self, percent: u32) -> Self {
        self.config.resize_percent = Some(percent);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn tile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tile_timeout_secs = secs.max(1);
        self
    }

    pub fn max_page_attempts(mut self, n: u32) -> Self {
        self.config.max_page_attempts = n.max(1);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn echo_urls(mut self, v: bool) -> Self {
        self.config.echo_urls = v;
        self
    }

    pub fn echo_errors(mut self, v: bool) -> Self {
        self.config.echo_errors = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DownloadConfig, TileBookError> {
        let c = &self.config;
        if let Some(p) = c.resize_percent {
            if p == 0 || p > 100 {
                return Err(TileBookError::InvalidConfig(format!(
                    "resize must be 1–100 %, got {}",
                    p
                )));
            }
        }
        if let (Some(from), Some(to)) = (c.pages.from, c.pages.to) {
            if from > to {
                return Err(TileBookError::InvalidConfig(format!(
                    "page range {}-{}: start must be <= end",
                    from, to
                )));
            }
        }
        if c.workers == 0 {
            return Err(TileBookError::InvalidConfig("workers must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Page range ───────────────────────────────────────────────────────────

/// Inclusive bounds on numbered pages; `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: Option<u32>,
    pub to: Option<u32>,
}

impl PageRange {
    pub fn new(from: Option<u32>, to: Option<u32>) -> Self {
        Self { from, to }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, page: u32) -> bool {
        self.from.map_or(true, |f| page >= f) && self.to.map_or(true, |t| page <= t)
    }
}
