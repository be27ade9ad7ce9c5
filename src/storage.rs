//! On-disk layout of one work.
//!
//! ```text
//! <output_root>/<folder>/
//!   sources/    one <label>.jpg per page key (the only resume signal)
//!   pdf/        <folder>.pdf
//!   metadata/   .tilebook_meta.json
//! ```
//!
//! Page images are written to `<label>.jpg.part` and renamed into place, so
//! a file with the final name is always complete.

use crate::catalog::{Catalog, PageKey};
use crate::config::DownloadConfig;
use crate::error::{PageError, TileBookError};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const ARTIFACT_EXTENSION: &str = "jpg";
const PARTIAL_EXTENSION: &str = "jpg.part";
const METADATA_FILE: &str = ".tilebook_meta.json";

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Make a user-supplied title usable as a directory name.
///
/// Drops everything except word characters, whitespace and `-`, then turns
/// whitespace runs into `_`.
pub fn sanitize_folder_name(raw: &str) -> String {
    let cleaned = RE_UNSAFE.replace_all(raw.trim(), "");
    let joined = RE_SPACES.replace_all(cleaned.trim(), "_");
    if joined.is_empty() {
        "work".to_string()
    } else {
        joined.into_owned()
    }
}

/// Paths of one work's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
    folder: String,
}

impl WorkDir {
    pub fn new(output_root: impl Into<PathBuf>, folder: &str) -> Self {
        let folder = sanitize_folder_name(folder);
        Self {
            root: output_root.into().join(&folder),
            folder,
        }
    }

    /// Directory for `catalog` under the config's output root.
    pub fn for_catalog(catalog: &Catalog, config: &DownloadConfig) -> Self {
        let title = catalog
            .title
            .as_deref()
            .filter(|t| config.folder_from_title && !t.trim().is_empty());
        let folder = config
            .folder_name
            .as_deref()
            .or(title)
            .unwrap_or(&catalog.media_id);
        Self::new(&config.output_root, folder)
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("sources")
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join("pdf")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata").join(METADATA_FILE)
    }

    /// Default document location: `pdf/<folder>.pdf`.
    pub fn document_path(&self) -> PathBuf {
        self.pdf_dir().join(format!("{}.pdf", self.folder))
    }

    pub fn artifact_path(&self, label: &str) -> PathBuf {
        self.sources_dir()
            .join(format!("{}.{}", label, ARTIFACT_EXTENSION))
    }

    pub async fn ensure_dirs(&self) -> Result<(), TileBookError> {
        for dir in [self.sources_dir(), self.pdf_dir(), self.root.join("metadata")] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| TileBookError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Every finished page image in `sources/`, keyed by page key.
    ///
    /// A missing `sources/` directory means nothing has been downloaded yet.
    /// Partial files and names that are not page keys are ignored.
    pub fn scan_artifacts(&self) -> Result<Vec<(PageKey, PathBuf)>, TileBookError> {
        let dir = self.sources_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TileBookError::io(&dir, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TileBookError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_artifact = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION));
            if !is_artifact {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<PageKey>() {
                Ok(key) => found.push((key, path)),
                Err(_) => debug!("Ignoring non-page file {}", path.display()),
            }
        }
        Ok(found)
    }
}

/// Encode `image` as JPEG and move it into place at `path`.
pub fn persist_jpeg(
    image: &RgbImage,
    path: &Path,
    quality: u8,
    page: &str,
) -> Result<(), PageError> {
    let partial = path.with_extension(PARTIAL_EXTENSION);
    let write_failed = |detail: String| PageError::WriteFailed {
        page: page.to_string(),
        path: path.to_path_buf(),
        detail,
    };

    let result = (|| -> Result<(), String> {
        let file = File::create(&partial).map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode_image(image)
            .map_err(|e| e.to_string())?;
        writer.flush().map_err(|e| e.to_string())?;
        drop(writer);
        std::fs::rename(&partial, path).map_err(|e| e.to_string())
    })();

    if let Err(detail) = result {
        if let Err(e) = std::fs::remove_file(&partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", partial.display(), e);
            }
        }
        return Err(write_failed(detail));
    }
    Ok(())
}

/// Informational record of the last completed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMetadata {
    pub media_id: String,
    pub title: Option<String>,
    pub custom_title: Option<String>,
    #[serde(rename = "type")]
    pub category: String,
    pub access: String,
    pub pages: usize,
    /// UNIX seconds.
    pub timestamp: u64,
}

impl WorkMetadata {
    pub fn from_catalog(catalog: &Catalog, custom_title: Option<String>) -> Self {
        Self {
            media_id: catalog.media_id.clone(),
            title: catalog.title.clone(),
            custom_title,
            category: catalog.category.tag().to_string(),
            access: catalog.access.clone(),
            pages: catalog.numeric_page_count(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    pub async fn write(&self, work: &WorkDir) -> Result<(), TileBookError> {
        let path = work.metadata_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TileBookError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| TileBookError::Internal(format!("metadata JSON: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| TileBookError::io(&path, e))
    }

    pub async fn load(work: &WorkDir) -> Result<Self, TileBookError> {
        let path = work.metadata_path();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TileBookError::io(&path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TileBookError::Internal(format!("metadata JSON in {}: {}", path.display(), e)))
    }
}
