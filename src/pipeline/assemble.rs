//! Document assembly: ordered page images → one output file.
//!
//! ## Ordering
//!
//! With front/back matter:
//!
//! ```text
//! [C1, I1]  +  numbered pages ascending  +  [I3, C2, C3]
//! ```
//!
//! Covers that are not on disk are simply left out. Without front/back
//! matter only the numbered pages are used.
//!
//! ## Corruption recovery
//!
//! Every ordered page is decoded before the encoder sees it. A page that
//! fails to decode is deleted and fetched again once; if that does not
//! produce a readable page the build stops with
//! [`TileBookError::CorruptArtifact`] and no document is written.

use super::encode::{DocumentEncoder, PdfEncoder};
use super::source::{HttpTileSource, TileSource};
use super::stitch::{fetch_page, PageContext};
use crate::catalog::{Catalog, CoverKind, PageKey};
use crate::config::DownloadConfig;
use crate::error::TileBookError;
use crate::storage::WorkDir;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful document build.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub pages: usize,
    /// Pages that were corrupt on disk and fetched again.
    pub recovered: Vec<PageKey>,
}

/// Put artifacts in document order.
///
/// Duplicate keys keep their first occurrence.
pub fn order_artifacts(
    artifacts: &[(PageKey, PathBuf)],
    include_matter: bool,
) -> Vec<(PageKey, PathBuf)> {
    let mut numbered: Vec<(PageKey, PathBuf)> = artifacts
        .iter()
        .filter(|(key, _)| !key.is_cover())
        .cloned()
        .collect();
    numbered.sort_by_key(|(key, _)| key.number());
    numbered.dedup_by_key(|(key, _)| *key);

    if !include_matter {
        return numbered;
    }

    let cover = |kind: &CoverKind| {
        artifacts
            .iter()
            .find(|(key, _)| *key == PageKey::Cover(*kind))
            .cloned()
    };

    let mut ordered: Vec<(PageKey, PathBuf)> =
        CoverKind::FRONT_MATTER.iter().filter_map(cover).collect();
    ordered.extend(numbered);
    ordered.extend(CoverKind::BACK_MATTER.iter().filter_map(cover));
    ordered
}

/// Sort key matching [`order_artifacts`]: front matter, numbered pages,
/// back matter.
fn document_rank(key: &PageKey) -> (u8, u32) {
    match key {
        PageKey::Numeric(n) => (1, *n),
        PageKey::Cover(kind) => {
            if let Some(i) = CoverKind::FRONT_MATTER.iter().position(|k| k == kind) {
                (0, i as u32)
            } else {
                let i = CoverKind::BACK_MATTER
                    .iter()
                    .position(|k| k == kind)
                    .unwrap_or(CoverKind::BACK_MATTER.len());
                (2, i as u32)
            }
        }
    }
}

/// Build the work's PDF from the pages on disk, refetching corrupt pages
/// over HTTP.
///
/// `output` defaults to `<work>/pdf/<folder>.pdf`. Front/back matter is
/// included when [`DownloadConfig::include_covers`] is set.
pub async fn build_document(
    catalog: &Catalog,
    config: &DownloadConfig,
    output: Option<PathBuf>,
) -> Result<DocumentReport, TileBookError> {
    let source = HttpTileSource::new(config.tile_timeout_secs, &config.user_agent)
        .map_err(|e| TileBookError::Internal(format!("Failed to build HTTP client: {}", e)))?;
    build_document_with(
        catalog,
        config,
        Arc::new(source),
        Arc::new(PdfEncoder::default()),
        output,
    )
    .await
}

/// [`build_document`] with a caller-supplied tile source and encoder.
pub async fn build_document_with(
    catalog: &Catalog,
    config: &DownloadConfig,
    source: Arc<dyn TileSource>,
    encoder: Arc<dyn DocumentEncoder>,
    output: Option<PathBuf>,
) -> Result<DocumentReport, TileBookError> {
    let work = WorkDir::for_catalog(catalog, config);
    let output = output.unwrap_or_else(|| work.document_path());
    info!("Building document for {} → {}", catalog.media_id, output.display());

    let artifacts = work.scan_artifacts()?;
    let mut ordered = order_artifacts(&artifacts, config.include_covers);
    if ordered.is_empty() {
        return Err(TileBookError::NoPages {
            media_id: catalog.media_id.clone(),
        });
    }
    debug!("{} pages in document order", ordered.len());

    // ── Verify / recover ─────────────────────────────────────────────────
    let ctx = PageContext::new(catalog, config, work.clone(), source);
    let mut recovered: HashSet<PageKey> = HashSet::new();

    for (key, path) in ordered.iter_mut() {
        let label = ctx.label(*key);
        let detail = match verify_artifact(path).await {
            Ok(()) => continue,
            Err(detail) => detail,
        };
        if !recovered.insert(*key) {
            return Err(corrupt(&label, path, detail));
        }
        warn!("Page {} is corrupt ({}), fetching it again", label, detail);
        *path = recover_artifact(catalog, &ctx, *key, &label, path).await?;
    }

    // ── Encode ───────────────────────────────────────────────────────────
    let total = ordered.len();
    if let Some(ref cb) = config.progress_callback {
        for (index, (key, _)) in ordered.iter().enumerate() {
            cb.on_document_page(&ctx.label(*key), index + 1, total);
        }
    }
    let pages: Vec<PathBuf> = ordered.into_iter().map(|(_, path)| path).collect();
    write_document(encoder, pages, &output).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&output, total);
    }
    info!("Wrote {} ({} pages)", output.display(), total);

    let mut recovered: Vec<PageKey> = recovered.into_iter().collect();
    recovered.sort_by_key(document_rank);
    Ok(DocumentReport {
        path: output,
        pages: total,
        recovered,
    })
}

fn corrupt(label: &str, path: &Path, detail: impl Into<String>) -> TileBookError {
    TileBookError::CorruptArtifact {
        page: label.to_string(),
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Decode the whole image; `Err` carries the decoder's message.
async fn verify_artifact(path: &Path) -> Result<(), String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::open(&path).map(|_| ()).map_err(|e| e.to_string()))
        .await
        .map_err(|e| format!("decode task panicked: {}", e))?
}

/// Delete a corrupt page, fetch it again and check the new file.
async fn recover_artifact(
    catalog: &Catalog,
    ctx: &PageContext,
    key: PageKey,
    label: &str,
    path: &Path,
) -> Result<PathBuf, TileBookError> {
    let entry = catalog
        .entry(key)
        .ok_or_else(|| corrupt(label, path, "not in the catalog, cannot fetch it again"))?;

    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TileBookError::io(path, e)),
    }

    let outcome = fetch_page(ctx, entry).await;
    if outcome.is_fatal() {
        let detail = outcome.to_string();
        return Err(outcome
            .into_fatal_error(catalog, label)
            .unwrap_or_else(|| corrupt(label, path, detail)));
    }
    if !outcome.is_saved() {
        return Err(corrupt(label, path, format!("refetch {}", outcome)));
    }

    let fresh = ctx.work.artifact_path(label);
    verify_artifact(&fresh)
        .await
        .map_err(|detail| corrupt(label, &fresh, format!("still unreadable after refetch: {}", detail)))?;
    info!("Page {} recovered", label);
    Ok(fresh)
}

/// Run the encoder into a temporary file next to `output` and move it into
/// place only when the encoder succeeded.
async fn write_document(
    encoder: Arc<dyn DocumentEncoder>,
    pages: Vec<PathBuf>,
    output: &Path,
) -> Result<(), TileBookError> {
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| TileBookError::io(&dir, e))?;

    let target = output.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let tmp = tempfile::Builder::new()
            .prefix(".tilebook-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| TileBookError::io(&dir, e))?;
        encoder.encode(&pages, tmp.path())?;
        tmp.persist(&target)
            .map_err(|e| TileBookError::io(&target, e.error))?;
        Ok::<_, TileBookError>(())
    })
    .await
    .map_err(|e| TileBookError::Internal(format!("encoder task panicked: {}", e)))??;

    let len = tokio::fs::metadata(output)
        .await
        .map_err(|e| TileBookError::io(output, e))?
        .len();
    if len == 0 {
        return Err(TileBookError::EncodeFailed {
            path: output.to_path_buf(),
            detail: "encoder produced an empty file".into(),
        });
    }
    Ok(())
}
