//! Resume filter: drop pages whose image is already on disk.
//!
//! The presence of `sources/<label>.jpg` is the only record of a finished
//! page; artifacts are written atomically, so no partial file can pass for
//! a finished one.

use crate::catalog::{CatalogEntry, PageKey};
use crate::error::TileBookError;
use crate::storage::WorkDir;
use std::collections::HashSet;
use tracing::info;

/// Requested pages split into "still to fetch" and "already there".
#[derive(Debug, Clone)]
pub struct ResumePlan<'a> {
    pub pending: Vec<&'a CatalogEntry>,
    pub skipped: Vec<PageKey>,
}

impl<'a> ResumePlan<'a> {
    /// Something was requested and all of it exists already.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && !self.skipped.is_empty()
    }
}

/// Pure set difference: `requested − existing`, preserving request order.
pub fn plan<'a>(requested: &[&'a CatalogEntry], existing: &HashSet<PageKey>) -> ResumePlan<'a> {
    let (skipped, pending): (Vec<&CatalogEntry>, Vec<&CatalogEntry>) =
        requested.iter().copied().partition(|e| existing.contains(&e.key));
    ResumePlan {
        pending,
        skipped: skipped.into_iter().map(|e| e.key).collect(),
    }
}

/// Scan the work's `sources/` directory and plan the batch.
pub fn filter_existing<'a>(
    work: &WorkDir,
    requested: &[&'a CatalogEntry],
) -> Result<ResumePlan<'a>, TileBookError> {
    let existing: HashSet<PageKey> = work
        .scan_artifacts()?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    let plan = plan(requested, &existing);
    if !plan.skipped.is_empty() {
        info!(
            "Skipping {} of {} pages already in {}",
            plan.skipped.len(),
            requested.len(),
            work.sources_dir().display()
        );
    }
    Ok(plan)
}
