//! Removal of partial files left behind by an interrupted pass.

use crate::naming::{is_partial, DirectoryLayout};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a cleanup sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupSummary {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Delete every `.part` file under the output, archive and work directories.
///
/// The input directory is never touched, even when it is nested inside one of
/// the others. Failures are collected and logged; they never abort the pass.
pub fn remove_partial_files(layout: &DirectoryLayout) -> CleanupSummary {
    let mut summary = CleanupSummary::default();

    for dir in layout.partial_file_dirs() {
        sweep(dir, &layout.input_dir, &mut summary);
    }

    if !summary.removed.is_empty() {
        tracing::info!("Removed {} incomplete file(s)", summary.removed.len());
    }
    summary
}

fn sweep(dir: &Path, input_dir: &Path, summary: &mut CleanupSummary) {
    if !dir.is_dir() {
        return;
    }

    let walker = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(input_dir));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cleanup skipped an unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_partial(entry.path()) {
            continue;
        }

        let path = entry.path();
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::info!("Deleting incomplete file: {}", path.display());
                summary.removed.push(path.to_path_buf());
            }
            Err(e) => {
                tracing::warn!("Failed to delete incomplete file {}: {}", path.display(), e);
                summary.failed.push((path.to_path_buf(), e.to_string()));
            }
        }
    }
}
