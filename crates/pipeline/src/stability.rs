//! Stale-snapshot detection for catalogued sources.
//!
//! A [`MediaFile`] is a snapshot taken at scan time. Right before a job is
//! dispatched we re-read the file's metadata; if the size or modification time
//! moved, the job is abandoned and the source left alone.

use crate::catalog::MediaFile;
use std::time::SystemTime;

/// Result of comparing a snapshot against the file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// Size and modification time are unchanged.
    Stable,
    /// The file was written to since it was catalogued.
    Changed {
        /// Size recorded in the snapshot.
        initial_size: u64,
        /// Size now.
        current_size: u64,
        /// True when only the modification time moved.
        mtime_only: bool,
    },
}

impl StabilityResult {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityResult::Stable)
    }
}

/// Re-read `media`'s metadata and compare it with the snapshot.
///
/// # Returns
/// * `Ok(StabilityResult::Stable)` if size and mtime are unchanged
/// * `Ok(StabilityResult::Changed { .. })` otherwise
/// * `Err` if the file can no longer be read (for example, it was deleted)
pub async fn check_snapshot(media: &MediaFile) -> Result<StabilityResult, std::io::Error> {
    let metadata = tokio::fs::metadata(&media.path).await?;
    let current_mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

    Ok(compare_snapshot(
        media.size_bytes,
        media.modified_time,
        metadata.len(),
        current_mtime,
    ))
}

/// Compare a snapshot with the current size and modification time.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn compare_snapshot(
    initial_size: u64,
    initial_mtime: SystemTime,
    current_size: u64,
    current_mtime: SystemTime,
) -> StabilityResult {
    if initial_size == current_size && initial_mtime == current_mtime {
        StabilityResult::Stable
    } else {
        StabilityResult::Changed {
            initial_size,
            current_size,
            mtime_only: initial_size == current_size,
        }
    }
}
