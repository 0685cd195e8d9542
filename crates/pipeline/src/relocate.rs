//! Relocator module for moving finished files into place.
//!
//! For a succeeded job the artifact is moved to its output path first, then the
//! source is moved into the archive. Each move is a rename when possible; when
//! the rename fails (typically across volumes) it falls back to
//! copy to `<dest>.part`, verify the size, rename into place, delete the original.
//! A destination that already exists is never overwritten.

use crate::catalog::MediaFile;
use crate::job::{JobState, TranscodeJob};
use crate::naming::partial_path;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while relocating a job's files.
#[derive(Debug, Error)]
pub enum RelocateError {
    /// The file to move is gone.
    #[error("{0} no longer exists")]
    Missing(PathBuf),

    /// The destination is occupied by a different file.
    #[error("Destination {0} already exists")]
    DestinationExists(PathBuf),

    /// The copied file does not have the expected size.
    #[error("Copy of {path} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A succeeded job carried no artifact size.
    #[error("Job for {0} has no recorded artifact size")]
    UnknownArtifactSize(PathBuf),

    /// A filesystem operation failed.
    #[error("Failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RelocateError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| RelocateError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Filesystem primitives the relocator needs.
pub trait FileSystem: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn size(&self, path: &Path) -> io::Result<u64>;
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// True if both files hold the same bytes.
    fn same_contents(&self, a: &Path, b: &Path) -> io::Result<bool>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }

    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so a dangling link still counts as occupied
        fs::symlink_metadata(path).is_ok()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn same_contents(&self, a: &Path, b: &Path) -> io::Result<bool> {
        let (a, b) = (fs::File::open(a)?, fs::File::open(b)?);
        if a.metadata()?.len() != b.metadata()?.len() {
            return Ok(false);
        }

        let mut a = BufReader::new(a);
        let mut b = BufReader::new(b);
        loop {
            let left = a.fill_buf()?;
            let right = b.fill_buf()?;
            if left.is_empty() || right.is_empty() {
                return Ok(left.is_empty() && right.is_empty());
            }
            let n = left.len().min(right.len());
            if left[..n] != right[..n] {
                return Ok(false);
            }
            a.consume(n);
            b.consume(n);
        }
    }
}

/// How a single file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Renamed,
    Copied,
    /// An identical copy was already at the destination, or the destination is
    /// the file itself; nothing was moved.
    AlreadyPresent,
}

/// Result of finalizing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    /// Output placed, then source archived.
    Completed {
        output_path: PathBuf,
        archive_path: PathBuf,
        output: MoveMethod,
        source: MoveMethod,
    },
    /// The job did not succeed; nothing was moved.
    Untouched,
}

pub type RelocateResult = Result<Relocation, RelocateError>;

/// Moves finished artifacts to the output directory and sources to the archive.
#[derive(Clone)]
pub struct Relocator {
    fs: Arc<dyn FileSystem>,
}

impl Default for Relocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Relocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relocator").finish_non_exhaustive()
    }
}

impl Relocator {
    pub fn new() -> Self {
        Self::with_fs(Arc::new(LocalFileSystem))
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Place a job's output and archive its source.
    ///
    /// Only succeeded jobs move anything. The output is in place before the
    /// source leaves the input directory, so a failure part-way never loses
    /// the only copy of either file.
    pub fn finalize(&self, job: &TranscodeJob) -> RelocateResult {
        if job.state() != JobState::Succeeded {
            tracing::debug!(
                "Not relocating {} (state {})",
                job.source.path.display(),
                job.state().as_str()
            );
            return Ok(Relocation::Untouched);
        }

        let artifact_size = job
            .artifact_size()
            .ok_or_else(|| RelocateError::UnknownArtifactSize(job.source.path.clone()))?;

        let output = self.move_file(&job.artifact_path, &job.target_path, artifact_size)?;
        tracing::info!("Encoded: {}", job.target_path.display());

        let source = self.archive_source(&job.source, &job.archive_path)?;

        Ok(Relocation::Completed {
            output_path: job.target_path.clone(),
            archive_path: job.archive_path.clone(),
            output,
            source,
        })
    }

    /// Move `source` into the archive, verified against its catalog size.
    ///
    /// When the archive is the input directory the source already is its own
    /// archive copy and stays where it is. An existing archive file with the
    /// same bytes is taken as a previous, interrupted archive of this source:
    /// the source is deleted. Any other existing file is left alone.
    pub fn archive_source(&self, source: &MediaFile, archive_path: &Path) -> Result<MoveMethod, RelocateError> {
        if source.path.as_path() == archive_path {
            tracing::debug!("{} is already in the archive", source.path.display());
            return Ok(MoveMethod::AlreadyPresent);
        }

        if !self.fs.exists(&source.path) {
            return Err(RelocateError::Missing(source.path.clone()));
        }

        if self.fs.exists(archive_path) {
            tracing::warn!("Archived file ({}) already exists", archive_path.display());
            let identical = self
                .fs
                .same_contents(&source.path, archive_path)
                .map_err(RelocateError::io("compare", archive_path))?;
            if !identical {
                return Err(RelocateError::DestinationExists(archive_path.to_path_buf()));
            }

            tracing::info!("Deleting: {}", source.path.display());
            self.fs
                .remove_file(&source.path)
                .map_err(RelocateError::io("delete", &source.path))?;
            return Ok(MoveMethod::AlreadyPresent);
        }

        let method = self.move_file(&source.path, archive_path, source.size_bytes)?;
        tracing::info!("Archived: {}", archive_path.display());
        Ok(method)
    }

    /// Move `from` to `to`, never overwriting `to`.
    fn move_file(&self, from: &Path, to: &Path, expected_size: u64) -> Result<MoveMethod, RelocateError> {
        if !self.fs.exists(from) {
            return Err(RelocateError::Missing(from.to_path_buf()));
        }
        if self.fs.exists(to) {
            return Err(RelocateError::DestinationExists(to.to_path_buf()));
        }
        if let Some(parent) = to.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(RelocateError::io("create", parent))?;
        }

        tracing::info!("Moving: {} -> {}", from.display(), to.display());
        match self.fs.rename(from, to) {
            Ok(()) => return Ok(MoveMethod::Renamed),
            // `from` is already the partial file of `to`; there is nothing to copy through
            Err(source) if partial_path(to) == from => {
                return Err(RelocateError::Io {
                    op: "rename",
                    path: from.to_path_buf(),
                    source,
                })
            }
            Err(e) => tracing::debug!("Rename failed ({}), copying instead", e),
        }

        self.copy_verified(from, to, expected_size)?;

        self.fs
            .remove_file(from)
            .map_err(RelocateError::io("delete", from))?;
        Ok(MoveMethod::Copied)
    }

    /// Copy through a partial file and rename it into place once verified.
    ///
    /// On any failure the partial file is removed and `from` is left as it was.
    fn copy_verified(&self, from: &Path, to: &Path, expected_size: u64) -> Result<(), RelocateError> {
        let partial = partial_path(to);
        if self.fs.exists(&partial) {
            self.fs
                .remove_file(&partial)
                .map_err(RelocateError::io("delete", &partial))?;
        }

        let result = self.copy_to_partial(from, &partial, to, expected_size);
        if result.is_err() && self.fs.exists(&partial) {
            if let Err(e) = self.fs.remove_file(&partial) {
                tracing::warn!("Failed to remove {}: {}", partial.display(), e);
            }
        }
        result
    }

    fn copy_to_partial(&self, from: &Path, partial: &Path, to: &Path, expected_size: u64) -> Result<(), RelocateError> {
        self.fs
            .copy(from, partial)
            .map_err(RelocateError::io("copy", from))?;

        let actual = self
            .fs
            .size(partial)
            .map_err(RelocateError::io("read", partial))?;
        if actual != expected_size {
            tracing::error!(
                "Size mismatch copying {}: {} bytes, expected {}",
                from.display(),
                actual,
                expected_size
            );
            return Err(RelocateError::SizeMismatch {
                path: from.to_path_buf(),
                expected: expected_size,
                actual,
            });
        }

        // The destination may have appeared while copying
        if self.fs.exists(to) {
            return Err(RelocateError::DestinationExists(to.to_path_buf()));
        }

        self.fs
            .rename(partial, to)
            .map_err(RelocateError::io("rename", partial))
    }
}
