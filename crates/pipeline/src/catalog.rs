//! Catalog module for discovering source videos in the input directory.
//!
//! This module walks the input directory and classifies every file it finds:
//! transcode candidates, sources whose encoded output already exists, and files
//! that are skipped (unreadable, too small, or still being written).

use crate::naming::{is_encoded, is_partial, DirectoryLayout};
use auto_cfr_config::CatalogConfig;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that abort a scan. Per-file problems are reported as [`SkippedFile`].
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Input directory {path} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input path {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Snapshot of a source video taken at catalog time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    /// Absolute path to the file; the file's identity.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time at discovery time.
    pub modified_time: SystemTime,
    /// Lowercase extension without the dot.
    pub extension: String,
}

/// Why a file was left out of the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Metadata could not be read.
    Unreadable { message: String },
    /// Smaller than the configured minimum, most likely incomplete.
    TooSmall { size_bytes: u64, min_size_bytes: u64 },
    /// Modified within the debounce window, possibly still being written.
    RecentlyModified { age_ms: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable { message } => write!(f, "unreadable: {}", message),
            SkipReason::TooSmall {
                size_bytes,
                min_size_bytes,
            } => write!(
                f,
                "too small: {} bytes (minimum {} bytes)",
                size_bytes, min_size_bytes
            ),
            SkipReason::RecentlyModified { age_ms } => {
                write!(f, "modified {} ms ago, may still be written", age_ms)
            }
        }
    }
}

/// A file excluded from the pass, reported but not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Classification of one discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEntry {
    /// Needs transcoding.
    Candidate(MediaFile),
    /// The encoded output is already in place; only archiving is left.
    AlreadyEncoded {
        source: MediaFile,
        encoded_path: PathBuf,
    },
    /// Excluded from this pass.
    Skipped(SkippedFile),
}

/// Scans the input directory of a [`DirectoryLayout`].
#[derive(Debug, Clone)]
pub struct FileCatalog {
    layout: DirectoryLayout,
    extensions: Vec<String>,
    debounce: Duration,
    min_size_bytes: u64,
}

impl FileCatalog {
    pub fn new(layout: DirectoryLayout, config: &CatalogConfig) -> Self {
        let extensions = config
            .extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            layout,
            extensions,
            debounce: Duration::from_secs(config.debounce_secs),
            min_size_bytes: config.min_size_bytes,
        }
    }

    /// Override the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Checks if a file has one of the configured video extensions (case-insensitive).
    pub fn is_video_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.extensions.iter().any(|known| *known == ext_lower)
            })
            .unwrap_or(false)
    }

    /// Start a scan of the input directory.
    ///
    /// The directory itself is checked eagerly; entries are produced lazily as the
    /// returned iterator is consumed, so the scan can be re-run at any time.
    pub fn scan(&self) -> Result<CatalogScan<'_>, CatalogError> {
        let root = &self.layout.input_dir;
        let metadata = std::fs::metadata(root).map_err(|source| CatalogError::Unreadable {
            path: root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(CatalogError::NotADirectory(root.clone()));
        }
        std::fs::read_dir(root).map_err(|source| CatalogError::Unreadable {
            path: root.clone(),
            source,
        })?;

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Skip hidden directories, but allow the root even if it starts with '.'
                if entry.file_type().is_dir() && entry.depth() > 0 {
                    if let Some(name) = entry.file_name().to_str() {
                        return !name.starts_with('.');
                    }
                }
                true
            });

        Ok(CatalogScan {
            catalog: self,
            walker: Box::new(walker),
            now: SystemTime::now(),
        })
    }

    fn classify(&self, path: &Path, metadata: &std::fs::Metadata, now: SystemTime) -> CatalogEntry {
        let size_bytes = metadata.len();
        if size_bytes < self.min_size_bytes {
            return CatalogEntry::Skipped(SkippedFile {
                path: path.to_path_buf(),
                reason: SkipReason::TooSmall {
                    size_bytes,
                    min_size_bytes: self.min_size_bytes,
                },
            });
        }

        let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        // a modification time in the future counts as "just now"
        let age = now.duration_since(modified_time).unwrap_or(Duration::ZERO);
        if age < self.debounce {
            return CatalogEntry::Skipped(SkippedFile {
                path: path.to_path_buf(),
                reason: SkipReason::RecentlyModified {
                    age_ms: age.as_millis() as u64,
                },
            });
        }

        let media = MediaFile {
            path: path.to_path_buf(),
            size_bytes,
            modified_time,
            extension: path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default(),
        };

        match self.layout.encoded_path(path) {
            Ok(encoded_path) if encoded_path.exists() => CatalogEntry::AlreadyEncoded {
                source: media,
                encoded_path,
            },
            Ok(_) => CatalogEntry::Candidate(media),
            Err(e) => CatalogEntry::Skipped(SkippedFile {
                path: path.to_path_buf(),
                reason: SkipReason::Unreadable {
                    message: e.to_string(),
                },
            }),
        }
    }
}

/// Lazy iterator over the entries of one scan.
pub struct CatalogScan<'a> {
    catalog: &'a FileCatalog,
    walker: Box<dyn Iterator<Item = walkdir::Result<walkdir::DirEntry>> + 'a>,
    now: SystemTime,
}

impl Iterator for CatalogScan<'_> {
    type Item = CatalogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    // An unreadable sub-directory or entry; report it and keep walking
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.catalog.layout.input_dir.clone());
                    tracing::warn!("Skipping unreadable entry {}: {}", path.display(), e);
                    return Some(CatalogEntry::Skipped(SkippedFile {
                        path,
                        reason: SkipReason::Unreadable {
                            message: e.to_string(),
                        },
                    }));
                }
            };

            let path = entry.path();

            if !entry.file_type().is_file() {
                continue;
            }

            // Files produced by this tool are never sources
            if is_partial(path) || is_encoded(path) {
                continue;
            }

            if !self.catalog.is_video_file(path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    return Some(CatalogEntry::Skipped(SkippedFile {
                        path: path.to_path_buf(),
                        reason: SkipReason::Unreadable {
                            message: e.to_string(),
                        },
                    }));
                }
            };

            return Some(self.catalog.classify(path, &metadata, self.now));
        }
    }
}
