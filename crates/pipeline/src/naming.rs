//! Path derivation for encoded, archived and partial files.
//!
//! A source at `<input>/<rel>/<stem>.<ext>` maps to:
//! - encoded output: `<output>/<rel>/<stem>.cfr.<ext>`
//! - encoder artifact: `<work>/<rel>/<stem>.cfr.<ext>.part` (work defaults to output)
//! - archived source: `<archive>/<rel>/<stem>.<ext>`
//!
//! The names are deterministic so a re-run over the same directories finds the
//! files a previous (possibly interrupted) pass produced.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marker inserted between the stem and extension of encoded files.
pub const ENCODED_MARKER: &str = "cfr";

/// Suffix appended to files that are still being written.
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("{path} is not inside the input directory {input_dir}")]
    OutsideInput { path: PathBuf, input_dir: PathBuf },

    #[error("{0} has no file name or extension")]
    Unnamed(PathBuf),
}

/// The directories one pass works over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Where the encoder writes its artifact before relocation.
    pub work_dir: PathBuf,
}

impl DirectoryLayout {
    /// Layout whose encoder artifacts are written straight into the output directory.
    pub fn new(input_dir: PathBuf, output_dir: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            work_dir: output_dir.clone(),
            input_dir,
            output_dir,
            archive_dir,
        }
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = work_dir {
            self.work_dir = dir;
        }
        self
    }

    /// Directories that may hold partial files from an interrupted pass.
    ///
    /// The input directory is excluded: only sources live there.
    pub fn partial_file_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for dir in [&self.output_dir, &self.archive_dir, &self.work_dir] {
            if dir != &self.input_dir && !dirs.contains(&dir.as_path()) {
                dirs.push(dir.as_path());
            }
        }
        dirs
    }

    /// Final location of the encoded version of `source`.
    pub fn encoded_path(&self, source: &Path) -> Result<PathBuf, NamingError> {
        let relative = self.relative(source)?;
        Ok(self.output_dir.join(encoded_name(&relative)?))
    }

    /// Location the encoder writes to for `source`.
    pub fn artifact_path(&self, source: &Path) -> Result<PathBuf, NamingError> {
        let relative = self.relative(source)?;
        Ok(partial_path(&self.work_dir.join(encoded_name(&relative)?)))
    }

    /// Final location of `source` once archived.
    pub fn archive_path(&self, source: &Path) -> Result<PathBuf, NamingError> {
        let relative = self.relative(source)?;
        Ok(self.archive_dir.join(relative))
    }

    fn relative(&self, source: &Path) -> Result<PathBuf, NamingError> {
        source
            .strip_prefix(&self.input_dir)
            .map(Path::to_path_buf)
            .map_err(|_| NamingError::OutsideInput {
                path: source.to_path_buf(),
                input_dir: self.input_dir.clone(),
            })
    }
}

/// `dir/movie.mp4` -> `dir/movie.cfr.mp4`
fn encoded_name(path: &Path) -> Result<PathBuf, NamingError> {
    let stem = path
        .file_stem()
        .ok_or_else(|| NamingError::Unnamed(path.to_path_buf()))?;
    let ext = path
        .extension()
        .ok_or_else(|| NamingError::Unnamed(path.to_path_buf()))?;

    let mut name = OsString::from(stem);
    name.push(".");
    name.push(ENCODED_MARKER);
    name.push(".");
    name.push(ext);
    Ok(path.with_file_name(name))
}

/// `dir/file.ext` -> `dir/file.ext.part`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

/// True for files written by a previous encode (`<stem>.cfr.<ext>`).
pub fn is_encoded(path: &Path) -> bool {
    path.file_stem()
        .map(Path::new)
        .and_then(|stem| stem.extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ENCODED_MARKER))
        .unwrap_or(false)
}

/// True for files that were still being written when their writer stopped.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}
