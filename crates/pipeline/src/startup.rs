//! Startup checks module for auto-cfr
//!
//! Provides preflight checks to run before a pass:
//! - Input, output and archive must be existing directories
//! - Inside a container, the archive must be non-empty (an unmounted network
//!   volume shows up as an empty directory)
//! - The encoder must answer `--version`

use crate::encode::HandBrakeSettings;
use crate::naming::DirectoryLayout;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{role} directory ({path}) is not a directory")]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error("archive directory ({0}) is empty, network drive not mounted?")]
    ArchiveEmpty(PathBuf),

    #[error("Encoder not available: {0}")]
    EncoderUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// True when running inside a Docker container.
pub fn is_running_inside_docker() -> bool {
    Path::new("/.dockerenv").exists()
}

pub fn check_directory(role: &'static str, path: &Path) -> Result<(), StartupError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(StartupError::NotADirectory {
            role,
            path: path.to_path_buf(),
        })
    }
}

/// Check that the archive directory has at least one entry.
pub fn check_archive_mounted(archive_dir: &Path) -> Result<(), StartupError> {
    let mut entries = std::fs::read_dir(archive_dir)?;
    if entries.next().is_none() {
        return Err(StartupError::ArchiveEmpty(archive_dir.to_path_buf()));
    }
    Ok(())
}

/// Check the encoder is runnable with `<binary> [binary_args] --version`.
pub fn check_encoder_available(settings: &HandBrakeSettings) -> Result<(), StartupError> {
    let binary = settings.binary.display().to_string();
    let status = Command::new(&settings.binary)
        .args(&settings.binary_args)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            StartupError::EncoderUnavailable(format!(
                "{} --version failed; is HandBrakeCLI installed and in PATH? Error: {}",
                binary, e
            ))
        })?;

    if !status.success() {
        return Err(StartupError::EncoderUnavailable(format!(
            "{} --version exited with {}",
            binary, status
        )));
    }

    Ok(())
}

/// Run all startup checks in order
///
/// 1. Directory existence
/// 2. Archive mount (containers only)
/// 3. Encoder availability, unless `check_encoder` is false
pub fn run_startup_checks(
    layout: &DirectoryLayout,
    settings: &HandBrakeSettings,
    check_encoder: bool,
) -> Result<(), StartupError> {
    check_directory("input", &layout.input_dir)?;
    check_directory("output", &layout.output_dir)?;
    check_directory("archive", &layout.archive_dir)?;

    if is_running_inside_docker() {
        check_archive_mounted(&layout.archive_dir)?;
    }

    if check_encoder {
        check_encoder_available(settings)?;
    } else {
        tracing::warn!("Skipping encoder availability check");
    }

    tracing::info!("Startup checks passed");
    Ok(())
}
