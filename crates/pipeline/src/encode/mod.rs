//! Encoder gateway for auto-cfr
//!
//! The pipeline only needs one capability from the transcoding engine: turn a
//! source into an artifact and say whether that worked. [`EncoderGateway`] is
//! that boundary; [`HandBrakeGateway`] implements it by running HandBrakeCLI.

pub mod handbrake;
pub mod progress;

use crate::retry::FailureKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use handbrake::{build_handbrake_command, default_binary, HandBrakeGateway, HandBrakeSettings};
pub use progress::{parse_progress, EncodeProgress, ProgressLogger};

/// Error type for a single encoder invocation
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder process could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The encoder did not finish in time and was killed
    #[error("Encoder timed out after {0:?}")]
    Timeout(Duration),

    /// The encoder exited with non-zero status
    #[error("Encoder failed with exit code: {0}")]
    Failed(i32),

    /// The encoder was terminated by a signal
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// The encoder reported success but the artifact is unusable
    #[error("Encoder output {path} is {reason}")]
    BadArtifact { path: PathBuf, reason: &'static str },

    /// IO error while supervising the encoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncodeError {
    /// Failure kind recorded on the job.
    pub fn kind(&self) -> FailureKind {
        match self {
            EncodeError::Spawn { .. } => FailureKind::SpawnFailed,
            EncodeError::Timeout(_) => FailureKind::Timeout,
            EncodeError::Failed(_)
            | EncodeError::Terminated
            | EncodeError::BadArtifact { .. }
            | EncodeError::Io(_) => FailureKind::EncoderError,
        }
    }
}

/// Input to one encoder call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    /// Where the encoder must write its output
    pub artifact_path: PathBuf,
}

/// Outcome of one encoder call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub artifact_path: PathBuf,
    /// Size of the artifact on success
    pub artifact_size: u64,
    /// Process exit code; `None` if it never ran or was killed
    pub exit_code: Option<i32>,
    /// Bounded tail of the encoder's output
    pub log: Vec<String>,
    /// `None` on success
    pub failure: Option<(FailureKind, String)>,
}

impl TranscodeResult {
    pub fn succeeded(artifact_path: PathBuf, artifact_size: u64, exit_code: Option<i32>, log: Vec<String>) -> Self {
        Self {
            artifact_path,
            artifact_size,
            exit_code,
            log,
            failure: None,
        }
    }

    pub fn failed(artifact_path: PathBuf, error: &EncodeError, exit_code: Option<i32>, log: Vec<String>) -> Self {
        Self {
            artifact_path,
            artifact_size: 0,
            exit_code,
            log,
            failure: Some((error.kind(), error.to_string())),
        }
    }

    pub fn ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Boundary to the external transcoding engine.
///
/// Implementations block until the engine finishes and never retry; the
/// scheduler runs them on the blocking thread pool and owns the retry policy.
pub trait EncoderGateway: Send + Sync {
    fn transcode(&self, request: &TranscodeRequest) -> TranscodeResult;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let spawn = EncodeError::Spawn {
            program: "HandBrakeCLI".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(spawn.kind(), FailureKind::SpawnFailed);
        assert_eq!(EncodeError::Timeout(Duration::from_secs(5)).kind(), FailureKind::Timeout);
        assert_eq!(EncodeError::Failed(2).kind(), FailureKind::EncoderError);
        assert_eq!(EncodeError::Terminated.kind(), FailureKind::EncoderError);
        assert_eq!(
            EncodeError::BadArtifact {
                path: PathBuf::from("/out/a.part"),
                reason: "empty"
            }
            .kind(),
            FailureKind::EncoderError
        );
    }

    #[test]
    fn test_result_constructors() {
        let ok = TranscodeResult::succeeded(PathBuf::from("/out/a.part"), 10, Some(0), vec![]);
        assert!(ok.ok());
        assert_eq!(ok.artifact_size, 10);

        let failed = TranscodeResult::failed(
            PathBuf::from("/out/a.part"),
            &EncodeError::Failed(3),
            Some(3),
            vec!["boom".to_string()],
        );
        assert!(!failed.ok());
        assert_eq!(
            failed.failure,
            Some((FailureKind::EncoderError, "Encoder failed with exit code: 3".to_string()))
        );
    }
}
