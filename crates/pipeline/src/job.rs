//! Transcode job lifecycle.
//!
//! A job moves strictly `Pending -> Running -> Succeeded | Failed`. The only
//! shortcut is `Pending -> Failed`, used when a job is never dispatched
//! (cancellation, stale source, or a duplicate claim). Terminal jobs are
//! immutable.

use crate::catalog::MediaFile;
use crate::naming::{DirectoryLayout, NamingError};
use crate::retry::FailureKind;
use serde::Serialize;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Error raised by an illegal state transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("Job {id}: cannot {action} a job in state {state}")]
    InvalidTransition {
        id: Uuid,
        action: &'static str,
        state: &'static str,
    },
}

/// Job state representing the current stage of the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted, waiting for a worker
    Pending,
    /// A worker is running the encoder
    Running,
    /// The encoder produced a usable artifact
    Succeeded,
    /// The job failed; see [`TranscodeJob::failure`]
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Failure details recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// One source file's transcode.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Unique job identifier
    pub id: Uuid,
    /// Catalog snapshot of the source
    pub source: MediaFile,
    /// Final encoded output path
    pub target_path: PathBuf,
    /// Where the encoder writes before relocation
    pub artifact_path: PathBuf,
    /// Where the source goes once the output is in place
    pub archive_path: PathBuf,
    state: JobState,
    attempts: u32,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    failure: Option<JobFailure>,
    artifact_size: Option<u64>,
}

impl TranscodeJob {
    /// Create a pending job with paths derived from `layout`.
    pub fn new(source: MediaFile, layout: &DirectoryLayout) -> Result<Self, NamingError> {
        Ok(Self {
            id: Uuid::new_v4(),
            target_path: layout.encoded_path(&source.path)?,
            artifact_path: layout.artifact_path(&source.path)?,
            archive_path: layout.archive_path(&source.path)?,
            source,
            state: JobState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            failure: None,
            artifact_size: None,
        })
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.finished_at
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    /// Size of the artifact as reported by the encoder.
    pub fn artifact_size(&self) -> Option<u64> {
        self.artifact_size
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `Pending -> Running`
    pub fn start(&mut self) -> Result<(), JobStateError> {
        if self.state != JobState::Pending {
            return Err(self.invalid("start"));
        }
        self.state = JobState::Running;
        self.started_at = Some(SystemTime::now());
        Ok(())
    }

    /// Count one encoder attempt. Only valid while running.
    pub fn record_attempt(&mut self) -> Result<u32, JobStateError> {
        if self.state != JobState::Running {
            return Err(self.invalid("attempt"));
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// `Running -> Succeeded`
    pub fn succeed(&mut self, artifact_size: u64) -> Result<(), JobStateError> {
        if self.state != JobState::Running {
            return Err(self.invalid("complete"));
        }
        self.state = JobState::Succeeded;
        self.artifact_size = Some(artifact_size);
        self.finished_at = Some(SystemTime::now());
        Ok(())
    }

    /// `Running | Pending -> Failed`
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Result<(), JobStateError> {
        if self.state.is_terminal() {
            return Err(self.invalid("fail"));
        }
        self.state = JobState::Failed;
        self.failure = Some(JobFailure {
            kind,
            message: message.into(),
        });
        self.finished_at = Some(SystemTime::now());
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> JobStateError {
        JobStateError::InvalidTransition {
            id: self.id,
            action,
            state: self.state.as_str(),
        }
    }
}
