//! Per-pass run report.

use crate::catalog::SkippedFile;
use crate::job::{JobState, TranscodeJob};
use crate::relocate::RelocateError;
use crate::retry::FailureKind;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One failed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one pass. Built with [`ReportBuilder`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    total_seen: usize,
    processed: usize,
    succeeded: usize,
    failed: usize,
    recovered: usize,
    skipped: Vec<SkippedFile>,
    failures: Vec<FailureRecord>,
    cancelled: bool,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

impl RunReport {
    /// Files the catalog yielded, skipped ones included.
    pub fn total_seen(&self) -> usize {
        self.total_seen
    }

    /// Jobs that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Sources whose output already existed and were only archived.
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    /// Failures, sorted by path.
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Process exit status: 0 for a clean pass, 1 if any file failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pass finished in {:.1}s{}",
            self.elapsed.as_secs_f64(),
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        writeln!(
            f,
            "  seen: {}, processed: {}, succeeded: {}, failed: {}, recovered: {}, skipped: {}",
            self.total_seen,
            self.processed,
            self.succeeded,
            self.failed,
            self.recovered,
            self.skipped.len()
        )?;
        for skipped in &self.skipped {
            writeln!(f, "  skipped {}: {}", skipped.path.display(), skipped.reason)?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  failed {} [{}]: {}",
                failure.path.display(),
                failure.kind,
                failure.message
            )?;
        }
        Ok(())
    }
}

/// Accumulates outcomes while a pass runs.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    total_seen: usize,
    processed: usize,
    succeeded: usize,
    recovered: usize,
    skipped: Vec<SkippedFile>,
    failures: Vec<FailureRecord>,
    cancelled: bool,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skipped(&mut self, skipped: SkippedFile) {
        tracing::info!("Skipped {}: {}", skipped.path.display(), skipped.reason);
        self.total_seen += 1;
        self.skipped.push(skipped);
    }

    /// A file the catalog yielded but that was dropped as a duplicate admission.
    pub fn record_duplicate(&mut self) {
        self.total_seen += 1;
    }

    /// A terminal job, plus the relocation error if moving its files failed.
    pub fn record_job(&mut self, job: &TranscodeJob, relocate_error: Option<&RelocateError>) {
        self.total_seen += 1;
        self.processed += 1;

        match (job.state(), relocate_error) {
            (JobState::Succeeded, None) => self.succeeded += 1,
            (JobState::Succeeded, Some(e)) => self.push_failure(&job.source.path, FailureKind::Relocate, e.to_string()),
            (_, _) => {
                let (kind, message) = match job.failure() {
                    Some(failure) => (failure.kind, failure.message.clone()),
                    None => (FailureKind::EncoderError, format!("job ended in state {}", job.state().as_str())),
                };
                self.push_failure(&job.source.path, kind, message);
            }
        }
    }

    /// A source whose output already existed; `result` is the archive outcome.
    pub fn record_recovered(&mut self, source: &Path, result: Result<(), &RelocateError>) {
        self.total_seen += 1;
        match result {
            Ok(()) => self.recovered += 1,
            Err(e) => self.push_failure(source, FailureKind::Relocate, e.to_string()),
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    fn push_failure(&mut self, path: &Path, kind: FailureKind, message: String) {
        tracing::error!("Failed {} [{}]: {}", path.display(), kind, message);
        self.failures.push(FailureRecord {
            path: path.to_path_buf(),
            kind,
            message,
        });
    }

    pub fn finish(mut self, elapsed: Duration) -> RunReport {
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));
        RunReport {
            total_seen: self.total_seen,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failures.len(),
            recovered: self.recovered,
            skipped: self.skipped,
            failures: self.failures,
            cancelled: self.cancelled,
            elapsed,
        }
    }
}
