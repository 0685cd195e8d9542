//! In-flight claim coordinator.
//!
//! A single task owns the set of source paths that currently have an active
//! job. Workers claim a path before running it and release it once the job is
//! terminal; both go through message passing, so no lock is shared between
//! workers.

use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Claim coordinator has stopped")]
    CoordinatorGone,
}

enum ClaimCommand {
    Claim {
        path: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    Release {
        path: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<PathBuf>>,
    },
}

/// Handle to the claim coordinator. Cheap to clone; the coordinator stops
/// once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ClaimRegistry {
    tx: mpsc::Sender<ClaimCommand>,
}

impl ClaimRegistry {
    /// Spawn the coordinator task on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(run_coordinator(rx));
        (Self { tx }, handle)
    }

    /// Claim `path`. Returns `false` if another job already holds it.
    pub async fn claim(&self, path: PathBuf) -> Result<bool, ClaimError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClaimCommand::Claim { path, reply }).await?;
        rx.await.map_err(|_| ClaimError::CoordinatorGone)
    }

    /// Release `path`. Returns `false` if it was not claimed.
    pub async fn release(&self, path: PathBuf) -> Result<bool, ClaimError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClaimCommand::Release { path, reply }).await?;
        rx.await.map_err(|_| ClaimError::CoordinatorGone)
    }

    /// Currently claimed paths, sorted.
    pub async fn in_flight(&self) -> Result<Vec<PathBuf>, ClaimError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClaimCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| ClaimError::CoordinatorGone)
    }

    async fn send(&self, command: ClaimCommand) -> Result<(), ClaimError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ClaimError::CoordinatorGone)
    }
}

async fn run_coordinator(mut rx: mpsc::Receiver<ClaimCommand>) {
    let mut in_flight: HashSet<PathBuf> = HashSet::new();

    while let Some(command) = rx.recv().await {
        match command {
            ClaimCommand::Claim { path, reply } => {
                let granted = in_flight.insert(path.clone());
                if !granted {
                    tracing::debug!("Claim refused, already in flight: {}", path.display());
                }
                // The requester may have gone away; its claim stays until released
                let _ = reply.send(granted);
            }
            ClaimCommand::Release { path, reply } => {
                let released = in_flight.remove(&path);
                if !released {
                    tracing::warn!("Release of unclaimed path: {}", path.display());
                }
                let _ = reply.send(released);
            }
            ClaimCommand::Snapshot { reply } => {
                let mut paths: Vec<PathBuf> = in_flight.iter().cloned().collect();
                paths.sort();
                let _ = reply.send(paths);
            }
        }
    }

    tracing::debug!("Claim coordinator stopped with {} claims held", in_flight.len());
}
