use std::{io, path::PathBuf};

use fedrun_model::SlotKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("{0} already running")]
    AlreadyRunning(SlotKind),
    #[error("{0} not running")]
    NotRunning(SlotKind),
    #[error("working directory not found: {}", .0.display())]
    ConfigurationMissing(PathBuf),
    #[error("failed to capture {0} process output")]
    CaptureUnavailable(SlotKind),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("slot task aborted: {0}")]
    Aborted(String),
}

impl SlotError {
    /// Stable machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            SlotError::AlreadyRunning(_) => "already_running",
            SlotError::NotRunning(_) => "not_running",
            SlotError::ConfigurationMissing(_) => "configuration_missing",
            SlotError::CaptureUnavailable(_) => "capture_unavailable",
            SlotError::Spawn { .. } => "spawn_failed",
            SlotError::Aborted(_) => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("patch task aborted: {0}")]
    Aborted(String),
}
