//! Supervisor and media probe errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uplink_ipc::PlanError;

/// Errors that keep a session from starting. They never change the session state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid launch plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors from inspecting a media file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Probe of {path} failed: {message}")]
    Failed { path: PathBuf, message: String },

    #[error("Unreadable probe output: {0}")]
    Parse(#[from] serde_json::Error),
}
