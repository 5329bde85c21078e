//! Error types for launch plan synthesis.

use std::path::PathBuf;

use thiserror::Error;

use uplink_capacity::CapacityError;
use uplink_ipc::PlanError;
use uplink_model::ModelError;
use uplink_schedule::ScheduleError;

/// Reasons a session cannot be turned into a launch plan. Nothing is spawned or written.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Session has no services")]
    NoServices,

    #[error("Service {service} has no input")]
    NoInput { service: u16 },

    #[error("Service {service} has no audio track selected")]
    NoAudio { service: u16 },

    /// A live stream cannot be combined with other inputs.
    #[error("Service {service} mixes a live stream with other inputs")]
    MixedInputs { service: u16 },

    /// Combined inputs must select the same tracks and subtitles.
    #[error("Inputs of service {service} select different tracks")]
    InconsistentTracks { service: u16 },

    /// A concatenation list can only be combined with other inputs once its items are known.
    #[error("Concatenation list {list} of service {service} has no known items")]
    UnknownConcatItems { service: u16, list: PathBuf },

    #[error("Loopback port for service {service} is out of range")]
    PortOutOfRange { service: u16 },

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("Schedule of service {service} is invalid: {source}")]
    Schedule {
        service: u16,
        #[source]
        source: ScheduleError,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Launch plan is malformed: {0}")]
    Plan(#[from] PlanError),
}

/// Errors reading a concatenation list.
#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("Line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors writing an exported plan.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Launch plan is malformed: {0}")]
    Plan(#[from] PlanError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
