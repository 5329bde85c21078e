//! Typed front end <-> supervisor messages for the uplink broadcaster.
//!
//! This crate defines the launch plan handed to the pipeline supervisor,
//! the commands it accepts, the events and log lines it emits, and the
//! session state machine those events describe.

mod commands;
mod events;
mod state;
mod types;

pub use commands::SupervisorCommand;
pub use events::SupervisorEvent;
pub use state::{SessionState, ShutdownPhase, StartupPhase, StopReason};
pub use types::{
    AuxFile, DataLink, FailureKind, FailureReport, Invocation, LaunchPlan, LinkProtocol,
    LinkTransport, LogLine, OutputStream, PlanError, ProcessId, ProcessRole, ProcessSpec,
    ProcessStats, ProcessSummary, SessionStats, SessionWarning,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front end → supervisor).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (supervisor → front end).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for aggregated process output.
///
/// Lines that do not fit are dropped and counted, never queued.
pub const LOG_CHANNEL_CAPACITY: usize = 2048;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<SupervisorCommand>, Receiver<SupervisorCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SupervisorEvent>, Receiver<SupervisorEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}

/// Creates a bounded log channel.
pub fn log_channel() -> (Sender<LogLine>, Receiver<LogLine>) {
    crossbeam_channel::bounded(LOG_CHANNEL_CAPACITY)
}
