//! Pipeline supervisor for the uplink broadcaster.
//!
//! Launches the encoders, time-signal injector and multiplexer of a launch
//! plan, wires their pipes, streams their output to the log channel and
//! tears everything down on stop or on the first failure.

mod config;
mod error;
mod pipeline;
pub mod probe;
mod process;
mod stats;
mod supervisor;

pub use config::SupervisorConfig;
pub use error::{EngineError, ProbeError};
pub use stats::{SessionCounters, StatsCollector};
pub use supervisor::Supervisor;

use crossbeam_channel::{Receiver, Sender};
use uplink_ipc::{LogLine, SupervisorCommand, SupervisorEvent};

/// Create a supervisor wired to the given channels.
pub fn create_supervisor(
    command_rx: Receiver<SupervisorCommand>,
    event_tx: Sender<SupervisorEvent>,
    log_tx: Sender<LogLine>,
    config: SupervisorConfig,
) -> Supervisor {
    Supervisor::new(command_rx, event_tx, log_tx, config)
}
