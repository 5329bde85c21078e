//! Events sent from the supervisor to the front end.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{FailureReport, ProcessId, ProcessRole, SessionStats, SessionWarning};

/// Events that the supervisor can send to the front end.
///
/// Process output is not carried here; it travels on the log channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// A pipeline process was spawned.
    ProcessLaunched {
        /// Position of the process in the launch plan.
        process: ProcessId,

        /// What the process does.
        role: ProcessRole,

        /// Operating system process id.
        pid: u32,
    },

    /// Periodic session statistics while running.
    Stats(SessionStats),

    /// Health warning detected while running.
    Warning(SessionWarning),

    /// The session failed; all processes have been torn down.
    Failure(Box<FailureReport>),

    /// Graceful stop did not finish in time and stragglers were killed.
    ShutdownTimeout {
        /// Processes that had to be killed.
        forced: Vec<ProcessRole>,

        /// How long the supervisor waited before killing them.
        waited_ms: u64,
    },

    /// Rendered command lines for a plan.
    Preview {
        /// Shell-style rendering of every invocation and link.
        script: String,
    },

    /// Error that did not change the session state.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// Supervisor is ready for commands.
    Ready,

    /// Supervisor has shut down.
    Shutdown,
}
