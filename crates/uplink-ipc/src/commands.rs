//! Commands sent from the front end to the supervisor.

use serde::{Deserialize, Serialize};

use crate::types::LaunchPlan;

/// Commands that a front end can send to the pipeline supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorCommand {
    /// Launch and supervise the given plan.
    Start { plan: Box<LaunchPlan> },

    /// Stop the running session. A no-op while idle or stopping.
    Stop,

    /// Render the plan's command lines without launching anything.
    Preview { plan: Box<LaunchPlan> },

    /// Request current session state.
    GetState,

    /// Stop any session and shut the supervisor down.
    Shutdown,
}
