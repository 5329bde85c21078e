//! Session state machine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FailureReport, ProcessSummary};

/// The current state of a broadcast session.
///
/// Sessions move `Idle → Starting → Running → (Stopping | Failed) → Idle`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// No processes are running.
    #[default]
    Idle,

    /// Processes are being launched.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Every process survived startup and is being supervised.
    Running {
        /// When the session entered the running state.
        started_at: DateTime<Utc>,

        /// Multiplex rate the session transmits at.
        mux_rate_bps: u64,

        /// Supervised processes, in launch order.
        processes: Vec<ProcessSummary>,
    },

    /// Processes are being stopped.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,

        /// Current shutdown phase.
        phase: ShutdownPhase,
    },

    /// A process failed and the session was torn down.
    Failed {
        /// What went wrong first.
        report: Box<FailureReport>,
    },
}

impl SessionState {
    /// Returns true if the session is idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the session is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns true if the session is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if the session failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Running { .. } => "Running",
            Self::Stopping { .. } => "Stopping",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Startup phases for a session, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Writing guide data and playlists to disk.
    WriteFiles,

    /// Launching encoders and the time-signal injector.
    LaunchProducers,

    /// Launching the multiplexer.
    LaunchMultiplexer,

    /// Waiting for every process to survive the grace window.
    AwaitActivity,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::WriteFiles => Some(Self::LaunchProducers),
            Self::LaunchProducers => Some(Self::LaunchMultiplexer),
            Self::LaunchMultiplexer => Some(Self::AwaitActivity),
            Self::AwaitActivity => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::WriteFiles => None,
            Self::LaunchProducers => Some(Self::WriteFiles),
            Self::LaunchMultiplexer => Some(Self::LaunchProducers),
            Self::AwaitActivity => Some(Self::LaunchMultiplexer),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::WriteFiles => "Writing auxiliary files",
            Self::LaunchProducers => "Launching encoders",
            Self::LaunchMultiplexer => "Launching multiplexer",
            Self::AwaitActivity => "Waiting for pipeline",
        }
    }
}

/// Shutdown phases for a session, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Terminating encoders and the time-signal injector.
    StopProducers,

    /// Letting the multiplexer drain, then terminating it.
    StopMultiplexer,

    /// Reaping exited processes and their output readers.
    Reap,

    /// Removing auxiliary files.
    RemoveFiles,
}

impl ShutdownPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopProducers => Some(Self::StopMultiplexer),
            Self::StopMultiplexer => Some(Self::Reap),
            Self::Reap => Some(Self::RemoveFiles),
            Self::RemoveFiles => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopProducers => "Stopping encoders",
            Self::StopMultiplexer => "Stopping multiplexer",
            Self::Reap => "Reaping processes",
            Self::RemoveFiles => "Removing files",
        }
    }
}

/// Reason for stopping a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// Operator requested stop.
    UserRequested,

    /// A supervised process failed.
    ProcessFailed { process: String },

    /// The supervisor is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Broadcast stopped by operator".to_string(),
            Self::ProcessFailed { process } => format!("Process failed: {process}"),
            Self::Shutdown => "Supervisor shutting down".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phases_walk_both_ways() {
        let mut phase = StartupPhase::WriteFiles;
        let mut forward = vec![phase];
        while let Some(next) = phase.next() {
            forward.push(next);
            phase = next;
        }
        assert_eq!(forward.len(), 4);
        assert_eq!(phase, StartupPhase::AwaitActivity);

        let mut backward = vec![phase];
        while let Some(prev) = phase.previous() {
            backward.push(prev);
            phase = prev;
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::default().name(), "Idle");
        assert!(SessionState::Starting {
            phase: StartupPhase::WriteFiles
        }
        .is_starting());
        assert!(SessionState::Stopping {
            reason: StopReason::UserRequested,
            phase: ShutdownPhase::StopProducers,
        }
        .is_stopping());
    }
}
