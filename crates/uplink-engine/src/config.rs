//! Supervisor timing settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and buffering settings for the pipeline supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// How long every process must stay alive before the session is running.
    pub startup_grace_ms: u64,

    /// Bound on the graceful part of a stop before stragglers are killed.
    pub stop_timeout_ms: u64,

    /// How long the multiplexer gets to flush once its producers are gone.
    pub drain_timeout_ms: u64,

    /// Liveness polling interval.
    pub poll_interval_ms: u64,

    /// Interval between statistics events while running.
    pub stats_interval_ms: u64,

    /// Output lines kept per process for failure reports.
    pub tail_lines: usize,

    /// Silence after which a process is reported as quiet.
    pub quiet_warning_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: 2_000,
            stop_timeout_ms: 10_000,
            drain_timeout_ms: 2_000,
            poll_interval_ms: 100,
            stats_interval_ms: 5_000,
            tail_lines: 20,
            quiet_warning_secs: 30,
        }
    }
}

impl SupervisorConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
