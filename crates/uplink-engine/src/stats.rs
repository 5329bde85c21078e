//! Session statistics and health warnings.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use uplink_ipc::{ProcessId, ProcessStats, SessionStats, SessionWarning};

/// Line counters shared by every output reader of a session.
#[derive(Debug, Default)]
pub struct SessionCounters {
    lines: AtomicU64,
    dropped: AtomicU64,
}

impl SessionCounters {
    /// Record a line read from any process.
    pub fn record_line(&self) {
        self.lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line the log consumer had no room for.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Builds periodic statistics and warnings for a running session.
pub struct StatsCollector {
    start_time: RwLock<Option<Instant>>,
    last_report_time: RwLock<Option<Instant>>,
    reported_drops: AtomicU64,
    quiet: RwLock<HashSet<ProcessId>>,
    interval: Duration,
    quiet_after: Duration,
}

impl StatsCollector {
    /// Create a collector reporting every `interval`.
    pub fn new(interval: Duration, quiet_after: Duration) -> Self {
        Self {
            start_time: RwLock::new(None),
            last_report_time: RwLock::new(None),
            reported_drops: AtomicU64::new(0),
            quiet: RwLock::new(HashSet::new()),
            interval,
            quiet_after,
        }
    }

    /// Start collecting for a session that just entered Running.
    pub fn start(&self, counters: &SessionCounters) {
        let now = Instant::now();
        *self.start_time.write() = Some(now);
        *self.last_report_time.write() = Some(now);
        self.reported_drops.store(counters.dropped(), Ordering::Relaxed);
        self.quiet.write().clear();
    }

    /// Stop collecting.
    pub fn stop(&self) {
        *self.start_time.write() = None;
        *self.last_report_time.write() = None;
    }

    /// Returns true once a report interval has passed since the last report.
    pub fn is_due(&self) -> bool {
        self.last_report_time
            .read()
            .map(|last| last.elapsed() >= self.interval)
            .unwrap_or(false)
    }

    /// Current statistics.
    pub fn snapshot(
        &self,
        mux_rate_bps: u64,
        counters: &SessionCounters,
        processes: Vec<ProcessStats>,
    ) -> SessionStats {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0);

        SessionStats {
            uptime_seconds,
            mux_rate_bps,
            log_lines: counters.lines(),
            dropped_log_lines: counters.dropped(),
            processes,
        }
    }

    /// Warnings not yet reported.
    ///
    /// A quiet process is reported once per silence; it is reported again
    /// only after it has written something in between.
    pub fn check_warnings(&self, stats: &SessionStats) -> Vec<SessionWarning> {
        let mut warnings = Vec::new();
        let mut quiet = self.quiet.write();

        for process in &stats.processes {
            if process.silent_seconds >= self.quiet_after.as_secs() {
                if quiet.insert(process.process) {
                    warnings.push(SessionWarning::QuietProcess {
                        role: process.role.clone(),
                        silent_seconds: process.silent_seconds,
                    });
                }
            } else {
                quiet.remove(&process.process);
            }
        }

        let reported = self.reported_drops.load(Ordering::Relaxed);
        if stats.dropped_log_lines > reported {
            warnings.push(SessionWarning::LogBackpressure {
                dropped: stats.dropped_log_lines - reported,
            });
        }

        warnings
    }

    /// Mark the current statistics as reported.
    pub fn mark_reported(&self, stats: &SessionStats) {
        *self.last_report_time.write() = Some(Instant::now());
        self.reported_drops
            .store(stats.dropped_log_lines, Ordering::Relaxed);
        debug!(
            lines = stats.log_lines,
            dropped = stats.dropped_log_lines,
            "Session statistics reported"
        );
    }
}
