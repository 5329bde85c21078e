//! The set of processes and files that make up one running session.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::process::{ChildStdout, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use uplink_ipc::{
    AuxFile, FailureKind, FailureReport, LaunchPlan, ProcessId, ProcessRole, ProcessSpec,
    ProcessStats, ProcessSummary,
};

use crate::error::EngineError;
use crate::process::{LogSink, RunningProcess};

/// How long a failed process's readers get to deliver its last lines.
const FAILURE_OUTPUT_WAIT: Duration = Duration::from_millis(500);

/// Owns every process handle, pipe end and auxiliary file of a session.
///
/// Dropping a pipeline kills whatever is still running and removes its files.
pub(crate) struct Pipeline {
    processes: Vec<RunningProcess>,
    pending_stdout: HashMap<ProcessId, ChildStdout>,
    files: Vec<std::path::PathBuf>,
    mux_rate_bps: u64,
    poll_interval: Duration,
}

impl Pipeline {
    pub(crate) fn new(mux_rate_bps: u64, poll_interval: Duration) -> Self {
        Self {
            processes: Vec::new(),
            pending_stdout: HashMap::new(),
            files: Vec::new(),
            mux_rate_bps,
            poll_interval,
        }
    }

    pub(crate) fn mux_rate_bps(&self) -> u64 {
        self.mux_rate_bps
    }

    /// Write every auxiliary file, creating parent directories.
    #[instrument(name = "write_files", skip_all, fields(count = files.len()))]
    pub(crate) fn write_files(&mut self, files: &[AuxFile]) -> Result<(), EngineError> {
        for file in files {
            let write = |path: &std::path::Path| -> io::Result<()> {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, &file.contents)
            };
            write(&file.path).map_err(|source| EngineError::WriteFile {
                path: file.path.clone(),
                source,
            })?;
            debug!(path = %file.path.display(), "Wrote auxiliary file");
            self.files.push(file.path.clone());
        }
        Ok(())
    }

    /// Spawn one process of the plan, wiring its pipe links.
    pub(crate) fn launch(
        &mut self,
        plan: &LaunchPlan,
        id: ProcessId,
        spec: &ProcessSpec,
        sink: &LogSink,
    ) -> Result<ProcessSummary, FailureReport> {
        let stdin = match plan.pipe_source(id) {
            Some(source) => match self.pending_stdout.remove(&source) {
                Some(stdout) => Stdio::from(stdout),
                None => {
                    warn!(process = %id, source = %source, "Pipe source not running, stdin left empty");
                    Stdio::null()
                }
            },
            None => Stdio::null(),
        };

        let (process, handed_off) =
            RunningProcess::spawn(id, spec, stdin, plan.pipes_stdout(id), sink).map_err(|e| {
                FailureReport {
                    process: id,
                    role: spec.role.clone(),
                    kind: FailureKind::LaunchFailure {
                        message: format!("{}: {e}", spec.invocation.program.display()),
                    },
                    detected_at: Utc::now(),
                    last_lines: Vec::new(),
                }
            })?;

        if let Some(stdout) = handed_off {
            self.pending_stdout.insert(id, stdout);
        }
        let summary = process.summary();
        self.processes.push(process);
        Ok(summary)
    }

    /// Report for the first process, in launch order, that has exited.
    pub(crate) fn first_exit(&mut self) -> Option<FailureReport> {
        let mut exited = None;
        for process in &mut self.processes {
            if let Some(status) = process.poll() {
                exited = Some((process, status));
                break;
            }
        }
        let (process, status) = exited?;
        process.wait_for_output(FAILURE_OUTPUT_WAIT);

        Some(FailureReport {
            process: process.id,
            role: process.role.clone(),
            kind: FailureKind::ExitedUnexpectedly {
                exit_code: status.code(),
                status: status.to_string(),
            },
            detected_at: Utc::now(),
            last_lines: process.tail(),
        })
    }

    /// Ask every matching process to exit.
    pub(crate) fn terminate(&mut self, select: impl Fn(&ProcessRole) -> bool) {
        // Unclaimed pipe ends would keep consumers waiting for input.
        self.pending_stdout.clear();
        for process in self.processes.iter_mut().filter(|p| select(&p.role)) {
            process.terminate();
        }
    }

    /// Wait until every matching process has exited or the deadline passes.
    ///
    /// Returns true if they all exited.
    pub(crate) fn wait_until(
        &mut self,
        deadline: Instant,
        select: impl Fn(&ProcessRole) -> bool,
    ) -> bool {
        loop {
            let mut running = 0;
            for process in &mut self.processes {
                if select(&process.role) && !process.has_exited() {
                    running += 1;
                }
            }
            if running == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Kill every process still running. Returns the roles that had to be killed.
    pub(crate) fn force_kill(&mut self) -> Vec<ProcessRole> {
        let mut forced = Vec::new();
        for process in &mut self.processes {
            if !process.has_exited() {
                warn!(process = %process.id, pid = process.pid, "Killing process");
                process.kill();
                forced.push(process.role.clone());
            }
        }
        forced
    }

    /// Wait for output readers to finish, bounded by `timeout` overall.
    pub(crate) fn reap(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for process in &self.processes {
            let left = deadline.saturating_duration_since(Instant::now());
            if !process.wait_for_output(left) {
                debug!(process = %process.id, "Output still open after exit");
            }
        }
    }

    /// Remove every auxiliary file written for this session.
    pub(crate) fn remove_files(&mut self) {
        for path in self.files.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed auxiliary file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove file: {}", e),
            }
        }
    }

    pub(crate) fn summaries(&self) -> Vec<ProcessSummary> {
        self.processes.iter().map(RunningProcess::summary).collect()
    }

    pub(crate) fn process_stats(&self) -> Vec<ProcessStats> {
        self.processes.iter().map(RunningProcess::stats).collect()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.pending_stdout.clear();
        self.force_kill();
        self.remove_files();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::stats::SessionCounters;

    fn sink() -> LogSink {
        let (log_tx, _log_rx) = crossbeam_channel::bounded(16);
        LogSink {
            log_tx,
            counters: Arc::new(SessionCounters::default()),
            tail_len: 4,
        }
    }

    #[test]
    fn test_files_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("eit.xml");
        let mut pipeline = Pipeline::new(1, Duration::from_millis(10));

        pipeline
            .write_files(&[AuxFile {
                path: path.clone(),
                contents: "<tsduck/>".to_string(),
            }])
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<tsduck/>");

        pipeline.remove_files();
        assert!(!path.exists());
    }

    #[test]
    fn test_write_failure_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let path = blocker.join("eit.xml");

        let mut pipeline = Pipeline::new(1, Duration::from_millis(10));
        let err = pipeline
            .write_files(&[AuxFile {
                path: path.clone(),
                contents: String::new(),
            }])
            .unwrap_err();
        assert!(matches!(err, EngineError::WriteFile { path: p, .. } if p == path));
    }

    #[test]
    fn test_unknown_program_is_a_launch_failure() {
        let spec = ProcessSpec {
            role: ProcessRole::TimeSignal,
            invocation: uplink_ipc::Invocation::new("/nonexistent/uplink-test-binary"),
        };
        let plan = LaunchPlan {
            processes: vec![spec.clone()],
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(1, Duration::from_millis(10));
        let report = pipeline
            .launch(&plan, ProcessId(0), &spec, &sink())
            .unwrap_err();
        assert_eq!(report.role, ProcessRole::TimeSignal);
        assert!(matches!(report.kind, FailureKind::LaunchFailure { .. }));
        assert!(pipeline.summaries().is_empty());
    }
}
