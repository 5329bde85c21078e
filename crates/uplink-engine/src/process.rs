//! Spawning, observing and terminating one supervised process.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use uplink_ipc::{
    LogLine, OutputStream, ProcessId, ProcessRole, ProcessSpec, ProcessStats, ProcessSummary,
};

use crate::stats::SessionCounters;

/// Recent output of a process, shared with its reader threads.
pub(crate) struct ProcessOutput {
    tail: Mutex<VecDeque<String>>,
    tail_len: usize,
    lines: AtomicU64,
    last_output: Mutex<Instant>,
}

impl ProcessOutput {
    fn new(tail_len: usize) -> Self {
        Self {
            tail: Mutex::new(VecDeque::with_capacity(tail_len)),
            tail_len,
            lines: AtomicU64::new(0),
            last_output: Mutex::new(Instant::now()),
        }
    }

    fn record(&self, text: &str) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        *self.last_output.lock() = Instant::now();
        if self.tail_len == 0 {
            return;
        }
        let mut tail = self.tail.lock();
        if tail.len() == self.tail_len {
            tail.pop_front();
        }
        tail.push_back(text.to_string());
    }

    pub(crate) fn tail(&self) -> Vec<String> {
        self.tail.lock().iter().cloned().collect()
    }

    pub(crate) fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub(crate) fn silence(&self) -> Duration {
        self.last_output.lock().elapsed()
    }
}

/// Where reader threads deliver lines.
#[derive(Clone)]
pub(crate) struct LogSink {
    pub log_tx: Sender<LogLine>,
    pub counters: Arc<SessionCounters>,
    pub tail_len: usize,
}

/// A spawned pipeline process.
pub(crate) struct RunningProcess {
    pub id: ProcessId,
    pub role: ProcessRole,
    pub pid: u32,
    child: Child,
    output: Arc<ProcessOutput>,
    readers_done: Receiver<()>,
    status: Option<ExitStatus>,
}

impl RunningProcess {
    /// Spawn a process with both output streams captured.
    ///
    /// With `hand_off_stdout` the standard output is returned to the caller
    /// instead of being read, so it can become another process's input.
    pub(crate) fn spawn(
        id: ProcessId,
        spec: &ProcessSpec,
        stdin: Stdio,
        hand_off_stdout: bool,
        sink: &LogSink,
    ) -> io::Result<(Self, Option<ChildStdout>)> {
        let invocation = &spec.invocation;
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id();
        let output = Arc::new(ProcessOutput::new(sink.tail_len));
        let (done_tx, readers_done) = crossbeam_channel::bounded::<()>(0);

        let mut handed_off = None;
        if let Some(stdout) = child.stdout.take() {
            if hand_off_stdout {
                handed_off = Some(stdout);
            } else {
                spawn_reader(
                    stdout,
                    OutputStream::Stdout,
                    id,
                    &spec.role,
                    &output,
                    sink,
                    done_tx.clone(),
                );
            }
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(
                stderr,
                OutputStream::Stderr,
                id,
                &spec.role,
                &output,
                sink,
                done_tx,
            );
        }

        debug!(process = %id, pid, role = %spec.role.tag(), "Process spawned");

        Ok((
            Self {
                id,
                role: spec.role.clone(),
                pid,
                child,
                output,
                readers_done,
                status: None,
            },
            handed_off,
        ))
    }

    /// Exit status if the process has exited. Never blocks.
    pub(crate) fn poll(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.status = status,
                Err(e) => warn!(process = %self.id, "Failed to poll process: {}", e),
            }
        }
        self.status
    }

    pub(crate) fn has_exited(&mut self) -> bool {
        self.poll().is_some()
    }

    /// Ask the process to exit.
    pub(crate) fn terminate(&mut self) {
        if self.has_exited() {
            return;
        }
        debug!(process = %self.id, pid = self.pid, "Sending SIGTERM");
        if !send_terminate(&mut self.child) {
            debug!(process = %self.id, "SIGTERM not delivered");
        }
    }

    /// Kill the process and reap it.
    pub(crate) fn kill(&mut self) {
        if self.has_exited() {
            return;
        }
        if let Err(e) = self.child.kill() {
            warn!(process = %self.id, "Failed to kill process: {}", e);
        }
        match self.child.wait() {
            Ok(status) => self.status = Some(status),
            Err(e) => warn!(process = %self.id, "Failed to reap process: {}", e),
        }
    }

    /// Wait until both output readers have hit end of file.
    pub(crate) fn wait_for_output(&self, timeout: Duration) -> bool {
        matches!(
            self.readers_done.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    pub(crate) fn tail(&self) -> Vec<String> {
        self.output.tail()
    }

    pub(crate) fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            process: self.id,
            role: self.role.clone(),
            pid: self.pid,
        }
    }

    pub(crate) fn stats(&self) -> ProcessStats {
        ProcessStats {
            process: self.id,
            role: self.role.clone(),
            lines: self.output.lines(),
            silent_seconds: self.output.silence().as_secs(),
        }
    }
}

/// Ask the process to exit. Returns true if the signal was delivered.
#[cfg(unix)]
fn send_terminate(child: &mut Child) -> bool {
    let pid = child.id();
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    match Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            // Usually the process exited between the check and the signal.
            debug!(pid, %status, "kill -TERM failed");
            false
        }
        Err(e) => {
            warn!(pid, "Failed to signal process, killing instead: {}", e);
            child.kill().is_ok()
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> bool {
    child.kill().is_ok()
}

/// Read lines until end of file, tagging each and forwarding it without blocking.
fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    kind: OutputStream,
    id: ProcessId,
    role: &ProcessRole,
    output: &Arc<ProcessOutput>,
    sink: &LogSink,
    done: Sender<()>,
) {
    let role = role.clone();
    let output = Arc::clone(output);
    let sink = sink.clone();

    let spawned = thread::Builder::new()
        .name(format!("{}-{:?}", role.tag(), kind).to_lowercase())
        .spawn(move || {
            let _done = done;
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(process = %id, "Output reader stopped: {}", e);
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\n', '\r']);
                output.record(text);
                sink.counters.record_line();

                let line = LogLine {
                    timestamp: Utc::now(),
                    process: id,
                    role: role.clone(),
                    stream: kind,
                    text: text.to_string(),
                };
                match sink.log_tx.try_send(line) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => sink.counters.record_drop(),
                    Err(TrySendError::Disconnected(_)) => {}
                }
            }
        });

    if let Err(e) = spawned {
        warn!(process = %id, "Failed to start output reader: {}", e);
    }
}
