//! Common types used across supervisor messages.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a process within a [`LaunchPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub usize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a supervised process does in the broadcast chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessRole {
    /// Encodes one service into a single-program transport stream.
    Encoder {
        /// Program number of the service.
        service_id: u16,

        /// Service name, for log tagging.
        service_name: String,
    },

    /// Produces time and date packets for the multiplexer.
    TimeSignal,

    /// Multiplexes every service and drives the hardware output.
    Multiplexer,
}

impl ProcessRole {
    /// Returns true for processes that feed the multiplexer.
    pub fn is_producer(&self) -> bool {
        !matches!(self, Self::Multiplexer)
    }

    /// Short tag used to prefix log lines.
    pub fn tag(&self) -> String {
        match self {
            Self::Encoder { service_id, .. } => format!("encoder:{service_id}"),
            Self::TimeSignal => "time-signal".to_string(),
            Self::Multiplexer => "multiplexer".to_string(),
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoder {
                service_id,
                service_name,
            } => write!(f, "encoder for service {service_id} ({service_name})"),
            Self::TimeSignal => f.write_str("time-signal injector"),
            Self::Multiplexer => f.write_str("multiplexer"),
        }
    }
}

/// A program and its argument vector, exactly as it will be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Executable name or path.
    pub program: PathBuf,

    /// Arguments, not including the program.
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Full argument vector including the program.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.to_string_lossy().into_owned());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// One process in a launch plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// What the process does.
    pub role: ProcessRole,

    /// How to run it.
    pub invocation: Invocation,
}

/// Socket protocol of a loopback link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkProtocol {
    /// Datagrams, one transport stream burst per packet.
    Udp,

    /// Stream connection, consumer listens.
    Tcp,
}

/// How data moves along a [`DataLink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTransport {
    /// Producer stdout is connected to consumer stdin.
    Pipe,

    /// Producer and consumer meet at a loopback endpoint named in both command lines.
    Loopback {
        /// Address the consumer receives on.
        endpoint: SocketAddr,

        /// Socket protocol.
        protocol: LinkProtocol,
    },
}

/// A directed data-flow edge between two processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLink {
    /// Producing process.
    pub from: ProcessId,

    /// Consuming process.
    pub to: ProcessId,

    /// Transport used.
    pub transport: LinkTransport,
}

/// A file that must exist while the plan runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxFile {
    /// Where the file is written.
    pub path: PathBuf,

    /// File contents.
    pub contents: String,
}

/// Structural problems in a launch plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A link refers to a process that is not in the plan.
    #[error("Link refers to unknown process {0}")]
    UnknownProcess(ProcessId),

    /// A link connects a process to itself.
    #[error("Process {0} is linked to itself")]
    SelfLink(ProcessId),

    /// A process has more than one pipe on the same side.
    #[error("Process {0} has more than one pipe on the same side")]
    DuplicatePipe(ProcessId),

    /// The links form a cycle.
    #[error("Links form a cycle")]
    Cycle,

    /// The plan has no processes.
    #[error("Plan has no processes")]
    Empty,
}

/// The complete invocation graph for one broadcast session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPlan {
    /// Processes, indexed by [`ProcessId`].
    pub processes: Vec<ProcessSpec>,

    /// Data-flow edges between processes.
    pub links: Vec<DataLink>,

    /// Files written before launch and removed after teardown.
    pub files: Vec<AuxFile>,

    /// Multiplex rate of the output stream.
    pub mux_rate_bps: u64,
}

impl LaunchPlan {
    /// Look up a process by id.
    pub fn process(&self, id: ProcessId) -> Option<&ProcessSpec> {
        self.processes.get(id.0)
    }

    /// The process whose stdout is piped into `consumer`, if any.
    pub fn pipe_source(&self, consumer: ProcessId) -> Option<ProcessId> {
        self.links
            .iter()
            .find(|link| link.to == consumer && link.transport == LinkTransport::Pipe)
            .map(|link| link.from)
    }

    /// Returns true if the stdout of `producer` feeds another process.
    pub fn pipes_stdout(&self, producer: ProcessId) -> bool {
        self.links
            .iter()
            .any(|link| link.from == producer && link.transport == LinkTransport::Pipe)
    }

    /// Check the link structure.
    pub fn validate(&self) -> Result<(), PlanError> {
        self.launch_order().map(|_| ())
    }

    /// Processes ordered so every producer comes before its consumers.
    ///
    /// Ties keep plan order.
    pub fn launch_order(&self) -> Result<Vec<ProcessId>, PlanError> {
        let count = self.processes.len();
        if count == 0 {
            return Err(PlanError::Empty);
        }

        let mut incoming = vec![0usize; count];
        let mut pipe_out = vec![false; count];
        let mut pipe_in = vec![false; count];

        for link in &self.links {
            for end in [link.from, link.to] {
                if end.0 >= count {
                    return Err(PlanError::UnknownProcess(end));
                }
            }
            if link.from == link.to {
                return Err(PlanError::SelfLink(link.from));
            }
            if link.transport == LinkTransport::Pipe {
                if std::mem::replace(&mut pipe_out[link.from.0], true) {
                    return Err(PlanError::DuplicatePipe(link.from));
                }
                if std::mem::replace(&mut pipe_in[link.to.0], true) {
                    return Err(PlanError::DuplicatePipe(link.to));
                }
            }
            incoming[link.to.0] += 1;
        }

        let mut ready: VecDeque<usize> = (0..count).filter(|&i| incoming[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_front() {
            order.push(ProcessId(index));
            let mut released = Vec::new();
            for link in self.links.iter().filter(|link| link.from.0 == index) {
                incoming[link.to.0] -= 1;
                if incoming[link.to.0] == 0 {
                    released.push(link.to.0);
                }
            }
            released.sort_unstable();
            ready.extend(released);
        }

        if order.len() == count {
            Ok(order)
        } else {
            Err(PlanError::Cycle)
        }
    }
}

/// Which output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// When the line was read.
    pub timestamp: DateTime<Utc>,

    /// Which process wrote it.
    pub process: ProcessId,

    /// Role of that process.
    pub role: ProcessRole,

    /// Which stream it was read from.
    pub stream: OutputStream,

    /// Line text without the terminator.
    pub text: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.role.tag(),
            self.text
        )
    }
}

/// Summary of a running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Position in the launch plan.
    pub process: ProcessId,

    /// What the process does.
    pub role: ProcessRole,

    /// Operating system process id.
    pub pid: u32,
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The process could not be spawned.
    LaunchFailure {
        /// Spawn error text.
        message: String,
    },

    /// The process exited while it should have been running.
    ExitedUnexpectedly {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,

        /// Exit status as reported by the operating system.
        status: String,
    },
}

/// Consolidated report for a failed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// The first process that failed.
    pub process: ProcessId,

    /// Role of that process.
    pub role: ProcessRole,

    /// What happened.
    pub kind: FailureKind,

    /// When the failure was detected.
    pub detected_at: DateTime<Utc>,

    /// Last output lines of the failing process, oldest first.
    pub last_lines: Vec<String>,
}

impl FailureReport {
    /// Returns a display message for this report.
    pub fn message(&self) -> String {
        match &self.kind {
            FailureKind::LaunchFailure { message } => {
                format!("Failed to launch {}: {message}", self.role)
            }
            FailureKind::ExitedUnexpectedly { status, .. } => {
                format!("{} exited unexpectedly ({status})", self.role)
            }
        }
    }
}

/// Per-process statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// Position in the launch plan.
    pub process: ProcessId,

    /// What the process does.
    pub role: ProcessRole,

    /// Lines read from the process since launch.
    pub lines: u64,

    /// Seconds since the process last wrote a line.
    pub silent_seconds: u64,
}

/// Session statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Seconds since the session entered Running.
    pub uptime_seconds: u64,

    /// Multiplex rate of the output stream.
    pub mux_rate_bps: u64,

    /// Lines read across all processes.
    pub log_lines: u64,

    /// Lines dropped because the log consumer fell behind.
    pub dropped_log_lines: u64,

    /// Per-process breakdown, in launch order.
    pub processes: Vec<ProcessStats>,
}

/// Health warnings raised while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionWarning {
    /// A process has not written anything for a while.
    QuietProcess {
        /// The quiet process.
        role: ProcessRole,

        /// Seconds since its last line.
        silent_seconds: u64,
    },

    /// The log consumer is not keeping up.
    LogBackpressure {
        /// Lines dropped since the previous report.
        dropped: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(role: ProcessRole) -> ProcessSpec {
        ProcessSpec {
            role,
            invocation: Invocation::new("true"),
        }
    }

    fn encoder(id: u16) -> ProcessRole {
        ProcessRole::Encoder {
            service_id: id,
            service_name: format!("Service {id}"),
        }
    }

    fn chain_plan() -> LaunchPlan {
        LaunchPlan {
            processes: vec![
                spec(ProcessRole::Multiplexer),
                spec(encoder(1)),
                spec(ProcessRole::TimeSignal),
            ],
            links: vec![
                DataLink {
                    from: ProcessId(1),
                    to: ProcessId(0),
                    transport: LinkTransport::Pipe,
                },
                DataLink {
                    from: ProcessId(2),
                    to: ProcessId(0),
                    transport: LinkTransport::Loopback {
                        endpoint: "127.0.0.1:32000".parse().unwrap(),
                        protocol: LinkProtocol::Tcp,
                    },
                },
            ],
            files: Vec::new(),
            mux_rate_bps: 1_000_000,
        }
    }

    #[test]
    fn test_launch_order_puts_producers_first() {
        let plan = chain_plan();
        let order = plan.launch_order().unwrap();
        assert_eq!(order, vec![ProcessId(1), ProcessId(2), ProcessId(0)]);
        assert_eq!(plan.pipe_source(ProcessId(0)), Some(ProcessId(1)));
        assert!(plan.pipes_stdout(ProcessId(1)));
        assert!(!plan.pipes_stdout(ProcessId(2)));
    }

    #[test]
    fn test_launch_order_rejects_cycles() {
        let mut plan = chain_plan();
        plan.links.push(DataLink {
            from: ProcessId(0),
            to: ProcessId(2),
            transport: LinkTransport::Loopback {
                endpoint: "127.0.0.1:31000".parse().unwrap(),
                protocol: LinkProtocol::Udp,
            },
        });
        assert_eq!(plan.launch_order(), Err(PlanError::Cycle));
    }

    #[test]
    fn test_validate_rejects_second_stdin_pipe() {
        let mut plan = chain_plan();
        plan.links.push(DataLink {
            from: ProcessId(2),
            to: ProcessId(0),
            transport: LinkTransport::Pipe,
        });
        assert_eq!(plan.validate(), Err(PlanError::DuplicatePipe(ProcessId(0))));
    }

    #[test]
    fn test_validate_rejects_unknown_process() {
        let mut plan = chain_plan();
        plan.links[0].from = ProcessId(9);
        assert_eq!(plan.validate(), Err(PlanError::UnknownProcess(ProcessId(9))));
        assert_eq!(LaunchPlan::default().validate(), Err(PlanError::Empty));
    }

    #[test]
    fn test_role_tags() {
        assert_eq!(encoder(7).tag(), "encoder:7");
        assert_eq!(ProcessRole::TimeSignal.tag(), "time-signal");
        assert!(!ProcessRole::Multiplexer.is_producer());
    }

    #[test]
    fn test_plan_serializes() {
        let plan = chain_plan();
        let json = serde_json::to_string(&plan).unwrap();
        let back: LaunchPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
    }
}
