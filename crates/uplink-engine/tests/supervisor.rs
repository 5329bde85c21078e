//! End-to-end supervision tests with shell stand-ins for the real tools.

#![cfg(unix)]

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use uplink_engine::{create_supervisor, SupervisorConfig};
use uplink_ipc::{
    AuxFile, DataLink, FailureKind, FailureReport, Invocation, LaunchPlan, LinkProtocol,
    LinkTransport, LogLine, ProcessId, ProcessRole, ProcessSpec, SessionState, SupervisorCommand,
    SupervisorEvent,
};

const WAIT: Duration = Duration::from_secs(10);

const CHATTY_ENCODER: &str = "while true; do echo frame; sleep 0.1; done";

struct Harness {
    command_tx: Sender<SupervisorCommand>,
    event_rx: Receiver<SupervisorEvent>,
    log_rx: Receiver<LogLine>,
    handle: Option<JoinHandle<()>>,
    seen: Vec<SupervisorEvent>,
}

impl Harness {
    fn start(config: SupervisorConfig) -> Self {
        let (command_tx, command_rx) = uplink_ipc::command_channel();
        let (event_tx, event_rx) = uplink_ipc::event_channel();
        let (log_tx, log_rx) = uplink_ipc::log_channel();
        let mut supervisor = create_supervisor(command_rx, event_tx, log_tx, config);
        let handle = thread::spawn(move || supervisor.run());

        let mut harness = Self {
            command_tx,
            event_rx,
            log_rx,
            handle: Some(handle),
            seen: Vec::new(),
        };
        harness.expect("ready", |e| matches!(e, SupervisorEvent::Ready));
        harness
    }

    fn send(&self, command: SupervisorCommand) {
        self.command_tx.send(command).unwrap();
    }

    /// Wait for the first event matching `pred`, keeping everything seen on the way.
    fn expect(
        &mut self,
        what: &str,
        pred: impl Fn(&SupervisorEvent) -> bool,
    ) -> SupervisorEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.event_rx.recv_timeout(left) {
                Ok(event) => {
                    let matched = pred(&event);
                    self.seen.push(event.clone());
                    if matched {
                        return event;
                    }
                }
                Err(_) => panic!("timed out waiting for {what}; saw {:#?}", self.seen),
            }
        }
    }

    fn expect_state(&mut self, what: &str, pred: impl Fn(&SessionState) -> bool) -> SessionState {
        match self.expect(what, |e| {
            matches!(e, SupervisorEvent::StateChanged { current, .. } if pred(&**current))
        }) {
            SupervisorEvent::StateChanged { current, .. } => *current,
            _ => unreachable!(),
        }
    }

    fn launched_pids(&self) -> Vec<(ProcessRole, u32)> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::ProcessLaunched { role, pid, .. } => Some((role.clone(), *pid)),
                _ => None,
            })
            .collect()
    }

    fn saw(&self, pred: impl Fn(&SupervisorEvent) -> bool) -> bool {
        self.seen.iter().any(pred)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.command_tx.send(SupervisorCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        startup_grace_ms: 300,
        stop_timeout_ms: 5_000,
        drain_timeout_ms: 1_000,
        poll_interval_ms: 20,
        ..Default::default()
    }
}

fn shell(role: ProcessRole, script: &str) -> ProcessSpec {
    let mut invocation = Invocation::new("sh");
    invocation.args = vec!["-c".to_string(), script.to_string()];
    ProcessSpec { role, invocation }
}

fn encoder_role() -> ProcessRole {
    ProcessRole::Encoder {
        service_id: 1,
        service_name: "One".to_string(),
    }
}

/// Encoder piped into a `cat` multiplexer, time signal on a loopback link.
fn plan(encoder: ProcessSpec, time_signal: ProcessSpec) -> LaunchPlan {
    LaunchPlan {
        processes: vec![
            encoder,
            time_signal,
            shell(ProcessRole::Multiplexer, "exec cat"),
        ],
        links: vec![
            DataLink {
                from: ProcessId(0),
                to: ProcessId(2),
                transport: LinkTransport::Pipe,
            },
            DataLink {
                from: ProcessId(1),
                to: ProcessId(2),
                transport: LinkTransport::Loopback {
                    endpoint: "127.0.0.1:32000".parse().unwrap(),
                    protocol: LinkProtocol::Tcp,
                },
            },
        ],
        files: Vec::new(),
        mux_rate_bps: 38_014_705,
    }
}

fn healthy_plan() -> LaunchPlan {
    plan(
        shell(encoder_role(), CHATTY_ENCODER),
        shell(ProcessRole::TimeSignal, "exec sleep 30"),
    )
}

fn is_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn assert_all_gone(pids: &[(ProcessRole, u32)]) {
    for (role, pid) in pids {
        assert!(!is_alive(*pid), "{role} (pid {pid}) is still running");
    }
}

#[test]
fn test_time_signal_exit_fails_the_session() {
    let mut harness = Harness::start(SupervisorConfig {
        startup_grace_ms: 2_000,
        ..config()
    });
    let plan = plan(
        shell(encoder_role(), CHATTY_ENCODER),
        shell(
            ProcessRole::TimeSignal,
            "echo 'tdt starting'; echo 'bind failed' >&2; exit 3",
        ),
    );
    harness.send(SupervisorCommand::Start {
        plan: Box::new(plan),
    });

    let report: FailureReport = match harness.expect("failure", |e| {
        matches!(e, SupervisorEvent::Failure(_))
    }) {
        SupervisorEvent::Failure(report) => *report,
        _ => unreachable!(),
    };

    assert_eq!(report.role, ProcessRole::TimeSignal);
    assert_eq!(report.process, ProcessId(1));
    assert!(matches!(
        report.kind,
        FailureKind::ExitedUnexpectedly {
            exit_code: Some(3),
            ..
        }
    ));
    assert!(report.last_lines.contains(&"bind failed".to_string()));
    assert!(report.message().contains("time-signal injector"));

    assert_eq!(harness.launched_pids().len(), 3);
    assert_all_gone(&harness.launched_pids());
    assert!(!harness.saw(|e| matches!(
        e,
        SupervisorEvent::StateChanged { current, .. } if current.is_running()
    )));
    assert!(harness.saw(|e| matches!(
        e,
        SupervisorEvent::StateChanged { current, .. } if current.is_failed()
    )));
}

#[test]
fn test_stop_while_running_returns_to_idle() {
    let mut harness = Harness::start(config());
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });

    let running = harness.expect_state("running", SessionState::is_running);
    match running {
        SessionState::Running {
            mux_rate_bps,
            processes,
            ..
        } => {
            assert_eq!(mux_rate_bps, 38_014_705);
            assert_eq!(processes.len(), 3);
            assert_eq!(processes[2].role, ProcessRole::Multiplexer);
        }
        other => panic!("unexpected state {other:?}"),
    }

    harness.send(SupervisorCommand::Stop);
    harness.expect_state("idle", SessionState::is_idle);

    assert!(harness.saw(|e| matches!(
        e,
        SupervisorEvent::StateChanged { current, .. } if current.is_stopping()
    )));
    assert!(!harness.saw(|e| matches!(e, SupervisorEvent::ShutdownTimeout { .. })));
    assert_all_gone(&harness.launched_pids());
}

#[test]
fn test_encoder_output_reaches_multiplexer() {
    let mut harness = Harness::start(config());
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.expect_state("running", SessionState::is_running);

    let deadline = Instant::now() + WAIT;
    let mut relayed = None;
    while relayed.is_none() && Instant::now() < deadline {
        if let Ok(line) = harness.log_rx.recv_timeout(Duration::from_millis(100)) {
            if line.role == ProcessRole::Multiplexer && line.text == "frame" {
                relayed = Some(line);
            }
        }
    }
    let line = relayed.expect("multiplexer never relayed encoder output");
    assert_eq!(line.process, ProcessId(2));

    harness.send(SupervisorCommand::Stop);
    harness.expect_state("idle", SessionState::is_idle);
}

#[test]
fn test_stubborn_producer_is_killed() {
    let mut harness = Harness::start(SupervisorConfig {
        stop_timeout_ms: 500,
        ..config()
    });
    let plan = plan(
        shell(
            encoder_role(),
            "trap '' TERM; while true; do sleep 0.1; done",
        ),
        shell(ProcessRole::TimeSignal, "exec sleep 30"),
    );
    harness.send(SupervisorCommand::Start {
        plan: Box::new(plan),
    });
    harness.expect_state("running", SessionState::is_running);

    harness.send(SupervisorCommand::Stop);
    match harness.expect("shutdown timeout", |e| {
        matches!(e, SupervisorEvent::ShutdownTimeout { .. })
    }) {
        SupervisorEvent::ShutdownTimeout { forced, waited_ms } => {
            assert!(forced.contains(&encoder_role()));
            assert!(!forced.contains(&ProcessRole::TimeSignal));
            assert!(waited_ms >= 500);
        }
        _ => unreachable!(),
    }
    harness.expect_state("idle", SessionState::is_idle);
    assert_all_gone(&harness.launched_pids());
}

#[test]
fn test_launch_failure_tears_down_started_processes() {
    let mut harness = Harness::start(config());
    let mut plan = healthy_plan();
    plan.processes[1].invocation = Invocation::new("/nonexistent/uplink-tdt");
    harness.send(SupervisorCommand::Start {
        plan: Box::new(plan),
    });

    let report = match harness.expect("failure", |e| matches!(e, SupervisorEvent::Failure(_))) {
        SupervisorEvent::Failure(report) => report,
        _ => unreachable!(),
    };
    assert_eq!(report.role, ProcessRole::TimeSignal);
    assert!(matches!(report.kind, FailureKind::LaunchFailure { .. }));

    let launched = harness.launched_pids();
    assert_eq!(launched.len(), 1);
    assert_all_gone(&launched);

    // A stop acknowledges the failure; the next start is a fresh session.
    harness.send(SupervisorCommand::Stop);
    harness.expect_state("idle", SessionState::is_idle);
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.expect_state("running again", SessionState::is_running);
}

#[test]
fn test_auxiliary_files_live_for_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("work").join("eit.xml");

    let mut harness = Harness::start(config());
    let mut plan = healthy_plan();
    plan.files.push(AuxFile {
        path: path.clone(),
        contents: "<tsduck/>\n".to_string(),
    });
    harness.send(SupervisorCommand::Start {
        plan: Box::new(plan),
    });
    harness.expect_state("running", SessionState::is_running);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "<tsduck/>\n");

    harness.send(SupervisorCommand::Stop);
    harness.expect_state("idle", SessionState::is_idle);
    assert!(!path.exists());
}

#[test]
fn test_stats_reported_while_running() {
    let mut harness = Harness::start(SupervisorConfig {
        stats_interval_ms: 100,
        ..config()
    });
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.expect_state("running", SessionState::is_running);

    match harness.expect("stats", |e| matches!(e, SupervisorEvent::Stats(_))) {
        SupervisorEvent::Stats(stats) => {
            assert_eq!(stats.mux_rate_bps, 38_014_705);
            assert_eq!(stats.processes.len(), 3);
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_second_start_is_ignored() {
    let mut harness = Harness::start(config());
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.expect_state("running", SessionState::is_running);

    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.send(SupervisorCommand::GetState);
    let state = match harness.expect("state report", |e| {
        matches!(e, SupervisorEvent::StateChanged { previous, current } if previous == current)
    }) {
        SupervisorEvent::StateChanged { current, .. } => *current,
        _ => unreachable!(),
    };
    assert!(state.is_running());
    assert_eq!(harness.launched_pids().len(), 3);
}

#[test]
fn test_encoder_crash_while_running_fails_the_session() {
    let mut harness = Harness::start(config());
    let plan = plan(
        shell(
            encoder_role(),
            "echo frame; sleep 1; echo 'decoder error: stream lost' >&2; exit 1",
        ),
        shell(ProcessRole::TimeSignal, "exec sleep 30"),
    );
    harness.send(SupervisorCommand::Start {
        plan: Box::new(plan),
    });
    harness.expect_state("running", SessionState::is_running);

    let failed = harness.expect_state("failed", SessionState::is_failed);
    let SessionState::Failed { report } = failed else {
        unreachable!();
    };
    assert_eq!(report.role, encoder_role());
    assert_eq!(report.process, ProcessId(0));
    assert!(matches!(
        report.kind,
        FailureKind::ExitedUnexpectedly {
            exit_code: Some(1),
            ..
        }
    ));
    assert!(report
        .last_lines
        .contains(&"decoder error: stream lost".to_string()));

    harness.expect("failure report", |e| matches!(e, SupervisorEvent::Failure(_)));
    assert_eq!(
        harness
            .seen
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::Failure(_)))
            .count(),
        1
    );
    assert_eq!(harness.launched_pids().len(), 3);
    assert_all_gone(&harness.launched_pids());
}

#[test]
fn test_stop_while_starting_returns_to_idle() {
    let mut harness = Harness::start(SupervisorConfig {
        startup_grace_ms: 5_000,
        ..config()
    });
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.send(SupervisorCommand::Stop);

    harness.expect_state("idle", SessionState::is_idle);
    assert!(harness.saw(|e| matches!(
        e,
        SupervisorEvent::StateChanged { current, .. } if current.is_starting()
    )));
    assert!(!harness.saw(|e| matches!(
        e,
        SupervisorEvent::StateChanged { current, .. } if current.is_running()
    )));
    assert!(!harness.saw(|e| matches!(e, SupervisorEvent::Failure(_))));
    assert_eq!(harness.launched_pids().len(), 3);
    assert_all_gone(&harness.launched_pids());
}

#[test]
fn test_repeated_stop_is_idempotent() {
    let mut harness = Harness::start(config());
    harness.send(SupervisorCommand::Start {
        plan: Box::new(healthy_plan()),
    });
    harness.expect_state("running", SessionState::is_running);

    harness.send(SupervisorCommand::Stop);
    harness.send(SupervisorCommand::Stop);
    harness.expect_state("idle", SessionState::is_idle);
    let seen_at_idle = harness.seen.len();

    harness.send(SupervisorCommand::Stop);
    harness.send(SupervisorCommand::GetState);
    let state = match harness.expect("state report", |e| {
        matches!(e, SupervisorEvent::StateChanged { previous, current } if previous == current)
    }) {
        SupervisorEvent::StateChanged { current, .. } => *current,
        _ => unreachable!(),
    };
    assert!(state.is_idle());

    // Only the state report arrived after the first stop completed.
    assert_eq!(harness.seen.len(), seen_at_idle + 1);
    let stops_begun = harness
        .seen
        .iter()
        .filter(|e| {
            matches!(
                e,
                SupervisorEvent::StateChanged { previous, current }
                    if current.is_stopping() && !previous.is_stopping()
            )
        })
        .count();
    assert_eq!(stops_begun, 1);
    assert!(!harness.saw(|e| matches!(e, SupervisorEvent::ShutdownTimeout { .. })));
    assert_all_gone(&harness.launched_pids());
}
