//! Foreground broadcasting: drive the supervisor until the operator stops it.

use std::io::{self, BufRead};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, error, info, warn};

use uplink_command::synthesize;
use uplink_ipc::{LogLine, SessionWarning, SupervisorCommand, SupervisorEvent};

use crate::commands::load_session;
use crate::config::AppConfig;

/// How long to wait for the supervisor to answer a shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Event poll interval of the foreground loop.
const POLL: Duration = Duration::from_millis(50);

/// Signal on every line read from stdin. EOF is not a stop request.
fn watch_stdin() -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_lines(log_rx: &Receiver<LogLine>) {
    for line in log_rx.try_iter() {
        println!("{line}");
    }
}

/// What the foreground loop does after an event.
enum Next {
    Continue,
    Finished,
    Failed(anyhow::Error),
}

fn handle_event(event: SupervisorEvent, stop_requested: bool) -> Next {
    match event {
        SupervisorEvent::StateChanged { previous, current } => {
            info!(from = previous.name(), to = current.name(), "Session state");
            if current.is_running() {
                info!("Broadcasting; press Enter to stop");
            }
            if stop_requested && current.is_idle() {
                return Next::Finished;
            }
        }
        SupervisorEvent::ProcessLaunched { process, role, pid } => {
            info!(%process, pid, "Launched {}", role);
        }
        SupervisorEvent::Stats(stats) => {
            info!(
                uptime = stats.uptime_seconds,
                lines = stats.log_lines,
                dropped = stats.dropped_log_lines,
                "Session statistics"
            );
        }
        SupervisorEvent::Warning(SessionWarning::QuietProcess {
            role,
            silent_seconds,
        }) => {
            warn!(silent_seconds, "{} has been quiet", role);
        }
        SupervisorEvent::Warning(SessionWarning::LogBackpressure { dropped }) => {
            warn!(dropped, "Output lines dropped");
        }
        SupervisorEvent::Failure(report) => {
            error!(process = %report.process, "{}", report.message());
            for line in &report.last_lines {
                eprintln!("  | {line}");
            }
            return Next::Failed(anyhow!(report.message()));
        }
        SupervisorEvent::ShutdownTimeout { forced, waited_ms } => {
            warn!(waited_ms, killed = forced.len(), "Processes did not stop in time");
        }
        SupervisorEvent::Error {
            recoverable,
            message,
        } => {
            error!(recoverable, "{}", message);
            return Next::Failed(anyhow!(message));
        }
        SupervisorEvent::Shutdown => return Next::Finished,
        SupervisorEvent::Ready | SupervisorEvent::Preview { .. } => {}
    }
    Next::Continue
}

/// Launch a session and supervise it in the foreground.
pub fn run(path: &Path, duration: Option<u64>, config: &AppConfig) -> Result<()> {
    let session = load_session(path)?;
    let plan = synthesize(&session, &config.synthesis_context(Utc::now()))
        .context("Session cannot be broadcast")?;

    let (command_tx, command_rx) = uplink_ipc::command_channel();
    let (event_tx, event_rx) = uplink_ipc::event_channel();
    let (log_tx, log_rx) = uplink_ipc::log_channel();

    let supervisor_config = config.supervisor.clone();
    let supervisor_handle = thread::Builder::new()
        .name("supervisor".to_string())
        .spawn(move || {
            info!("Supervisor thread starting");
            let mut supervisor =
                uplink_engine::create_supervisor(command_rx, event_tx, log_tx, supervisor_config);
            supervisor.run();
            info!("Supervisor thread stopped");
        })
        .context("Failed to spawn supervisor thread")?;

    command_tx
        .send(SupervisorCommand::Start {
            plan: Box::new(plan),
        })
        .context("Supervisor is not running")?;

    let stop_rx = watch_stdin();
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut stop_requested = false;

    let outcome = loop {
        print_lines(&log_rx);

        let stop_now = match stop_rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                deadline.is_some_and(|deadline| Instant::now() >= deadline)
            }
        };
        if stop_now && !stop_requested {
            info!("Stopping session");
            stop_requested = true;
            if command_tx.send(SupervisorCommand::Stop).is_err() {
                break Err(anyhow!("Supervisor exited"));
            }
        }

        match event_rx.recv_timeout(POLL) {
            Ok(event) => match handle_event(event, stop_requested) {
                Next::Continue => {}
                Next::Finished => break Ok(()),
                Next::Failed(e) => break Err(e),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Err(anyhow!("Supervisor exited")),
        }
    };

    let _ = command_tx.send(SupervisorCommand::Shutdown);
    let wait_until = Instant::now() + SHUTDOWN_WAIT;
    loop {
        print_lines(&log_rx);
        match event_rx.recv_timeout(POLL) {
            Ok(SupervisorEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(event) => debug!(?event, "Event during shutdown"),
            Err(RecvTimeoutError::Timeout) if Instant::now() >= wait_until => {
                warn!("Supervisor did not confirm shutdown");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    drop(command_tx);
    if supervisor_handle.join().is_err() {
        bail!("Supervisor thread panicked");
    }
    print_lines(&log_rx);

    outcome
}
