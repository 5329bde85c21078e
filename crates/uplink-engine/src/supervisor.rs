//! Session supervisor: launches a plan, watches it and tears it down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use uplink_command::{render_script, ScriptFormat};
use uplink_ipc::{
    FailureReport, LaunchPlan, LogLine, ProcessId, ProcessSpec, SessionState, ShutdownPhase,
    StartupPhase, StopReason, SupervisorCommand, SupervisorEvent,
};

use crate::config::SupervisorConfig;
use crate::error::EngineError;
use crate::pipeline::Pipeline;
use crate::process::LogSink;
use crate::stats::{SessionCounters, StatsCollector};

/// How long readers get to finish once their processes are gone.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// The pipeline supervisor.
///
/// Owns every process of the current session and changes state only
/// through [`Supervisor::transition_to`].
pub struct Supervisor {
    command_rx: Receiver<SupervisorCommand>,
    event_tx: Sender<SupervisorEvent>,
    log_tx: Sender<LogLine>,
    config: SupervisorConfig,
    state: Arc<RwLock<SessionState>>,
    counters: Arc<SessionCounters>,
    stats: StatsCollector,
    pipeline: Option<Pipeline>,
    grace_deadline: Option<Instant>,
}

impl Supervisor {
    /// Create a supervisor with the given channels.
    pub fn new(
        command_rx: Receiver<SupervisorCommand>,
        event_tx: Sender<SupervisorEvent>,
        log_tx: Sender<LogLine>,
        config: SupervisorConfig,
    ) -> Self {
        let stats = StatsCollector::new(
            config.stats_interval(),
            Duration::from_secs(config.quiet_warning_secs),
        );
        Self {
            command_rx,
            event_tx,
            log_tx,
            config,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            counters: Arc::new(SessionCounters::default()),
            stats,
            pipeline: None,
            grace_deadline: None,
        }
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Run the supervisor loop until shutdown or until the command channel closes.
    #[instrument(name = "supervisor_run", skip(self))]
    pub fn run(&mut self) {
        info!("Supervisor starting");
        self.send_event(SupervisorEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(self.config.poll_interval()) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                    self.tick();
                }
                Err(RecvTimeoutError::Timeout) => self.tick(),
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.stop_session(StopReason::Shutdown);
                    break;
                }
            }
        }

        info!("Supervisor stopped");
    }

    /// Handle a single command. Returns false once the supervisor should exit.
    fn handle_command(&mut self, command: SupervisorCommand) -> bool {
        match command {
            SupervisorCommand::Start { plan } => {
                debug!(processes = plan.processes.len(), "Handling start command");
                self.start_session(*plan);
            }
            SupervisorCommand::Stop => {
                debug!("Handling stop command");
                self.stop_session(StopReason::UserRequested);
            }
            SupervisorCommand::Preview { plan } => self.preview(&plan),
            SupervisorCommand::GetState => self.send_state(),
            SupervisorCommand::Shutdown => {
                info!("Shutdown requested");
                self.stop_session(StopReason::Shutdown);
                self.send_event(SupervisorEvent::Shutdown);
                return false;
            }
        }
        true
    }

    /// Periodic work: liveness, the end of the grace window and statistics.
    fn tick(&mut self) {
        let (starting, running) = {
            let state = self.state.read();
            (state.is_starting(), state.is_running())
        };
        if !starting && !running {
            return;
        }

        if let Some(report) = self.pipeline.as_mut().and_then(Pipeline::first_exit) {
            self.fail_session(report);
            return;
        }

        if starting
            && self
                .grace_deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.enter_running();
        } else if running && self.stats.is_due() {
            self.emit_stats();
        }
    }

    #[instrument(name = "start_session", skip(self, plan), fields(processes = plan.processes.len()))]
    fn start_session(&mut self, plan: LaunchPlan) {
        {
            let state = self.state.read();
            if state.is_starting() || state.is_running() {
                debug!("Already starting or running, ignoring start command");
                return;
            }
            if state.is_stopping() {
                debug!("Session is stopping, ignoring start command");
                return;
            }
        }

        let order = match plan.launch_order() {
            Ok(order) => order,
            Err(e) => {
                let e = EngineError::from(e);
                error!("Refusing to start: {}", e);
                self.send_event(SupervisorEvent::Error {
                    recoverable: true,
                    message: e.to_string(),
                });
                return;
            }
        };
        let (producers, consumers): (Vec<(ProcessId, &ProcessSpec)>, Vec<_>) = order
            .into_iter()
            .filter_map(|id| plan.process(id).map(|spec| (id, spec)))
            .partition(|(_, spec)| spec.role.is_producer());

        self.counters = Arc::new(SessionCounters::default());
        let sink = LogSink {
            log_tx: self.log_tx.clone(),
            counters: Arc::clone(&self.counters),
            tail_len: self.config.tail_lines,
        };
        let mut pipeline = Pipeline::new(plan.mux_rate_bps, self.config.poll_interval());

        self.transition_to(SessionState::Starting {
            phase: StartupPhase::WriteFiles,
        });
        if let Err(e) = pipeline.write_files(&plan.files) {
            error!("Failed to write auxiliary files: {}", e);
            pipeline.remove_files();
            self.send_event(SupervisorEvent::Error {
                recoverable: true,
                message: e.to_string(),
            });
            self.transition_to(SessionState::Idle);
            return;
        }

        for (phase, batch) in [
            (StartupPhase::LaunchProducers, &producers),
            (StartupPhase::LaunchMultiplexer, &consumers),
        ] {
            self.transition_to(SessionState::Starting { phase });
            for &(id, spec) in batch {
                match pipeline.launch(&plan, id, spec, &sink) {
                    Ok(summary) => {
                        info!(process = %id, pid = summary.pid, "Launched {}", summary.role);
                        self.send_event(SupervisorEvent::ProcessLaunched {
                            process: summary.process,
                            role: summary.role,
                            pid: summary.pid,
                        });
                    }
                    Err(report) => {
                        self.pipeline = Some(pipeline);
                        self.fail_session(report);
                        return;
                    }
                }
            }
        }

        self.transition_to(SessionState::Starting {
            phase: StartupPhase::AwaitActivity,
        });
        self.grace_deadline = Some(Instant::now() + self.config.startup_grace());
        self.pipeline = Some(pipeline);
    }

    /// Stop the session. Safe in every state.
    #[instrument(name = "stop_session", skip(self))]
    fn stop_session(&mut self, reason: StopReason) {
        let (idle_or_stopping, failed) = {
            let state = self.state.read();
            (state.is_idle() || state.is_stopping(), state.is_failed())
        };
        if idle_or_stopping {
            debug!("Already idle or stopping, ignoring stop command");
            return;
        }
        if failed {
            debug!("Clearing failed session");
            self.transition_to(SessionState::Idle);
            return;
        }

        info!(reason = %reason.message(), "Stopping session");
        self.grace_deadline = None;
        self.stats.stop();
        if let Some(mut pipeline) = self.pipeline.take() {
            self.teardown(&mut pipeline, Some(&reason));
        }
        self.transition_to(SessionState::Idle);
    }

    /// Terminate producers, then the multiplexer, then whatever is left.
    ///
    /// With a reason the shutdown phases are reported as state changes.
    #[instrument(name = "teardown", skip(self, pipeline))]
    fn teardown(&mut self, pipeline: &mut Pipeline, reason: Option<&StopReason>) {
        let started = Instant::now();
        let deadline = started + self.config.stop_timeout();

        self.enter_stop_phase(reason, ShutdownPhase::StopProducers);
        pipeline.terminate(|role| role.is_producer());
        pipeline.wait_until(deadline, |role| role.is_producer());

        self.enter_stop_phase(reason, ShutdownPhase::StopMultiplexer);
        let drain_deadline = deadline.min(Instant::now() + self.config.drain_timeout());
        if !pipeline.wait_until(drain_deadline, |role| !role.is_producer()) {
            pipeline.terminate(|role| !role.is_producer());
            pipeline.wait_until(deadline, |_| true);
        }

        self.enter_stop_phase(reason, ShutdownPhase::Reap);
        let forced = pipeline.force_kill();
        if !forced.is_empty() {
            let waited_ms = started.elapsed().as_millis() as u64;
            warn!(count = forced.len(), waited_ms, "Graceful stop timed out");
            self.send_event(SupervisorEvent::ShutdownTimeout { forced, waited_ms });
        }
        pipeline.reap(REAP_TIMEOUT);

        self.enter_stop_phase(reason, ShutdownPhase::RemoveFiles);
        pipeline.remove_files();
    }

    fn enter_stop_phase(&mut self, reason: Option<&StopReason>, phase: ShutdownPhase) {
        if let Some(reason) = reason {
            self.transition_to(SessionState::Stopping {
                reason: reason.clone(),
                phase,
            });
        }
    }

    fn fail_session(&mut self, report: FailureReport) {
        error!(process = %report.process, "{}", report.message());
        self.grace_deadline = None;
        self.stats.stop();
        if let Some(mut pipeline) = self.pipeline.take() {
            self.teardown(&mut pipeline, None);
        }

        let report = Box::new(report);
        self.transition_to(SessionState::Failed {
            report: report.clone(),
        });
        self.send_event(SupervisorEvent::Failure(report));
    }

    fn enter_running(&mut self) {
        self.grace_deadline = None;
        let Some(pipeline) = self.pipeline.as_ref() else {
            return;
        };
        let processes = pipeline.summaries();
        let mux_rate_bps = pipeline.mux_rate_bps();
        info!(processes = processes.len(), mux_rate_bps, "Session running");

        self.stats.start(&self.counters);
        self.transition_to(SessionState::Running {
            started_at: Utc::now(),
            mux_rate_bps,
            processes,
        });
    }

    fn emit_stats(&mut self) {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return;
        };
        let stats = self.stats.snapshot(
            pipeline.mux_rate_bps(),
            &self.counters,
            pipeline.process_stats(),
        );
        let warnings = self.stats.check_warnings(&stats);
        self.stats.mark_reported(&stats);

        self.send_event(SupervisorEvent::Stats(stats));
        for warning in warnings {
            warn!(?warning, "Session warning");
            self.send_event(SupervisorEvent::Warning(warning));
        }
    }

    fn preview(&self, plan: &LaunchPlan) {
        match render_script(plan, ScriptFormat::Plain) {
            Ok(script) => self.send_event(SupervisorEvent::Preview { script }),
            Err(e) => self.send_event(SupervisorEvent::Error {
                recoverable: true,
                message: EngineError::from(e).to_string(),
            }),
        }
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(SupervisorEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn transition_to(&self, new_state: SessionState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(SupervisorEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: SupervisorEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}
