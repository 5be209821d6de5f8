//! Per-scenario orchestration.
//!
//! One scenario is a linear pipeline: apply the impairment rule, start the
//! capture, start the server, run the clients, drain, tear down in order,
//! merge whatever client files exist, and always clear the impairment at
//! the end. The pipeline is best-effort, not transactional — degraded
//! sub-steps are recorded and the pipeline advances anyway. The single
//! scenario-fatal condition is a server that fails to come up: without it
//! the clients cannot run, so the scenario skips straight to teardown with
//! zero client results.
//!
//! This module is also the one place that classifies failures as fatal vs
//! degraded; the lower layers only return structured outcomes.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use gauntlet_netem::ImpairmentRule;

use crate::capture::{self, CaptureStart};
use crate::config::RunConfig;
use crate::layout::RunPaths;
use crate::merge;
use crate::runlock::RunLock;
use crate::supervisor::{self, ManagedProcess, ProcessKind};

/// Fixed delay after spawning the server before its liveness is judged.
const SERVER_STARTUP_DELAY: Duration = Duration::from_secs(2);
/// Inter-launch delay between clients, so the server never sees the whole
/// fleet's INIT burst in one tick.
const CLIENT_STAGGER: Duration = Duration::from_millis(500);
/// Extra wall-clock time clients get beyond their own duration before the
/// join gives up and escalates.
const CLIENT_JOIN_MARGIN: Duration = Duration::from_secs(10);
const CLIENT_JOIN_POLL: Duration = Duration::from_millis(250);
/// Settle time after the clients finish, letting final metric flushes land
/// on disk before teardown.
const DRAIN_DELAY: Duration = Duration::from_secs(2);
/// Grace period for the two-phase stop of server, clients, and capture.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// One entry of the scenario catalog.
#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    pub name: String,
    pub rule: ImpairmentRule,
    /// Unique key (run timestamp + scenario name) namespacing every
    /// artifact this scenario writes.
    pub output_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Idle,
    ImpairmentApplied,
    CaptureStarted,
    ServerStarted,
    ClientsRunning,
    Draining,
    ServerStopped,
    CaptureStopped,
    Merged,
    ImpairmentCleared,
    Done,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ImpairmentApplied => "impairment-applied",
            Self::CaptureStarted => "capture-started",
            Self::ServerStarted => "server-started",
            Self::ClientsRunning => "clients-running",
            Self::Draining => "draining",
            Self::ServerStopped => "server-stopped",
            Self::CaptureStopped => "capture-stopped",
            Self::Merged => "merged",
            Self::ImpairmentCleared => "impairment-cleared",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// How the packet capture ended up for a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDisposition {
    Recorded,
    Unavailable,
    Failed,
}

/// Everything the run summary needs to know about one scenario.
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub rule: String,
    pub output_prefix: String,
    pub impairment_confirmed: bool,
    pub capture: CaptureDisposition,
    pub server_started: bool,
    pub clients_spawned: u32,
    /// Clients that reached a terminal state on their own.
    pub clients_completed: u32,
    /// Clients still alive at the join deadline, stopped by escalation.
    pub clients_killed: u32,
    pub merged_files: usize,
    pub data_rows: usize,
    pub skipped_files: Vec<PathBuf>,
    pub merged_written: bool,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
    pub state: ScenarioState,
}

impl ScenarioReport {
    pub fn degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub struct ScenarioRunner<'a> {
    cfg: &'a RunConfig,
    paths: &'a RunPaths,
    lock: &'a RunLock,
    state: ScenarioState,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(cfg: &'a RunConfig, paths: &'a RunPaths, lock: &'a RunLock) -> Self {
        Self {
            cfg,
            paths,
            lock,
            state: ScenarioState::Idle,
        }
    }

    fn advance(&mut self, next: ScenarioState) {
        tracing::debug!(from = %self.state, to = %next, "scenario state");
        self.state = next;
    }

    /// Run one scenario end-to-end. Reaches `Done` exactly once, whether or
    /// not every intermediate step succeeded.
    pub fn run(&mut self, spec: &ScenarioSpec) -> ScenarioReport {
        let started = Instant::now();
        self.state = ScenarioState::Idle;
        let mut warnings: Vec<String> = Vec::new();

        tracing::info!(
            scenario = %spec.name,
            rule = %spec.rule,
            prefix = %spec.output_prefix,
            "scenario starting"
        );

        // Impairment. A scenario run under accidentally-unimpaired
        // conditions is more useful than no data, so a failure here only
        // flags the report.
        let impairment_confirmed = match gauntlet_netem::apply(&self.cfg.interface, &spec.rule) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(scenario = %spec.name, error = %e, "impairment apply failed");
                warnings.push(format!("impairment not confirmed: {e}"));
                false
            }
        };
        self.advance(ScenarioState::ImpairmentApplied);

        // Capture, best-effort.
        let (mut capture_handle, capture) = match capture::start(
            &self.cfg.capture_cmd,
            &self.cfg.interface,
            self.cfg.port,
            &self.paths.pcap(&spec.output_prefix),
            &self.paths.capture_log(&spec.output_prefix),
        ) {
            Ok(CaptureStart::Started(h)) => {
                self.lock.register("capture", h.pid);
                (Some(h), CaptureDisposition::Recorded)
            }
            Ok(CaptureStart::Unavailable) => {
                warnings.push("capture tool unavailable, no packet trace".to_string());
                (None, CaptureDisposition::Unavailable)
            }
            Err(e) => {
                tracing::warn!(scenario = %spec.name, error = %e, "capture failed");
                warnings.push(format!("capture failed: {e}"));
                (None, CaptureDisposition::Failed)
            }
        };
        self.advance(ScenarioState::CaptureStarted);

        // Server. The one scenario-fatal step.
        let mut server_handle = self.start_server(spec, &mut warnings);
        let server_started = server_handle.is_some();
        self.advance(ScenarioState::ServerStarted);

        // Clients, staggered, then a deadline-bounded join.
        let mut clients: Vec<ManagedProcess> = Vec::new();
        let mut clients_killed = 0u32;
        if server_started {
            clients = self.start_clients(spec, &mut warnings);
            self.advance(ScenarioState::ClientsRunning);
            clients_killed = self.join_clients(&mut clients, &mut warnings);
        } else {
            tracing::error!(scenario = %spec.name, "no server, skipping clients");
            self.advance(ScenarioState::ClientsRunning);
        }
        let clients_spawned = clients.len() as u32;

        self.advance(ScenarioState::Draining);
        std::thread::sleep(DRAIN_DELAY);

        // Teardown, server first, each outcome independent of the other.
        if let Some(ref mut server) = server_handle {
            let uptime_s = server.elapsed().as_secs();
            let outcome = server.stop(STOP_GRACE);
            self.lock.unregister(server.pid);
            tracing::info!(scenario = %spec.name, %outcome, uptime_s, "server stopped");
        }
        self.advance(ScenarioState::ServerStopped);

        if let Some(ref mut cap) = capture_handle {
            let outcome = cap.stop(STOP_GRACE);
            self.lock.unregister(cap.pid);
            tracing::info!(scenario = %spec.name, %outcome, "capture stopped");
        }
        self.advance(ScenarioState::CaptureStopped);

        // Merge whatever exists.
        let inputs: Vec<PathBuf> = (1..=self.cfg.num_clients)
            .map(|i| self.paths.client_result(&spec.output_prefix, i))
            .collect();
        let merge_report = match merge::merge(&inputs, &self.paths.merged_result(&spec.output_prefix))
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(scenario = %spec.name, error = %e, "merge failed");
                warnings.push(format!("merge failed: {e}"));
                merge::MergeReport::default()
            }
        };
        if !merge_report.skipped.is_empty() {
            warnings.push(format!(
                "{} client file(s) missing or empty at merge",
                merge_report.skipped.len()
            ));
        }
        self.advance(ScenarioState::Merged);

        // Always executed, even after failures above: no scenario leaves an
        // impairment rule active on exit from this pipeline.
        if let Err(e) = gauntlet_netem::clear(&self.cfg.interface) {
            tracing::warn!(scenario = %spec.name, error = %e, "impairment clear failed");
            warnings.push(format!("impairment clear failed: {e}"));
        }
        self.advance(ScenarioState::ImpairmentCleared);
        self.advance(ScenarioState::Done);

        let report = ScenarioReport {
            name: spec.name.clone(),
            rule: spec.rule.to_string(),
            output_prefix: spec.output_prefix.clone(),
            impairment_confirmed,
            capture,
            server_started,
            clients_spawned,
            clients_completed: clients_spawned - clients_killed,
            clients_killed,
            merged_files: merge_report.merged_files,
            data_rows: merge_report.data_rows,
            skipped_files: merge_report.skipped,
            merged_written: merge_report.wrote_output,
            warnings,
            elapsed: started.elapsed(),
            state: self.state,
        };
        tracing::info!(
            scenario = %spec.name,
            rows = report.data_rows,
            degraded = report.degraded(),
            elapsed_s = report.elapsed.as_secs(),
            "scenario finished"
        );
        report
    }

    /// Spawn the server and confirm it survives the startup delay.
    fn start_server(
        &self,
        spec: &ScenarioSpec,
        warnings: &mut Vec<String>,
    ) -> Option<ManagedProcess> {
        let envs = vec![(
            "METRICS_OUTPUT_DIR".to_string(),
            self.paths.server_metrics.display().to_string(),
        )];
        let mut handle = match supervisor::spawn(
            ProcessKind::Server,
            &self.cfg.server_cmd[0],
            &self.cfg.server_cmd[1..],
            &envs,
            &self.paths.server_log(&spec.output_prefix),
        ) {
            Ok(h) => h,
            Err(e) => {
                warnings.push(format!("server failed to start: {e}"));
                return None;
            }
        };
        self.lock.register("server", handle.pid);

        std::thread::sleep(SERVER_STARTUP_DELAY);
        if !handle.is_alive() {
            self.lock.unregister(handle.pid);
            warnings.push(format!(
                "server exited during startup, see {}",
                handle.log_path.display()
            ));
            return None;
        }
        Some(handle)
    }

    fn start_clients(
        &self,
        spec: &ScenarioSpec,
        warnings: &mut Vec<String>,
    ) -> Vec<ManagedProcess> {
        let mut clients = Vec::with_capacity(self.cfg.num_clients as usize);
        for index in 1..=self.cfg.num_clients {
            if index > 1 {
                std::thread::sleep(CLIENT_STAGGER);
            }
            let mut args: Vec<String> = self.cfg.client_cmd[1..].to_vec();
            args.extend([
                "--client-id".to_string(),
                index.to_string(),
                "--duration".to_string(),
                self.cfg.duration_secs.to_string(),
                "--output".to_string(),
                self.paths
                    .client_result(&spec.output_prefix, index)
                    .display()
                    .to_string(),
                "--server".to_string(),
                "localhost".to_string(),
                "--port".to_string(),
                self.cfg.port.to_string(),
            ]);
            match supervisor::spawn(
                ProcessKind::Client,
                &self.cfg.client_cmd[0],
                &args,
                &[],
                &self.paths.client_log(&spec.output_prefix, index),
            ) {
                Ok(h) => {
                    self.lock.register("client", h.pid);
                    clients.push(h);
                }
                Err(e) => {
                    tracing::warn!(scenario = %spec.name, client = index, error = %e, "client failed to start");
                    warnings.push(format!("client {index} failed to start: {e}"));
                }
            }
        }
        clients
    }

    /// Wait for every client to reach a terminal state, with a wall-clock
    /// deadline of the client duration plus a margin. Stragglers past the
    /// deadline get the two-phase stop so one hung client cannot stall the
    /// whole run. Returns how many had to be stopped.
    fn join_clients(&self, clients: &mut [ManagedProcess], warnings: &mut Vec<String>) -> u32 {
        let deadline =
            Instant::now() + Duration::from_secs(self.cfg.duration_secs) + CLIENT_JOIN_MARGIN;
        let killed = loop {
            let mut alive = 0usize;
            for client in clients.iter_mut() {
                if client.is_alive() {
                    alive += 1;
                }
            }
            if alive == 0 {
                break 0;
            }
            if Instant::now() >= deadline {
                let mut killed = 0u32;
                for client in clients.iter_mut() {
                    if client.is_alive() {
                        let outcome = client.stop(STOP_GRACE);
                        tracing::warn!(pid = client.pid, %outcome, "client overran its duration");
                        killed += 1;
                    }
                }
                warnings.push(format!("{killed} client(s) overran the join deadline"));
                break killed;
            }
            std::thread::sleep(CLIENT_JOIN_POLL);
        };
        for client in clients.iter() {
            self.lock.unregister(client.pid);
        }
        killed
    }
}
