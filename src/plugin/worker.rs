//! One supervised plugin: spawn, read its output through a protocol session,
//! reap, back off and respawn until the plugin is disabled or the agent stops.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::descriptor::PluginDescriptor;
use super::process::{PluginProcess, PluginSignal, ProcessSpawner};
use crate::protocol::{Flow, ProtocolSession};
use crate::state::Metrics;
use crate::storage::ChartStore;

/// Multiplier applied to the interval after a run that produced no samples.
pub const UNPRODUCTIVE_BACKOFF: u32 = 10;

/// Lifecycle of a worker, mirrored into its descriptor for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WorkerState {
    Spawning = 0,
    Reading = 1,
    Draining = 2,
    Sleeping = 3,
    Terminated = 4,
}

impl WorkerState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Spawning,
            1 => Self::Reading,
            2 => Self::Draining,
            3 => Self::Sleeping,
            _ => Self::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Reading => "reading",
            Self::Draining => "draining",
            Self::Sleeping => "sleeping",
            Self::Terminated => "terminated",
        }
    }
}

/// Sleep schedule for plugins that stop themselves with
/// `STOPPING_WAKE_ME_UP_PLEASE`.
///
/// The first pause sleeps a whole interval. Afterwards the time the plugin
/// worked since the previous wake-up is subtracted from the interval, with half
/// an interval as the floor once the plugin works for half an interval or more.
#[derive(Debug, Default, Clone)]
pub struct WakeSchedule {
    last_pause: Option<Instant>,
    slept: Duration,
}

impl WakeSchedule {
    pub fn next_sleep(&mut self, now: Instant, interval: Duration) -> Duration {
        let sleep_for = match self.last_pause {
            None => interval,
            Some(last) => {
                let worked = now.saturating_duration_since(last).saturating_sub(self.slept);
                debug!(
                    worked_ms = worked.as_millis() as u64,
                    slept_ms = self.slept.as_millis() as u64,
                    "Previous plugin loop finished"
                );
                if worked < interval / 2 {
                    interval - worked
                } else {
                    interval / 2
                }
            }
        };
        self.last_pause = Some(now);
        self.slept = sleep_for;
        sleep_for
    }
}

/// How a run's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    EndOfStream,
    ReadFailed,
    Disabled,
    Paused,
    Shutdown,
}

enum Next {
    Line(Result<Option<String>, crate::error::ProcessError>),
    Shutdown,
}

/// Drives one plugin through `Spawning → Reading → Draining → Sleeping` until it
/// is disabled, cannot be spawned, or the agent shuts down.
pub struct WorkerSupervisor {
    plugin: Arc<PluginDescriptor>,
    spawner: Arc<dyn ProcessSpawner>,
    store: Arc<dyn ChartStore>,
    metrics: Arc<Metrics>,
    shutdown_rx: broadcast::Receiver<()>,
    extensions: bool,
    wake: WakeSchedule,
}

impl WorkerSupervisor {
    pub fn new(
        plugin: Arc<PluginDescriptor>,
        spawner: Arc<dyn ProcessSpawner>,
        store: Arc<dyn ChartStore>,
        metrics: Arc<Metrics>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            plugin,
            spawner,
            store,
            metrics,
            shutdown_rx,
            extensions: false,
            wake: WakeSchedule::default(),
        }
    }

    /// Accept `MYPID` and `STOPPING_WAKE_ME_UP_PLEASE`.
    pub fn with_extensions(mut self, extensions: bool) -> Self {
        self.extensions = extensions;
        self
    }

    pub async fn run(mut self) {
        info!(plugin = %self.plugin.id(), "Worker started");
        self.metrics.worker_started();

        loop {
            self.plugin.set_state(WorkerState::Spawning);
            let command = self.plugin.command();
            let mut process = match self.spawner.spawn(&command).await {
                Ok(process) => process,
                Err(e) => {
                    error!(
                        plugin = %self.plugin.id(),
                        command = %command,
                        "Cannot start plugin: {}", e
                    );
                    self.metrics.record_spawn_failure();
                    break;
                }
            };
            self.metrics.record_spawn();
            self.plugin.set_pid(process.pid());
            info!(
                plugin = %self.plugin.id(),
                pid = process.pid(),
                "'{}' running", self.plugin.full_path().display()
            );

            self.plugin.set_state(WorkerState::Reading);
            let (end, samples) = self.read_output(process.as_mut()).await;

            self.plugin.set_state(WorkerState::Draining);
            let pid = process.pid();
            match process.reap().await {
                Ok(code) => info!(plugin = %self.plugin.id(), pid, ?code, "Plugin stopped"),
                Err(e) => warn!(plugin = %self.plugin.id(), pid, "{}", e),
            }
            self.plugin.clear_pid();

            if end == RunEnd::Shutdown || !self.plugin.is_enabled() {
                break;
            }

            self.plugin.set_state(WorkerState::Sleeping);
            let interval = Duration::from_secs(self.plugin.update_every());
            let delay = if samples == 0 {
                warn!(
                    plugin = %self.plugin.id(),
                    pid,
                    "Plugin does not generate useful output, waiting a bit before starting it again"
                );
                self.metrics.record_unproductive_run();
                interval.saturating_mul(UNPRODUCTIVE_BACKOFF)
            } else {
                interval
            };

            if !self.sleep_unless_shutdown(delay).await {
                break;
            }
        }

        self.plugin.set_state(WorkerState::Terminated);
        self.plugin.mark_obsolete();
        self.metrics.worker_stopped();
        info!(
            plugin = %self.plugin.id(),
            enabled = self.plugin.is_enabled(),
            "Worker exited"
        );
    }

    /// Feed every line of one run into a fresh session. Returns how the run
    /// ended and how many samples it produced.
    async fn read_output(&mut self, process: &mut dyn PluginProcess) -> (RunEnd, u64) {
        let mut session =
            ProtocolSession::new(self.plugin.clone(), self.store.clone(), self.extensions);

        let end = loop {
            let next = tokio::select! {
                line = process.next_line() => Next::Line(line),
                _ = self.shutdown_rx.recv() => Next::Shutdown,
            };

            let line = match next {
                Next::Line(Ok(Some(line))) => line,
                Next::Line(Ok(None)) => break RunEnd::EndOfStream,
                Next::Line(Err(e)) => {
                    warn!(plugin = %self.plugin.id(), "{}", e);
                    break RunEnd::ReadFailed;
                }
                Next::Shutdown => {
                    self.send(process, PluginSignal::Terminate);
                    break RunEnd::Shutdown;
                }
            };

            match session.process_line(&line) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disable) => {
                    info!(
                        plugin = %self.plugin.id(),
                        filename = self.plugin.filename(),
                        "Plugin called DISABLE, disabling it"
                    );
                    self.disable(process);
                    break RunEnd::Disabled;
                }
                Ok(Flow::ReportedPid(pid)) => {
                    info!(plugin = %self.plugin.id(), pid, "Plugin reported its pid");
                    self.plugin.set_pid(pid);
                    process.redirect_signals(pid);
                }
                Ok(Flow::Pause) => break self.pause(process).await,
                Err(violation) => {
                    error!(
                        plugin = %self.plugin.id(),
                        filename = self.plugin.filename(),
                        line = %line,
                        "{}, disabling plugin", violation
                    );
                    self.metrics.record_protocol_violation();
                    self.disable(process);
                    break RunEnd::Disabled;
                }
            }
        };

        let samples = session.samples();
        self.metrics.record_samples(samples);
        (end, samples)
    }

    async fn pause(&mut self, process: &mut dyn PluginProcess) -> RunEnd {
        let interval = Duration::from_secs(self.plugin.update_every());
        let delay = self.wake.next_sleep(Instant::now(), interval);
        info!(
            plugin = %self.plugin.id(),
            delay_ms = delay.as_millis() as u64,
            "Plugin stopped itself, will wake it up with SIGCONT"
        );

        if self.sleep_unless_shutdown(delay).await {
            self.send(process, PluginSignal::Continue);
            RunEnd::Paused
        } else {
            self.send(process, PluginSignal::Terminate);
            RunEnd::Shutdown
        }
    }

    fn disable(&self, process: &mut dyn PluginProcess) {
        self.plugin.disable();
        self.send(process, PluginSignal::Terminate);
    }

    fn send(&self, process: &mut dyn PluginProcess, signal: PluginSignal) {
        if let Err(e) = process.signal(signal) {
            warn!(plugin = %self.plugin.id(), "{}", e);
        }
    }

    /// Returns `false` when shutdown was requested before `delay` elapsed.
    async fn sleep_unless_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => true,
            _ = self.shutdown_rx.recv() => false,
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod worker_tests;
