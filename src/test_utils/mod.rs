use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::error::ProcessError;
use crate::plugin::{CommandLine, PluginDescriptor, PluginProcess, PluginSettings, PluginSignal, ProcessSpawner};

/// What one scripted process does once spawned.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    /// Print the lines, then close stdout.
    Lines(Vec<String>),
    /// Print the lines, then stay silent until the test ends.
    Hang(Vec<String>),
}

impl ScriptedRun {
    pub fn lines(lines: &[&str]) -> Self {
        Self::Lines(lines.iter().map(|line| line.to_string()).collect())
    }

    pub fn hang(lines: &[&str]) -> Self {
        Self::Hang(lines.iter().map(|line| line.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRecord {
    pub pid: u32,
    pub signal: PluginSignal,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub command: CommandLine,
    pub pid: u32,
    pub at: Instant,
}

/// Spawner that plays back a queue of scripted runs. Once the queue is empty
/// every spawn fails.
pub struct ScriptedSpawner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    spawns: Mutex<Vec<SpawnRecord>>,
    signals: Arc<Mutex<Vec<SignalRecord>>>,
    next_pid: AtomicU32,
}

impl ScriptedSpawner {
    pub fn new(runs: Vec<ScriptedRun>) -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(runs.into()),
            spawns: Mutex::new(Vec::new()),
            signals: Arc::new(Mutex::new(Vec::new())),
            next_pid: AtomicU32::new(1000),
        })
    }

    pub fn push(&self, run: ScriptedRun) {
        self.runs.lock().unwrap().push_back(run);
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.spawns.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }

    pub fn signals(&self) -> Vec<SignalRecord> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSpawner for ScriptedSpawner {
    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn PluginProcess>, ProcessError> {
        let run = self.runs.lock().unwrap().pop_front();
        let Some(run) = run else {
            return Err(ProcessError::SpawnFailed {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no scripted run left"),
            });
        };

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.spawns.lock().unwrap().push(SpawnRecord {
            command: command.clone(),
            pid,
            at: Instant::now(),
        });

        let (lines, hang) = match run {
            ScriptedRun::Lines(lines) => (lines, false),
            ScriptedRun::Hang(lines) => (lines, true),
        };
        Ok(Box::new(ScriptedProcess {
            pid,
            signal_pid: pid,
            lines: lines.into(),
            hang,
            terminated: false,
            signals: self.signals.clone(),
        }))
    }
}

pub struct ScriptedProcess {
    pid: u32,
    signal_pid: u32,
    lines: VecDeque<String>,
    hang: bool,
    terminated: bool,
    signals: Arc<Mutex<Vec<SignalRecord>>>,
}

#[async_trait]
impl PluginProcess for ScriptedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn next_line(&mut self) -> Result<Option<String>, ProcessError> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if self.hang && !self.terminated {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    fn redirect_signals(&mut self, pid: u32) {
        self.signal_pid = pid;
    }

    fn signal(&mut self, signal: PluginSignal) -> Result<(), ProcessError> {
        if signal == PluginSignal::Terminate {
            self.terminated = true;
        }
        self.signals.lock().unwrap().push(SignalRecord {
            pid: self.signal_pid,
            signal,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn reap(&mut self) -> Result<Option<i32>, ProcessError> {
        Ok(if self.terminated { None } else { Some(0) })
    }
}

/// Descriptor for `<name>.plugin` in a fake directory.
pub fn test_descriptor(name: &str, update_every: u64) -> Arc<PluginDescriptor> {
    let filename = format!("{name}.plugin");
    let settings = PluginSettings::new(Path::new("/plugins.d"), &filename, update_every, String::new());
    Arc::new(PluginDescriptor::new(name, &filename, settings))
}

/// One complete, productive collection for chart `test.chart`.
pub fn productive_lines() -> Vec<&'static str> {
    vec![
        "CHART test.chart '' 'Test chart' units",
        "DIMENSION x",
        "BEGIN test.chart",
        "SET x = 1",
        "END",
    ]
}
