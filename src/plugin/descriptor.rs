//! Persistent per-plugin record shared between the scanner and a worker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::process::CommandLine;
use crate::config::clamp_interval;
use super::worker::WorkerState;

/// Settings the scanner (re)computes every time it arms a descriptor.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub full_path: PathBuf,
    pub command: CommandLine,
    pub started_at: DateTime<Utc>,
}

/// One discovered plugin executable.
///
/// Descriptors live for the lifetime of the supervisor and are re-armed, not
/// replaced, when a plugin is started again. The scanner writes the settings
/// and clears `obsolete`; the worker owns `pid`, `enabled` and `state` while it
/// runs and sets `obsolete` when it exits.
#[derive(Debug)]
pub struct PluginDescriptor {
    id: String,
    name: String,
    filename: String,
    settings: ArcSwap<PluginSettings>,
    update_every: AtomicU64,
    enabled: AtomicBool,
    obsolete: AtomicBool,
    pid: AtomicU32,
    state: AtomicU8,
}

/// Serializable view of a descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub full_path: PathBuf,
    pub command: String,
    pub update_every: u64,
    pub enabled: bool,
    pub obsolete: bool,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
}

impl PluginDescriptor {
    /// A freshly armed, enabled descriptor with no worker yet attached.
    pub fn new(name: &str, filename: &str, settings: PluginSettings) -> Self {
        let update_every = settings.command.update_every;
        Self {
            id: format!("plugin:{name}"),
            name: name.to_string(),
            filename: filename.to_string(),
            settings: ArcSwap::from_pointee(settings),
            update_every: AtomicU64::new(update_every),
            enabled: AtomicBool::new(true),
            obsolete: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            state: AtomicU8::new(WorkerState::Spawning as u8),
        }
    }

    /// Refresh the settings of an obsolete descriptor and hand it to a new worker.
    pub fn rearm(&self, settings: PluginSettings) {
        self.update_every
            .store(settings.command.update_every, Ordering::SeqCst);
        self.settings.store(Arc::new(settings));
        self.set_state(WorkerState::Spawning);
        self.obsolete.store(false, Ordering::SeqCst);
    }

    /// Configuration section of the plugin (`plugin:<name>`).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn full_path(&self) -> PathBuf {
        self.settings.load().full_path.clone()
    }

    pub fn command(&self) -> CommandLine {
        self.settings.load().command.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.settings.load().started_at
    }

    /// Collection interval in seconds.
    pub fn update_every(&self) -> u64 {
        self.update_every.load(Ordering::SeqCst)
    }

    pub fn set_update_every(&self, seconds: u64) {
        self.update_every.store(clamp_interval(seconds), Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Permanently disable the plugin. Nothing re-enables a descriptor.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
    }

    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    /// Pid of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    pub fn clear_pid(&self) {
        self.pid.store(0, Ordering::SeqCst);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn info(&self) -> PluginInfo {
        let settings = self.settings.load();
        PluginInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            filename: self.filename.clone(),
            full_path: settings.full_path.clone(),
            command: settings.command.to_string(),
            update_every: self.update_every(),
            enabled: self.is_enabled(),
            obsolete: self.is_obsolete(),
            pid: self.pid(),
            state: self.state(),
            started_at: settings.started_at,
        }
    }
}

impl PluginSettings {
    pub fn new(directory: &Path, filename: &str, update_every: u64, options: String) -> Self {
        let full_path = directory.join(filename);
        Self {
            command: CommandLine {
                program: full_path.clone(),
                update_every: clamp_interval(update_every),
                options,
                working_dir: directory.to_path_buf(),
            },
            full_path,
            started_at: Utc::now(),
        }
    }
}
