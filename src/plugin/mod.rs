//! Collector plugin supervision
//!
//! Collector plugins are executables in the plugins directory named
//! `<name>.plugin`. Each enabled plugin is run as a long-lived child process
//! whose standard output speaks the line protocol in [`crate::protocol`].
//!
//! # Architecture
//!
//! - **One task per plugin**: a [`WorkerSupervisor`] owns the whole lifecycle of
//!   one plugin and never shares its child with anything else
//! - **Restart with backoff**: a plugin that exits is started again after its
//!   interval, or ten intervals when it produced nothing
//! - **Sticky disable**: a plugin that breaks the protocol or asks to be
//!   disabled is never started again
//! - **Directory driven**: the [`DiscoveryScanner`] picks up new plugin files
//!   and restarts plugins whose worker gave up
//!
//! # Modules
//!
//! - `descriptor`: the per-plugin record shared between scanner and worker
//! - `process`: spawning, bounded line reading and signalling of children
//! - `worker`: the per-plugin lifecycle state machine
//! - `scanner`: directory discovery and worker startup

pub mod descriptor;
pub mod process;
pub mod scanner;
pub mod worker;

pub use descriptor::{PluginDescriptor, PluginInfo, PluginSettings};
pub use process::{
    CommandLine, LineReader, PluginProcess, PluginSignal, ProcessSpawner, ShellSpawner,
    PLUGINSD_LINE_MAX,
};
pub use scanner::{discover_plugins, plugin_name, DiscoveredPlugin, DiscoveryScanner, ScanReport};
pub use worker::{WakeSchedule, WorkerState, WorkerSupervisor};
