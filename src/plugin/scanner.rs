//! Periodic scan of the plugins directory that keeps exactly one worker per
//! enabled plugin file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::descriptor::{PluginDescriptor, PluginSettings};
use super::process::ProcessSpawner;
use super::worker::WorkerSupervisor;
use crate::config::schema::{
    interval, plugin_section, DEFAULT_CHECK_EVERY, DEFAULT_PLUGINS_DIRECTORY, DEFAULT_UPDATE_EVERY,
    ENABLED_BY_DEFAULT, KEY_CHECK_EVERY, KEY_COMMAND_OPTIONS, KEY_ENABLE_NEW_PLUGINS,
    KEY_EXTENSIONS, KEY_PLUGINS_DIRECTORY, KEY_UPDATE_EVERY, SECTION_GLOBAL, SECTION_PLUGINS,
};
use crate::config::{substitute_env_vars, ConfigStore};
use crate::error::ScanError;
use crate::state::SupervisorState;
use crate::storage::ChartStore;

pub const PLUGIN_SUFFIX: &str = ".plugin";

/// A plugin file found in the directory, with its configuration resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredPlugin {
    pub name: String,
    pub filename: String,
    pub id: String,
    pub enabled: bool,
    pub update_every: u64,
    pub options: String,
}

/// Outcome of one pass over the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Plugin files seen, enabled or not.
    pub found: usize,
    /// Filenames a worker was started for during this pass.
    pub started: Vec<String>,
}

/// Plugin name for `filename`, if it is a plugin file at all.
pub fn plugin_name(filename: &str) -> Option<&str> {
    filename
        .strip_suffix(PLUGIN_SUFFIX)
        .filter(|name| !name.is_empty())
}

pub fn plugins_directory(config: &dyn ConfigStore) -> PathBuf {
    PathBuf::from(config.get_string(SECTION_PLUGINS, KEY_PLUGINS_DIRECTORY, DEFAULT_PLUGINS_DIRECTORY))
}

/// List plugin files in `directory` and resolve their configuration. Nothing
/// is spawned. Entries come back sorted by filename.
pub fn discover_plugins(
    directory: &Path,
    config: &dyn ConfigStore,
) -> Result<Vec<DiscoveredPlugin>, ScanError> {
    let entries = std::fs::read_dir(directory).map_err(|source| ScanError::DirectoryUnreadable {
        path: directory.to_path_buf(),
        source,
    })?;

    let enable_new = config.get_bool(SECTION_PLUGINS, KEY_ENABLE_NEW_PLUGINS, false);
    let global_every = config.get_int(SECTION_GLOBAL, KEY_UPDATE_EVERY, DEFAULT_UPDATE_EVERY);

    let mut filenames: Vec<String> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.file_name().to_string_lossy().into_owned()),
            Err(e) => {
                warn!(directory = %directory.display(), "Skipping unreadable entry: {}", e);
                None
            }
        })
        .collect();
    filenames.sort();

    let mut plugins = Vec::new();
    for filename in filenames {
        let Some(name) = plugin_name(&filename) else {
            debug!(filename = %filename, "Not a plugin file");
            continue;
        };

        let default_enabled = enable_new || ENABLED_BY_DEFAULT.contains(&name);
        let enabled = config.get_bool(SECTION_PLUGINS, name, default_enabled);

        let id = plugin_section(name);
        let (update_every, options) = if enabled {
            (
                interval(config.get_int(&id, KEY_UPDATE_EVERY, global_every)),
                config.get_string(&id, KEY_COMMAND_OPTIONS, ""),
            )
        } else {
            (interval(global_every), String::new())
        };

        plugins.push(DiscoveredPlugin {
            name: name.to_string(),
            id,
            filename,
            enabled,
            update_every,
            options,
        });
    }

    Ok(plugins)
}

/// Scans the plugins directory and starts workers.
pub struct DiscoveryScanner {
    state: Arc<SupervisorState>,
    config: Arc<dyn ConfigStore>,
    spawner: Arc<dyn ProcessSpawner>,
    store: Arc<dyn ChartStore>,
}

impl DiscoveryScanner {
    pub fn new(
        state: Arc<SupervisorState>,
        config: Arc<dyn ConfigStore>,
        spawner: Arc<dyn ProcessSpawner>,
        store: Arc<dyn ChartStore>,
    ) -> Self {
        Self {
            state,
            config,
            spawner,
            store,
        }
    }

    /// Scan until the directory becomes unreadable or shutdown is requested.
    pub async fn run(self) {
        let mut shutdown_rx = self.state.subscribe();
        info!("Plugin scanner started");

        loop {
            if self.state.is_shutting_down() {
                break;
            }

            match self.scan_off_runtime().await {
                Ok(report) => debug!(
                    found = report.found,
                    started = report.started.len(),
                    "Plugin scan complete"
                ),
                Err(e) => {
                    error!("{}, plugin scanner exits", e);
                    break;
                }
            }

            let check_every = interval(self.config.get_int(
                SECTION_PLUGINS,
                KEY_CHECK_EVERY,
                DEFAULT_CHECK_EVERY,
            ));
            tokio::select! {
                _ = sleep(Duration::from_secs(check_every)) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Plugin scanner stopped");
    }

    /// One pass: arm and start a worker for every enabled plugin without one.
    pub fn scan_once(&self) -> Result<ScanReport, ScanError> {
        let directory = plugins_directory(self.config.as_ref());
        let discovered = discover_plugins(&directory, self.config.as_ref())?;
        Ok(self.start_discovered(&directory, discovered))
    }

    /// [`Self::scan_once`] with the directory read on the blocking pool.
    async fn scan_off_runtime(&self) -> Result<ScanReport, ScanError> {
        let directory = plugins_directory(self.config.as_ref());
        let config = self.config.clone();
        let read_from = directory.clone();
        let discovered = tokio::task::spawn_blocking(move || {
            discover_plugins(&read_from, config.as_ref())
        })
        .await
        .map_err(|e| ScanError::DirectoryUnreadable {
            path: directory.clone(),
            source: std::io::Error::other(e),
        })??;
        Ok(self.start_discovered(&directory, discovered))
    }

    fn start_discovered(&self, directory: &Path, discovered: Vec<DiscoveredPlugin>) -> ScanReport {
        let extensions = self.config.get_bool(SECTION_PLUGINS, KEY_EXTENSIONS, false);

        let mut report = ScanReport {
            found: discovered.len(),
            started: Vec::new(),
        };

        for plugin in discovered {
            if !plugin.enabled {
                debug!(plugin = %plugin.id, "Plugin is not enabled");
                continue;
            }

            let existing = self.state.plugin(&plugin.filename);
            if existing.as_ref().is_some_and(|descriptor| !descriptor.is_obsolete()) {
                continue;
            }

            let settings = self.settings_for(directory, &plugin);
            let descriptor = match existing {
                Some(descriptor) => {
                    descriptor.rearm(settings);
                    descriptor
                }
                None => {
                    let descriptor = Arc::new(PluginDescriptor::new(&plugin.name, &plugin.filename, settings));
                    self.state
                        .plugins
                        .insert(plugin.filename.clone(), descriptor.clone());
                    descriptor
                }
            };

            // The protocol disabled it in an earlier run.
            if !descriptor.is_enabled() {
                descriptor.mark_obsolete();
                continue;
            }

            if self.start_worker(descriptor, extensions) {
                report.started.push(plugin.filename);
            }
        }

        self.state.metrics.set_plugins_discovered(self.state.plugins.len());
        report
    }

    fn settings_for(&self, directory: &Path, plugin: &DiscoveredPlugin) -> PluginSettings {
        let options = match substitute_env_vars(&plugin.options) {
            Ok(options) => options,
            Err(e) => {
                warn!(plugin = %plugin.id, "{}, using command options as written", e);
                plugin.options.clone()
            }
        };

        PluginSettings::new(directory, &plugin.filename, plugin.update_every, options)
    }

    fn start_worker(&self, descriptor: Arc<PluginDescriptor>, extensions: bool) -> bool {
        // Subscribe before checking the flag: shutdown sets it before broadcasting.
        let shutdown_rx = self.state.subscribe();
        if self.state.is_shutting_down() {
            descriptor.mark_obsolete();
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(plugin = %descriptor.id(), "Cannot start worker: {}", e);
                descriptor.mark_obsolete();
                return false;
            }
        };

        let worker = WorkerSupervisor::new(
            descriptor.clone(),
            self.spawner.clone(),
            self.store.clone(),
            self.state.metrics.clone(),
            shutdown_rx,
        )
        .with_extensions(extensions);

        info!(
            plugin = %descriptor.id(),
            update_every = descriptor.update_every(),
            "Starting worker"
        );
        let handle = runtime.spawn(worker.run());
        self.state
            .workers
            .insert(descriptor.filename().to_string(), handle);

        // Shutdown may have collected the handles before this insert.
        if self.state.is_shutting_down() {
            if let Some((_, handle)) = self.state.workers.remove(descriptor.filename()) {
                warn!(plugin = %descriptor.id(), "Worker started during shutdown, aborting it");
                handle.abort();
                descriptor.mark_obsolete();
            }
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::storage::MemoryStore;
    use crate::test_utils::{productive_lines, ScriptedRun, ScriptedSpawner};
    use tempfile::TempDir;

    fn plugin_dir(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "#!/bin/sh\n").unwrap();
        }
        dir
    }

    fn config_for(dir: &TempDir) -> Arc<AgentConfig> {
        let config = Arc::new(AgentConfig::new());
        config.set(SECTION_PLUGINS, KEY_PLUGINS_DIRECTORY, dir.path().to_string_lossy());
        config
    }

    fn scanner(
        config: Arc<AgentConfig>,
        spawner: Arc<ScriptedSpawner>,
    ) -> (DiscoveryScanner, Arc<SupervisorState>) {
        let (state, _rx) = SupervisorState::new();
        let scanner = DiscoveryScanner::new(state.clone(), config, spawner, MemoryStore::new());
        (scanner, state)
    }

    #[test]
    fn test_plugin_name() {
        assert_eq!(plugin_name("apps.plugin"), Some("apps"));
        assert_eq!(plugin_name("tc-qos.plugin"), Some("tc-qos"));
        assert_eq!(plugin_name(".plugin"), None);
        assert_eq!(plugin_name("apps.plugin.bak"), None);
        assert_eq!(plugin_name("README"), None);
    }

    #[test]
    fn test_discover_applies_enable_defaults() {
        let dir = plugin_dir(&["apps.plugin", "charts.plugin", "notes.txt", ".plugin"]);
        let config = config_for(&dir);
        config.set("plugin:apps", "update every", "5");

        let plugins = discover_plugins(dir.path(), config.as_ref()).unwrap();

        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["apps", "charts"]);
        assert!(plugins[0].enabled);
        assert_eq!(plugins[0].update_every, 5);
        assert!(!plugins[1].enabled);
    }

    #[test]
    fn test_discover_enables_new_plugins_when_configured() {
        let dir = plugin_dir(&["charts.plugin"]);
        let config = config_for(&dir);
        config.set(SECTION_PLUGINS, KEY_ENABLE_NEW_PLUGINS, "yes");
        config.set(SECTION_GLOBAL, KEY_UPDATE_EVERY, "2");
        config.set("plugin:charts", KEY_COMMAND_OPTIONS, "--all");

        let plugins = discover_plugins(dir.path(), config.as_ref()).unwrap();

        assert!(plugins[0].enabled);
        assert_eq!(plugins[0].update_every, 2);
        assert_eq!(plugins[0].options, "--all");
        assert_eq!(plugins[0].id, "plugin:charts");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let config = AgentConfig::new();
        let result = discover_plugins(Path::new("/nonexistent/plugins.d"), &config);
        assert!(matches!(result, Err(ScanError::DirectoryUnreadable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_scans_start_one_worker() {
        let dir = plugin_dir(&["apps.plugin"]);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&productive_lines())]);
        let (scanner, state) = scanner(config_for(&dir), spawner.clone());

        let first = scanner.scan_once().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = scanner.scan_once().unwrap();

        assert_eq!(first.started, vec!["apps.plugin"]);
        assert!(second.started.is_empty());
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(state.workers.len(), 1);
        assert_eq!(state.metrics.plugins_discovered.get(), 1);

        state.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_obsolete_descriptor_is_rearmed() {
        let dir = plugin_dir(&["apps.plugin"]);
        // The first spawn fails, which leaves the plugin enabled but obsolete.
        let spawner = ScriptedSpawner::new(vec![]);
        let (scanner, state) = scanner(config_for(&dir), spawner.clone());

        scanner.scan_once().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let descriptor = state.plugin("apps.plugin").unwrap();
        assert!(descriptor.is_obsolete());
        assert!(descriptor.is_enabled());

        spawner.push(ScriptedRun::hang(&productive_lines()));
        let report = scanner.scan_once().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(report.started, vec!["apps.plugin"]);
        assert_eq!(spawner.spawn_count(), 1);
        assert!(Arc::ptr_eq(&descriptor, &state.plugin("apps.plugin").unwrap()));
        assert!(!descriptor.is_obsolete());

        state.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_disabled_plugin_is_not_restarted() {
        let dir = plugin_dir(&["apps.plugin"]);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&["GARBAGE"])]);
        let (scanner, state) = scanner(config_for(&dir), spawner.clone());

        scanner.scan_once().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let descriptor = state.plugin("apps.plugin").unwrap();
        assert!(!descriptor.is_enabled());
        assert!(descriptor.is_obsolete());

        spawner.push(ScriptedRun::hang(&productive_lines()));
        let report = scanner.scan_once().unwrap();

        assert!(report.started.is_empty());
        assert_eq!(spawner.spawn_count(), 1);
        assert!(!descriptor.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_line_uses_directory_and_options() {
        let dir = plugin_dir(&["apps.plugin"]);
        let config = config_for(&dir);
        config.set("plugin:apps", KEY_UPDATE_EVERY, "3");
        config.set("plugin:apps", KEY_COMMAND_OPTIONS, "--depth ${PLUGINSD_SCANNER_UNSET:-2}");
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&[])]);
        let (scanner, state) = scanner(config, spawner.clone());

        scanner.scan_once().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let spawns = spawner.spawns();
        let command = &spawns[0].command;
        assert_eq!(command.program, dir.path().join("apps.plugin"));
        assert_eq!(command.working_dir, dir.path());
        assert_eq!(command.update_every, 3);
        assert_eq!(command.options, "--depth 2");

        state.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_scan_during_shutdown_starts_nothing() {
        let dir = plugin_dir(&["apps.plugin"]);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&[])]);
        let (scanner, state) = scanner(config_for(&dir), spawner.clone());

        state.shutdown(Duration::from_secs(1)).await;
        let report = scanner.scan_once().unwrap();

        assert!(report.started.is_empty());
        assert!(state.workers.is_empty());
        assert!(state.plugin("apps.plugin").unwrap().is_obsolete());
        tokio::task::yield_now().await;
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_run_starts_workers() {
        let dir = plugin_dir(&["apps.plugin"]);
        let spawner = ScriptedSpawner::new(vec![ScriptedRun::hang(&productive_lines())]);
        let (scanner, state) = scanner(config_for(&dir), spawner.clone());

        let handle = tokio::spawn(scanner.run());
        for _ in 0..100 {
            if spawner.spawn_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(state.workers.len(), 1);

        state.shutdown(Duration::from_secs(1)).await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(state.plugin("apps.plugin").unwrap().is_obsolete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_when_directory_is_unreadable() {
        let config = Arc::new(AgentConfig::new());
        config.set(SECTION_PLUGINS, KEY_PLUGINS_DIRECTORY, "/nonexistent/plugins.d");
        let (scanner, _state) = scanner(config, ScriptedSpawner::new(vec![]));

        tokio::time::timeout(Duration::from_secs(1), scanner.run())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let dir = plugin_dir(&[]);
        let (scanner, state) = scanner(config_for(&dir), ScriptedSpawner::new(vec![]));

        let handle = tokio::spawn(scanner.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        state.shutdown(Duration::from_secs(1)).await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
