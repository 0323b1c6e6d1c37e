use crate::config::{substitute_env_vars, AgentConfig, Settings};
use crate::error::Result;
use crate::plugin::{discover_plugins, PluginSettings};
use crate::state::Metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// What `pluginsd check` found.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub directory: PathBuf,
    pub plugins: Vec<CheckedPlugin>,
    /// Effective configuration, defaults included.
    pub config: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedPlugin {
    pub name: String,
    pub filename: String,
    pub enabled: bool,
    pub update_every: u64,
    /// Command line the plugin would be started with, if enabled.
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options_error: Option<String>,
}

/// Resolve every plugin in the plugins directory without starting any.
pub fn check_plugins(config: &AgentConfig) -> Result<CheckReport> {
    let settings = Settings::from_store(config)?;
    let directory = settings.plugins.directory;
    let discovered = discover_plugins(&directory, config)?;

    let plugins = discovered
        .into_iter()
        .map(|plugin| {
            let (options, options_error) = match substitute_env_vars(&plugin.options) {
                Ok(options) => (options, None),
                Err(e) => (plugin.options.clone(), Some(e.to_string())),
            };
            let command = plugin.enabled.then(|| {
                PluginSettings::new(&directory, &plugin.filename, plugin.update_every, options)
                    .command
                    .to_string()
            });
            CheckedPlugin {
                name: plugin.name,
                filename: plugin.filename,
                enabled: plugin.enabled,
                update_every: plugin.update_every,
                command,
                options_error,
            }
        })
        .collect();

    Ok(CheckReport {
        directory,
        plugins,
        config: config.snapshot(),
    })
}

pub fn run_plugin_check(config: &AgentConfig, json: bool) -> Result<()> {
    info!("Checking plugins...");
    let report = check_plugins(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        "Found {} plugin(s) in {}",
        report.plugins.len(),
        report.directory.display()
    );
    for plugin in &report.plugins {
        match &plugin.command {
            Some(command) => info!(
                "  ✓ {} (every {}s): {}",
                plugin.name, plugin.update_every, command
            ),
            None => info!("  - {} (disabled)", plugin.name),
        }
        if let Some(error) = &plugin.options_error {
            warn!("  ! {}: {}", plugin.name, error);
        }
    }

    let metrics = Metrics::new();
    metrics.set_plugins_discovered(report.plugins.len());
    println!("{}", metrics.render());

    Ok(())
}
