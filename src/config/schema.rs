use serde::Serialize;
use std::path::PathBuf;

use super::store::ConfigStore;
use crate::error::{ConfigError, Result};

pub const SECTION_GLOBAL: &str = "global";
pub const SECTION_PLUGINS: &str = "plugins";
pub const SECTION_LOGGING: &str = "logging";

pub const KEY_UPDATE_EVERY: &str = "update every";
pub const KEY_PLUGINS_DIRECTORY: &str = "plugins directory";
pub const KEY_ENABLE_NEW_PLUGINS: &str = "enable running new plugins";
pub const KEY_CHECK_EVERY: &str = "check for new plugins every";
pub const KEY_EXTENSIONS: &str = "enable handshake extensions";
pub const KEY_COMMAND_OPTIONS: &str = "command options";
pub const KEY_LOG_LEVEL: &str = "level";
pub const KEY_LOG_FORMAT: &str = "format";
pub const KEY_LOG_DIRECTORY: &str = "directory";

/// Setting names the agent reads. Any other key, such as a plugin name in
/// `[plugins]`, is an identifier and is kept as written.
pub const KNOWN_KEYS: &[&str] = &[
    KEY_UPDATE_EVERY,
    KEY_PLUGINS_DIRECTORY,
    KEY_ENABLE_NEW_PLUGINS,
    KEY_CHECK_EVERY,
    KEY_EXTENSIONS,
    KEY_COMMAND_OPTIONS,
    KEY_LOG_LEVEL,
    KEY_LOG_FORMAT,
    KEY_LOG_DIRECTORY,
];

pub const DEFAULT_UPDATE_EVERY: i64 = 1;
pub const DEFAULT_PLUGINS_DIRECTORY: &str = "/usr/libexec/pluginsd/plugins.d";
pub const DEFAULT_CHECK_EVERY: i64 = 60;

/// Longest interval accepted from configuration or a plugin, in seconds.
pub const MAX_UPDATE_EVERY: u64 = 86_400;

/// Plugins enabled even when running new plugins is off.
pub const ENABLED_BY_DEFAULT: &[&str] = &["apps"];

/// Configuration section of one plugin.
pub fn plugin_section(name: &str) -> String {
    format!("plugin:{name}")
}

/// Typed view over the configuration store, resolved once at startup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub update_every: u64,
    pub plugins: PluginsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginsSettings {
    pub directory: PathBuf,
    pub enable_new_plugins: bool,
    pub check_every: u64,
    pub extensions: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Settings {
    pub fn from_store(store: &dyn ConfigStore) -> Result<Self> {
        let update_every = interval(store.get_int(SECTION_GLOBAL, KEY_UPDATE_EVERY, DEFAULT_UPDATE_EVERY));

        let directory = store.get_string(SECTION_PLUGINS, KEY_PLUGINS_DIRECTORY, DEFAULT_PLUGINS_DIRECTORY);
        if directory.trim().is_empty() {
            return Err(ConfigError::Validation("plugins directory must not be empty".into()).into());
        }

        let format = match store.get_string(SECTION_LOGGING, KEY_LOG_FORMAT, "text").as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Validation(format!(
                    "Unknown logging format '{other}', use 'text' or 'json'"
                ))
                .into())
            }
        };
        let log_directory = store.get_string(SECTION_LOGGING, KEY_LOG_DIRECTORY, "");

        Ok(Self {
            update_every,
            plugins: PluginsSettings {
                directory: PathBuf::from(directory),
                enable_new_plugins: store.get_bool(SECTION_PLUGINS, KEY_ENABLE_NEW_PLUGINS, false),
                check_every: interval(store.get_int(SECTION_PLUGINS, KEY_CHECK_EVERY, DEFAULT_CHECK_EVERY)),
                extensions: store.get_bool(SECTION_PLUGINS, KEY_EXTENSIONS, false),
            },
            logging: LoggingSettings {
                level: store.get_string(SECTION_LOGGING, KEY_LOG_LEVEL, "info"),
                format,
                directory: (!log_directory.is_empty()).then(|| PathBuf::from(log_directory)),
            },
        })
    }
}

/// Intervals are whole seconds between one and [`MAX_UPDATE_EVERY`].
pub fn interval(seconds: i64) -> u64 {
    clamp_interval(u64::try_from(seconds).unwrap_or(0))
}

pub fn clamp_interval(seconds: u64) -> u64 {
    seconds.clamp(1, MAX_UPDATE_EVERY)
}
