use figment::{Figment, providers::{Format, Toml, Json, Yaml, Env}};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use super::schema::{
    SECTION_GLOBAL, SECTION_PLUGINS, KEY_UPDATE_EVERY, KEY_CHECK_EVERY, KEY_PLUGINS_DIRECTORY,
    KNOWN_KEYS, MAX_UPDATE_EVERY,
};
use super::store::AgentConfig;
use crate::error::{ConfigError, Result};

const ENV_PREFIX: &str = "PLUGINSD_";

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env reference pattern"));

/// A scalar as it comes out of TOML, YAML, JSON or the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawValue {
    fn into_string(self) -> String {
        match self {
            RawValue::Bool(b) => super::store::format_bool(b).to_string(),
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Section(BTreeMap<String, RawValue>),
    Value(RawValue),
}

pub fn load_from_env_or_file() -> Result<AgentConfig> {
    let figment = Figment::new()
        .merge(Toml::file("pluginsd.toml"))
        .merge(Yaml::file("pluginsd.yaml"))
        .merge(Yaml::file("pluginsd.yml"))
        .merge(Json::file("pluginsd.json"))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config = from_figment(figment)?;
    validate(&config)?;
    Ok(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<AgentConfig> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into()
            ).into());
        }
    };
    if !path.exists() {
        return Err(ConfigError::Parse(format!("Config file '{}' not found", path.display())).into());
    }

    let config = from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))?;
    validate(&config)?;
    Ok(config)
}

/// Flatten the figment into sections. Setting names use spaces, so
/// `update_every` in a file or `PLUGINSD_GLOBAL__UPDATE_EVERY` in the
/// environment both become `update every`.
fn from_figment(figment: Figment) -> Result<AgentConfig> {
    let raw: BTreeMap<String, RawEntry> = figment
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = AgentConfig::new();
    for (section, entry) in raw {
        match entry {
            RawEntry::Section(values) => {
                for (key, value) in values {
                    config.set(&section, &normalize_key(&key), value.into_string());
                }
            }
            RawEntry::Value(_) => {
                tracing::warn!(key = %section, "Ignoring configuration value outside of a section");
            }
        }
    }
    Ok(config)
}

/// Setting names are matched loosely (`update_every`, `Update Every`); other
/// keys are plugin names and stay untouched.
fn normalize_key(key: &str) -> String {
    let key = key.trim();
    let spaced = key.replace('_', " ").to_lowercase();
    if KNOWN_KEYS.contains(&spaced.as_str()) {
        spaced
    } else {
        key.to_string()
    }
}

/// Reject unusable values and clamp intervals into `1..=MAX_UPDATE_EVERY`.
pub fn validate(config: &AgentConfig) -> Result<()> {
    if let Some(directory) = config.get(SECTION_PLUGINS, KEY_PLUGINS_DIRECTORY) {
        if directory.trim().is_empty() {
            return Err(ConfigError::Validation(
                "plugins directory must not be empty".into()
            ).into());
        }
    }

    let mut intervals = vec![
        (SECTION_GLOBAL.to_string(), KEY_UPDATE_EVERY),
        (SECTION_PLUGINS.to_string(), KEY_CHECK_EVERY),
    ];
    intervals.extend(
        config
            .section_names()
            .into_iter()
            .filter(|section| section.starts_with("plugin:"))
            .map(|section| (section, KEY_UPDATE_EVERY)),
    );

    for (section, key) in intervals {
        let Some(value) = config.get(&section, key) else {
            continue;
        };
        let seconds: i64 = value.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("[{section}] '{key}' must be a number of seconds, got '{value}'"))
        })?;
        if seconds < 1 {
            tracing::warn!(section = %section, key, seconds, "Interval below 1 second, using 1");
            config.set(&section, key, "1");
        } else if seconds.unsigned_abs() > MAX_UPDATE_EVERY {
            tracing::warn!(
                section = %section,
                key,
                seconds,
                "Interval above {} seconds, using {}", MAX_UPDATE_EVERY, MAX_UPDATE_EVERY
            );
            config.set(&section, key, MAX_UPDATE_EVERY.to_string());
        }
    }

    Ok(())
}

/// Expand `${VAR}` and `${VAR:-default}` from the environment.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in ENV_REFERENCE.captures_iter(input) {
        let reference = &cap[1];
        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };

        let value = match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVar(
                    format!("Environment variable '{}' not found", name)
                ).into());
            }
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
