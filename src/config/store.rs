//! Sectioned key-value configuration with defaults recorded on first lookup.

use std::collections::BTreeMap;

use dashmap::DashMap;

/// Configuration lookups used by the supervisor.
///
/// Every getter takes the default to use when the key is missing. Implementations
/// remember that default, so the effective configuration can be dumped later.
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, section: &str, key: &str, default: &str) -> String;

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
}

/// In-memory configuration store, filled by the loader.
#[derive(Debug, Default)]
pub struct AgentConfig {
    sections: DashMap<String, BTreeMap<String, String>>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Raw value without recording a default.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(key).cloned())
    }

    pub fn section_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sections.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// Every section and key, including defaults recorded so far.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.sections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn get_or_record(&self, section: &str, key: &str, default: String) -> String {
        self.sections
            .entry(section.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(default)
            .clone()
    }
}

impl ConfigStore for AgentConfig {
    fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get_or_record(section, key, default.to_string())
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        let value = self.get_or_record(section, key, format_bool(default).to_string());
        parse_bool(&value).unwrap_or_else(|| {
            tracing::warn!(section, key, value = %value, "Not a boolean, using default");
            default
        })
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        let value = self.get_or_record(section, key, default.to_string());
        value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(section, key, value = %value, "Not an integer, using default");
            default
        })
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
