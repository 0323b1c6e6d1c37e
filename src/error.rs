use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::protocol::ProtocolViolation;

#[derive(Error, Debug)]
pub enum PluginsdError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Process for '{command}' has no {stream}")]
    MissingStream {
        command: String,
        stream: &'static str,
    },

    #[error("Failed to read plugin output: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to send {signal} to pid {pid}: {source}")]
    Signal {
        pid: u32,
        signal: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to reap pid {pid}: {source}")]
    Reap {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Cannot open plugin directory '{}': {source}", path.display())]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PluginsdError>;
