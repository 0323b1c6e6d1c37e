pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod protocol;
pub mod state;
pub mod storage;

#[cfg(test)]
pub mod test_utils;
