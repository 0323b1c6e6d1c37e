//! Agent configuration: a sectioned key-value store loaded from a file and the
//! environment, and the typed settings the binary derives from it.

pub mod loader;
pub mod schema;
pub mod store;

pub use loader::{load_from_env_or_file, load_from_path, substitute_env_vars, validate};
pub use schema::{
    clamp_interval, plugin_section, LogFormat, LoggingSettings, PluginsSettings, Settings,
    MAX_UPDATE_EVERY,
};
pub use store::{AgentConfig, ConfigStore};
