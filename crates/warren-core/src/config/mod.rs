//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/warren/config.toml
//! 3. Project config: .warren/config.toml
//! 4. Environment variables: WARREN_*
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! [ports]
//! min = 4000
//! max = 4999
//!
//! [agents]
//! max_agents = 4
//! session_prefix = "wr"
//!
//! [sync]
//! conflict_window_secs = 3
//! ```

mod load;
mod types;
mod validate;

#[cfg(test)]
mod tests_loading;
#[cfg(test)]
mod tests_validation;

pub use load::{
    data_dir, global_config_path, load_config, load_config_with, load_toml_file,
    project_config_path,
};
pub use types::{
    AgentsConfig, Config, ContainerConfig, MetricsConfig, PortsConfig, ProcessConfig,
    ServerConfig, SyncConfig,
};
