//! Configuration validation

use super::types::Config;
use crate::{Error, Result};

impl Config {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let ports = &self.ports;
        if ports.min == 0 || ports.min > ports.max {
            return Err(Error::invalid_config(format!(
                "ports.min ({}) must be between 1 and ports.max ({})",
                ports.min, ports.max
            )));
        }

        let capacity = u32::from(ports.max) - u32::from(ports.min) + 1;
        if ports.max_range_size == 0 {
            return Err(Error::invalid_config("ports.max_range_size must be at least 1"));
        }
        if ports.default_range_size == 0 || ports.default_range_size > ports.max_range_size {
            return Err(Error::invalid_config(format!(
                "ports.default_range_size ({}) must be between 1 and ports.max_range_size ({})",
                ports.default_range_size, ports.max_range_size
            )));
        }
        if u32::from(ports.default_range_size) > capacity {
            return Err(Error::invalid_config(format!(
                "ports.default_range_size ({}) exceeds the {capacity} ports between ports.min and ports.max",
                ports.default_range_size
            )));
        }

        if self.agents.max_agents == 0 {
            return Err(Error::invalid_config("agents.max_agents must be at least 1"));
        }
        if self.agents.max_agents_per_project == 0 {
            return Err(Error::invalid_config(
                "agents.max_agents_per_project must be at least 1",
            ));
        }

        let prefix = &self.agents.session_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::invalid_config(format!(
                "agents.session_prefix '{prefix}' must be non-empty and contain only letters, digits, '-' or '_'"
            )));
        }
        if self.agents.worktree_dir.is_absolute() {
            return Err(Error::invalid_config(
                "agents.worktree_dir must be relative to the project root",
            ));
        }

        if self.container.image.trim().is_empty() {
            return Err(Error::invalid_config("container.image must not be empty"));
        }

        if self.process.timeout_secs == 0 || self.process.creation_timeout_secs == 0 {
            return Err(Error::invalid_config("process timeouts must be at least 1 second"));
        }

        if self.sync.event_buffer == 0 || self.sync.page_size == 0 {
            return Err(Error::invalid_config(
                "sync.event_buffer and sync.page_size must be at least 1",
            ));
        }

        if self.metrics.interval_ms < 100 {
            return Err(Error::invalid_config("metrics.interval_ms must be at least 100"));
        }

        self.bind_addr().map(|_| ())
    }
}
