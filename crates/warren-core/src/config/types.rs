//! Configuration types.
//!
//! Every section carries `#[serde(default)]` so partial TOML files only need to
//! name the keys they override.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Defaults to `<data dir>/state.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_db: Option<PathBuf>,
    pub ports: PortsConfig,
    pub agents: AgentsConfig,
    pub container: ContainerConfig,
    pub process: ProcessConfig,
    pub sync: SyncConfig,
    pub metrics: MetricsConfig,
    pub server: ServerConfig,
}

/// Process-wide port bounds and range sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub min: u16,
    pub max: u16,
    pub default_range_size: u16,
    pub max_range_size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub max_agents: usize,
    pub max_agents_per_project: usize,
    pub session_prefix: String,
    /// Worktree directory relative to the project root.
    pub worktree_dir: PathBuf,
    /// Root for worktrees of agents without a project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone_root: Option<PathBuf>,
    pub auto_accept: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub enabled: bool,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Deadline of every single `ProcessController` call.
    pub timeout_secs: u64,
    /// Default deadline of a whole agent creation.
    pub creation_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub conflict_window_secs: u64,
    pub event_buffer: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            min: 3000,
            max: 9999,
            default_range_size: 10,
            max_range_size: 1000,
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_agents: 10,
            max_agents_per_project: 5,
            session_prefix: "warren".to_string(),
            worktree_dir: PathBuf::from(".warren/worktrees"),
            standalone_root: None,
            auto_accept: true,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image: "node:18-alpine".to_string(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            creation_timeout_secs: 120,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_window_secs: 5,
            event_buffer: 256,
            page_size: 200,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4000".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DERIVED VALUES
// ═══════════════════════════════════════════════════════════════════════════

impl Config {
    pub const fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process.timeout_secs)
    }

    pub const fn creation_timeout(&self) -> Duration {
        Duration::from_secs(self.process.creation_timeout_secs)
    }

    pub const fn conflict_window(&self) -> Duration {
        Duration::from_secs(self.sync.conflict_window_secs)
    }

    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics.interval_ms)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind.parse().map_err(|e| {
            Error::invalid_config(format!("server.bind '{}': {e}", self.server.bind))
        })
    }

    /// Database path, falling back to the platform data directory.
    pub fn state_db_path(&self) -> Result<PathBuf> {
        self.state_db
            .clone()
            .or_else(|| super::load::data_dir().map(|dir| dir.join("state.db")))
            .ok_or_else(|| {
                Error::invalid_config("state_db is not set and no data directory is available")
            })
    }

    /// Root for standalone agent worktrees, falling back to the data directory.
    pub fn standalone_root(&self) -> Result<PathBuf> {
        self.agents
            .standalone_root
            .clone()
            .or_else(|| super::load::data_dir().map(|dir| dir.join("worktrees")))
            .ok_or_else(|| {
                Error::invalid_config(
                    "agents.standalone_root is not set and no data directory is available",
                )
            })
    }
}
