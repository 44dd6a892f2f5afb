//! Configuration loading from files and environment
//!
//! This module handles loading configuration from:
//! 1. Built-in defaults
//! 2. Global config: ~/.config/warren/config.toml
//! 3. Project config: .warren/config.toml
//! 4. Environment variables: WARREN_*
//!
//! File layers are deep-merged as TOML tables before deserializing, so a
//! project file overriding `ports.max` keeps the global `ports.min`.

use std::path::{Path, PathBuf};

use super::types::Config;
use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML
/// - An environment override cannot be parsed
/// - Config values fail validation
pub fn load_config() -> Result<Config> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::io(format!("Failed to get current directory: {e}")))?;
    load_config_with(
        global_config_path().as_deref(),
        &project_config_path(&cwd),
        |key| std::env::var(key).ok(),
    )
}

/// Load configuration from explicit file locations and an environment lookup.
pub fn load_config_with<F>(global: Option<&Path>, project: &Path, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let merged = toml::Value::try_from(Config::default())
        .map_err(|e| Error::invalid_config(format!("Failed to encode defaults: {e}")))?;

    let merged = match global.filter(|path| path.exists()) {
        Some(path) => merge_values(merged, load_toml_file(path)?),
        None => merged,
    };

    let merged = if project.exists() {
        merge_values(merged, load_toml_file(project)?)
    } else {
        merged
    };

    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| Error::invalid_config(e.to_string()))?;

    let config = config.apply_env_vars(env)?;
    config.validate()?;
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "warren")
}

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get path to the project config file below `dir`
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".warren").join("config.toml")
}

/// Platform data directory (database, standalone worktrees)
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Read and parse one TOML layer.
pub fn load_toml_file(path: &Path) -> Result<toml::Value> {
    if path.is_dir() {
        return Err(Error::io(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Failed to read config file {}: {e}", path.display())))?;

    content.parse::<toml::Value>().map_err(|e| {
        Error::invalid_config(format!("Failed to parse {}: {e}", path.display()))
    })
}

/// Deep merge: tables merge key by key, anything else is replaced.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            toml::Value::Table(base)
        }
        (_, overlay) => overlay,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("{key}='{raw}': {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "{key}='{raw}': expected a boolean"
        ))),
    }
}

impl Config {
    /// Apply `WARREN_*` overrides read through `env`.
    pub fn apply_env_vars<F>(self, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self;

        if let Some(raw) = env("WARREN_STATE_DB") {
            config.state_db = Some(PathBuf::from(raw));
        }
        if let Some(raw) = env("WARREN_PORT_MIN") {
            config.ports.min = parse_env("WARREN_PORT_MIN", &raw)?;
        }
        if let Some(raw) = env("WARREN_PORT_MAX") {
            config.ports.max = parse_env("WARREN_PORT_MAX", &raw)?;
        }
        if let Some(raw) = env("WARREN_MAX_AGENTS") {
            config.agents.max_agents = parse_env("WARREN_MAX_AGENTS", &raw)?;
        }
        if let Some(raw) = env("WARREN_MAX_AGENTS_PER_PROJECT") {
            config.agents.max_agents_per_project =
                parse_env("WARREN_MAX_AGENTS_PER_PROJECT", &raw)?;
        }
        if let Some(raw) = env("WARREN_SESSION_PREFIX") {
            config.agents.session_prefix = raw;
        }
        if let Some(raw) = env("WARREN_CONTAINER_ENABLED") {
            config.container.enabled = parse_bool("WARREN_CONTAINER_ENABLED", &raw)?;
        }
        if let Some(raw) = env("WARREN_CONTAINER_IMAGE") {
            config.container.image = raw;
        }
        if let Some(raw) = env("WARREN_PROCESS_TIMEOUT_SECS") {
            config.process.timeout_secs = parse_env("WARREN_PROCESS_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = env("WARREN_CONFLICT_WINDOW_SECS") {
            config.sync.conflict_window_secs = parse_env("WARREN_CONFLICT_WINDOW_SECS", &raw)?;
        }
        if let Some(raw) = env("WARREN_BIND") {
            config.server.bind = raw;
        }

        Ok(config)
    }
}
