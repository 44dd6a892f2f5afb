//! Loading-focused tests for configuration
//!
//! File layering, deep merge and environment overrides.

#[cfg(test)]
mod loading_tests {
    use std::{collections::HashMap, path::Path};

    use crate::config::{load_config, load_config_with, load_toml_file, project_config_path, Config};
    use crate::{Error, Result};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    #[test]
    fn test_no_config_files_returns_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = load_config_with(None, &project_config_path(dir.path()), no_env)?;
        assert_eq!(config, Config::default());
        assert_eq!(config.ports.min, 3000);
        assert_eq!(config.ports.max, 9999);
        assert_eq!(config.agents.max_agents, 10);
        assert_eq!(config.sync.conflict_window_secs, 5);
        Ok(())
    }

    #[test]
    fn test_project_overrides_global_key_by_key() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let global = dir.path().join("global.toml");
        write(&global, "[ports]\nmin = 4000\nmax = 4999\n")?;
        let project = project_config_path(dir.path());
        write(&project, "[ports]\nmax = 4500\n\n[agents]\nsession_prefix = \"wr\"\n")?;

        let config = load_config_with(Some(&global), &project, no_env)?;
        assert_eq!(config.ports.min, 4000);
        assert_eq!(config.ports.max, 4500);
        assert_eq!(config.agents.session_prefix, "wr");
        assert_eq!(config.agents.max_agents, 10);
        Ok(())
    }

    #[test]
    fn test_env_overrides_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let project = project_config_path(dir.path());
        write(&project, "[agents]\nmax_agents = 3\n")?;

        let env: HashMap<&str, &str> = [
            ("WARREN_MAX_AGENTS", "7"),
            ("WARREN_CONTAINER_ENABLED", "yes"),
            ("WARREN_CONFLICT_WINDOW_SECS", "2"),
        ]
        .into_iter()
        .collect();
        let config = load_config_with(None, &project, |key| {
            env.get(key).map(|value| (*value).to_string())
        })?;

        assert_eq!(config.agents.max_agents, 7);
        assert!(config.container.enabled);
        assert_eq!(config.sync.conflict_window_secs, 2);
        Ok(())
    }

    #[test]
    fn test_unparseable_env_value_is_invalid_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = load_config_with(None, &project_config_path(dir.path()), |key| {
            (key == "WARREN_PORT_MIN").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_malformed_toml_returns_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.toml");
        write(&path, "ports = \n invalid toml [[[")?;

        let result = load_toml_file(&path);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_directory_instead_of_file_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = load_toml_file(dir.path());
        assert!(matches!(result, Err(Error::Io(_))));
        Ok(())
    }

    #[test]
    fn test_wrong_value_type_is_invalid_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let project = project_config_path(dir.path());
        write(&project, "[ports]\nmin = \"three thousand\"\n")?;
        let result = load_config_with(None, &project, no_env);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn test_load_config_reads_process_environment() -> Result<()> {
        std::env::set_var("WARREN_SESSION_PREFIX", "envprefix");
        let result = load_config();
        std::env::remove_var("WARREN_SESSION_PREFIX");
        assert_eq!(result?.agents.session_prefix, "envprefix");
        Ok(())
    }
}
