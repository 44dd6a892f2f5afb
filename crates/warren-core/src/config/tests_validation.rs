//! Validation tests for configuration

#[cfg(test)]
mod validation_tests {
    use std::path::PathBuf;

    use crate::{config::Config, Error};

    fn assert_invalid(config: &Config) {
        assert!(
            matches!(config.validate(), Err(Error::InvalidConfig(_))),
            "expected InvalidConfig for {config:?}"
        );
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_port_bounds_rejected() {
        let mut config = Config::default();
        config.ports.min = 5000;
        config.ports.max = 4000;
        assert_invalid(&config);
    }

    #[test]
    fn test_default_range_larger_than_bounds_rejected() {
        let mut config = Config::default();
        config.ports.min = 3000;
        config.ports.max = 3004;
        assert_invalid(&config);
    }

    #[test]
    fn test_default_range_larger_than_max_range_rejected() {
        let mut config = Config::default();
        config.ports.max_range_size = 5;
        assert_invalid(&config);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = Config::default();
        config.agents.max_agents = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_session_prefix_with_spaces_rejected() {
        let mut config = Config::default();
        config.agents.session_prefix = "my agents".to_string();
        assert_invalid(&config);
    }

    #[test]
    fn test_absolute_worktree_dir_rejected() {
        let mut config = Config::default();
        config.agents.worktree_dir = PathBuf::from("/tmp/worktrees");
        assert_invalid(&config);
    }

    #[test]
    fn test_bad_bind_address_rejected() {
        let mut config = Config::default();
        config.server.bind = "localhost".to_string();
        assert_invalid(&config);
    }

    #[test]
    fn test_metrics_interval_floor() {
        let mut config = Config::default();
        config.metrics.interval_ms = 10;
        assert_invalid(&config);
    }
}
