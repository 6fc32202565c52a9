//! Configuration module
//!
//! Engine configuration loaded from a YAML or JSON file and overridden by
//! `TEST_ENGINE_*` environment variables.

mod env;
mod file;

pub use env::{print_env_help, EnvBuilder, EnvConfig, EnvGuard};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::package::{keys, Settings};

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Agent executable; defaults to `test-agent` next to the running binary
    pub agent_path: Option<PathBuf>,

    /// Seconds to wait for an agent to become available
    pub agent_timeout_secs: u64,

    /// Agency listen port on 127.0.0.1 (0 picks a free port)
    pub agency_port: u16,

    /// Default `ProcessModel` for packages that do not set one
    pub process_model: Option<String>,

    /// Default `DomainUsage` for packages that do not set one
    pub domain_usage: Option<String>,

    /// Default per-test timeout in milliseconds
    pub default_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_path: None,
            agent_timeout_secs: 30,
            agency_port: 0,
            process_model: None,
            domain_usage: None,
            default_timeout_ms: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Settings applied to a package when it does not carry them itself
    pub fn package_defaults(&self) -> Settings {
        let mut settings = Settings::new();
        if let Some(model) = &self.process_model {
            settings.set(keys::PROCESS_MODEL, model.clone());
        }
        if let Some(usage) = &self.domain_usage {
            settings.set(keys::DOMAIN_USAGE, usage.clone());
        }
        if let Some(timeout) = self.default_timeout_ms {
            settings.set(keys::DEFAULT_TIMEOUT, timeout);
        }
        settings
    }

    /// Apply environment overrides
    pub fn with_env(mut self, env: &EnvConfig) -> Self {
        env.apply(&mut self);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.agent_timeout(), Duration::from_secs(30));
        assert_eq!(config.agency_port, 0);
        assert!(config.package_defaults().is_empty());
    }

    #[test]
    fn test_package_defaults() {
        let config = EngineConfig {
            process_model: Some("Separate".to_string()),
            default_timeout_ms: Some(2500),
            ..Default::default()
        };
        let defaults = config.package_defaults();

        assert_eq!(defaults.get_string(keys::PROCESS_MODEL, ""), "Separate");
        assert_eq!(defaults.get_u64(keys::DEFAULT_TIMEOUT, 0), 2500);
        assert!(!defaults.contains(keys::DOMAIN_USAGE));
    }
}
