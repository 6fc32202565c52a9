//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::EngineConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TEST_ENGINE";

/// Overrides read from `TEST_ENGINE_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Agent executable from TEST_ENGINE_AGENT_PATH
    pub agent_path: Option<PathBuf>,
    /// Agent timeout in seconds from TEST_ENGINE_AGENT_TIMEOUT
    pub agent_timeout: Option<u64>,
    /// Agency port from TEST_ENGINE_AGENCY_PORT
    pub agency_port: Option<u16>,
    /// Process model from TEST_ENGINE_PROCESS_MODEL
    pub process_model: Option<String>,
    /// Domain usage from TEST_ENGINE_DOMAIN_USAGE
    pub domain_usage: Option<String>,
    /// Log level from TEST_ENGINE_LOG_LEVEL
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            agent_path: get_env("AGENT_PATH").map(PathBuf::from),
            agent_timeout: get_env_parse("AGENT_TIMEOUT"),
            agency_port: get_env_parse("AGENCY_PORT"),
            process_model: get_env("PROCESS_MODEL"),
            domain_usage: get_env("DOMAIN_USAGE"),
            log_level: get_env("LOG_LEVEL"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.agent_path.is_some()
            || self.agent_timeout.is_some()
            || self.agency_port.is_some()
            || self.process_model.is_some()
            || self.domain_usage.is_some()
            || self.log_level.is_some()
    }

    /// Overwrite the matching fields of `config`
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(path) = &self.agent_path {
            config.agent_path = Some(path.clone());
        }
        if let Some(timeout) = self.agent_timeout {
            config.agent_timeout_secs = timeout;
        }
        if let Some(port) = self.agency_port {
            config.agency_port = port;
        }
        if let Some(model) = &self.process_model {
            config.process_model = Some(model.clone());
        }
        if let Some(usage) = &self.domain_usage {
            config.domain_usage = Some(usage.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn agent_path(mut self, path: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_AGENT_PATH"), path.into()));
        self
    }

    pub fn agent_timeout(mut self, secs: u64) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_AGENT_TIMEOUT"), secs.to_string()));
        self
    }

    pub fn process_model(mut self, model: impl Into<String>) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_PROCESS_MODEL"), model.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TEST_ENGINE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_AGENT_PATH     Agent executable");
    println!("  {ENV_PREFIX}_AGENT_TIMEOUT  Seconds to wait for an agent");
    println!("  {ENV_PREFIX}_AGENCY_PORT    Agency port on 127.0.0.1 (0 = any)");
    println!("  {ENV_PREFIX}_PROCESS_MODEL  Default process model (Single, Separate, Multiple)");
    println!("  {ENV_PREFIX}_DOMAIN_USAGE   Default domain usage (None, Single, Multiple)");
    println!("  {ENV_PREFIX}_LOG_LEVEL      Log level (trace, debug, info, warn, error)");
}
