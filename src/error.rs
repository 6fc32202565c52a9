//! Engine error taxonomy
//!
//! Errors that cross the runner boundary. Load failures and agent failures
//! affecting a single package are normally folded into an error-typed
//! result instead of being returned through these variants.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::filter::FilterParseError;

/// Errors raised by the test engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("No test agent became available within {0:?}")]
    AgentUnavailable(Duration),

    #[error("Communication with agent {agent} failed: {reason}")]
    AgentCommunication { agent: String, reason: String },

    #[error("Failed to launch agent {}: {source}", path.display())]
    AgentLaunch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Test agency is not running")]
    AgencyNotRunning,

    #[error(transparent)]
    FilterParse(#[from] FilterParseError),

    #[error("Runner has no loaded package")]
    NotLoaded,

    #[error("A test run is already in progress")]
    RunInProgress,

    #[error("Agent reported an error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Test worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for failures of the channel to an agent or isolated domain
    pub fn is_communication_failure(&self) -> bool {
        matches!(
            self,
            EngineError::AgentCommunication { .. } | EngineError::Protocol(_)
        )
    }
}
