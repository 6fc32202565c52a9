//! Logging setup shared by `test-engine` and `test-agent`
//!
//! Logs go to stderr so result documents written to stdout stay clean.
//! `RUST_LOG`, when set, replaces the configured level entirely.

use std::fmt;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Configured verbosity of this crate's own targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Case-insensitive; `warning` is accepted for `warn`
    pub fn from_str(s: &str) -> Option<Self> {
        let name = s.trim().to_lowercase();
        if name == "warning" {
            return Some(LogLevel::Warn);
        }
        Self::ALL.into_iter().find(|level| level.as_str() == name)
    }

    /// Level for a configured name, raised to debug when `verbose`
    pub fn resolve(name: &str, verbose: bool) -> Self {
        if verbose {
            return LogLevel::Debug;
        }
        Self::from_str(name).unwrap_or(LogLevel::Info)
    }

    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directive enabling `level` for this crate's targets
pub fn filter_directive(level: LogLevel) -> String {
    format!("test_engine={}", level.filter())
}

/// Install the global subscriber. Call once per process.
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
