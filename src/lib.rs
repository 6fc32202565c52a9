//! test-engine
//!
//! Discovers, filters and runs tests described by manifest files. A run
//! goes through a runner chosen from the package settings: in-process,
//! in an isolated domain thread, in `test-agent` processes managed by the
//! agency, or spread over several runners whose results are merged.

pub mod agents;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod model;
pub mod output;
pub mod package;
pub mod results;
pub mod runners;
pub mod services;
pub mod utils;

pub use engine::TestEngine;
pub use error::EngineError;
pub use events::{TestEvent, TestEventListener};
pub use filter::TestFilter;
pub use package::TestPackage;
pub use results::{EngineResult, ResultNode, TestStatus};
pub use runners::{TestRunner, TestRunnerFactory};
