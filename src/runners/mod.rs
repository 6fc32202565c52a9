//! Test runners
//!
//! `TestRunner` is the closed set of runner variants. Every variant has
//! the same lifecycle:
//!
//! ```text
//! Unloaded --load--> Loaded --run--> Running --finish/stop--> Loaded
//!     ^                 |
//!     +-----unload------+
//! ```
//!
//! Async operations return boxed futures so the aggregating variant can
//! hold runners of any kind, itself included.

mod aggregating;
mod execution;
mod factory;
mod local;
mod remote;
mod state;

pub use aggregating::AggregatingRunner;
pub use factory::{RunnerKind, TestRunnerFactory};
pub use local::LocalRunner;
pub use remote::{AgentSource, RemoteRunner};
pub use state::{RunControl, RunnerState};

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

use crate::error::EngineError;
use crate::events::TestEventListener;
use crate::filter::TestFilter;
use crate::package::TestPackage;
use crate::results::EngineResult;

/// A runner for one package
pub enum TestRunner {
    /// Executes in the current process
    Local(LocalRunner),
    /// Executes in an isolated domain on its own thread
    Domain(RemoteRunner),
    /// Executes in an agent process
    Process(RemoteRunner),
    /// Drives one runner per sub-package
    Aggregating(AggregatingRunner),
}

impl TestRunner {
    pub fn kind(&self) -> RunnerKind {
        match self {
            TestRunner::Local(_) => RunnerKind::Local,
            TestRunner::Domain(_) => RunnerKind::Domain,
            TestRunner::Process(_) => RunnerKind::Process,
            TestRunner::Aggregating(_) => RunnerKind::Aggregating,
        }
    }

    pub fn package(&self) -> &TestPackage {
        match self {
            TestRunner::Local(runner) => runner.package(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => runner.package(),
            TestRunner::Aggregating(runner) => runner.package(),
        }
    }

    pub fn state(&self) -> RunnerState {
        match self {
            TestRunner::Local(runner) => runner.state(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => runner.state(),
            TestRunner::Aggregating(runner) => runner.state(),
        }
    }

    /// Load the package. Load failures come back as an error result.
    pub fn load(&self) -> BoxFuture<'_, Result<EngineResult, EngineError>> {
        match self {
            TestRunner::Local(runner) => runner.load().boxed(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => runner.load().boxed(),
            TestRunner::Aggregating(runner) => runner.load().boxed(),
        }
    }

    /// Load again, replacing the current model
    pub fn reload(&self) -> BoxFuture<'_, Result<EngineResult, EngineError>> {
        self.load()
    }

    pub fn explore<'a>(
        &'a self,
        filter: &'a TestFilter,
    ) -> BoxFuture<'a, Result<EngineResult, EngineError>> {
        match self {
            TestRunner::Local(runner) => runner.explore(filter).boxed(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => {
                runner.explore(filter).boxed()
            }
            TestRunner::Aggregating(runner) => runner.explore(filter).boxed(),
        }
    }

    pub fn count_test_cases<'a>(
        &'a self,
        filter: &'a TestFilter,
    ) -> BoxFuture<'a, Result<usize, EngineError>> {
        match self {
            TestRunner::Local(runner) => runner.count_test_cases(filter).boxed(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => {
                runner.count_test_cases(filter).boxed()
            }
            TestRunner::Aggregating(runner) => runner.count_test_cases(filter).boxed(),
        }
    }

    pub fn run<'a>(
        &'a self,
        listener: Arc<dyn TestEventListener>,
        filter: &'a TestFilter,
    ) -> BoxFuture<'a, Result<EngineResult, EngineError>> {
        match self {
            TestRunner::Local(runner) => runner.run(listener, filter).boxed(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => {
                runner.run(listener, filter).boxed()
            }
            TestRunner::Aggregating(runner) => runner.run(listener, filter).boxed(),
        }
    }

    /// Request a stop of the run in progress; ignored when idle
    pub fn stop_run(&self, force: bool) {
        match self {
            TestRunner::Local(runner) => runner.stop_run(force),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => runner.stop_run(force),
            TestRunner::Aggregating(runner) => runner.stop_run(force),
        }
    }

    pub fn unload(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        match self {
            TestRunner::Local(runner) => runner.unload().boxed(),
            TestRunner::Domain(runner) | TestRunner::Process(runner) => runner.unload().boxed(),
            TestRunner::Aggregating(runner) => runner.unload().boxed(),
        }
    }
}
