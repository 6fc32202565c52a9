//! In-process runner
//!
//! Loads a single-file package into a test tree and executes it on a
//! spawned task in the current process.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::execution::{count_selected, explore_tree, TestWorker};
use super::state::{RunControl, RunnerState};
use crate::error::EngineError;
use crate::events::TestEventListener;
use crate::filter::TestFilter;
use crate::model::{TestBuilder, TestNode};
use crate::package::{keys, TestPackage};
use crate::results::EngineResult;

#[derive(Clone)]
enum Loaded {
    Tests(Arc<TestNode>),
    /// The package failed to load; every operation reports this result
    Failed(EngineResult),
}

/// Runner executing tests in the current process
pub struct LocalRunner {
    package: TestPackage,
    model: RwLock<Option<Loaded>>,
    control: Arc<RunControl>,
}

impl LocalRunner {
    pub fn new(package: TestPackage) -> Self {
        Self {
            package,
            model: RwLock::new(None),
            control: Arc::new(RunControl::new()),
        }
    }

    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    pub fn state(&self) -> RunnerState {
        if self.control.is_running() {
            RunnerState::Running
        } else if self.snapshot().is_some() {
            RunnerState::Loaded
        } else {
            RunnerState::Unloaded
        }
    }

    /// Build the test tree, replacing any previous one. A package that
    /// cannot be loaded yields an error result rather than an error.
    pub async fn load(&self) -> Result<EngineResult, EngineError> {
        if self.control.is_running() {
            return Err(EngineError::RunInProgress);
        }

        let loaded = match TestBuilder::build(&self.package) {
            Ok(tree) => {
                info!(
                    "Loaded {} ({} test cases)",
                    self.package,
                    tree.test_case_count()
                );
                Loaded::Tests(Arc::new(tree))
            }
            Err(e) => {
                warn!("Failed to load {}: {}", self.package, e);
                Loaded::Failed(EngineResult::error(&self.package, e.to_string()))
            }
        };

        let result = match &loaded {
            Loaded::Tests(tree) => EngineResult::new(explore_tree(&TestFilter::Empty, tree)),
            Loaded::Failed(result) => result.clone(),
        };
        self.store(Some(loaded));
        Ok(result)
    }

    /// Describe the tests selected by `filter`. An unloaded runner builds
    /// the tree just for this call.
    pub async fn explore(&self, filter: &TestFilter) -> Result<EngineResult, EngineError> {
        match self.snapshot() {
            Some(Loaded::Tests(tree)) => Ok(EngineResult::new(explore_tree(filter, &tree))),
            Some(Loaded::Failed(result)) => Ok(result),
            None => match TestBuilder::build(&self.package) {
                Ok(tree) => Ok(EngineResult::new(explore_tree(filter, &tree))),
                Err(e) => Ok(EngineResult::error(&self.package, e.to_string())),
            },
        }
    }

    pub async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, EngineError> {
        match self.snapshot() {
            Some(Loaded::Tests(tree)) => Ok(count_selected(filter, &tree)),
            Some(Loaded::Failed(_)) => Ok(0),
            None => Err(EngineError::NotLoaded),
        }
    }

    /// Execute the selected tests. The worker runs on its own task so a
    /// forced stop can abort it.
    pub async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<EngineResult, EngineError> {
        let tree = match self.snapshot() {
            Some(Loaded::Tests(tree)) => tree,
            Some(Loaded::Failed(result)) => return Ok(result),
            None => return Err(EngineError::NotLoaded),
        };

        self.control.begin()?;
        debug!("Running {} with filter {}", self.package, filter);

        let worker = TestWorker::new(
            filter.clone(),
            listener,
            self.control.clone(),
            self.work_dir(),
            self.default_timeout(),
        );
        let handle = tokio::spawn(worker.run(tree));
        self.control.attach(handle.abort_handle());

        let outcome = handle.await;
        self.control.end();

        match outcome {
            Ok(node) => Ok(EngineResult::new(node)),
            Err(e) if e.is_cancelled() => {
                info!("Run of {} was aborted", self.package);
                Ok(EngineResult::cancelled(&self.package, true))
            }
            Err(e) => {
                warn!("Test worker for {} failed: {}", self.package, e);
                Ok(EngineResult::error(
                    &self.package,
                    EngineError::Worker(e.to_string()).to_string(),
                ))
            }
        }
    }

    /// Ask a run in progress to stop; does nothing when idle
    pub fn stop_run(&self, force: bool) {
        if self.control.request_stop(force) {
            info!(
                "{} stop requested for {}",
                if force { "Forced" } else { "Cooperative" },
                self.package
            );
        }
    }

    /// Drop the loaded tree. Safe to call repeatedly.
    pub async fn unload(&self) -> Result<(), EngineError> {
        if self.control.is_running() {
            self.control.request_stop(true);
        }
        if self.snapshot().is_some() {
            debug!("Unloading {}", self.package);
        }
        self.store(None);
        Ok(())
    }

    fn snapshot(&self) -> Option<Loaded> {
        self.model
            .read()
            .ok()
            .and_then(|model| model.clone())
    }

    fn store(&self, loaded: Option<Loaded>) {
        if let Ok(mut model) = self.model.write() {
            *model = loaded;
        }
    }

    fn work_dir(&self) -> PathBuf {
        let base = self.package.settings().get_string(keys::BASE_PATH, "");
        if !base.is_empty() {
            return PathBuf::from(base);
        }
        self.package
            .full_name()
            .and_then(|path| path.parent())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn default_timeout(&self) -> Option<Duration> {
        match self.package.settings().get_u64(keys::DEFAULT_TIMEOUT, 0) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
