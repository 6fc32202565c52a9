//! Runner over several sub-packages
//!
//! Creates one runner per sub-package through the factory and combines
//! their results: a project becomes a `Project` suite, anything else a
//! merged `test-run`.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::factory::TestRunnerFactory;
use super::state::RunnerState;
use super::TestRunner;
use crate::error::EngineError;
use crate::events::TestEventListener;
use crate::filter::TestFilter;
use crate::package::TestPackage;
use crate::results::EngineResult;

pub struct AggregatingRunner {
    package: TestPackage,
    factory: Arc<TestRunnerFactory>,
    runners: RwLock<Vec<Arc<TestRunner>>>,
    /// Set when the project could not be expanded
    failure: Mutex<Option<EngineResult>>,
    loaded: AtomicBool,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl AggregatingRunner {
    pub fn new(package: TestPackage, factory: Arc<TestRunnerFactory>) -> Self {
        Self {
            package,
            factory,
            runners: RwLock::new(Vec::new()),
            failure: Mutex::new(None),
            loaded: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    pub fn state(&self) -> RunnerState {
        if self.running.load(Ordering::Acquire) {
            RunnerState::Running
        } else if self.loaded.load(Ordering::Acquire) {
            RunnerState::Loaded
        } else {
            RunnerState::Unloaded
        }
    }

    /// Sub-runners in sub-package order
    pub fn runners(&self) -> Vec<Arc<TestRunner>> {
        self.runners
            .read()
            .map(|runners| runners.clone())
            .unwrap_or_default()
    }

    /// Load every sub-package, replacing any earlier sub-runners
    pub async fn load(&self) -> Result<EngineResult, EngineError> {
        if self.running.load(Ordering::Acquire) {
            return Err(EngineError::RunInProgress);
        }
        self.unload().await?;

        let sub_packages = match self.sub_packages() {
            Ok(sub_packages) => sub_packages,
            Err(e) => {
                warn!("Failed to expand {}: {}", self.package, e);
                let result = EngineResult::error(&self.package, e.to_string());
                self.set_failure(Some(result.clone()));
                self.loaded.store(true, Ordering::Release);
                return Ok(result);
            }
        };

        let mut runners = Vec::with_capacity(sub_packages.len());
        let mut results = Vec::with_capacity(sub_packages.len());
        for sub_package in sub_packages {
            let runner = Arc::new(self.factory.make_test_runner(sub_package));
            debug!("{} runner for {}", runner.kind(), runner.package());
            let loaded = runner.load().await;
            runners.push(runner);
            match loaded {
                Ok(result) => results.push(result),
                Err(e) => {
                    self.replace_runners(runners);
                    return Err(e);
                }
            }
        }

        info!("Loaded {} sub-packages of {}", runners.len(), self.package);
        self.replace_runners(runners);
        self.loaded.store(true, Ordering::Release);
        Ok(self.combine(&results))
    }

    pub async fn explore(&self, filter: &TestFilter) -> Result<EngineResult, EngineError> {
        if let Some(failure) = self.failure() {
            return Ok(failure);
        }
        if !self.loaded.load(Ordering::Acquire) {
            let sub_packages = match self.sub_packages() {
                Ok(sub_packages) => sub_packages,
                Err(e) => return Ok(EngineResult::error(&self.package, e.to_string())),
            };
            let mut results = Vec::with_capacity(sub_packages.len());
            for sub_package in sub_packages {
                let runner = self.factory.make_test_runner(sub_package);
                results.push(runner.explore(filter).await?);
            }
            return Ok(self.combine(&results));
        }

        let mut results = Vec::new();
        for runner in self.runners() {
            results.push(runner.explore(filter).await?);
        }
        Ok(self.combine(&results))
    }

    pub async fn count_test_cases(&self, filter: &TestFilter) -> Result<usize, EngineError> {
        if !self.loaded.load(Ordering::Acquire) {
            return Err(EngineError::NotLoaded);
        }
        let mut count = 0;
        for runner in self.runners() {
            count += runner.count_test_cases(filter).await?;
        }
        Ok(count)
    }

    /// Run the sub-runners one after another. After a stop request the
    /// remaining sub-packages are reported as cancelled.
    pub async fn run(
        &self,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<EngineResult, EngineError> {
        if let Some(failure) = self.failure() {
            return Ok(failure);
        }
        if !self.loaded.load(Ordering::Acquire) {
            return Err(EngineError::NotLoaded);
        }
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::RunInProgress)?;
        self.stop_requested.store(false, Ordering::Release);

        let start = Utc::now();
        let mut results = Vec::new();
        let mut outcome = Ok(());
        for runner in self.runners() {
            if self.stop_requested.load(Ordering::Acquire) {
                results.push(EngineResult::cancelled(runner.package(), false));
                continue;
            }
            match runner.run(listener.clone(), filter).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.running.store(false, Ordering::Release);
        outcome?;

        let combined = if self.is_project() {
            self.combine(&results)
        } else {
            EngineResult::merge(&results, start)
        };
        Ok(combined)
    }

    /// Forward a stop request to every sub-runner
    pub fn stop_run(&self, force: bool) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.stop_requested.store(true, Ordering::Release);
        for runner in self.runners() {
            runner.stop_run(force);
        }
    }

    /// Unload every sub-runner and forget them
    pub async fn unload(&self) -> Result<(), EngineError> {
        self.stop_run(true);
        let runners = self.take_runners();
        for runner in &runners {
            if let Err(e) = runner.unload().await {
                warn!("Failed to unload {}: {}", runner.package(), e);
            }
        }
        self.set_failure(None);
        self.loaded.store(false, Ordering::Release);
        Ok(())
    }

    fn is_project(&self) -> bool {
        self.factory.projects().is_project_package(&self.package)
    }

    /// Sub-packages with the parent's settings applied on top of their own
    fn sub_packages(&self) -> Result<Vec<TestPackage>, EngineError> {
        let package = if !self.package.has_sub_packages() && self.is_project() {
            self.factory.projects().expand_project_package(&self.package)?
        } else {
            self.package.clone()
        };

        Ok(package
            .sub_packages()
            .iter()
            .map(|sub_package| {
                let mut sub_package = sub_package.clone();
                sub_package.settings_mut().overlay(package.settings());
                sub_package
            })
            .collect())
    }

    fn combine(&self, results: &[EngineResult]) -> EngineResult {
        match self.package.full_name() {
            Some(full_name) if self.is_project() => EngineResult::make_package_result(
                results,
                self.package.name(),
                &full_name.display().to_string(),
            ),
            _ => EngineResult::merge(results, Utc::now()),
        }
    }

    fn replace_runners(&self, runners: Vec<Arc<TestRunner>>) {
        if let Ok(mut slot) = self.runners.write() {
            *slot = runners;
        }
    }

    fn take_runners(&self) -> Vec<Arc<TestRunner>> {
        self.runners
            .write()
            .map(|mut runners| std::mem::take(&mut *runners))
            .unwrap_or_default()
    }

    fn failure(&self) -> Option<EngineResult> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }

    fn set_failure(&self, result: Option<EngineResult>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventCollector, TestEvent};
    use crate::package::keys;
    use crate::results::ResultType;
    use crate::runners::RunnerKind;
    use crate::services::ProjectService;
    use std::fs;
    use tempfile::TempDir;

    fn factory() -> Arc<TestRunnerFactory> {
        Arc::new(TestRunnerFactory::in_process(Arc::new(ProjectService::new())))
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_merges_sub_package_results() {
        let dir = TempDir::new().unwrap();
        let first = write(&dir, "first.yaml", "tests:\n  - name: A\n  - name: B\n");
        let second = write(&dir, "second.yaml", "tests:\n  - name: C\n    result: failed\n");

        let runner = AggregatingRunner::new(TestPackage::new([first, second]), factory());
        let loaded = runner.load().await.unwrap();
        assert_eq!(loaded.xml().name(), "test-run");
        assert_eq!(loaded.xml().attr("testcasecount"), Some("3"));

        let subs = runner.runners();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|r| r.kind() == RunnerKind::Local));
        assert_eq!(subs[1].package().id(), "2");

        let collector = Arc::new(EventCollector::new());
        let result = runner.run(collector.clone(), &TestFilter::Empty).await.unwrap();
        assert_eq!(result.xml().attr("total"), Some("3"));
        assert_eq!(result.xml().attr("result"), Some("Failed"));
        assert_eq!(result.xml().children().len(), 2);
        assert_eq!(
            collector.count_where(|e| matches!(e, TestEvent::TestCase { .. })),
            3
        );

        runner.unload().await.unwrap();
        assert!(runner.runners().is_empty());
        assert_eq!(runner.state(), RunnerState::Unloaded);
    }

    #[tokio::test]
    async fn test_parent_settings_win() {
        let dir = TempDir::new().unwrap();
        let first = write(&dir, "a.yaml", "tests:\n  - name: A\n");
        let second = write(&dir, "b.yaml", "tests:\n  - name: B\n");

        let package = TestPackage::new([first, second]).with_setting(keys::DEFAULT_TIMEOUT, 500);
        let runner = AggregatingRunner::new(package, factory());
        runner.load().await.unwrap();

        for sub in runner.runners() {
            assert_eq!(sub.package().settings().get_u64(keys::DEFAULT_TIMEOUT, 0), 500);
        }
    }

    #[tokio::test]
    async fn test_failed_sub_package_is_kept_in_place() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.yaml", "tests:\n  - name: A\n");
        let missing = dir.path().join("missing.yaml");
        let other = write(&dir, "other.yaml", "tests:\n  - name: B\n");

        let runner = AggregatingRunner::new(TestPackage::new([good, missing, other]), factory());
        let loaded = runner.load().await.unwrap();
        assert_eq!(loaded.xml().children().len(), 3);

        let result = runner
            .run(Arc::new(EventCollector::new()), &TestFilter::Empty)
            .await
            .unwrap();

        let children = result.xml().children();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].name(), "test-suite");
        assert_eq!(
            ResultType::from_element(children[1].name()),
            ResultType::Error
        );
        assert_eq!(children[2].name(), "test-suite");
        assert_eq!(result.xml().attr("result"), Some("Failed"));
        assert_eq!(result.xml().attr("passed"), Some("2"));
    }

    async fn start_slow_run(
        runner: &Arc<AggregatingRunner>,
        collector: &Arc<EventCollector>,
    ) -> tokio::task::JoinHandle<Result<EngineResult, EngineError>> {
        let running = runner.clone();
        let listener = collector.clone();
        let run = tokio::spawn(async move { running.run(listener, &TestFilter::Empty).await });

        while collector.count_where(|e| matches!(e, TestEvent::StartTest { .. })) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(runner.state(), RunnerState::Running);
        run
    }

    fn slow_package(dir: &TempDir) -> TestPackage {
        let slow = write(
            dir,
            "slow.yaml",
            "tests:\n  - name: Sleeps\n    command: \"sleep 1\"\n  - name: After\n",
        );
        let second = write(dir, "second.yaml", "tests:\n  - name: B\n");
        let third = write(dir, "third.yaml", "tests:\n  - name: C\n");
        TestPackage::new([slow, second, third])
    }

    #[tokio::test]
    async fn test_cooperative_stop_cancels_remaining_sub_packages() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(AggregatingRunner::new(slow_package(&dir), factory()));
        runner.load().await.unwrap();

        let collector = Arc::new(EventCollector::new());
        let run = start_slow_run(&runner, &collector).await;
        runner.stop_run(false);
        let result = run.await.unwrap().unwrap();

        let children = result.xml().children();
        assert_eq!(children.len(), 3);
        // the case in flight finishes, the one after it never starts
        assert_eq!(children[0].attr("passed"), Some("1"));
        assert_eq!(children[0].attr("label"), Some("Cancelled"));
        for cancelled in &children[1..] {
            assert_eq!(cancelled.attr("label"), Some("Cancelled"));
            assert_eq!(cancelled.attr("site"), None);
        }
        assert_eq!(result.xml().attr("result"), Some("Failed"));
        assert_eq!(
            collector.count_where(|e| matches!(e, TestEvent::TestCase { .. })),
            1
        );

        assert_eq!(runner.state(), RunnerState::Loaded);
        assert!(runner
            .runners()
            .iter()
            .all(|sub| sub.state() == RunnerState::Loaded));
    }

    #[tokio::test]
    async fn test_forced_stop_aborts_current_sub_runner() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(AggregatingRunner::new(slow_package(&dir), factory()));
        runner.load().await.unwrap();

        let collector = Arc::new(EventCollector::new());
        let run = start_slow_run(&runner, &collector).await;
        runner.stop_run(true);
        let result = run.await.unwrap().unwrap();

        let children = result.xml().children();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].attr("site"), Some("Forced"));
        assert!(children
            .iter()
            .all(|child| child.attr("label") == Some("Cancelled")));
        assert_eq!(
            collector.count_where(|e| matches!(e, TestEvent::TestCase { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_project_result() {
        let dir = TempDir::new().unwrap();
        write(&dir, "unit.yaml", "name: Unit\ntests:\n  - name: A\n");
        let project = write(&dir, "suite.testproj", "files:\n  - unit.yaml\n");

        let runner = AggregatingRunner::new(TestPackage::from_file(&project), factory());
        runner.load().await.unwrap();
        let result = runner
            .run(Arc::new(EventCollector::new()), &TestFilter::Empty)
            .await
            .unwrap();

        assert_eq!(result.xml().attr("type"), Some("Project"));
        assert_eq!(result.xml().attr("name"), Some("suite.testproj"));
        assert_eq!(result.xml().attr("passed"), Some("1"));
    }
}
