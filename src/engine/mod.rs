//! Engine facade
//!
//! `TestEngine` owns the service context and performs complete explore
//! and run operations: it applies configured package defaults, picks the
//! runner, announces the run and wraps the outcome in a `test-run`.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{TestEvent, TestEventListener};
use crate::filter::TestFilter;
use crate::package::TestPackage;
use crate::results::{EngineResult, ResultType};
use crate::runners::TestRunner;
use crate::services::ServiceContext;
use crate::utils::timer::Timer;

pub struct TestEngine {
    context: ServiceContext,
}

impl TestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_context(ServiceContext::new(config))
    }

    pub fn with_context(context: ServiceContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Start all services
    pub async fn start(&self) -> Result<(), EngineError> {
        self.context.start().await
    }

    /// Stop all services, including any agents still running
    pub async fn stop(&self) {
        self.context.stop().await
    }

    /// Runner for `package`, with configured defaults applied to settings
    /// the package does not carry itself
    pub fn get_runner(&self, mut package: TestPackage) -> TestRunner {
        let defaults = self.context.config().package_defaults();
        for (key, value) in defaults.iter() {
            package.settings_mut().set_default(key.clone(), value.clone());
        }
        self.context.factory().make_test_runner(package)
    }

    pub async fn explore(
        &self,
        package: TestPackage,
        filter: &TestFilter,
    ) -> Result<EngineResult, EngineError> {
        let runner = self.get_runner(package);
        runner.explore(filter).await
    }

    pub async fn run(
        &self,
        package: TestPackage,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<EngineResult, EngineError> {
        let runner = self.get_runner(package);
        self.run_with(&runner, listener, filter).await
    }

    /// Load, count, run and unload with a runner the caller keeps hold of,
    /// so it can be stopped while the run is in progress
    pub async fn run_with(
        &self,
        runner: &TestRunner,
        listener: Arc<dyn TestEventListener>,
        filter: &TestFilter,
    ) -> Result<EngineResult, EngineError> {
        let timer = Timer::start(format!("Run of {}", runner.package()));
        info!("Running {} with {} runner", runner.package(), runner.kind());

        let outcome = load_and_run(runner, listener, filter).await;

        if let Err(e) = runner.unload().await {
            warn!("Failed to unload {}: {}", runner.package(), e);
        }
        let result = outcome?;

        let result = if result.result_type() == ResultType::TestRun {
            result
        } else {
            EngineResult::merge(&[result], timer.started_at())
        };

        Ok(result.map_xml(|run| {
            timer.stamp_end(run);
            run.insert_child(0, filter.to_node());
        }))
    }
}

async fn load_and_run(
    runner: &TestRunner,
    listener: Arc<dyn TestEventListener>,
    filter: &TestFilter,
) -> Result<EngineResult, EngineError> {
    runner.load().await?;
    let count = runner.count_test_cases(filter).await?;
    listener.on_test_event(&TestEvent::StartRun { count });
    runner.run(listener, filter).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCollector;
    use crate::package::keys;
    use crate::runners::RunnerKind;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = "name: Calc\ncategories: [Fast]\ntests:\n  - name: Add\n  - name: Sub\n    categories: [Slow]\n";

    fn manifest(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, MANIFEST).unwrap();
        path
    }

    fn in_process_engine() -> TestEngine {
        TestEngine::with_context(ServiceContext::in_process(EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_run_wraps_result_in_test_run() {
        let dir = TempDir::new().unwrap();
        let engine = in_process_engine();
        let collector = Arc::new(EventCollector::new());
        let filter = TestFilter::negate(TestFilter::categories(["Slow"]));

        let result = engine
            .run(
                TestPackage::from_file(manifest(&dir, "calc.yaml")),
                collector.clone(),
                &filter,
            )
            .await
            .unwrap();
        let run = result.xml();

        assert_eq!(run.name(), "test-run");
        assert_eq!(run.attr("total"), Some("1"));
        assert!(run.attr("end-time").is_some());
        assert!(run.attr("duration").is_some());
        assert_eq!(run.children()[0].name(), "filter");
        assert_eq!(run.children()[1].name(), "test-suite");
        assert_eq!(collector.events()[0], TestEvent::StartRun { count: 1 });
    }

    #[tokio::test]
    async fn test_multiple_files_stay_one_test_run() {
        let dir = TempDir::new().unwrap();
        let engine = in_process_engine();
        let package = TestPackage::new([manifest(&dir, "a.yaml"), manifest(&dir, "b.yaml")]);

        let result = engine
            .run(package, Arc::new(EventCollector::new()), &TestFilter::Empty)
            .await
            .unwrap();

        assert_eq!(result.xml().attr("total"), Some("4"));
        let suites: Vec<_> = result
            .xml()
            .children()
            .iter()
            .filter(|c| c.name() == "test-suite")
            .collect();
        assert_eq!(suites.len(), 2);
    }

    #[tokio::test]
    async fn test_defaults_select_isolated_domain() {
        let dir = TempDir::new().unwrap();
        let engine = TestEngine::new(EngineConfig::default());
        let package = TestPackage::from_file(manifest(&dir, "calc.yaml"));

        let runner = engine.get_runner(package.clone());
        assert_eq!(runner.kind(), RunnerKind::Domain);

        let result = engine
            .run(package, Arc::new(EventCollector::new()), &TestFilter::Empty)
            .await
            .unwrap();
        assert_eq!(result.xml().attr("passed"), Some("2"));
    }

    #[tokio::test]
    async fn test_config_defaults_do_not_override_package() {
        let config = EngineConfig {
            domain_usage: Some("None".to_string()),
            ..Default::default()
        };
        let engine = TestEngine::new(config);

        let runner = engine.get_runner(TestPackage::from_file("a.yaml"));
        assert_eq!(runner.kind(), RunnerKind::Local);

        let runner = engine.get_runner(
            TestPackage::from_file("a.yaml").with_setting(keys::DOMAIN_USAGE, "Single"),
        );
        assert_eq!(runner.kind(), RunnerKind::Domain);
    }

    #[tokio::test]
    async fn test_explore() {
        let dir = TempDir::new().unwrap();
        let engine = in_process_engine();
        let explored = engine
            .explore(
                TestPackage::from_file(manifest(&dir, "calc.yaml")),
                &TestFilter::categories(["Slow"]),
            )
            .await
            .unwrap();
        assert_eq!(explored.xml().attr("testcasecount"), Some("1"));
    }
}
