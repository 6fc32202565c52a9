//! Runs packages in real `test-agent` processes launched by the agency.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use test_engine::config::EngineConfig;
use test_engine::events::{EventCollector, TestEvent};
use test_engine::package::keys;
use test_engine::runners::RunnerKind;
use test_engine::services::AgentStatus;
use test_engine::{TestEngine, TestFilter, TestPackage};

const MANIFEST: &str = r#"
name: Calc
suites:
  - name: Arithmetic
    tests:
      - name: Add
        command: "test $((1+1)) -eq 2"
      - name: Broken
        command: "echo 'bad sum' >&2; exit 1"
      - name: Manual
        run_state: explicit
"#;

fn engine() -> TestEngine {
    TestEngine::new(EngineConfig {
        agent_path: Some(PathBuf::from(env!("CARGO_BIN_EXE_test-agent"))),
        agent_timeout_secs: 30,
        ..Default::default()
    })
}

fn manifest(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, MANIFEST).unwrap();
    path
}

#[tokio::test]
async fn test_separate_process_run() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    engine.start().await.unwrap();

    let package = TestPackage::from_file(manifest(&dir, "calc.yaml"))
        .with_setting(keys::PROCESS_MODEL, "Separate");
    let runner = engine.get_runner(package);
    assert_eq!(runner.kind(), RunnerKind::Process);

    let collector = Arc::new(EventCollector::new());
    let result = engine
        .run_with(&runner, collector.clone(), &TestFilter::Empty)
        .await
        .unwrap();
    let run = result.xml();

    assert_eq!(run.name(), "test-run");
    assert_eq!(run.attr("result"), Some("Failed"));
    assert_eq!(run.attr("passed"), Some("1"));
    assert_eq!(run.attr("failed"), Some("1"));
    assert_eq!(run.attr("skipped"), Some("1"));

    // Progress crossed the process boundary
    assert_eq!(collector.events()[0], TestEvent::StartRun { count: 2 });
    assert_eq!(
        collector.count_where(|e| matches!(e, TestEvent::TestCase { .. })),
        3
    );

    let agents = engine.context().agency().unwrap().agents();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, AgentStatus::Ready);
    assert!(agents[0].launched);

    engine.stop().await;
    assert!(engine.context().agency().unwrap().agents().is_empty());
}

#[tokio::test]
async fn test_multiple_processes_merge_into_one_run() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    engine.start().await.unwrap();

    let package = TestPackage::new([manifest(&dir, "a.yaml"), manifest(&dir, "b.yaml")])
        .with_setting(keys::PROCESS_MODEL, "Multiple");
    let filter = TestFilter::names(["Calc.Arithmetic.Add"]);

    let result = engine
        .run(package, Arc::new(EventCollector::new()), &filter)
        .await
        .unwrap();
    let run = result.xml();

    assert_eq!(run.attr("result"), Some("Passed"));
    assert_eq!(run.attr("total"), Some("2"));
    assert_eq!(run.children()[0].name(), "filter");

    engine.stop().await;
}

#[tokio::test]
async fn test_explore_in_agent() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    engine.start().await.unwrap();

    let package = TestPackage::from_file(manifest(&dir, "calc.yaml"))
        .with_setting(keys::PROCESS_MODEL, "Separate");
    let explored = engine.explore(package, &TestFilter::Empty).await.unwrap();

    assert_eq!(explored.xml().attr("testcasecount"), Some("2"));
    assert_eq!(explored.xml().find_all("test-case").len(), 2);

    engine.stop().await;
}
