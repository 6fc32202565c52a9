//! Test execution worker
//!
//! Walks a loaded test tree, runs the selected cases and builds the result
//! tree, reporting progress to the listener as it goes. The stop flag is
//! checked before every suite and case.

use futures::future::{BoxFuture, FutureExt};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::state::RunControl;
use crate::events::{TestEvent, TestEventListener};
use crate::filter::TestFilter;
use crate::model::{RunState, TestAction, TestNode};
use crate::results::{ResultNode, ResultSummary, TestStatus};
use crate::utils::timer::Timer;

/// Executes one run over a test tree
pub struct TestWorker {
    filter: TestFilter,
    listener: Arc<dyn TestEventListener>,
    control: Arc<RunControl>,
    work_dir: PathBuf,
    default_timeout: Option<Duration>,
}

/// Run state forced onto every case below an ignored or invalid suite
#[derive(Clone, Copy)]
struct Gate<'a> {
    state: RunState,
    reason: Option<&'a str>,
}

impl<'a> Gate<'a> {
    fn of(node: &'a TestNode) -> Option<Self> {
        matches!(node.run_state, RunState::Ignored | RunState::NotRunnable).then(|| Gate {
            state: node.run_state,
            reason: node.reason.as_deref(),
        })
    }
}

struct Outcome {
    status: TestStatus,
    label: Option<&'static str>,
    message: Option<String>,
    output: Option<String>,
}

impl Outcome {
    fn new(status: TestStatus) -> Self {
        Self {
            status,
            label: None,
            message: None,
            output: None,
        }
    }

    fn labelled(status: TestStatus, label: &'static str, message: Option<String>) -> Self {
        Self {
            label: Some(label),
            message,
            ..Self::new(status)
        }
    }
}

impl TestWorker {
    pub fn new(
        filter: TestFilter,
        listener: Arc<dyn TestEventListener>,
        control: Arc<RunControl>,
        work_dir: PathBuf,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            filter,
            listener,
            control,
            work_dir,
            default_timeout,
        }
    }

    /// Run the whole tree; the root suite is always reported
    pub async fn run(self, root: Arc<TestNode>) -> ResultNode {
        self.run_suite(&root, None).await
    }

    fn emit(&self, event: TestEvent) {
        self.listener.on_test_event(&event);
    }

    fn run_suite<'a>(
        &'a self,
        suite: &'a TestNode,
        gate: Option<Gate<'a>>,
    ) -> BoxFuture<'a, ResultNode> {
        async move {
            let gate = gate.or_else(|| Gate::of(suite));
            let timer = Timer::start(&suite.full_name);

            self.emit(TestEvent::StartSuite {
                id: suite.id.clone(),
                name: suite.name.clone(),
                full_name: suite.full_name.clone(),
            });

            let mut result = suite.identity_node();
            if let Some(properties) = suite.properties_node() {
                result.add_child(properties);
            }

            let mut summary = ResultSummary::new();
            let mut cancelled = false;

            for child in &suite.children {
                if self.control.stop_requested() {
                    cancelled = true;
                    break;
                }

                let node = if child.is_suite() {
                    if self.filter.enters(child) {
                        Some(self.run_suite(child, gate).await)
                    } else if child.is_explicit() && self.filter.matches(child) {
                        Some(self.skip_explicit(child))
                    } else {
                        None
                    }
                } else if self.filter.selects(child) {
                    Some(self.run_case(child, gate).await)
                } else if child.is_explicit() && self.filter.matches(child) {
                    Some(self.skip_explicit(child))
                } else {
                    None
                };

                if let Some(node) = node {
                    cancelled |= node.attr("label") == Some("Cancelled");
                    summary.add_node(&node);
                    result.add_child(node);
                }
            }

            if summary.status.is_none() {
                summary.fold(TestStatus::Inconclusive);
            }
            if cancelled || suite.run_state == RunState::NotRunnable {
                summary.fold(TestStatus::Failed);
            }
            summary.apply(&mut result);

            if cancelled {
                result.set_attr("label", "Cancelled");
            } else {
                match suite.run_state {
                    RunState::Ignored => result.set_attr("label", "Ignored"),
                    RunState::NotRunnable => result.set_attr("label", "Invalid"),
                    _ => {}
                }
            }
            timer.stamp(&mut result);

            self.emit(TestEvent::TestSuite {
                result: result.clone(),
            });
            result
        }
        .boxed()
    }

    /// Report an explicit suite or case that was not directly selected
    fn skip_explicit(&self, node: &TestNode) -> ResultNode {
        let mut result = node.identity_node();
        if node.is_suite() {
            let summary = ResultSummary {
                status: Some(TestStatus::Skipped),
                ..ResultSummary::default()
            };
            summary.apply(&mut result);
            result.set_attr("label", "Explicit");
            self.emit(TestEvent::TestSuite {
                result: result.clone(),
            });
        } else {
            result.set_attr("result", TestStatus::Skipped.as_str());
            result.set_attr("label", "Explicit");
            self.emit(TestEvent::TestCase {
                result: result.clone(),
            });
        }
        result
    }

    async fn run_case(&self, case: &TestNode, gate: Option<Gate<'_>>) -> ResultNode {
        self.emit(TestEvent::StartTest {
            id: case.id.clone(),
            name: case.name.clone(),
            full_name: case.full_name.clone(),
        });

        let timer = Timer::start(&case.full_name);

        let (state, reason) = match gate {
            Some(gate) => (gate.state, gate.reason),
            None => (case.run_state, case.reason.as_deref()),
        };
        let reason = reason.map(str::to_string);

        let outcome = match state {
            RunState::Ignored => Outcome::labelled(TestStatus::Skipped, "Ignored", reason),
            RunState::NotRunnable => Outcome::labelled(TestStatus::Failed, "Invalid", reason),
            _ => self.execute(case).await,
        };

        let mut result = case.identity_node();
        if let Some(properties) = case.properties_node() {
            result.add_child(properties);
        }
        result.set_attr("result", outcome.status.as_str());
        if let Some(label) = outcome.label {
            result.set_attr("label", label);
        }
        timer.stamp(&mut result);

        if let Some(message) = outcome.message {
            let element = match outcome.status {
                TestStatus::Failed => "failure",
                _ => "reason",
            };
            result.add_child(
                ResultNode::new(element).with_child(ResultNode::new("message").with_text(message)),
            );
        }
        if let Some(output) = outcome.output.filter(|o| !o.is_empty()) {
            result.add_child(ResultNode::new("output").with_text(output));
        }

        self.emit(TestEvent::TestCase {
            result: result.clone(),
        });
        result
    }

    async fn execute(&self, case: &TestNode) -> Outcome {
        match &case.action {
            TestAction::None => Outcome::new(TestStatus::Passed),
            TestAction::Outcome { result, message } => Outcome {
                message: message.clone(),
                ..Outcome::new(*result)
            },
            TestAction::Command { command, timeout } => {
                self.run_command(case, command, timeout.or(self.default_timeout))
                    .await
            }
        }
    }

    async fn run_command(
        &self,
        case: &TestNode,
        command: &str,
        timeout: Option<Duration>,
    ) -> Outcome {
        debug!("Running {}: {}", case.full_name, command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.work_dir)
            .env("TEST_ENGINE_TEST_ID", &case.id)
            .env("TEST_ENGINE_TEST_NAME", &case.full_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return Outcome::labelled(
                    TestStatus::Failed,
                    "Error",
                    Some(format!("Failed to start test command: {e}")),
                )
            }
        };

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    return Outcome::labelled(
                        TestStatus::Failed,
                        "Timeout",
                        Some(format!("Test exceeded timeout of {}ms", limit.as_millis())),
                    )
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let mut outcome = if output.status.success() {
                    Outcome::new(TestStatus::Passed)
                } else {
                    let message = if stderr.is_empty() {
                        format!("Test command exited with {}", output.status)
                    } else {
                        stderr
                    };
                    Outcome {
                        message: Some(message),
                        ..Outcome::new(TestStatus::Failed)
                    }
                };
                outcome.output = Some(stdout);
                outcome
            }
            Err(e) => Outcome::labelled(
                TestStatus::Failed,
                "Error",
                Some(format!("Failed to wait for test command: {e}")),
            ),
        }
    }
}

/// Discovery result for a tree: the suites that would be entered and the
/// cases that would be reported, without running anything
pub fn explore_tree(filter: &TestFilter, root: &TestNode) -> ResultNode {
    let (node, _) = explore_node(filter, root);
    node
}

fn explore_node(filter: &TestFilter, node: &TestNode) -> (ResultNode, usize) {
    let mut result = node.identity_node();
    if let Some(properties) = node.properties_node() {
        result.add_child(properties);
    }
    if !node.is_suite() {
        return (result, 1);
    }

    let mut count = 0;
    let mut children = Vec::new();
    for child in &node.children {
        let visible = if child.is_suite() {
            filter.enters(child)
        } else {
            filter.selects(child)
        };
        if visible {
            let (explored, cases) = explore_node(filter, child);
            count += cases;
            children.push(explored);
        }
    }

    result.set_attr("testcasecount", count);
    for child in children {
        result.add_child(child);
    }
    (result, count)
}

/// Number of cases a run with `filter` would report as run
pub fn count_selected(filter: &TestFilter, node: &TestNode) -> usize {
    node.children
        .iter()
        .map(|child| {
            if child.is_suite() {
                if filter.enters(child) {
                    count_selected(filter, child)
                } else {
                    0
                }
            } else {
                usize::from(filter.selects(child))
            }
        })
        .sum()
}
