//! Result count aggregation

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ResultNode, TestStatus};

/// Counts and folded status over a set of result nodes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub test_case_count: u64,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub inconclusive: u64,
    pub skipped: u64,
    /// `None` until some contributing node carried a result
    pub status: Option<TestStatus>,
}

impl ResultSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize a list of sibling nodes
    pub fn of(nodes: &[ResultNode]) -> Self {
        let mut summary = Self::new();
        for node in nodes {
            summary.add_node(node);
        }
        summary
    }

    /// Fold one result status into the aggregate.
    ///
    /// Starts at `Inconclusive`; `Skipped` only replaces `Inconclusive`,
    /// `Passed` replaces anything but `Failed`, `Failed` always wins.
    pub fn fold(&mut self, status: TestStatus) {
        let current = self.status.unwrap_or(TestStatus::Inconclusive);
        self.status = Some(match status {
            TestStatus::Failed => TestStatus::Failed,
            TestStatus::Passed if current != TestStatus::Failed => TestStatus::Passed,
            TestStatus::Skipped if current == TestStatus::Inconclusive => TestStatus::Skipped,
            _ => current,
        });
    }

    /// Count a single executed test case
    pub fn add_case(&mut self, status: TestStatus) {
        self.test_case_count += 1;
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Inconclusive => self.inconclusive += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
        self.fold(status);
    }

    /// Add a result node: a test case counts itself, any other node
    /// contributes its count attributes. Nodes without a `result`
    /// attribute only contribute their test case count.
    pub fn add_node(&mut self, node: &ResultNode) {
        let status = node.attr("result").and_then(TestStatus::parse);

        if node.name() == "test-case" {
            match status {
                Some(status) => self.add_case(status),
                None => self.test_case_count += 1,
            }
            return;
        }

        self.test_case_count += node.attr_u64("testcasecount");
        if let Some(status) = status {
            self.total += node.attr_u64("total");
            self.passed += node.attr_u64("passed");
            self.failed += node.attr_u64("failed");
            self.inconclusive += node.attr_u64("inconclusive");
            self.skipped += node.attr_u64("skipped");
            self.fold(status);
        }
    }

    /// Write the count attributes onto `node`
    pub fn apply(&self, node: &mut ResultNode) {
        node.set_attr("testcasecount", self.test_case_count);
        if let Some(status) = self.status {
            node.set_attr("result", status.as_str());
            node.set_attr("total", self.total);
            node.set_attr("passed", self.passed);
            node.set_attr("failed", self.failed);
            node.set_attr("inconclusive", self.inconclusive);
            node.set_attr("skipped", self.skipped);
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == Some(TestStatus::Failed)
    }
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Inconclusive: {} | Skip: {}",
            self.total, self.passed, self.failed, self.inconclusive, self.skipped
        )
    }
}
