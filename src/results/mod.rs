//! Test results
//!
//! Result element trees, the immutable `EngineResult` wrapper and the
//! merge rules that combine partial results from several runners.

mod engine_result;
mod node;
mod summary;

pub use engine_result::EngineResult;
pub use node::ResultNode;
pub use summary::ResultSummary;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a test or an aggregate of tests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Inconclusive,
    Skipped,
}

impl TestStatus {
    /// Name as written in result documents
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "Passed",
            TestStatus::Failed => "Failed",
            TestStatus::Inconclusive => "Inconclusive",
            TestStatus::Skipped => "Skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            "inconclusive" => Some(TestStatus::Inconclusive),
            "skipped" => Some(TestStatus::Skipped),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "○",
            TestStatus::Inconclusive => "?",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of result, derived from the root element name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultType {
    TestRun,
    TestSuite,
    TestCase,
    Error,
    Other(String),
}

impl ResultType {
    pub fn from_element(name: &str) -> Self {
        match name {
            "test-run" => ResultType::TestRun,
            "test-suite" => ResultType::TestSuite,
            "test-case" => ResultType::TestCase,
            "error" => ResultType::Error,
            other => ResultType::Other(other.to_string()),
        }
    }
}
