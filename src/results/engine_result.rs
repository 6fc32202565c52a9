use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ResultNode, ResultSummary, ResultType, TestStatus};
use crate::package::TestPackage;

/// Immutable wrapper around one result document.
///
/// Every transformation returns a new instance; the wrapped tree is never
/// modified in place once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineResult {
    xml: ResultNode,
}

impl EngineResult {
    pub fn new(xml: ResultNode) -> Self {
        Self { xml }
    }

    /// Error result standing in for a package that could not be loaded or run
    pub fn error(package: &TestPackage, message: impl Into<String>) -> Self {
        let location = package
            .full_name()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| package.display_name());

        let node = ResultNode::new("error")
            .with_attr("id", package.id())
            .with_attr("package", location)
            .with_attr("result", TestStatus::Failed.as_str())
            .with_attr("label", "Error")
            .with_child(ResultNode::new("message").with_text(message));
        Self::new(node)
    }

    /// Result for a package whose run was cancelled before it produced one
    pub fn cancelled(package: &TestPackage, forced: bool) -> Self {
        let full_name = package
            .full_name()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let mut node = ResultNode::new("test-suite")
            .with_attr("type", "Assembly")
            .with_attr("id", package.id())
            .with_attr("name", package.name())
            .with_attr("fullname", full_name);
        ResultSummary {
            status: Some(TestStatus::Failed),
            ..ResultSummary::default()
        }
        .apply(&mut node);
        node.set_attr("label", "Cancelled");
        if forced {
            node.set_attr("site", "Forced");
        }
        Self::new(node)
    }

    pub fn xml(&self) -> &ResultNode {
        &self.xml
    }

    pub fn into_xml(self) -> ResultNode {
        self.xml
    }

    pub fn result_type(&self) -> ResultType {
        ResultType::from_element(self.xml.name())
    }

    pub fn status(&self) -> Option<TestStatus> {
        self.xml.attr("result").and_then(TestStatus::parse)
    }

    pub fn is_error(&self) -> bool {
        self.result_type() == ResultType::Error
    }

    /// Return a new result produced by transforming a copy of the tree
    pub fn map_xml(&self, f: impl FnOnce(&mut ResultNode)) -> Self {
        let mut xml = self.xml.clone();
        f(&mut xml);
        Self::new(xml)
    }

    /// Combine several results under one `test-run` node.
    ///
    /// Counts are summed, the status is folded (`Failed` dominates) and the
    /// children keep their sub-trees in input order.
    pub fn merge(results: &[EngineResult], start: DateTime<Utc>) -> Self {
        let mut run = Self::aggregate("test-run", results);
        run.set_attr("run-date", start.format("%Y-%m-%d"));
        run.set_attr("start-time", start.format("%H:%M:%S"));
        Self::new(run)
    }

    /// Combine several results under a named project node
    pub fn make_package_result(results: &[EngineResult], name: &str, full_name: &str) -> Self {
        let mut suite = ResultNode::new("test-suite")
            .with_attr("type", "Project")
            .with_attr("name", name)
            .with_attr("fullname", full_name);
        let aggregate = Self::aggregate("test-suite", results);
        for (key, value) in aggregate.attributes() {
            suite.set_attr(key.clone(), value);
        }
        *suite.children_mut() = aggregate.children().to_vec();
        Self::new(suite)
    }

    fn aggregate(element: &str, results: &[EngineResult]) -> ResultNode {
        let children: Vec<ResultNode> = results.iter().map(|r| r.xml.clone()).collect();
        let mut node = ResultNode::new(element);
        ResultSummary::of(&children).apply(&mut node);
        *node.children_mut() = children;
        node
    }
}

impl From<ResultNode> for EngineResult {
    fn from(xml: ResultNode) -> Self {
        Self::new(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn suite(passed: u64) -> EngineResult {
        EngineResult::new(
            ResultNode::new("test-suite")
                .with_attr("testcasecount", passed)
                .with_attr("result", "Passed")
                .with_attr("total", passed)
                .with_attr("passed", passed)
                .with_attr("failed", 0)
                .with_attr("inconclusive", 0)
                .with_attr("skipped", 0),
        )
    }

    #[test]
    fn test_merge_sums_counts() {
        let start = Utc.with_ymd_and_hms(2011, 7, 4, 12, 34, 56).unwrap();
        let merged = EngineResult::merge(&[suite(23), suite(31)], start);

        assert_eq!(merged.result_type(), ResultType::TestRun);
        assert_eq!(merged.xml().attr("passed"), Some("54"));
        assert_eq!(merged.xml().attr("total"), Some("54"));
        assert_eq!(merged.xml().attr("result"), Some("Passed"));
        assert_eq!(merged.xml().attr("run-date"), Some("2011-07-04"));
        assert_eq!(merged.xml().attr("start-time"), Some("12:34:56"));
        assert_eq!(merged.xml().children().len(), 2);
    }

    #[test]
    fn test_merge_failed_dominates() {
        let package = TestPackage::new(["missing.yaml"]);
        let error = EngineResult::error(&package, "file not found");
        let merged = EngineResult::merge(&[suite(2), error, suite(3)], Utc::now());

        assert_eq!(merged.status(), Some(TestStatus::Failed));
        assert_eq!(merged.xml().attr("passed"), Some("5"));
        assert_eq!(merged.xml().children()[1].name(), "error");
    }

    #[test]
    fn test_package_result() {
        let merged = EngineResult::make_package_result(&[suite(1), suite(2)], "x.testproj", "/tmp/x.testproj");

        assert_eq!(merged.result_type(), ResultType::TestSuite);
        assert_eq!(merged.xml().attr("type"), Some("Project"));
        assert_eq!(merged.xml().attr("name"), Some("x.testproj"));
        assert_eq!(merged.xml().attr("passed"), Some("3"));
        assert_eq!(merged.xml().attributes()[0].0, "type");
    }

    #[test]
    fn test_error_result() {
        let package = TestPackage::new(["bad.yaml"]);
        let error = EngineResult::error(&package, "bad format");

        assert!(error.is_error());
        assert_eq!(error.status(), Some(TestStatus::Failed));
        assert_eq!(error.xml().child("message").and_then(|m| m.text()), Some("bad format"));
    }

    #[test]
    fn test_map_xml_leaves_original_untouched() {
        let original = suite(1);
        let changed = original.map_xml(|xml| xml.set_attr("result", "Failed"));

        assert_eq!(original.status(), Some(TestStatus::Passed));
        assert_eq!(changed.status(), Some(TestStatus::Failed));
    }
}
