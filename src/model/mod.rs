//! Test model
//!
//! The in-memory tree of suites and cases discovered in a test file, and
//! the builder that produces it.

mod builder;

pub use builder::TestBuilder;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::results::{ResultNode, TestStatus};

/// Whether and how a node takes part in a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Runnable,
    /// Runs only when selected directly by a filter
    Explicit,
    Ignored,
    NotRunnable,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Runnable => "Runnable",
            RunState::Explicit => "Explicit",
            RunState::Ignored => "Ignored",
            RunState::NotRunnable => "NotRunnable",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Root suite of one test file
    Assembly,
    Suite,
    Case,
}

/// What executing a test case does
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestAction {
    #[default]
    None,
    /// Shell command; exit status zero passes
    Command {
        command: String,
        timeout: Option<Duration>,
    },
    /// Fixed outcome declared in the manifest
    Outcome {
        result: TestStatus,
        message: Option<String>,
    },
}

/// One suite or case in the test tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub kind: NodeKind,
    pub run_state: RunState,
    pub reason: Option<String>,
    pub categories: Vec<String>,
    /// Categories declared on ancestors
    pub inherited_categories: Vec<String>,
    /// Ids of enclosing suites, outermost first
    pub ancestor_ids: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub action: TestAction,
    pub children: Vec<TestNode>,
}

impl TestNode {
    pub fn is_suite(&self) -> bool {
        self.kind != NodeKind::Case
    }

    pub fn is_explicit(&self) -> bool {
        self.run_state == RunState::Explicit
    }

    /// Own and inherited categories
    pub fn all_categories(&self) -> impl Iterator<Item = &String> {
        self.categories.iter().chain(self.inherited_categories.iter())
    }

    /// Number of test cases below (or at) this node, ignoring filters
    pub fn test_case_count(&self) -> usize {
        match self.kind {
            NodeKind::Case => 1,
            _ => self.children.iter().map(TestNode::test_case_count).sum(),
        }
    }

    /// Element name used for this node in result documents
    pub fn element_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Case => "test-case",
            _ => "test-suite",
        }
    }

    /// Result element carrying this node's identity, without outcome
    pub fn identity_node(&self) -> ResultNode {
        let mut node = ResultNode::new(self.element_name());
        match self.kind {
            NodeKind::Assembly => node.set_attr("type", "Assembly"),
            NodeKind::Suite => node.set_attr("type", "TestSuite"),
            NodeKind::Case => {}
        }
        node.set_attr("id", &self.id);
        node.set_attr("name", &self.name);
        node.set_attr("fullname", &self.full_name);
        node.set_attr("runstate", self.run_state.as_str());
        node
    }

    /// `<properties>` element for categories and properties, if any
    pub fn properties_node(&self) -> Option<ResultNode> {
        if self.categories.is_empty() && self.properties.is_empty() {
            return None;
        }
        let mut props = ResultNode::new("properties");
        for category in &self.categories {
            props.add_child(
                ResultNode::new("property")
                    .with_attr("name", "Category")
                    .with_attr("value", category),
            );
        }
        for (name, value) in &self.properties {
            props.add_child(
                ResultNode::new("property")
                    .with_attr("name", name)
                    .with_attr("value", value),
            );
        }
        Some(props)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn case(id: &str, full_name: &str, categories: &[&str], run_state: RunState) -> TestNode {
        TestNode {
            id: id.to_string(),
            name: full_name.rsplit('.').next().unwrap_or(full_name).to_string(),
            full_name: full_name.to_string(),
            kind: NodeKind::Case,
            run_state,
            reason: None,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            inherited_categories: Vec::new(),
            ancestor_ids: Vec::new(),
            properties: BTreeMap::new(),
            action: TestAction::Outcome {
                result: TestStatus::Passed,
                message: None,
            },
            children: Vec::new(),
        }
    }

    pub fn suite(id: &str, full_name: &str, run_state: RunState, children: Vec<TestNode>) -> TestNode {
        TestNode {
            kind: NodeKind::Suite,
            action: TestAction::None,
            children,
            ..case(id, full_name, &[], run_state)
        }
    }

    /// Root with a runnable fixture and an explicit fixture:
    ///
    /// ```text
    /// Root (0-1000)
    ///   Root.Math (0-1001)       [Fast]
    ///     Root.Math.Add (0-1002) [Fast]
    ///     Root.Math.Sub (0-1003) [Slow]
    ///   Root.Manual (0-1004)     explicit
    ///     Root.Manual.Check (0-1005)
    /// ```
    pub fn tree() -> TestNode {
        let under_math = vec!["0-1000".to_string(), "0-1001".to_string()];
        let mut add = case("0-1002", "Root.Math.Add", &["Fast"], RunState::Runnable);
        add.inherited_categories = vec!["Fast".to_string()];
        add.ancestor_ids = under_math.clone();
        let mut sub = case("0-1003", "Root.Math.Sub", &["Slow"], RunState::Runnable);
        sub.inherited_categories = vec!["Fast".to_string()];
        sub.ancestor_ids = under_math;
        let mut math = suite("0-1001", "Root.Math", RunState::Runnable, vec![add, sub]);
        math.categories = vec!["Fast".to_string()];
        math.ancestor_ids = vec!["0-1000".to_string()];

        let mut check = case("0-1005", "Root.Manual.Check", &[], RunState::Runnable);
        check.ancestor_ids = vec!["0-1000".to_string(), "0-1004".to_string()];
        let mut manual = suite("0-1004", "Root.Manual", RunState::Explicit, vec![check]);
        manual.ancestor_ids = vec!["0-1000".to_string()];

        TestNode {
            kind: NodeKind::Assembly,
            ..suite("0-1000", "Root", RunState::Runnable, vec![math, manual])
        }
    }
}
